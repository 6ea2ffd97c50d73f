//! One-element typed values for the convenience entry point and tests.
//!
//! The full multidimensional array container lives above this crate; the
//! resolution engine itself only ever touches raw element pointers. `Datum`
//! is the minimal owned value that bridges the two: one element of a
//! concrete type, in its exact in-memory representation, with string
//! storage kept alive alongside.

use std::fmt;

use tessera_kernel::ArenaBuffer;
use tessera_types::{tuple_layout, DataType, StringView};

use crate::error::{Error, Result};
use crate::option;

/// Rust value types that map directly onto a concrete element type.
pub trait ElementValue: Copy + 'static {
    /// The element type this value inhabits.
    const TYPE: DataType;

    /// Write the element representation.
    ///
    /// # Safety
    ///
    /// `dst` must point at writable storage for one element of
    /// [`Self::TYPE`].
    unsafe fn write_to(self, dst: *mut u8);

    /// Read the element representation back.
    ///
    /// # Safety
    ///
    /// `src` must point at a valid element of [`Self::TYPE`].
    unsafe fn read_from(src: *const u8) -> Self;
}

macro_rules! pod_element {
    ($ty:ty, $dt:expr) => {
        impl ElementValue for $ty {
            const TYPE: DataType = $dt;

            unsafe fn write_to(self, dst: *mut u8) {
                (dst as *mut $ty).write_unaligned(self)
            }

            unsafe fn read_from(src: *const u8) -> Self {
                (src as *const $ty).read_unaligned()
            }
        }
    };
}

pod_element!(i32, DataType::Int32);
pod_element!(i64, DataType::Int64);
pod_element!(f32, DataType::Float32);
pod_element!(f64, DataType::Float64);

impl ElementValue for bool {
    const TYPE: DataType = DataType::Bool;

    unsafe fn write_to(self, dst: *mut u8) {
        *dst = self as u8
    }

    unsafe fn read_from(src: *const u8) -> Self {
        *src != 0
    }
}

/// A single owned element of a concrete type.
pub struct Datum {
    ty: DataType,
    buf: ArenaBuffer,
    /// Byte storage that embedded string views point into.
    backing: Vec<Box<[u8]>>,
}

impl Datum {
    /// An all-zero element of `ty`.
    pub fn zeroed(ty: DataType) -> Result<Datum> {
        let layout = ty
            .layout()
            .ok_or_else(|| Error::invalid_layout(format!("type {ty} has no concrete layout")))?;
        Ok(Datum {
            ty,
            buf: ArenaBuffer::zeroed(layout.size),
            backing: Vec::new(),
        })
    }

    /// A primitive element.
    pub fn of<T: ElementValue>(value: T) -> Datum {
        let mut datum = Datum::zeroed(T::TYPE).expect("element types have a concrete layout");
        // SAFETY: the buffer was sized for one element of T::TYPE.
        unsafe {
            value.write_to(datum.buf.as_mut_ptr());
        }
        datum
    }

    /// A present (non-NA) optional element.
    pub fn option_of<T: ElementValue>(value: T) -> Datum {
        let mut datum = Datum::of(value);
        datum.ty = DataType::option(T::TYPE);
        datum
    }

    /// The absent optional element of the given value type.
    pub fn option_na(value_ty: DataType) -> Result<Datum> {
        let mut datum = Datum::zeroed(DataType::option(value_ty.clone()))?;
        // SAFETY: the buffer was sized for one element of value_ty.
        unsafe {
            option::write_na(&value_ty, datum.buf.as_mut_ptr())?;
        }
        Ok(datum)
    }

    /// A string element. The bytes are copied into owned backing storage
    /// that lives as long as the datum.
    pub fn string(value: &str) -> Datum {
        let boxed: Box<[u8]> = value.as_bytes().into();
        let view = StringView::new(&boxed);
        let mut datum = Datum::zeroed(DataType::String).expect("strings have a concrete layout");
        // SAFETY: the buffer was sized for one StringView.
        unsafe {
            (datum.buf.as_mut_ptr() as *mut StringView).write_unaligned(view);
        }
        datum.backing.push(boxed);
        datum
    }

    /// A tuple element assembled from field values, using C-struct layout.
    pub fn tuple(fields: Vec<Datum>) -> Result<Datum> {
        let types: Vec<DataType> = fields.iter().map(|f| f.ty.clone()).collect();
        let (layout, offsets) = tuple_layout(&types)
            .ok_or_else(|| Error::invalid_layout("tuple fields must be concrete"))?;
        let mut buf = ArenaBuffer::zeroed(layout.size);
        let mut backing = Vec::new();
        for (field, offset) in fields.into_iter().zip(&offsets) {
            // SAFETY: the field buffer holds exactly one element whose span
            // fits at its offset within the tuple layout.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    field.buf.as_ptr(),
                    buf.as_mut_ptr().add(*offset),
                    field.buf.len(),
                );
            }
            backing.extend(field.backing);
        }
        Ok(Datum {
            ty: DataType::Tuple(types),
            buf,
            backing,
        })
    }

    /// The element's type.
    pub fn ty(&self) -> &DataType {
        &self.ty
    }

    /// Raw pointer to the element bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    /// Mutable raw pointer to the element bytes.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    /// Read the value back as a primitive, accepting both the plain and
    /// option-wrapped type (check [`is_na`](Datum::is_na) first for the
    /// latter).
    pub fn get<T: ElementValue>(&self) -> Option<T> {
        if self.ty == T::TYPE || self.ty == DataType::option(T::TYPE) {
            // SAFETY: type checked; the buffer holds one such element.
            Some(unsafe { T::read_from(self.buf.as_ptr()) })
        } else {
            None
        }
    }

    /// Read a string element back, `None` for non-strings and NA.
    pub fn as_str(&self) -> Option<&str> {
        if self.ty.strip_option() != DataType::String {
            return None;
        }
        // SAFETY: type checked; the view points into this datum's backing.
        let view = unsafe { (self.buf.as_ptr() as *const StringView).read_unaligned() };
        if view.is_na() {
            return None;
        }
        std::str::from_utf8(unsafe { view.as_bytes() }).ok()
    }

    /// True when an optional element holds the absent value.
    pub fn is_na(&self) -> bool {
        match &self.ty {
            // SAFETY: the buffer holds one element of the inner type.
            DataType::Option(inner) => unsafe { option::is_na_at(inner, self.buf.as_ptr()) },
            _ => false,
        }
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datum")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        assert_eq!(Datum::of(42i32).get::<i32>(), Some(42));
        assert_eq!(Datum::of(2.5f64).get::<f64>(), Some(2.5));
        assert_eq!(Datum::of(true).get::<bool>(), Some(true));
        assert_eq!(Datum::of(1i64).get::<f64>(), None);
    }

    #[test]
    fn test_string_round_trip() {
        let datum = Datum::string("hello");
        assert_eq!(datum.as_str(), Some("hello"));
        assert_eq!(*datum.ty(), DataType::String);
    }

    #[test]
    fn test_option_na() {
        let na = Datum::option_na(DataType::Float64).unwrap();
        assert!(na.is_na());

        let present = Datum::option_of(1.5f64);
        assert!(!present.is_na());
        assert_eq!(present.get::<f64>(), Some(1.5));
    }

    #[test]
    fn test_tuple_assembly() {
        let datum = Datum::tuple(vec![
            Datum::of(1i32),
            Datum::string("a"),
            Datum::of(2.0f64),
        ])
        .unwrap();
        assert_eq!(
            *datum.ty(),
            DataType::Tuple(vec![DataType::Int32, DataType::String, DataType::Float64])
        );
    }
}
