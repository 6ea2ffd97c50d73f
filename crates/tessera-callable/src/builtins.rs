//! Process-wide builtin callables.
//!
//! Builtins are constructed once, on first use, behind `OnceLock`, then
//! shared immutably by reference for the life of the process. Their
//! dispatch tables are filled during that one construction and never
//! mutated afterwards — the table is the only registry in this crate.

use std::sync::{Arc, OnceLock};

use tessera_kernel::Kernel;
use tessera_types::{DataType, StringView, TypeId};

use crate::callable::Callable;
use crate::dispatch::{DispatchCallable, DispatchTable};
use crate::elementwise::{
    leaf, AddKernel, AssignKernel, ConvertKernel, EqualKernel, MultiplyKernel, StringEqualKernel,
    SubtractKernel,
};
use crate::fieldwise::TupleEqualCallable;
use crate::option::{AssignNaCallable, IsNaCallable};

fn register<const N: usize>(
    table: &mut DispatchTable,
    key: [TypeId; N],
    callable: Arc<dyn Callable>,
) {
    table
        .insert(key, callable)
        .expect("builtin overload registered twice");
}

fn homogeneous_binary<K: Kernel>(
    table: &mut DispatchTable,
    name: &'static str,
    ty: DataType,
    make: fn() -> K,
) {
    let id = ty.type_id();
    register(
        table,
        [id, id],
        leaf(name, vec![ty.clone(), ty.clone()], ty, make),
    );
}

macro_rules! numeric_binary_builtin {
    ($(#[$meta:meta])* $fn_name:ident, $name:literal, $kernel:ident) => {
        $(#[$meta])*
        pub fn $fn_name() -> Arc<dyn Callable> {
            static INSTANCE: OnceLock<Arc<dyn Callable>> = OnceLock::new();
            INSTANCE
                .get_or_init(|| {
                    let mut table = DispatchTable::new($name);
                    homogeneous_binary(&mut table, $name, DataType::Int32, $kernel::<i32>::new);
                    homogeneous_binary(&mut table, $name, DataType::Int64, $kernel::<i64>::new);
                    homogeneous_binary(&mut table, $name, DataType::Float32, $kernel::<f32>::new);
                    homogeneous_binary(&mut table, $name, DataType::Float64, $kernel::<f64>::new);
                    Arc::new(DispatchCallable::new($name, 2, false, table))
                })
                .clone()
        }
    };
}

numeric_binary_builtin!(
    /// Elementwise addition over the numeric types.
    add,
    "add",
    AddKernel
);
numeric_binary_builtin!(
    /// Elementwise subtraction over the numeric types.
    subtract,
    "subtract",
    SubtractKernel
);
numeric_binary_builtin!(
    /// Elementwise multiplication over the numeric types.
    multiply,
    "multiply",
    MultiplyKernel
);

/// Elementwise equality: primitives, strings, and tuples (field recursion).
pub fn equal() -> Arc<dyn Callable> {
    static INSTANCE: OnceLock<Arc<dyn Callable>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let mut table = DispatchTable::new("equal");
            comparison::<u8>(&mut table, DataType::Bool);
            comparison::<i32>(&mut table, DataType::Int32);
            comparison::<i64>(&mut table, DataType::Int64);
            comparison::<f32>(&mut table, DataType::Float32);
            comparison::<f64>(&mut table, DataType::Float64);
            register(
                &mut table,
                [TypeId::STRING, TypeId::STRING],
                leaf(
                    "equal",
                    vec![DataType::String, DataType::String],
                    DataType::Bool,
                    StringEqualKernel::new,
                ),
            );
            register(
                &mut table,
                [TypeId::TUPLE, TypeId::TUPLE],
                Arc::new(TupleEqualCallable::new()),
            );
            Arc::new(DispatchCallable::new("equal", 2, false, table))
        })
        .clone()
}

fn comparison<T: Copy + PartialEq + 'static>(table: &mut DispatchTable, ty: DataType) {
    let id = ty.type_id();
    register(
        table,
        [id, id],
        leaf(
            "equal",
            vec![ty.clone(), ty],
            DataType::Bool,
            EqualKernel::<T>::new,
        ),
    );
}

/// Elementwise assignment: identity copies plus the registered numeric
/// conversions, dispatched on (destination, source) type ids.
pub fn assign() -> Arc<dyn Callable> {
    static INSTANCE: OnceLock<Arc<dyn Callable>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            let mut table = DispatchTable::new("assign");
            identity::<u8>(&mut table, DataType::Bool);
            identity::<i32>(&mut table, DataType::Int32);
            identity::<i64>(&mut table, DataType::Int64);
            identity::<f32>(&mut table, DataType::Float32);
            identity::<f64>(&mut table, DataType::Float64);
            identity::<StringView>(&mut table, DataType::String);

            conversion(&mut table, DataType::Int32, DataType::Int64, ConvertKernel::<i32, i64>::new);
            conversion(&mut table, DataType::Int32, DataType::Float32, ConvertKernel::<i32, f32>::new);
            conversion(&mut table, DataType::Int32, DataType::Float64, ConvertKernel::<i32, f64>::new);
            conversion(&mut table, DataType::Int64, DataType::Float64, ConvertKernel::<i64, f64>::new);
            conversion(&mut table, DataType::Float32, DataType::Float64, ConvertKernel::<f32, f64>::new);
            conversion(&mut table, DataType::Float64, DataType::Float32, ConvertKernel::<f64, f32>::new);

            Arc::new(DispatchCallable::new("assign", 1, true, table))
        })
        .clone()
}

fn identity<T: Copy + 'static>(table: &mut DispatchTable, ty: DataType) {
    let id = ty.type_id();
    register(
        table,
        [id, id],
        leaf(
            "assign",
            vec![ty.clone()],
            ty,
            AssignKernel::<T>::new,
        ),
    );
}

fn conversion<K: Kernel>(
    table: &mut DispatchTable,
    src: DataType,
    dst: DataType,
    make: fn() -> K,
) {
    register(
        table,
        [dst.type_id(), src.type_id()],
        leaf("assign", vec![src], dst, make),
    );
}

/// The NA test over option elements: `(?T) -> bool`.
pub fn is_na() -> Arc<dyn Callable> {
    static INSTANCE: OnceLock<Arc<dyn Callable>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(IsNaCallable::new()) as Arc<dyn Callable>)
        .clone()
}

/// The NA producer: writes the absent value of its destination option type.
pub fn assign_na() -> Arc<dyn Callable> {
    static INSTANCE: OnceLock<Arc<dyn Callable>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(AssignNaCallable::new()) as Arc<dyn Callable>)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons_are_shared() {
        assert!(Arc::ptr_eq(&add(), &add()));
        assert!(Arc::ptr_eq(&equal(), &equal()));
        assert!(Arc::ptr_eq(&assign(), &assign()));
    }

    #[test]
    fn test_names() {
        assert_eq!(add().name(), "add");
        assert_eq!(is_na().name(), "is_na");
        assert_eq!(assign_na().name(), "assign_na");
    }
}
