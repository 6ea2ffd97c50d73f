//! End-to-end tests for the two-phase engine.
//!
//! These drive the full pipeline: resolve → instantiate → execute →
//! tear down, across dispatch, conversions, composition patterns, option
//! forwarding, and tuple recursion.

use tessera_callable::buffer::{buffered, BUFFER_CHUNK};
use tessera_callable::compose::{compose, left_compound, right_compound};
use tessera_callable::option::lift;
use tessera_callable::{
    builtins, call, instantiate, resolve, DataType, Datum, Error, KernelRequest, KwArgs,
    LeafCallable, Signature,
};
use tessera_kernel::Kernel;

fn kw() -> KwArgs {
    KwArgs::default()
}

// ============================================================================
// Resolution + execution equivalence
// ============================================================================

#[test]
fn test_add_matches_direct_computation() {
    let a = 1.5f64;
    let b = 2.25f64;
    let result = call(&builtins::add(), &[Datum::of(a), Datum::of(b)], &kw()).unwrap();
    // Bit-identical to the hand-written computation.
    assert_eq!(result.get::<f64>().unwrap().to_bits(), (a + b).to_bits());

    let result = call(
        &builtins::add(),
        &[Datum::of(7i32), Datum::of(35i32)],
        &kw(),
    )
    .unwrap();
    assert_eq!(result.get::<i32>(), Some(42));
}

#[test]
fn test_subtract_and_multiply() {
    let difference = call(
        &builtins::subtract(),
        &[Datum::of(10i64), Datum::of(4i64)],
        &kw(),
    )
    .unwrap();
    assert_eq!(difference.get::<i64>(), Some(6));

    let product = call(
        &builtins::multiply(),
        &[Datum::of(6.0f32), Datum::of(7.0f32)],
        &kw(),
    )
    .unwrap();
    assert_eq!(product.get::<f32>(), Some(42.0));
}

#[test]
fn test_assign_conversion_keyed_by_destination() {
    let (dst_ty, graph) = resolve(
        &builtins::assign(),
        Some(&DataType::Float64),
        &[DataType::Int32],
        &kw(),
    )
    .unwrap();
    assert_eq!(dst_ty, DataType::Float64);

    let mut chain = instantiate(&graph, KernelRequest::Single, &[], &[&[]], &kw()).unwrap();
    let source = 21i32;
    let mut out = 0.0f64;
    unsafe {
        chain.single(
            &mut out as *mut f64 as *mut u8,
            &[&source as *const i32 as *const u8],
        );
    }
    assert_eq!(out, 21.0);
}

#[test]
fn test_instantiation_is_deterministic() {
    // The resolved graph is not consumed: two independent arenas built from
    // it must behave identically.
    let (_, graph) = resolve(
        &builtins::add(),
        None,
        &[DataType::Float64, DataType::Float64],
        &kw(),
    )
    .unwrap();

    let mut first = instantiate(&graph, KernelRequest::Single, &[], &[&[], &[]], &kw()).unwrap();
    let mut second = instantiate(&graph, KernelRequest::Single, &[], &[&[], &[]], &kw()).unwrap();

    let a = 0.1f64;
    let b = 0.2f64;
    let mut out_first = 0.0f64;
    let mut out_second = 0.0f64;
    unsafe {
        first.single(
            &mut out_first as *mut f64 as *mut u8,
            &[
                &a as *const f64 as *const u8,
                &b as *const f64 as *const u8,
            ],
        );
        second.single(
            &mut out_second as *mut f64 as *mut u8,
            &[
                &a as *const f64 as *const u8,
                &b as *const f64 as *const u8,
            ],
        );
    }
    assert_eq!(out_first.to_bits(), out_second.to_bits());
}

#[test]
fn test_strided_add_matches_singles() {
    let a = [1.0f64, 2.0, 3.0, 4.0, 5.0];
    let b = [10.0f64, 20.0, 30.0, 40.0, 50.0];
    let mut out = [0.0f64; 5];

    let (_, graph) = resolve(
        &builtins::add(),
        None,
        &[DataType::Float64, DataType::Float64],
        &kw(),
    )
    .unwrap();
    let mut chain = instantiate(&graph, KernelRequest::Strided, &[], &[&[], &[]], &kw()).unwrap();
    let stride = std::mem::size_of::<f64>() as isize;
    unsafe {
        chain.strided(
            out.as_mut_ptr() as *mut u8,
            stride,
            &[a.as_ptr() as *const u8, b.as_ptr() as *const u8],
            &[stride, stride],
            5,
        );
    }
    for i in 0..5 {
        assert_eq!(out[i].to_bits(), (a[i] + b[i]).to_bits());
    }
}

// ============================================================================
// Dispatch behavior
// ============================================================================

#[test]
fn test_dispatch_miss_raises_no_overload() {
    let err = call(
        &builtins::add(),
        &[Datum::of(1i32), Datum::of(1.0f64)],
        &kw(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoOverload { .. }));
}

#[test]
fn test_dispatch_miss_reports_callable_and_types() {
    let err = call(
        &builtins::equal(),
        &[Datum::string("a"), Datum::of(1i32)],
        &kw(),
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("equal"));
    assert!(message.contains("string"));
    assert!(message.contains("int32"));
}

// ============================================================================
// Option forwarding
// ============================================================================

#[test]
fn test_option_forwarding_unary() {
    let lifted = lift(builtins::assign());

    let present = call(&lifted, &[Datum::option_of(5.5f64)], &kw()).unwrap();
    assert_eq!(*present.ty(), DataType::option(DataType::Float64));
    assert!(!present.is_na());
    assert_eq!(present.get::<f64>(), Some(5.5));

    let absent = call(
        &lifted,
        &[Datum::option_na(DataType::Float64).unwrap()],
        &kw(),
    )
    .unwrap();
    assert!(absent.is_na());
}

#[test]
fn test_option_forwarding_binary() {
    let lifted = lift(builtins::add());
    let na = || Datum::option_na(DataType::Int32).unwrap();

    // NA in neither position: equals the child applied to the values.
    let sum = call(
        &lifted,
        &[Datum::option_of(2i32), Datum::option_of(3i32)],
        &kw(),
    )
    .unwrap();
    assert!(!sum.is_na());
    assert_eq!(sum.get::<i32>(), Some(5));

    // NA in position 0.
    let result = call(&lifted, &[na(), Datum::option_of(3i32)], &kw()).unwrap();
    assert!(result.is_na());

    // NA in position 1.
    let result = call(&lifted, &[Datum::option_of(2i32), na()], &kw()).unwrap();
    assert!(result.is_na());
}

#[test]
fn test_option_forwarding_mixed_nullability() {
    // Only position 0 is nullable; position 1 stays a plain value.
    let lifted = lift(builtins::add());
    let sum = call(
        &lifted,
        &[Datum::option_of(40.0f64), Datum::of(2.0f64)],
        &kw(),
    )
    .unwrap();
    assert_eq!(sum.get::<f64>(), Some(42.0));

    let result = call(
        &lifted,
        &[
            Datum::option_na(DataType::Float64).unwrap(),
            Datum::of(2.0f64),
        ],
        &kw(),
    )
    .unwrap();
    assert!(result.is_na());
}

#[test]
fn test_option_forwarding_arity_limit() {
    struct Wide;

    impl Kernel for Wide {
        fn arity(&self) -> usize {
            9
        }

        unsafe fn single(&mut self, _dst: *mut u8, _src: *const *const u8) {
            unreachable!("resolution must fail before any kernel runs")
        }
    }

    let child = LeafCallable::new(
        "wide",
        Signature::new(vec![DataType::Any; 9], DataType::Float64),
        || Wide,
    );
    let lifted = lift(child);
    let types = vec![DataType::option(DataType::Float64); 9];
    let err = resolve(&lifted, None, &types, &kw()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedArity { actual: 9, .. }));
}

// ============================================================================
// Tuple structural equality
// ============================================================================

fn sample_tuple(a: i32, b: &str, c: f64) -> Datum {
    Datum::tuple(vec![Datum::of(a), Datum::string(b), Datum::of(c)]).unwrap()
}

#[test]
fn test_tuple_equality() {
    let equal = builtins::equal();

    let result = call(
        &equal,
        &[sample_tuple(1, "a", 2.0), sample_tuple(1, "a", 2.0)],
        &kw(),
    )
    .unwrap();
    assert_eq!(result.get::<bool>(), Some(true));

    // Perturbing any single field flips the result.
    for perturbed in [
        sample_tuple(2, "a", 2.0),
        sample_tuple(1, "b", 2.0),
        sample_tuple(1, "a", 3.0),
    ] {
        let result = call(&equal, &[sample_tuple(1, "a", 2.0), perturbed], &kw()).unwrap();
        assert_eq!(result.get::<bool>(), Some(false));
    }
}

#[test]
fn test_empty_tuple_is_trivially_equal() {
    let a = Datum::tuple(vec![]).unwrap();
    let b = Datum::tuple(vec![]).unwrap();
    let result = call(&builtins::equal(), &[a, b], &kw()).unwrap();
    assert_eq!(result.get::<bool>(), Some(true));
}

#[test]
fn test_tuple_equality_requires_identical_types() {
    let a = Datum::tuple(vec![Datum::of(1i32)]).unwrap();
    let b = Datum::tuple(vec![Datum::of(1i64)]).unwrap();
    let err = call(&builtins::equal(), &[a, b], &kw()).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

// ============================================================================
// Compose and compounds
// ============================================================================

#[test]
fn test_compose_through_buffer() {
    let composed = compose(builtins::add(), builtins::assign(), DataType::Float64);
    let result = call(
        &composed,
        &[Datum::of(2.5f64), Datum::of(4.0f64)],
        &kw(),
    )
    .unwrap();
    assert_eq!(result.get::<f64>(), Some(6.5));
}

#[test]
fn test_left_compound_accumulates() {
    let accumulate = left_compound(builtins::add());
    let (dst_ty, graph) = resolve(&accumulate, None, &[DataType::Float64], &kw()).unwrap();
    assert_eq!(dst_ty, DataType::Float64);

    let mut chain = instantiate(&graph, KernelRequest::Single, &[], &[&[]], &kw()).unwrap();
    let mut accumulator = 10.0f64;
    let step = 5.0f64;
    for _ in 0..3 {
        unsafe {
            chain.single(
                &mut accumulator as *mut f64 as *mut u8,
                &[&step as *const f64 as *const u8],
            );
        }
    }
    assert_eq!(accumulator, 25.0);
}

#[test]
fn test_right_compound_feeds_destination_second() {
    let accumulate = right_compound(builtins::subtract());
    let (_, graph) = resolve(&accumulate, None, &[DataType::Int64], &kw()).unwrap();
    let mut chain = instantiate(&graph, KernelRequest::Single, &[], &[&[]], &kw()).unwrap();

    // dst = src - dst
    let mut accumulator = 10i64;
    let source = 100i64;
    unsafe {
        chain.single(
            &mut accumulator as *mut i64 as *mut u8,
            &[&source as *const i64 as *const u8],
        );
    }
    assert_eq!(accumulator, 90);
}

// ============================================================================
// Operand buffering
// ============================================================================

#[test]
fn test_buffered_operand_single() {
    let wrapped = buffered(
        builtins::add(),
        vec![DataType::Float64, DataType::Float64],
    );
    let result = call(
        &wrapped,
        &[Datum::of(2.0f64), Datum::of(40i32)],
        &kw(),
    )
    .unwrap();
    assert_eq!(result.get::<f64>(), Some(42.0));
}

#[test]
fn test_buffered_operand_strided_beyond_one_chunk() {
    let count = 2 * BUFFER_CHUNK + 44;
    let a: Vec<f64> = (0..count).map(|i| i as f64).collect();
    let b: Vec<i32> = (0..count).map(|i| (i * 3) as i32).collect();
    let mut out = vec![0.0f64; count];

    let wrapped = buffered(
        builtins::add(),
        vec![DataType::Float64, DataType::Float64],
    );
    let (_, graph) = resolve(
        &wrapped,
        None,
        &[DataType::Float64, DataType::Int32],
        &kw(),
    )
    .unwrap();
    let mut chain = instantiate(&graph, KernelRequest::Strided, &[], &[&[], &[]], &kw()).unwrap();
    unsafe {
        chain.strided(
            out.as_mut_ptr() as *mut u8,
            std::mem::size_of::<f64>() as isize,
            &[a.as_ptr() as *const u8, b.as_ptr() as *const u8],
            &[
                std::mem::size_of::<f64>() as isize,
                std::mem::size_of::<i32>() as isize,
            ],
            count,
        );
    }
    for i in 0..count {
        assert_eq!(out[i], a[i] + b[i] as f64, "element {i}");
    }
}
