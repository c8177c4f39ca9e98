//! Value representation against a live heap: boxed doubles and pointer
//! round trips through `SmallHermesValue`.

mod common;

use common::GcFixture;
use hades_gc::cell::GcCell;
use hades_gc::{HermesValue, SmallHermesValue};

/// Encoding a double that cannot be stored inline allocates a boxed
/// double; unboxing recovers the exact bits.
#[test]
fn test_boxed_double_round_trip() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;

    let inline = SmallHermesValue::encode_hermes_value(
        HermesValue::encode_number_value(4.0),
        gc,
        rt,
    );
    assert!(inline.is_inlined_double());
    assert_eq!(inline.unbox_to_hv(gc.pointer_base()).get_number(), 4.0);

    let boxed =
        SmallHermesValue::encode_hermes_value(HermesValue::encode_number_value(0.1), gc, rt);
    assert!(boxed.is_boxed_double());
    assert!(boxed.is_number());
    assert_eq!(
        boxed
            .unbox_to_hv(gc.pointer_base())
            .get_number()
            .to_bits(),
        (0.1f64).to_bits()
    );
    assert_eq!(boxed.get_number(gc.pointer_base()).to_bits(), (0.1f64).to_bits());
}

/// Singletons and int32s encode without allocating and round trip through
/// the compressed form.
#[test]
fn test_non_pointer_encodings() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let info_before = gc.heap_info().total_allocated_bytes;

    for hv in [
        HermesValue::encode_undefined_value(),
        HermesValue::encode_null_value(),
        HermesValue::encode_empty_value(),
        HermesValue::encode_bool_value(true),
        HermesValue::encode_bool_value(false),
    ] {
        let shv = SmallHermesValue::encode_hermes_value(hv, gc, rt);
        assert_eq!(shv.unbox_to_hv(gc.pointer_base()), hv);
    }

    // Int32 values round trip numerically through the double form.
    let shv =
        SmallHermesValue::encode_hermes_value(HermesValue::encode_int32_value(12), gc, rt);
    assert_eq!(shv.unbox_to_hv(gc.pointer_base()).get_number(), 12.0);

    assert_eq!(
        gc.heap_info().total_allocated_bytes,
        info_before,
        "singleton encoding must not allocate"
    );
}

/// Pointer values keep their kind tag and follow the referent.
#[test]
fn test_pointer_encoding_round_trip() {
    let mut fixture = GcFixture::with_defaults();
    let obj = fixture.alloc_dummy();
    let root = fixture.root(obj as *mut GcCell);

    let shv = {
        let GcFixture { gc, rt } = &mut fixture;
        SmallHermesValue::encode_hermes_value(
            HermesValue::encode_object_value(obj as *const GcCell),
            gc,
            rt,
        )
    };
    assert!(shv.is_object());
    assert!(shv.is_pointer());
    let hv = shv.unbox_to_hv(fixture.gc.pointer_base());
    assert!(hv.is_object());
    assert_eq!(hv.get_pointer() as usize, obj as usize);
    let _ = root;
}
