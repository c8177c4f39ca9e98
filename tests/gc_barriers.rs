//! Write barrier behavior: generational card dirtying and the
//! snapshot-at-the-beginning barrier that protects concurrent marking.

mod common;

use common::GcFixture;
use hades_gc::cell::{ArrayStorage, DummyObject, GcCell};
use hades_gc::{HermesValue, Phase};

/// Publishing a young object through an old-gen slot must dirty the card;
/// without it the next young collection would treat the object as
/// unreachable.
#[test]
fn test_relocation_barrier_keeps_young_object_alive() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let old_arr = ArrayStorage::create_long_lived(1, gc, rt);
    unsafe { ArrayStorage::resize_within_capacity(old_arr, 1) };
    let root = fixture.root(old_arr as *mut GcCell);

    // A young object reachable only through the old-gen array.
    let young = fixture.alloc_dummy();
    unsafe {
        (*young).hv = HermesValue::encode_number_value(42.0);
        let GcFixture { gc, .. } = &mut fixture;
        ArrayStorage::set(
            old_arr,
            0,
            HermesValue::encode_object_value(young as *const _),
            gc,
        );
    }

    fixture.young_collect();

    unsafe {
        let old_arr = fixture.root_ptr(root) as *mut ArrayStorage;
        let survivor = ArrayStorage::at(old_arr, 0).get_pointer() as *mut DummyObject;
        assert!(
            !fixture.gc.in_young_gen(survivor as usize),
            "the published object must have been evacuated, not dropped"
        );
        assert_eq!((*survivor).hv.get_number(), 42.0);
    }
}

/// The range constructor barrier covers bulk initialization: every slot
/// in the range is rediscovered through the dirtied cards.
#[test]
fn test_constructor_range_barrier() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let old_arr = ArrayStorage::create_long_lived(8, gc, rt);
    unsafe { ArrayStorage::resize_within_capacity(old_arr, 8) };
    let root = fixture.root(old_arr as *mut GcCell);

    let mut youngs = Vec::new();
    for _ in 0..8 {
        youngs.push(fixture.alloc_dummy());
    }
    unsafe {
        // Bulk-write without per-slot barriers, then issue one range
        // barrier, as array constructors do.
        let data = ArrayStorage::data(old_arr);
        for (idx, &obj) in youngs.iter().enumerate() {
            data.add(idx)
                .write(HermesValue::encode_object_value(obj as *const _));
        }
        fixture
            .gc
            .constructor_write_barrier_range(data, youngs.len());
    }

    fixture.young_collect();

    unsafe {
        let old_arr = fixture.root_ptr(root) as *mut ArrayStorage;
        for idx in 0..8 {
            let cell = ArrayStorage::at(old_arr, idx).get_pointer();
            assert!(!fixture.gc.in_young_gen(cell as usize));
        }
    }
}

/// Snapshot-at-the-beginning: a pointer overwritten while marking is in
/// progress must still be treated as live for the rest of the cycle.
#[test]
fn test_snapshot_barrier_preserves_overwritten_pointer() {
    let mut fixture = GcFixture::with_defaults();

    // a -> b, both in the old gen.
    let (a, b) = {
        let GcFixture { gc, rt } = &mut fixture;
        let a = DummyObject::create_long_lived(gc, rt);
        let b = DummyObject::create_long_lived(gc, rt);
        unsafe {
            (*a).other.set(b, gc);
        }
        (a, b)
    };
    let weak_b = fixture.new_weak_ref(b);
    let a_root = fixture.root(a as *mut GcCell);

    // Start an old collection; in incremental mode it stays in Mark until
    // young collections drive it forward.
    {
        let GcFixture { gc, rt } = &mut fixture;
        gc.start_old_collection(rt, "test");
    }
    assert_eq!(fixture.gc.concurrent_phase(), Phase::Mark);

    // While marking is live, sever the only strong path to b. The
    // snapshot barrier enqueues the old value.
    unsafe {
        let a = fixture.root_ptr(a_root) as *mut DummyObject;
        let GcFixture { gc, .. } = &mut fixture;
        (*a).other.set_null(gc);
    }

    // Drive the collection to completion.
    while fixture.gc.concurrent_phase() != Phase::None {
        fixture.young_collect();
    }

    // b was unreachable at the end, but reachable in the snapshot: it must
    // survive this cycle.
    assert!(
        weak_b.get(&mut fixture.gc).is_some(),
        "snapshot barrier must keep the overwritten target alive"
    );

    // The next full collection reclaims it.
    fixture.collect();
    assert!(weak_b.get(&mut fixture.gc).is_none());
}

/// Without any marking in progress, overwriting a pointer frees the old
/// target at the next full collection.
#[test]
fn test_overwrite_without_marking_frees_target() {
    let mut fixture = GcFixture::with_defaults();
    let (a, b) = {
        let GcFixture { gc, rt } = &mut fixture;
        let a = DummyObject::create_long_lived(gc, rt);
        let b = DummyObject::create_long_lived(gc, rt);
        unsafe { (*a).other.set(b, gc) };
        (a, b)
    };
    let weak_b = fixture.new_weak_ref(b);
    let _a_root = fixture.root(a as *mut GcCell);

    unsafe {
        let GcFixture { gc, .. } = &mut fixture;
        (*a).other.set_null(gc);
    }
    fixture.collect();
    assert!(weak_b.get(&mut fixture.gc).is_none());
}
