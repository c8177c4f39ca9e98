//! Concurrent-mode exercises: the background marker and sweeper running
//! against an allocating mutator, plus general churn stress.

#![cfg(target_pointer_width = "64")]

mod common;

use common::GcFixture;
use hades_gc::cell::{ArrayStorage, DummyObject, GcCell};
use hades_gc::{GcConfig, HermesValue, Phase};

fn concurrent_fixture() -> GcFixture {
    GcFixture::with_config(GcConfig {
        max_heap_size: 128 * 1024 * 1024,
        concurrent: true,
        ..Default::default()
    })
}

/// Allocate steadily while forcing collections; rooted data must survive
/// with its contents intact.
#[test]
fn test_concurrent_collection_preserves_live_data() {
    let mut fixture = concurrent_fixture();

    // A linked list of arrays, each holding a sentinel and a next pointer.
    const LINKS: usize = 64;
    let mut head_root = None;
    let mut prev: *mut ArrayStorage = std::ptr::null_mut();
    for i in 0..LINKS {
        let GcFixture { gc, rt } = &mut fixture;
        let arr = ArrayStorage::create(2, gc, rt);
        unsafe {
            ArrayStorage::resize_within_capacity(arr, 2);
            ArrayStorage::set(arr, 0, HermesValue::encode_number_value(i as f64), gc);
            if !prev.is_null() {
                ArrayStorage::set(
                    arr,
                    1,
                    HermesValue::encode_object_value(prev as *const GcCell),
                    gc,
                );
            }
        }
        prev = arr;
        if i == LINKS - 1 {
            head_root = Some(fixture.root(arr as *mut GcCell));
        }
    }
    let head_root = head_root.unwrap();

    // Churn garbage to force young collections and at least one old
    // collection alongside the mutator.
    for _ in 0..8 {
        for _ in 0..2000 {
            fixture.alloc_dummy();
        }
        fixture.young_collect();
    }
    fixture.collect();

    // Walk the list and verify every sentinel.
    unsafe {
        let mut cur = fixture.root_ptr(head_root) as *mut ArrayStorage;
        for expected in (0..LINKS).rev() {
            assert_eq!(
                ArrayStorage::at(cur, 0).get_number(),
                expected as f64,
                "list payload corrupted at {expected}"
            );
            let next = ArrayStorage::at(cur, 1);
            if expected == 0 {
                assert!(!next.is_pointer());
            } else {
                cur = next.get_pointer() as *mut ArrayStorage;
            }
        }
    }
    assert_eq!(fixture.gc.concurrent_phase(), Phase::None);
}

/// Mutation during a concurrent mark cycle must never lose reachable
/// objects (the barriers feed the marker).
#[test]
fn test_mutation_during_concurrent_mark() {
    let mut fixture = concurrent_fixture();

    let slots = {
        let GcFixture { gc, rt } = &mut fixture;
        ArrayStorage::create_long_lived(128, gc, rt)
    };
    unsafe { ArrayStorage::resize_within_capacity(slots, 128) };
    let slots_root = fixture.root(slots as *mut GcCell);

    {
        let GcFixture { gc, rt } = &mut fixture;
        gc.start_old_collection(rt, "test");
    }

    // Shuffle objects through the array while the marker runs.
    for round in 0..64 {
        let obj = fixture.alloc_dummy();
        unsafe {
            (*obj).hv = HermesValue::encode_number_value(round as f64);
            let GcFixture { gc, .. } = &mut fixture;
            ArrayStorage::set(
                slots,
                round % 128,
                HermesValue::encode_object_value(obj as *const GcCell),
                gc,
            );
        }
        if round % 16 == 0 {
            fixture.young_collect();
        }
    }
    fixture.collect();

    unsafe {
        let slots = fixture.root_ptr(slots_root) as *mut ArrayStorage;
        for round in 0..64usize {
            let hv = ArrayStorage::at(slots, round % 128);
            if hv.is_pointer() {
                let obj = hv.get_pointer() as *mut DummyObject;
                assert!((*obj).hv.is_double(), "stored object corrupted");
            }
        }
    }
}

/// Repeated full collections with heavy churn terminate and keep the
/// freelists consistent.
#[test]
fn test_stress_churn() {
    let mut fixture = concurrent_fixture();
    for round in 0..6 {
        let mut keep = Vec::new();
        for i in 0..512 {
            let GcFixture { gc, rt } = &mut fixture;
            let arr = ArrayStorage::create((i * 7 + round) % 33, gc, rt);
            if i % 11 == 0 {
                keep.push(fixture.root(arr as *mut GcCell));
            }
        }
        fixture.collect();
        fixture.gc.verify_freelists();
        for idx in keep {
            fixture.unroot(idx);
        }
    }
}
