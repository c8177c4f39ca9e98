//! Core collection behavior: liveness, evacuation, promotion, ids,
//! freelists, and large allocations.

mod common;

use std::sync::atomic::Ordering;

use common::GcFixture;
use hades_gc::cell::{ArrayStorage, DummyObject, GcCell};
use hades_gc::segment::MAX_NORMAL_ALLOC_SIZE;
use hades_gc::{GcConfig, HermesValue};

/// One rooted and one garbage object: exactly the garbage one is
/// finalized and collected, and the survivor accounts for all remaining
/// allocated bytes.
#[test]
fn test_collects_garbage_keeps_live() {
    let mut fixture = GcFixture::with_defaults();
    let (live, live_probe) = fixture.alloc_dummy_with_probe();
    let (_dead, dead_probe) = fixture.alloc_dummy_with_probe();
    let root = fixture.root(live as *mut GcCell);

    fixture.young_collect();

    assert_eq!(dead_probe.load(Ordering::Relaxed), 1, "garbage not finalized");
    assert_eq!(live_probe.load(Ordering::Relaxed), 0, "live object finalized");

    let info = fixture.gc.heap_info();
    assert_eq!(info.allocated_bytes, DummyObject::ALLOCATION_SIZE as u64);
    assert_eq!(info.num_collected_objects, 1);

    // The survivor moved to the old gen and is still usable.
    let live = fixture.root_ptr(root) as *mut DummyObject;
    assert!(!fixture.gc.in_young_gen(live as usize));
}

/// Evacuation preserves the object graph, including self references.
/// Mirrors the classic moved-object scenario: three arrays, one kept.
#[test]
fn test_moved_objects_keep_graph() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;

    let a0 = ArrayStorage::create(0, gc, rt);
    let a1 = ArrayStorage::create(3, gc, rt);
    let a2 = ArrayStorage::create(3, gc, rt);
    unsafe {
        ArrayStorage::resize_within_capacity(a1, 3);
        ArrayStorage::resize_within_capacity(a2, 3);
        // a2 keeps a1 alive; both point back at themselves and each other.
        ArrayStorage::set(a2, 0, HermesValue::encode_object_value(a1 as *const _), gc);
        ArrayStorage::set(a1, 0, HermesValue::encode_object_value(a1 as *const _), gc);
        ArrayStorage::set(a1, 1, HermesValue::encode_object_value(a2 as *const _), gc);
        ArrayStorage::set(a2, 2, HermesValue::encode_object_value(a2 as *const _), gc);
    }
    let _ = a0; // unreachable, dies in the collection
    let root = fixture.root(a2 as *mut GcCell);

    let collected_before = fixture.gc.heap_info().num_collected_objects;
    fixture.young_collect();
    let collected_after = fixture.gc.heap_info().num_collected_objects;
    assert_eq!(collected_after - collected_before, 1, "only a0 should die");

    unsafe {
        let a2 = fixture.root_ptr(root) as *mut ArrayStorage;
        let a1 = ArrayStorage::at(a2, 0).get_pointer() as *mut ArrayStorage;
        assert_eq!(
            ArrayStorage::at(a1, 0).get_pointer() as usize,
            a1 as usize,
            "a1[0] must still be a1"
        );
        assert_eq!(ArrayStorage::at(a1, 1).get_pointer() as usize, a2 as usize);
        assert_eq!(ArrayStorage::at(a2, 2).get_pointer() as usize, a2 as usize);
    }
}

/// Object ids are stable across any number of collections that keep the
/// object alive, and resolve back to the current address.
#[test]
fn test_object_id_stable_across_moves() {
    let mut fixture = GcFixture::with_defaults();
    let obj = fixture.alloc_dummy();
    let root = fixture.root(obj as *mut GcCell);
    let id = fixture.gc.object_id(obj as *const GcCell);

    fixture.young_collect();
    let moved = fixture.root_ptr(root);
    assert_ne!(moved as usize, obj as usize, "young cells move on collection");
    assert_eq!(fixture.gc.object_id(moved), id);
    assert_eq!(fixture.gc.object_for_id(id), Some(moved));

    fixture.collect();
    let moved = fixture.root_ptr(root);
    assert_eq!(fixture.gc.object_id(moved), id);

    // Dead objects drop their ids.
    fixture.unroot(root);
    fixture.collect();
    assert_eq!(fixture.gc.object_for_id(id), None);
}

/// After a young collection the nursery is completely empty and every
/// reachable cell lives in the old generation.
#[test]
fn test_young_gen_empty_after_collection() {
    let mut fixture = GcFixture::with_defaults();
    let mut roots = Vec::new();
    for _ in 0..16 {
        let obj = fixture.alloc_dummy();
        roots.push(fixture.root(obj as *mut GcCell));
    }
    fixture.young_collect();
    for root in roots {
        let cell = fixture.root_ptr(root);
        assert!(!fixture.gc.in_young_gen(cell as usize));
    }
    let info = fixture.gc.heap_info();
    assert_eq!(
        info.allocated_bytes,
        16 * DummyObject::ALLOCATION_SIZE as u64,
        "young gen must be empty, survivors counted in the old gen"
    );
}

/// Paired allocation puts both cells in the young gen with no collection
/// between them.
#[test]
fn test_make2_young_gen() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let size = ArrayStorage::allocation_size(4);
    let (first, second) = gc.make2_young_gen_unsafe(
        rt,
        size,
        hades_gc::cell::CellKind::ArrayStorage,
        size,
        hades_gc::cell::CellKind::ArrayStorage,
    );
    assert!(gc.in_young_gen(first as usize));
    assert!(gc.in_young_gen(second as usize));
    assert_eq!(second as usize - first as usize, size);
}

/// In the promote-at-startup mode, young segments move wholesale to the
/// old gen: surviving objects keep their addresses.
#[test]
fn test_promotion_mode_keeps_addresses() {
    let mut fixture = GcFixture::with_config(GcConfig {
        alloc_in_young: false,
        concurrent: false,
        ..Default::default()
    });
    let obj = fixture.alloc_dummy();
    let root = fixture.root(obj as *mut GcCell);
    fixture.young_collect();
    assert_eq!(
        fixture.root_ptr(root) as usize,
        obj as usize,
        "promotion must not move cells"
    );
    assert!(!fixture.gc.in_young_gen(obj as usize));

    // After TTI, normal collections resume and cells move again.
    fixture.gc.tti_reached();
    let young = fixture.alloc_dummy();
    let young_root = fixture.root(young as *mut GcCell);
    fixture.young_collect();
    assert_ne!(fixture.root_ptr(young_root) as usize, young as usize);
}

/// Old-gen sweep trims the unused capacity of live arrays down to their
/// length.
#[test]
fn test_sweep_trims_array_capacity() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let arr = ArrayStorage::create_long_lived(10, gc, rt);
    unsafe {
        ArrayStorage::resize_within_capacity(arr, 3);
        assert_eq!(ArrayStorage::capacity(arr), 10);
    }
    let root = fixture.root(arr as *mut GcCell);

    fixture.collect();

    let arr = fixture.root_ptr(root) as *mut ArrayStorage;
    unsafe {
        assert_eq!(ArrayStorage::len(arr), 3);
        assert_eq!(ArrayStorage::capacity(arr), 3, "tail should be trimmed");
    }
    fixture.gc.verify_freelists();
}

/// Freelists stay well-formed across collections that create, kill, and
/// coalesce cells of many sizes.
#[test]
fn test_freelist_well_formed_after_churn() {
    let mut fixture = GcFixture::with_defaults();
    for round in 0..4 {
        let mut roots = Vec::new();
        for i in 0..64 {
            let GcFixture { gc, rt } = &mut fixture;
            let arr = ArrayStorage::create(i % 17, gc, rt);
            if (i + round) % 3 == 0 {
                roots.push(fixture.root(arr as *mut GcCell));
            }
        }
        fixture.collect();
        fixture.gc.verify_freelists();
        for root in roots {
            fixture.unroot(root);
        }
    }
    fixture.collect();
    fixture.gc.verify_freelists();
}

/// A cell larger than a segment gets a jumbo segment, survives while
/// reachable, and releases the whole segment when it dies.
#[test]
fn test_jumbo_allocation_lifecycle() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let capacity = MAX_NORMAL_ALLOC_SIZE / 8 + 100;
    let big = ArrayStorage::create_large(capacity, false, gc, rt)
        .expect("jumbo allocation must succeed");
    unsafe {
        ArrayStorage::resize_within_capacity(big, capacity);
        assert!(ArrayStorage::capacity(big) >= capacity);
        // Touch both ends, crossing segment units.
        ArrayStorage::set(big, 0, HermesValue::encode_number_value(1.0), gc);
        ArrayStorage::set(big, capacity - 1, HermesValue::encode_number_value(2.0), gc);
    }
    let root = fixture.root(big as *mut GcCell);

    fixture.collect();
    let big = fixture.root_ptr(root) as *mut ArrayStorage;
    unsafe {
        assert_eq!(ArrayStorage::at(big, 0).get_number(), 1.0);
        assert_eq!(ArrayStorage::at(big, capacity - 1).get_number(), 2.0);
    }
    let info = fixture.gc.heap_info();
    assert_eq!(info.num_large_allocations, 1);
    let with_jumbo = info.allocated_bytes;

    fixture.unroot(root);
    fixture.collect();
    let info = fixture.gc.heap_info();
    assert!(
        info.allocated_bytes + ArrayStorage::allocation_size(capacity) as u64 <= with_jumbo + 1,
        "jumbo bytes must be released"
    );
}

/// A large pointer-bearing jumbo cell keeps its referents alive through
/// dirty-card scanning of the jumbo segment.
#[test]
fn test_jumbo_old_to_young_pointers() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let capacity = MAX_NORMAL_ALLOC_SIZE / 8 + 100;
    let big = ArrayStorage::create_large(capacity, false, gc, rt).unwrap();
    unsafe { ArrayStorage::resize_within_capacity(big, capacity) };
    let root = fixture.root(big as *mut GcCell);

    // Store young pointers at both ends of the jumbo cell.
    let young_a = fixture.alloc_dummy();
    let young_b = fixture.alloc_dummy();
    {
        let GcFixture { gc, .. } = &mut fixture;
        unsafe {
            ArrayStorage::set(
                big,
                0,
                HermesValue::encode_object_value(young_a as *const _),
                gc,
            );
            ArrayStorage::set(
                big,
                capacity - 1,
                HermesValue::encode_object_value(young_b as *const _),
                gc,
            );
        }
    }
    fixture.young_collect();
    let big = fixture.root_ptr(root) as *mut ArrayStorage;
    unsafe {
        let a = ArrayStorage::at(big, 0).get_pointer();
        let b = ArrayStorage::at(big, capacity - 1).get_pointer();
        assert!(!fixture.gc.in_young_gen(a as usize));
        assert!(!fixture.gc.in_young_gen(b as usize));
        assert_ne!(a as usize, young_a as usize, "referent must be evacuated");
    }
}
