//! Failure semantics: hard OOM aborts, MayFail large allocations return
//! null, and the tripwire fires.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::GcFixture;
use hades_gc::cell::{ArrayStorage, GcCell};
use hades_gc::segment::{MAX_NORMAL_ALLOC_SIZE, SEGMENT_SIZE};
use hades_gc::GcConfig;

fn tiny_fixture() -> GcFixture {
    GcFixture::with_config(GcConfig {
        min_heap_size: SEGMENT_SIZE,
        init_heap_size: 2 * SEGMENT_SIZE,
        max_heap_size: 4 * SEGMENT_SIZE,
        concurrent: false,
        ..Default::default()
    })
}

/// Exhausting the max heap size with live data is fatal.
#[test]
#[should_panic(expected = "OOM")]
fn test_heap_exhaustion_is_fatal() {
    let mut fixture = tiny_fixture();
    loop {
        let GcFixture { gc, rt } = &mut fixture;
        let arr = ArrayStorage::create_long_lived(4096, gc, rt);
        fixture.root(arr as *mut GcCell);
    }
}

/// A MayFail large allocation returns None instead of aborting.
#[test]
fn test_may_fail_large_allocation() {
    let mut fixture = tiny_fixture();
    let GcFixture { gc, rt } = &mut fixture;
    // Far beyond the 4-segment heap limit.
    let capacity = (16 * SEGMENT_SIZE) / 8;
    let result = ArrayStorage::create_large(capacity, true, gc, rt);
    assert!(result.is_none(), "MayFail allocation must return None");

    // The heap remains usable afterwards.
    let ok = ArrayStorage::create(8, gc, rt);
    assert!(!ok.is_null());
}

/// A large allocation within the limit succeeds in a jumbo segment even
/// when it exceeds the normal cell maximum.
#[test]
fn test_large_allocation_within_limit() {
    let mut fixture = GcFixture::with_defaults();
    let GcFixture { gc, rt } = &mut fixture;
    let capacity = MAX_NORMAL_ALLOC_SIZE / 8 + 1;
    let arr = ArrayStorage::create_large(capacity, true, gc, rt);
    assert!(arr.is_some());
}

/// The tripwire callback fires once when live bytes cross the limit.
#[test]
fn test_tripwire_fires_on_threshold() {
    let mut fixture = GcFixture::with_config(GcConfig {
        tripwire_limit: Some(64 * 1024),
        concurrent: false,
        ..Default::default()
    });
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    fixture.gc.set_tripwire_callback(Box::new(move |ctx| {
        assert!(ctx.used_bytes > ctx.limit);
        fired_clone.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }));

    // Keep well over 64 KiB live across an old collection.
    for _ in 0..8 {
        let GcFixture { gc, rt } = &mut fixture;
        let arr = ArrayStorage::create_long_lived(4096, gc, rt);
        fixture.root(arr as *mut GcCell);
    }
    fixture.collect();
    assert_eq!(fired.load(Ordering::Relaxed), 1, "tripwire must fire once");

    // Still over the limit: no repeat fire until it drops below.
    fixture.collect();
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}
