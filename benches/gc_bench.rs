//! Allocation and collection throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hades_gc::cell::{ArrayStorage, DummyObject, GcCell};
use hades_gc::heap::acceptors::Acceptor;
use hades_gc::util::BitVector;
use hades_gc::{GcCallbacks, GcConfig, HadesGc, HermesValue, SymbolId};

#[derive(Default)]
struct BenchRuntime {
    roots: Vec<HermesValue>,
}

impl GcCallbacks for BenchRuntime {
    fn mark_roots(&mut self, acceptor: &mut dyn Acceptor, _mark_long_lived: bool) {
        for root in &mut self.roots {
            acceptor.accept_root_hv(root as *mut HermesValue);
        }
    }
    fn mark_roots_for_complete_marking(&mut self, acceptor: &mut dyn Acceptor) {
        for root in &mut self.roots {
            acceptor.accept_root_hv(root as *mut HermesValue);
        }
    }
    fn mark_weak_roots(&mut self, _acceptor: &mut dyn Acceptor, _mark_long_lived: bool) {}
    fn symbols_end(&self) -> usize {
        0
    }
    fn unmark_symbols(&mut self) {}
    fn free_symbols(&mut self, _live: &BitVector) {}
    fn is_symbol_live(&self, _sym: SymbolId) -> bool {
        true
    }
}

fn bench_config() -> GcConfig {
    GcConfig {
        max_heap_size: 256 * 1024 * 1024,
        concurrent: false,
        ..Default::default()
    }
}

fn bench_young_alloc(c: &mut Criterion) {
    let mut rt = BenchRuntime::default();
    let mut gc = HadesGc::new(bench_config()).unwrap();
    c.bench_function("young_alloc_dummy", |b| {
        b.iter(|| {
            let obj = DummyObject::create(&mut gc, &mut rt);
            black_box(obj);
        })
    });
}

fn bench_young_collection(c: &mut Criterion) {
    let mut rt = BenchRuntime::default();
    let mut gc = HadesGc::new(bench_config()).unwrap();
    c.bench_function("young_collection_with_survivors", |b| {
        b.iter(|| {
            rt.roots.clear();
            for i in 0..256 {
                let obj = DummyObject::create(&mut gc, &mut rt);
                if i % 8 == 0 {
                    rt.roots
                        .push(HermesValue::encode_object_value(obj as *const GcCell));
                }
            }
            gc.young_collection(&mut rt, "bench");
        })
    });
}

fn bench_write_barrier(c: &mut Criterion) {
    let mut rt = BenchRuntime::default();
    let mut gc = HadesGc::new(bench_config()).unwrap();
    let arr = ArrayStorage::create_long_lived(64, &mut gc, &mut rt);
    unsafe { ArrayStorage::resize_within_capacity(arr, 64) };
    rt.roots
        .push(HermesValue::encode_object_value(arr as *const GcCell));
    let value = HermesValue::encode_number_value(1.5);
    let mut idx = 0usize;
    c.bench_function("old_gen_store_with_barrier", |b| {
        b.iter(|| {
            unsafe { ArrayStorage::set(arr, idx % 64, black_box(value), &mut gc) };
            idx += 1;
        })
    });
}

fn bench_full_collection(c: &mut Criterion) {
    let mut rt = BenchRuntime::default();
    let mut gc = HadesGc::new(bench_config()).unwrap();
    // A persistent object graph for the collector to trace.
    for _ in 0..64 {
        let arr = ArrayStorage::create_long_lived(32, &mut gc, &mut rt);
        rt.roots
            .push(HermesValue::encode_object_value(arr as *const GcCell));
    }
    c.bench_function("full_collection", |b| {
        b.iter(|| {
            for _ in 0..512 {
                DummyObject::create(&mut gc, &mut rt);
            }
            gc.collect(&mut rt, "bench");
        })
    });
}

criterion_group!(
    benches,
    bench_young_alloc,
    bench_young_collection,
    bench_write_barrier,
    bench_full_collection
);
criterion_main!(benches);
