//! # Hades - Generational, Mostly-Concurrent Heap Manager
//!
//! Hades is the core heap manager of a JavaScript engine: a generational
//! garbage collector with a concurrently marked old generation, together
//! with the value representation and pointer abstractions the rest of the
//! engine builds on.
//!
//! ## Overview
//!
//! - **Young generation**: one bump-pointer segment. Every young
//!   collection evacuates the live cells into the old generation behind a
//!   short stop-the-world pause.
//! - **Old generation**: freelist-managed segments plus jumbo segments for
//!   oversized cells. Marked concurrently (or incrementally on 32-bit
//!   targets) and swept a segment at a time; one segment per cycle may be
//!   compacted.
//! - **Write barriers**: a combined snapshot-at-the-beginning and
//!   generational/relocation barrier keeps marking exact while the mutator
//!   runs, via per-segment card tables.
//! - **Weak machinery**: weak roots, managed weak-ref slots, and ephemeron
//!   weak maps, all resolved during the complete-marking pause.
//! - **Values**: 64-bit NaN-boxed [`HermesValue`] and the 32-bit heap form
//!   [`SmallHermesValue`] with transparently boxed doubles, plus BigInt
//!   digit layout support.
//!
//! ## Quick start
//!
//! The host runtime supplies its roots and symbol table through
//! [`GcCallbacks`]:
//!
//! ```no_run
//! use hades_gc::cell::DummyObject;
//! use hades_gc::heap::acceptors::Acceptor;
//! use hades_gc::util::BitVector;
//! use hades_gc::{GcCallbacks, GcConfig, HadesGc, HermesValue, SymbolId};
//!
//! struct MiniRuntime {
//!     roots: Vec<HermesValue>,
//! }
//!
//! impl GcCallbacks for MiniRuntime {
//!     fn mark_roots(&mut self, acceptor: &mut dyn Acceptor, _long: bool) {
//!         for root in &mut self.roots {
//!             acceptor.accept_root_hv(root as *mut HermesValue);
//!         }
//!     }
//!     fn mark_roots_for_complete_marking(&mut self, _acceptor: &mut dyn Acceptor) {}
//!     fn mark_weak_roots(&mut self, _acceptor: &mut dyn Acceptor, _long: bool) {}
//!     fn symbols_end(&self) -> usize {
//!         0
//!     }
//!     fn unmark_symbols(&mut self) {}
//!     fn free_symbols(&mut self, _live: &BitVector) {}
//!     fn is_symbol_live(&self, _sym: SymbolId) -> bool {
//!         true
//!     }
//! }
//!
//! let mut rt = MiniRuntime { roots: Vec::new() };
//! let mut gc = HadesGc::new(GcConfig::default()).unwrap();
//! let obj = DummyObject::create(&mut gc, &mut rt);
//! rt.roots
//!     .push(HermesValue::encode_object_value(obj as *const _));
//! gc.collect(&mut rt, "example");
//! ```
//!
//! ## Modules
//!
//! - [`value`]: tagged values and BigInt digits
//! - [`pointer`]: compressed pointers, strong/weak reference wrappers
//! - [`cell`]: cell headers, kinds, and slot dispatch
//! - [`segment`]: aligned storage with card tables and mark bits
//! - [`storage`]: segment-aligned virtual memory provider
//! - [`heap`]: the collector itself
//! - [`runtime`]: host callbacks, crash manager, id tracking
//! - [`config`], [`stats`], [`error`], [`util`]

pub mod cell;
pub mod config;
pub mod error;
pub mod heap;
pub mod pointer;
pub mod runtime;
pub mod segment;
pub mod stats;
pub mod storage;
pub mod util;
pub mod value;

pub use config::GcConfig;
pub use error::{BigIntError, GcError, Result};
pub use heap::{HadesGc, Phase};
pub use pointer::{CompressedPointer, GcPointer, PointerBase, WeakRef, WeakRoot, WeakSlotState};
pub use runtime::{CrashManager, GcCallbacks, HeapInfo, InMemoryCrashManager, NopCrashManager};
pub use storage::{Storage, StorageProvider, VmStorageProvider};
pub use value::{HermesValue, SmallHermesValue, SymbolId};

/// Crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
