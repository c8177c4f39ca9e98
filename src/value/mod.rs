//! Value Representation - Tagged Values and BigInt Digits
//!
//! The engine's uniform value types:
//! - [`HermesValue`]: 64-bit NaN-boxed union used in registers and roots.
//! - [`SmallHermesValue`]: 32-bit heap representation that boxes doubles.
//! - BigInt digit layout and canonicalisation helpers.

pub mod bigint;
pub mod hv;
pub mod shv;

pub use hv::HermesValue;
pub use shv::SmallHermesValue;

/// Interned symbol identifier. The GC only cares about liveness; the
/// identifier table owns the payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub const INVALID: SymbolId = SymbolId(u32::MAX);

    #[inline]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
