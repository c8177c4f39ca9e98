//! SmallHermesValue - 32-bit Heap Value
//!
//! The heap representation of a value. The low three bits (which are always
//! zero in an aligned compressed pointer) act as a tag:
//!
//! ```text
//! 31                                    3 2     0
//! ┌──────────────────────────────────────┬───────┐
//! │           Value (29 bits)            │  Tag  │
//! └──────────────────────────────────────┴───────┘
//! ```
//!
//! Pointer tags store a compressed pointer with the tag OR-ed into the
//! alignment bits. The `CompressedHv64` tag (zero, so compression is a plain
//! shift) holds any 64-bit value whose low 35 bits are zero: the singletons
//! and most small doubles. Doubles that do not fit are boxed on the heap as
//! `BoxedDouble` cells, so encoding a number may allocate.

use crate::cell::boxed_double::BoxedDouble;
use crate::heap::HadesGc;
use crate::pointer::{CompressedPointer, PointerBase};
use crate::runtime::GcCallbacks;
use crate::value::{HermesValue, SymbolId};

const NUM_TAG_BITS: u32 = 3;
const NUM_VALUE_BITS: u32 = 32 - NUM_TAG_BITS;
const TAG_MASK: u32 = (1 << NUM_TAG_BITS) - 1;

/// Number of low HV64 bits that must be zero for inline compression.
const COMPRESS_SHIFT: u32 = 64 - NUM_VALUE_BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[repr(u8)]
enum Tag {
    CompressedHv64 = 0,
    Str = 1,
    BigInt = 2,
    Object = 3,
    BoxedDouble = 4,
    Symbol = 5,
}

const FIRST_POINTER_TAG: u8 = Tag::Str as u8;
const LAST_POINTER_TAG: u8 = Tag::BoxedDouble as u8;

/// 32-bit tagged heap value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SmallHermesValue(u32);

impl SmallHermesValue {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        SmallHermesValue(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    fn tag(self) -> u8 {
        (self.0 & TAG_MASK) as u8
    }

    #[inline]
    const fn from_tag_and_value(tag: u8, value: u32) -> Self {
        SmallHermesValue((value << NUM_TAG_BITS) | tag as u32)
    }

    /// Compress an HV64 whose low `COMPRESS_SHIFT` bits are zero.
    #[inline]
    const fn from_compressible_hv64(raw: u64) -> Self {
        // The CompressedHV64 tag is zero, so the shift alone produces a
        // correctly tagged value.
        SmallHermesValue((raw >> 32) as u32)
    }

    /// Whether `hv` can be stored inline without boxing.
    #[inline]
    pub fn can_inline_hv64(hv: HermesValue) -> bool {
        hv.raw() & ((1u64 << COMPRESS_SHIFT) - 1) == 0
    }

    // === Singleton encoders ===

    #[inline]
    pub const fn encode_empty_value() -> Self {
        Self::from_compressible_hv64(HermesValue::encode_empty_value().raw())
    }

    #[inline]
    pub const fn encode_undefined_value() -> Self {
        Self::from_compressible_hv64(HermesValue::encode_undefined_value().raw())
    }

    #[inline]
    pub const fn encode_null_value() -> Self {
        Self::from_compressible_hv64(HermesValue::encode_null_value().raw())
    }

    #[inline]
    pub const fn encode_bool_value(b: bool) -> Self {
        Self::from_compressible_hv64(HermesValue::encode_bool_value(b).raw())
    }

    #[inline]
    pub fn encode_symbol_value(sym: SymbolId) -> Self {
        debug_assert!(sym.0 < (1 << NUM_VALUE_BITS), "symbol id out of range");
        Self::from_tag_and_value(Tag::Symbol as u8, sym.0)
    }

    // === Pointer encoders ===

    fn encode_pointer_impl(cp: CompressedPointer, tag: Tag) -> Self {
        let raw = cp.raw();
        debug_assert_eq!(raw & TAG_MASK, 0, "pointer low bits are set");
        SmallHermesValue(raw | tag as u32)
    }

    #[inline]
    pub fn encode_object_value(cp: CompressedPointer) -> Self {
        Self::encode_pointer_impl(cp, Tag::Object)
    }

    #[inline]
    pub fn encode_string_value(cp: CompressedPointer) -> Self {
        Self::encode_pointer_impl(cp, Tag::Str)
    }

    #[inline]
    pub fn encode_bigint_value(cp: CompressedPointer) -> Self {
        Self::encode_pointer_impl(cp, Tag::BigInt)
    }

    #[inline]
    pub fn encode_boxed_double(cp: CompressedPointer) -> Self {
        Self::encode_pointer_impl(cp, Tag::BoxedDouble)
    }

    /// Encode a full `HermesValue`. Pointer and symbol inputs are
    /// allocation-free; numbers that cannot be stored inline allocate a
    /// `BoxedDouble`, so treat this as a potentially allocating call.
    pub fn encode_hermes_value(
        hv: HermesValue,
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
    ) -> Self {
        if hv.is_pointer() {
            let cp = gc.pointer_base().compress(hv.get_pointer());
            let tag = if hv.is_object() {
                Tag::Object
            } else if hv.is_string() {
                Tag::Str
            } else {
                Tag::BigInt
            };
            return Self::encode_pointer_impl(cp, tag);
        }
        if hv.is_symbol() {
            return Self::encode_symbol_value(hv.get_symbol());
        }
        // Numbers and singletons. Int32 values are re-encoded through their
        // numeric double form so a single compressibility rule applies.
        let hv = if hv.is_int32() {
            HermesValue::encode_number_value(hv.get_number())
        } else {
            hv
        };
        if Self::can_inline_hv64(hv) {
            return Self::from_compressible_hv64(hv.raw());
        }
        debug_assert!(hv.is_number(), "only doubles require boxing");
        let cp = BoxedDouble::create(hv.get_double(), gc, rt);
        Self::encode_pointer_impl(cp, Tag::BoxedDouble)
    }

    // === Predicates ===

    #[inline]
    pub fn is_pointer(self) -> bool {
        (FIRST_POINTER_TAG..=LAST_POINTER_TAG).contains(&self.tag())
    }

    #[inline]
    pub fn is_object(self) -> bool {
        self.tag() == Tag::Object as u8
    }

    #[inline]
    pub fn is_string(self) -> bool {
        self.tag() == Tag::Str as u8
    }

    #[inline]
    pub fn is_bigint(self) -> bool {
        self.tag() == Tag::BigInt as u8
    }

    #[inline]
    pub fn is_boxed_double(self) -> bool {
        self.tag() == Tag::BoxedDouble as u8
    }

    #[inline]
    pub fn is_inlined_double(self) -> bool {
        self.tag() == Tag::CompressedHv64 as u8 && self.decompress_hv64().is_number()
    }

    #[inline]
    pub fn is_number(self) -> bool {
        self.is_inlined_double() || self.is_boxed_double()
    }

    #[inline]
    pub fn is_symbol(self) -> bool {
        self.tag() == Tag::Symbol as u8
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        self == Self::encode_undefined_value()
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::encode_null_value()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self == Self::encode_empty_value()
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        self == Self::encode_bool_value(false) || self == Self::encode_bool_value(true)
    }

    // === Accessors ===

    #[inline]
    fn decompress_hv64(self) -> HermesValue {
        debug_assert_eq!(self.tag(), Tag::CompressedHv64 as u8);
        HermesValue::from_raw((self.0 as u64) << 32)
    }

    #[inline]
    pub fn get_pointer(self) -> CompressedPointer {
        debug_assert!(self.is_pointer());
        CompressedPointer::from_raw(self.0 & !TAG_MASK)
    }

    #[inline]
    pub fn get_symbol(self) -> SymbolId {
        debug_assert!(self.is_symbol());
        SymbolId(self.0 >> NUM_TAG_BITS)
    }

    #[inline]
    pub fn get_bool(self) -> bool {
        debug_assert!(self.is_bool());
        self.decompress_hv64().get_bool()
    }

    /// Read a boxed double through the heap.
    pub fn get_boxed_double(self, pb: &PointerBase) -> f64 {
        debug_assert!(self.is_boxed_double());
        unsafe { BoxedDouble::value(self.get_pointer().get_non_null(pb)) }
    }

    /// Numeric value, decompressing or unboxing as needed.
    pub fn get_number(self, pb: &PointerBase) -> f64 {
        if self.is_boxed_double() {
            self.get_boxed_double(pb)
        } else {
            self.decompress_hv64().get_number()
        }
    }

    /// Convert back to a full `HermesValue`, unboxing boxed doubles. This is
    /// the inverse of `encode_hermes_value`.
    pub fn unbox_to_hv(self, pb: &PointerBase) -> HermesValue {
        match self.tag() {
            t if t == Tag::CompressedHv64 as u8 => self.decompress_hv64(),
            t if t == Tag::BoxedDouble as u8 => {
                HermesValue::encode_number_value(self.get_boxed_double(pb))
            }
            t if t == Tag::Object as u8 => {
                HermesValue::encode_object_value(self.get_pointer().get_non_null(pb))
            }
            t if t == Tag::Str as u8 => {
                HermesValue::encode_string_value(self.get_pointer().get_non_null(pb))
            }
            t if t == Tag::BigInt as u8 => {
                HermesValue::encode_bigint_value(self.get_pointer().get_non_null(pb))
            }
            _ => HermesValue::encode_symbol_value(self.get_symbol()),
        }
    }

    /// Re-encode with a new pointer, keeping the pointer kind tag.
    #[inline]
    pub fn update_pointer(self, cp: CompressedPointer) -> Self {
        debug_assert!(self.is_pointer());
        debug_assert_eq!(cp.raw() & TAG_MASK, 0);
        SmallHermesValue((self.0 & TAG_MASK) | cp.raw())
    }
}
