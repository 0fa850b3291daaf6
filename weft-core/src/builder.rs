//! The graph builder: the single-threaded, append-only API callers use to describe a kernel.
//!
//! Every constructor performs, in order: commutative-operand canonicalization (so `add(a, b)` and
//! `add(b, a)` hash identically), algebraic identity simplification, constant folding (evaluating
//! the op immediately when every operand is already a compile-time constant), and finally
//! common-subexpression elimination against everything recorded so far. A `Builder` is not
//! `Sync`; nothing here takes `&self` behind a shared reference, matching the "single-threaded,
//! not thread-safe" contract instructions are built under.

use crate::cse::CseTable;
use crate::entity::Handle;
use crate::inst::{BInst, Kind};
use crate::ops;
use crate::value::{Lane, Op, Width, V16, V32, V64, V8};
use std::vec::Vec;

/// Accumulates a kernel's instruction graph. Call [`Builder::compile`] to turn it into a
/// [`Program`](crate::program::Program) ready to run.
pub struct Builder {
    insts: Vec<BInst>,
    cse: CseTable,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            insts: Vec::new(),
            cse: CseTable::new(),
        }
    }

    pub(crate) fn insts(&self) -> &[BInst] {
        &self.insts
    }

    /// Hand the recorded instruction array to the compiler, consuming the builder. A `Builder`
    /// has no other way to give up its instructions: this is `compile`'s only entry point into
    /// builder internals (see [`crate::program::compile`]).
    pub(crate) fn into_insts(self) -> Vec<BInst> {
        self.insts
    }

    fn inst(&self, h: Handle) -> BInst {
        self.insts[h.index()]
    }

    fn raw_push(&mut self, inst: BInst) -> Handle {
        self.insts.push(inst);
        Handle::from_raw(self.insts.len() as u32)
    }

    /// Insert an instruction that participates in CSE, returning the existing handle if an equal
    /// instruction was already recorded.
    fn cse_push(&mut self, inst: BInst) -> Handle {
        debug_assert!(inst.op.participates_in_cse());
        if let Some(existing) = self.cse.lookup(&inst) {
            log::trace!("cse hit: {:?} {:?} reuses {existing:?}", inst.kind, inst.op);
            return existing;
        }
        let h = self.raw_push(inst);
        self.cse.insert(&inst, h);
        h
    }

    fn splat_raw(&mut self, width: Width, imm: i64) -> Handle {
        let inst = BInst {
            kind: Kind::Splat,
            op: Op::Splat,
            width,
            x: Handle::NONE,
            y: Handle::NONE,
            z: Handle::NONE,
            imm: width.truncate_imm(imm),
        };
        self.cse_push(inst)
    }

    /// A lane-wide compile-time constant. `bits` is truncated (and, where the op that consumes
    /// it interprets it as signed, sign-extended) to `L`'s width.
    pub fn splat<L: Lane>(&mut self, bits: i64) -> L {
        L::from_handle(self.splat_raw(L::WIDTH, bits))
    }

    /// Every lane set to the scalar at `ptr[ptr_index]`, read once per chunk and held constant
    /// across it. Loop-invariant, unlike [`Builder::load`].
    pub fn uniform<L: Lane>(&mut self, ptr_index: usize) -> L {
        let inst = BInst {
            kind: Kind::Uniform,
            op: Op::Uniform,
            width: L::WIDTH,
            x: Handle::NONE,
            y: Handle::NONE,
            z: Handle::NONE,
            imm: ptr_index as i64,
        };
        L::from_handle(self.cse_push(inst))
    }

    /// Lanes read contiguously from `ptr[ptr_index]` at the current chunk offset. Never
    /// deduplicated by CSE, since two `load`s of the same pointer at different points in the
    /// schedule may observe different memory if an intervening `store` aliases it.
    pub fn load<L: Lane>(&mut self, ptr_index: usize) -> L {
        let inst = BInst {
            kind: Kind::Load,
            op: Op::Load,
            width: L::WIDTH,
            x: Handle::NONE,
            y: Handle::NONE,
            z: Handle::NONE,
            imm: ptr_index as i64,
        };
        L::from_handle(self.raw_push(inst))
    }

    /// Write `value`'s lanes contiguously to `ptr[ptr_index]` at the current chunk offset.
    pub fn store<L: Lane>(&mut self, ptr_index: usize, value: L) {
        let inst = BInst {
            kind: Kind::SideEffect,
            op: Op::Store,
            width: L::WIDTH,
            x: value.handle(),
            y: Handle::NONE,
            z: Handle::NONE,
            imm: ptr_index as i64,
        };
        self.raw_push(inst);
    }

    /// Abort the run if any lane of `cond` is zero. Intended for self-checking kernels in tests;
    /// never optimized away, since its only purpose is the side effect.
    pub fn assert<L: Lane>(&mut self, cond: L) {
        let inst = BInst {
            kind: Kind::SideEffect,
            op: Op::Assert,
            width: L::WIDTH,
            x: cond.handle(),
            y: Handle::NONE,
            z: Handle::NONE,
            imm: 0,
        };
        self.raw_push(inst);
    }

    /// `x` relabeled as a float of the same width; `V8`/`V16`/`V32`/`V64` already carry no
    /// int-vs-float distinction, so this costs nothing and records no instruction.
    pub fn cast_f<L: Lane>(&self, x: L) -> L {
        x
    }

    /// `x` relabeled as a signed integer of the same width. See [`Builder::cast_f`].
    pub fn cast_s<L: Lane>(&self, x: L) -> L {
        x
    }

    // -- math helpers -----------------------------------------------------

    fn math_arity1(&mut self, op: Op, width: Width, x: Handle) -> Handle {
        if self.inst(x).is_splat() {
            let folded = ops::eval(op, width, self.inst(x).imm, 0, 0);
            return self.splat_raw(width, folded);
        }
        let inst = BInst {
            kind: Kind::Math,
            op,
            width,
            x,
            y: Handle::NONE,
            z: Handle::NONE,
            imm: 0,
        };
        self.cse_push(inst)
    }

    fn math_arity2(&mut self, op: Op, width: Width, mut x: Handle, mut y: Handle) -> Handle {
        if op.is_commutative() && x.raw() > y.raw() {
            core::mem::swap(&mut x, &mut y);
        }
        if self.inst(x).is_splat() && self.inst(y).is_splat() {
            let folded = ops::eval(op, width, self.inst(x).imm, self.inst(y).imm, 0);
            return self.splat_raw(width, folded);
        }
        let inst = BInst {
            kind: Kind::Math,
            op,
            width,
            x,
            y,
            z: Handle::NONE,
            imm: 0,
        };
        self.cse_push(inst)
    }

    fn math_sel(&mut self, width: Width, m: Handle, a: Handle, b: Handle) -> Handle {
        if a == b {
            return a;
        }
        if self.is_zero(m) {
            return b;
        }
        if self.splat_equals(m, width, -1) {
            return a;
        }
        if self.is_zero(b) {
            return self.and_impl(width, m, a);
        }
        if self.is_zero(a) {
            return self.bic_impl(width, b, m);
        }
        if self.inst(m).is_splat() && self.inst(a).is_splat() && self.inst(b).is_splat() {
            let folded = ops::eval(Op::Sel, width, self.inst(m).imm, self.inst(a).imm, self.inst(b).imm);
            return self.splat_raw(width, folded);
        }
        let inst = BInst {
            kind: Kind::Math,
            op: Op::Sel,
            width,
            x: m,
            y: a,
            z: b,
            imm: 0,
        };
        self.cse_push(inst)
    }

    /// `imm`'s bit pattern reinterpreted as `width`'s unsigned integer range, for comparing
    /// against a splat's stored (sign-extended) payload.
    fn splat_equals(&self, h: Handle, width: Width, value: i64) -> bool {
        let i = self.inst(h);
        i.is_splat() && i.imm == width.truncate_imm(value)
    }

    fn is_zero(&self, h: Handle) -> bool {
        let i = self.inst(h);
        i.is_splat() && i.imm == 0
    }

    /// `true` if `h` is a splat of either `+0.0` or `-0.0` at `width`.
    fn is_float_zero(&self, h: Handle, width: Width) -> bool {
        let i = self.inst(h);
        if !i.is_splat() {
            return false;
        }
        let bits = width.unsigned(i.imm);
        bits == 0 || bits == 1u64 << (width.bits() - 1)
    }

    fn is_float_one(&self, h: Handle, width: Width) -> bool {
        self.splat_equals(h, width, ops::float_one(width))
    }

    // -- integer arithmetic -------------------------------------------------

    fn add_i_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.is_zero(x) {
            return y;
        }
        if self.is_zero(y) {
            return x;
        }
        self.math_arity2(Op::AddI, width, x, y)
    }

    fn sub_i_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.is_zero(y) {
            return x;
        }
        self.math_arity2(Op::SubI, width, x, y)
    }

    fn mul_i_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.splat_equals(x, width, 1) {
            return y;
        }
        if self.splat_equals(y, width, 1) {
            return x;
        }
        self.math_arity2(Op::MulI, width, x, y)
    }

    /// `x << count`, lowered to the immediate form when `count` is already a constant.
    fn shl_i_impl(&mut self, width: Width, x: Handle, count: Handle) -> Handle {
        if self.is_zero(count) {
            return x;
        }
        if self.inst(count).is_splat() {
            return self.imm_shift(Op::ShlIImm, width, x, self.inst(count).imm);
        }
        self.math_arity2(Op::ShlI, width, x, count)
    }

    fn shr_s_i_impl(&mut self, width: Width, x: Handle, count: Handle) -> Handle {
        if self.is_zero(count) {
            return x;
        }
        if self.inst(count).is_splat() {
            return self.imm_shift(Op::ShrSImm, width, x, self.inst(count).imm);
        }
        self.math_arity2(Op::ShrS, width, x, count)
    }

    fn shr_u_i_impl(&mut self, width: Width, x: Handle, count: Handle) -> Handle {
        if self.is_zero(count) {
            return x;
        }
        if self.inst(count).is_splat() {
            return self.imm_shift(Op::ShrUImm, width, x, self.inst(count).imm);
        }
        self.math_arity2(Op::ShrU, width, x, count)
    }

    fn imm_shift(&mut self, op: Op, width: Width, x: Handle, count: i64) -> Handle {
        if self.inst(x).is_splat() {
            let folded = ops::eval(op, width, self.inst(x).imm, 0, count);
            return self.splat_raw(width, folded);
        }
        let inst = BInst {
            kind: Kind::Math,
            op,
            width,
            x,
            y: Handle::NONE,
            z: Handle::NONE,
            imm: count,
        };
        self.cse_push(inst)
    }

    // -- bitwise --------------------------------------------------------

    fn and_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return x;
        }
        if self.splat_equals(x, width, -1) {
            return y;
        }
        if self.splat_equals(y, width, -1) {
            return x;
        }
        if self.is_zero(x) || self.is_zero(y) {
            return self.splat_raw(width, 0);
        }
        self.math_arity2(Op::And, width, x, y)
    }

    fn or_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return x;
        }
        if self.is_zero(x) {
            return y;
        }
        if self.is_zero(y) {
            return x;
        }
        if self.splat_equals(x, width, -1) {
            return x;
        }
        if self.splat_equals(y, width, -1) {
            return y;
        }
        self.math_arity2(Op::Or, width, x, y)
    }

    fn xor_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return self.splat_raw(width, 0);
        }
        if self.is_zero(x) {
            return y;
        }
        if self.is_zero(y) {
            return x;
        }
        self.math_arity2(Op::Xor, width, x, y)
    }

    /// `not(not(x)) == x`, the one identity the reference test suite checks directly by handle.
    fn not_impl(&mut self, width: Width, x: Handle) -> Handle {
        let xi = self.inst(x);
        if xi.kind == Kind::Math && xi.op == Op::Not {
            return xi.x;
        }
        self.math_arity1(Op::Not, width, x)
    }

    fn bic_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return self.splat_raw(width, 0);
        }
        if self.is_zero(y) {
            return x;
        }
        self.math_arity2(Op::Bic, width, x, y)
    }

    // -- integer comparisons ----------------------------------------------
    //
    // Not applied to the float forms: NaN is neither equal to, less than, nor less-or-equal to
    // itself, so `x cmp x` cannot be folded without knowing `x` is not NaN.

    fn eq_i_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return self.splat_raw(width, -1);
        }
        self.math_arity2(Op::EqI, width, x, y)
    }

    fn lt_impl(&mut self, op: Op, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return self.splat_raw(width, 0);
        }
        self.math_arity2(op, width, x, y)
    }

    fn le_impl(&mut self, op: Op, width: Width, x: Handle, y: Handle) -> Handle {
        if x == y {
            return self.splat_raw(width, -1);
        }
        self.math_arity2(op, width, x, y)
    }

    // -- float arithmetic -------------------------------------------------

    fn add_f_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.is_float_zero(x, width) {
            return y;
        }
        if self.is_float_zero(y, width) {
            return x;
        }
        self.math_arity2(Op::AddF, width, x, y)
    }

    fn sub_f_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.is_float_zero(y, width) {
            return x;
        }
        self.math_arity2(Op::SubF, width, x, y)
    }

    fn mul_f_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.is_float_one(x, width) {
            return y;
        }
        if self.is_float_one(y, width) {
            return x;
        }
        self.math_arity2(Op::MulF, width, x, y)
    }

    fn div_f_impl(&mut self, width: Width, x: Handle, y: Handle) -> Handle {
        if self.is_float_one(y, width) {
            return x;
        }
        self.math_arity2(Op::DivF, width, x, y)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Width-generic public constructors. One method per op, callable at any of `V8`/`V16`/`V32`/
/// `V64` through type inference on the operands — the same op applies identically at every
/// width, so there is no reason to hand-write four copies of each the way the C headers do.
impl Builder {
    pub fn add_i<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.add_i_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn sub_i<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.sub_i_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn mul_i<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.mul_i_impl(L::WIDTH, x.handle(), y.handle()))
    }

    /// `x << count`, count given per-lane (typically a [`Builder::splat`]).
    pub fn shl_i<L: Lane>(&mut self, x: L, count: L) -> L {
        L::from_handle(self.shl_i_impl(L::WIDTH, x.handle(), count.handle()))
    }

    /// Arithmetic (sign-extending) right shift.
    pub fn shr_s_i<L: Lane>(&mut self, x: L, count: L) -> L {
        L::from_handle(self.shr_s_i_impl(L::WIDTH, x.handle(), count.handle()))
    }

    /// Logical (zero-extending) right shift.
    pub fn shr_u_i<L: Lane>(&mut self, x: L, count: L) -> L {
        L::from_handle(self.shr_u_i_impl(L::WIDTH, x.handle(), count.handle()))
    }

    pub fn and<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.and_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn or<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.or_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn xor<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.xor_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn not<L: Lane>(&mut self, x: L) -> L {
        L::from_handle(self.not_impl(L::WIDTH, x.handle()))
    }

    /// `x & !y`.
    pub fn bic<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.bic_impl(L::WIDTH, x.handle(), y.handle()))
    }

    /// `(m & a) | (!m & b)`.
    pub fn sel<L: Lane>(&mut self, m: L, a: L, b: L) -> L {
        L::from_handle(self.math_sel(L::WIDTH, m.handle(), a.handle(), b.handle()))
    }

    pub fn eq_i<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.eq_i_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn lt_s<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.lt_impl(Op::LtS, L::WIDTH, x.handle(), y.handle()))
    }

    pub fn lt_u<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.lt_impl(Op::LtU, L::WIDTH, x.handle(), y.handle()))
    }

    pub fn le_s<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.le_impl(Op::LeS, L::WIDTH, x.handle(), y.handle()))
    }

    pub fn le_u<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.le_impl(Op::LeU, L::WIDTH, x.handle(), y.handle()))
    }

    pub fn add_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.add_f_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn sub_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.sub_f_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn mul_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.mul_f_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn div_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.div_f_impl(L::WIDTH, x.handle(), y.handle()))
    }

    pub fn sqrt_f<L: Lane>(&mut self, x: L) -> L {
        L::from_handle(self.math_arity1(Op::SqrtF, L::WIDTH, x.handle()))
    }

    pub fn ceil_f<L: Lane>(&mut self, x: L) -> L {
        L::from_handle(self.math_arity1(Op::CeilF, L::WIDTH, x.handle()))
    }

    pub fn floor_f<L: Lane>(&mut self, x: L) -> L {
        L::from_handle(self.math_arity1(Op::FloorF, L::WIDTH, x.handle()))
    }

    pub fn eq_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.math_arity2(Op::EqF, L::WIDTH, x.handle(), y.handle()))
    }

    pub fn lt_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.math_arity2(Op::LtF, L::WIDTH, x.handle(), y.handle()))
    }

    pub fn le_f<L: Lane>(&mut self, x: L, y: L) -> L {
        L::from_handle(self.math_arity2(Op::LeF, L::WIDTH, x.handle(), y.handle()))
    }
}

/// Width-crossing constructors: widen, narrow and cast. These cannot be generic over `Lane`
/// alone since the input and output widths differ, so each gets its own named method, matching
/// the reference header's `widen_s8`/`widen_s16`/`widen_s32`/`narrow_i16`/`narrow_i32`/
/// `narrow_i64` naming.
impl Builder {
    /// Sign-extend an 8-bit lane to 16 bits.
    pub fn widen_s8(&mut self, x: V8) -> V16 {
        V16::from_handle(self.math_arity1(Op::WidenS, Width::W16, x.handle()))
    }

    /// Sign-extend a 16-bit lane to 32 bits.
    pub fn widen_s16(&mut self, x: V16) -> V32 {
        V32::from_handle(self.math_arity1(Op::WidenS, Width::W32, x.handle()))
    }

    /// Sign-extend a 32-bit lane to 64 bits.
    pub fn widen_s32(&mut self, x: V32) -> V64 {
        V64::from_handle(self.math_arity1(Op::WidenS, Width::W64, x.handle()))
    }

    /// Zero-extend an 8-bit lane to 16 bits.
    pub fn widen_u8(&mut self, x: V8) -> V16 {
        V16::from_handle(self.math_arity1(Op::WidenU, Width::W16, x.handle()))
    }

    /// Zero-extend a 16-bit lane to 32 bits.
    pub fn widen_u16(&mut self, x: V16) -> V32 {
        V32::from_handle(self.math_arity1(Op::WidenU, Width::W32, x.handle()))
    }

    /// Zero-extend a 32-bit lane to 64 bits.
    pub fn widen_u32(&mut self, x: V32) -> V64 {
        V64::from_handle(self.math_arity1(Op::WidenU, Width::W64, x.handle()))
    }

    /// Convert a half-precision float lane to single precision.
    pub fn widen_f16(&mut self, x: V16) -> V32 {
        V32::from_handle(self.math_arity1(Op::WidenF, Width::W32, x.handle()))
    }

    /// Convert a single-precision float lane to double precision.
    pub fn widen_f32(&mut self, x: V32) -> V64 {
        V64::from_handle(self.math_arity1(Op::WidenF, Width::W64, x.handle()))
    }

    /// Truncate a 16-bit integer lane to 8 bits, dropping the high byte.
    pub fn narrow_i16(&mut self, x: V16) -> V8 {
        V8::from_handle(self.math_arity1(Op::NarrowI, Width::W8, x.handle()))
    }

    /// Truncate a 32-bit integer lane to 16 bits.
    pub fn narrow_i32(&mut self, x: V32) -> V16 {
        V16::from_handle(self.math_arity1(Op::NarrowI, Width::W16, x.handle()))
    }

    /// Truncate a 64-bit integer lane to 32 bits.
    pub fn narrow_i64(&mut self, x: V64) -> V32 {
        V32::from_handle(self.math_arity1(Op::NarrowI, Width::W32, x.handle()))
    }

    /// Convert a single-precision float lane to half precision.
    pub fn narrow_f32(&mut self, x: V32) -> V16 {
        V16::from_handle(self.math_arity1(Op::NarrowF, Width::W16, x.handle()))
    }

    /// Convert a double-precision float lane to single precision.
    pub fn narrow_f64(&mut self, x: V64) -> V32 {
        V32::from_handle(self.math_arity1(Op::NarrowF, Width::W32, x.handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{V32, V8};

    #[test]
    fn commutative_sorting_cses_either_operand_order() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let y: V32 = b.uniform(1);
        let xy = b.add_i(x, y);
        let yx = b.add_i(y, x);
        assert_eq!(xy.handle(), yx.handle());
    }

    #[test]
    fn uniform_cse_dedupes_same_pointer_index() {
        let mut b = Builder::new();
        let a: V32 = b.uniform(3);
        let c: V32 = b.uniform(3);
        assert_eq!(a.handle(), c.handle());
    }

    #[test]
    fn load_never_cses() {
        let mut b = Builder::new();
        let a: V32 = b.load(0);
        let c: V32 = b.load(0);
        assert_ne!(a.handle(), c.handle());
    }

    #[test]
    fn constant_prop_through_add_and_shift() {
        let mut b = Builder::new();
        let one: V32 = b.splat(1);
        let sixty_three: V32 = b.splat(63);
        let big = b.add_i(one, sixty_three);
        let six: V32 = b.splat(6);
        let same = b.shr_u_i(big, six);
        assert_eq!(same.handle(), one.handle());
    }

    #[test]
    fn not_not_is_identity() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let nn = b.not(b.not(x));
        assert_eq!(nn.handle(), x.handle());
    }

    #[test]
    fn add_zero_is_identity_both_orders() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let zero: V32 = b.splat(0);
        assert_eq!(b.add_i(x, zero).handle(), x.handle());
        assert_eq!(b.add_i(zero, x).handle(), x.handle());
    }

    #[test]
    fn sub_zero_is_identity_but_not_commuted() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let zero: V32 = b.splat(0);
        assert_eq!(b.sub_i(x, zero).handle(), x.handle());
    }

    #[test]
    fn float_special_case_identities() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let pzero: V32 = b.splat(0.0f32.to_bits() as i64);
        let nzero: V32 = b.splat((-0.0f32).to_bits() as i64);
        let one: V32 = b.splat(1.0f32.to_bits() as i64);
        assert_eq!(b.add_f(x, pzero).handle(), x.handle());
        assert_eq!(b.add_f(x, nzero).handle(), x.handle());
        assert_eq!(b.add_f(pzero, x).handle(), x.handle());
        assert_eq!(b.sub_f(x, pzero).handle(), x.handle());
        assert_eq!(b.sub_f(x, nzero).handle(), x.handle());
        assert_eq!(b.mul_f(x, one).handle(), x.handle());
        assert_eq!(b.mul_f(one, x).handle(), x.handle());
        assert_eq!(b.div_f(x, one).handle(), x.handle());
    }

    #[test]
    fn cast_is_free() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let before = b.insts().len();
        let as_float = b.cast_f(x);
        assert_eq!(as_float.handle(), x.handle());
        assert_eq!(b.insts().len(), before);
    }

    #[test]
    fn widen_then_narrow_roundtrips_a_constant() {
        let mut b = Builder::new();
        let small: V8 = b.splat(-1);
        let wide = b.widen_s8(small);
        let narrow = b.narrow_i16(wide);
        assert_eq!(narrow.handle(), small.handle());
    }

    #[test]
    fn sel_same_operands_is_identity() {
        let mut b = Builder::new();
        let m: V32 = b.uniform(0);
        let a: V32 = b.uniform(1);
        assert_eq!(b.sel(m, a, a).handle(), a.handle());
    }

    #[test]
    fn sel_constant_mask_picks_a_side() {
        let mut b = Builder::new();
        let a: V32 = b.uniform(0);
        let b_val: V32 = b.uniform(1);
        let all_ones: V32 = b.splat(-1);
        let all_zero: V32 = b.splat(0);
        assert_eq!(b.sel(all_zero, a, b_val).handle(), b_val.handle());
        assert_eq!(b.sel(all_ones, a, b_val).handle(), a.handle());
    }

    #[test]
    fn sel_constant_arm_lowers_to_and_or_bic() {
        let mut b = Builder::new();
        let m: V32 = b.uniform(0);
        let a: V32 = b.uniform(1);
        let b_val: V32 = b.uniform(2);
        let zero: V32 = b.splat(0);
        assert_eq!(b.sel(m, a, zero).handle(), b.and(m, a).handle());
        assert_eq!(b.sel(m, zero, b_val).handle(), b.bic(b_val, m).handle());
    }

    #[test]
    fn or_with_all_ones_is_all_ones() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let all_ones: V32 = b.splat(-1);
        assert_eq!(b.or(x, all_ones).handle(), all_ones.handle());
        assert_eq!(b.or(all_ones, x).handle(), all_ones.handle());
    }

    #[test]
    fn int_compares_of_equal_handles_fold() {
        let mut b = Builder::new();
        let x: V32 = b.uniform(0);
        let all_ones: V32 = b.splat(-1);
        let zero: V32 = b.splat(0);
        assert_eq!(b.eq_i(x, x).handle(), all_ones.handle());
        assert_eq!(b.lt_s(x, x).handle(), zero.handle());
        assert_eq!(b.lt_u(x, x).handle(), zero.handle());
        assert_eq!(b.le_s(x, x).handle(), all_ones.handle());
        assert_eq!(b.le_u(x, x).handle(), all_ones.handle());
    }

    #[test]
    fn sel_with_a_uniform_arm_is_not_constant_folded() {
        // sel(0x0000ffff, 0x0000ffff, uniform(2)): mask and the `a` arm are both splats, but `b`
        // is not, so the ternary as a whole must not fold to a splat.
        let mut b = Builder::new();
        let mask: V32 = b.splat(0x0000ffff);
        let a: V32 = b.splat(0x0000ffff);
        let u: V32 = b.uniform(2);
        let result = b.sel(mask, a, u);
        let any_splat: V32 = b.splat(0x0000ffff);
        assert_ne!(result.handle(), any_splat.handle());
    }

    #[test]
    fn no_load_cse_is_observed_across_uses() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        let y: V32 = b.load(1);
        assert_ne!(x.handle(), y.handle());
        // used together so the loads aren't dead and DCE can't hide the distinction.
        b.store(0, b.and(x, y));
    }

    // Property-based tests for the construction-time invariants: CSE-completeness, commutativity
    // canonicalization, LOAD's CSE exclusion, and constant folding's agreement with direct
    // evaluation. Concrete scenarios above pin specific identities; these range over arbitrary
    // operand pairs.
    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn repeated_construction_of_the_same_op_cses(a in 0i64..1000, c in 1i64..1000) {
                let mut b = Builder::new();
                let x: V32 = b.uniform(0);
                let y: V32 = b.splat(a);
                let first = b.add_i(x, y);
                let second = b.add_i(x, y);
                prop_assert_eq!(first.handle(), second.handle());

                // distinguishing by immediate value (c != a in general) must not collide.
                let z: V32 = b.splat(c);
                let third = b.add_i(x, z);
                if c != a {
                    prop_assert_ne!(first.handle(), third.handle());
                } else {
                    prop_assert_eq!(first.handle(), third.handle());
                }
            }

            #[test]
            fn commutative_ops_cse_regardless_of_operand_order(a in 1i64..1000) {
                let mut b = Builder::new();
                let x: V32 = b.uniform(0);
                let y: V32 = b.splat(a);
                prop_assert_eq!(b.add_i(x, y).handle(), b.add_i(y, x).handle());
                prop_assert_eq!(b.mul_i(x, y).handle(), b.mul_i(y, x).handle());
                prop_assert_eq!(b.and(x, y).handle(), b.and(y, x).handle());
                prop_assert_eq!(b.or(x, y).handle(), b.or(y, x).handle());
                prop_assert_eq!(b.xor(x, y).handle(), b.xor(y, x).handle());
            }

            #[test]
            fn load_of_the_same_pointer_index_never_cses(idx in 0usize..8) {
                let mut b = Builder::new();
                let a: V32 = b.load(idx);
                let c: V32 = b.load(idx);
                prop_assert_ne!(a.handle(), c.handle());
            }

            #[test]
            fn constant_folded_add_matches_direct_evaluation(a in any::<i32>(), c in any::<i32>()) {
                let mut b = Builder::new();
                let x: V32 = b.splat(a as i64);
                let y: V32 = b.splat(c as i64);
                let sum = b.add_i(x, y);
                let expect = ops::eval(Op::AddI, Width::W32, a as i64, c as i64, 0);
                let folded: V32 = b.splat(expect);
                prop_assert_eq!(sum.handle(), folded.handle());
            }

            #[test]
            fn constant_folded_and_matches_direct_evaluation(a in any::<i32>(), c in any::<i32>()) {
                let mut b = Builder::new();
                let x: V32 = b.splat(a as i64);
                let y: V32 = b.splat(c as i64);
                let anded = b.and(x, y);
                let expect = ops::eval(Op::And, Width::W32, a as i64, c as i64, 0);
                let folded: V32 = b.splat(expect);
                prop_assert_eq!(anded.handle(), folded.handle());
            }

            #[test]
            fn widen_s_then_narrow_i_roundtrips_any_8bit_constant(a in any::<i8>()) {
                let mut b = Builder::new();
                let small: V8 = b.splat(a as i64);
                let wide = b.widen_s8(small);
                let back = b.narrow_i16(wide);
                prop_assert_eq!(back.handle(), small.handle());
            }
        }
    }
}
