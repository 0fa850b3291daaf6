//! Scalar evaluation of every [`Op`](crate::value::Op), parameterized by [`Width`].
//!
//! Every function here computes a single lane. Both the interpreter (applying the function `N`
//! times per chunk, once per lane) and the builder's constant folder (applying it once, since
//! every operand of a foldable instruction is a splat and all of a splat's lanes agree) go
//! through these same functions, so folding a constant and computing it at run time can never
//! disagree.
//!
//! Values pass through as `i64` bit containers: integers live sign-extended per
//! [`Width::truncate_imm`], floats live as their IEEE bit pattern reinterpreted into the low bits
//! of the container. Which interpretation applies is determined entirely by the `Op`, never by
//! the container type, mirroring [`crate::value`]'s "bit-punning is free" stance.

mod bit_ops;
mod convert_ops;
mod float_ops;
mod int_ops;

use crate::value::{Op, Width};

/// Shared by [`int_ops`] and [`float_ops`]: a compare op's result is an all-ones or all-zero mask
/// the width of its operands, the usual SIMD compare convention.
fn mask_bool(width: Width, cond: bool) -> i64 {
    width.truncate_imm(if cond { -1 } else { 0 })
}

/// The bit pattern of `1.0` at `width`, for the builder's `x * 1` / `x / 1` peepholes.
pub(crate) fn float_one(width: Width) -> i64 {
    float_ops::constant_one(width)
}

/// Evaluate a 0-, 1-, 2- or 3-operand op over bit-pattern operands, producing a bit-pattern
/// result. Not called for `Splat`, `Uniform`, `Load`, `Store` or `Assert`, which have no uniform
/// scalar-operand shape (handled directly by the builder and interpreter instead).
pub(crate) fn eval(op: Op, width: Width, x: i64, y: i64, z: i64) -> i64 {
    match op {
        Op::AddI => int_ops::add(width, x, y),
        Op::SubI => int_ops::sub(width, x, y),
        Op::MulI => int_ops::mul(width, x, y),
        Op::ShlI => int_ops::shl(width, x, y),
        Op::ShrS => int_ops::shr_s(width, x, y),
        Op::ShrU => int_ops::shr_u(width, x, y),
        // The immediate shift variants take their count through the `z` argument regardless of
        // which `BInst` field the caller actually stores it in (`imm`); `eval` only cares about
        // values, not record layout.
        Op::ShlIImm => int_ops::shl(width, x, z),
        Op::ShrSImm => int_ops::shr_s(width, x, z),
        Op::ShrUImm => int_ops::shr_u(width, x, z),

        Op::And => bit_ops::and(x, y),
        Op::Or => bit_ops::or(x, y),
        Op::Xor => bit_ops::xor(x, y),
        Op::Not => bit_ops::not(width, x),
        Op::Bic => bit_ops::bic(x, y),
        Op::Sel => bit_ops::sel(x, y, z),

        Op::EqI => int_ops::eq(width, x, y),
        Op::LtS => int_ops::lt_s(width, x, y),
        Op::LtU => int_ops::lt_u(width, x, y),
        Op::LeS => int_ops::le_s(width, x, y),
        Op::LeU => int_ops::le_u(width, x, y),

        Op::AddF => float_ops::add(width, x, y),
        Op::SubF => float_ops::sub(width, x, y),
        Op::MulF => float_ops::mul(width, x, y),
        Op::DivF => float_ops::div(width, x, y),
        Op::SqrtF => float_ops::sqrt(width, x),
        Op::CeilF => float_ops::ceil(width, x),
        Op::FloorF => float_ops::floor(width, x),
        Op::EqF => float_ops::eq(width, x, y),
        Op::LtF => float_ops::lt(width, x, y),
        Op::LeF => float_ops::le(width, x, y),

        Op::CastF | Op::CastS => x,
        Op::WidenS => convert_ops::widen_s(width, x),
        Op::WidenU => convert_ops::widen_u(width, x),
        Op::WidenF => float_ops::widen(width, x),
        Op::NarrowI => width.truncate_imm(x),
        Op::NarrowF => float_ops::narrow(width, x),

        Op::Splat | Op::Uniform | Op::Load | Op::Store | Op::Assert => {
            unreachable!("{op:?} has no scalar-operand evaluation")
        }
    }
}
