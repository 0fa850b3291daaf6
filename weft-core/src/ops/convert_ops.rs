//! Integer width conversions. `cast_s`/`cast_f` are pure bit-puns and need no function of their
//! own (see [`super::eval`]); `narrow_i` is a single [`Width::truncate_imm`] call, also inlined
//! there. Only the widening integer conversions need care, since sign- and zero-extension differ.

use crate::value::Width;

/// `x` is already sign-extended within its own (narrower) width, so widening it is a pure
/// reinterpretation: the bit container does not change, only the width it is labeled with.
pub(super) fn widen_s(result_width: Width, x: i64) -> i64 {
    let _source_width = result_width
        .narrowed()
        .expect("widen_s has no source for W8");
    result_width.truncate_imm(x)
}

/// Zero-extend: drop `x`'s sign extension down to its true width, then re-extend at the wider
/// width (where the top bit of the unsigned value is always 0, since a widen always at least
/// doubles the bit count).
pub(super) fn widen_u(result_width: Width, x: i64) -> i64 {
    let source_width = result_width
        .narrowed()
        .expect("widen_u has no source for W8");
    result_width.truncate_imm(source_width.unsigned(x) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_u_zero_extends_negative_byte() {
        let minus_one_i8 = Width::W8.truncate_imm(-1);
        assert_eq!(widen_u(Width::W16, minus_one_i8), 0xff);
    }

    #[test]
    fn widen_s_sign_extends_negative_byte() {
        let minus_one_i8 = Width::W8.truncate_imm(-1);
        assert_eq!(widen_s(Width::W16, minus_one_i8), -1);
    }
}
