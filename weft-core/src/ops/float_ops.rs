//! Float arithmetic, comparisons and width conversions, across `f16`/`f32`/`f64`.
//!
//! Rust's stable `core` has no `f16` type, so half-precision values live as raw `u16` bit
//! patterns and are promoted to `f32` for every arithmetic op, then rounded back down. This is
//! the conversion every half-precision software implementation performs in the absence of
//! hardware support; it costs precision only at the rounding step, same as a real F16 ALU would.
//! `sqrt`/`ceil`/`floor` go through `libm` rather than `std`, since this crate does not require
//! the standard library's floating-point intrinsics to be linked.

use crate::value::Width;
use super::mask_bool;

fn f16_to_f32(bits: u16) -> f32 {
    let sign = (bits as u32 & 0x8000) << 16;
    let exp = (bits >> 10) & 0x1f;
    let frac = bits as u32 & 0x3ff;
    let bits32 = if exp == 0 {
        if frac == 0 {
            sign
        } else {
            // Subnormal half: normalize by hand.
            let mut e = -1i32;
            let mut f = frac;
            while f & 0x400 == 0 {
                f <<= 1;
                e -= 1;
            }
            f &= 0x3ff;
            let exp32 = (127 - 15 + e + 1) as u32;
            sign | (exp32 << 23) | (f << 13)
        }
    } else if exp == 0x1f {
        sign | 0x7f80_0000 | (frac << 13)
    } else {
        let exp32 = exp as u32 + (127 - 15);
        sign | (exp32 << 23) | (frac << 13)
    };
    f32::from_bits(bits32)
}

fn f32_to_f16(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let frac = bits & 0x007f_ffff;
    if exp == 0xff {
        // Inf / NaN.
        let frac16 = if frac != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | frac16;
    }
    let exp16 = exp - 127 + 15;
    if exp16 >= 0x1f {
        return sign | 0x7c00; // overflow to infinity
    }
    if exp16 <= 0 {
        if exp16 < -10 {
            return sign; // underflows to zero
        }
        // Subnormal half.
        let frac_full = frac | 0x0080_0000;
        let shift = 14 - exp16;
        return sign | ((frac_full >> shift) as u16);
    }
    sign | ((exp16 as u16) << 10) | ((frac >> 13) as u16)
}

fn to_f64(width: Width, bits: i64) -> f64 {
    match width {
        Width::W16 => f16_to_f32(bits as u16) as f64,
        Width::W32 => f32::from_bits(bits as u32) as f64,
        Width::W64 => f64::from_bits(bits as u64),
        Width::W8 => unreachable!("no 8-bit float"),
    }
}

fn from_f64(width: Width, v: f64) -> i64 {
    let bits = match width {
        Width::W16 => f32_to_f16(v as f32) as u64,
        Width::W32 => (v as f32).to_bits() as u64,
        Width::W64 => v.to_bits(),
        Width::W8 => unreachable!("no 8-bit float"),
    };
    width.truncate_imm(bits as i64)
}

/// The bit pattern of `1.0` at `width`. Used by the builder to recognize the `x * 1` / `x / 1`
/// peepholes without hand-rolling width-specific float constants at every call site.
pub(super) fn constant_one(width: Width) -> i64 {
    from_f64(width, 1.0)
}

pub(super) fn add(width: Width, x: i64, y: i64) -> i64 {
    from_f64(width, to_f64(width, x) + to_f64(width, y))
}

pub(super) fn sub(width: Width, x: i64, y: i64) -> i64 {
    from_f64(width, to_f64(width, x) - to_f64(width, y))
}

pub(super) fn mul(width: Width, x: i64, y: i64) -> i64 {
    from_f64(width, to_f64(width, x) * to_f64(width, y))
}

pub(super) fn div(width: Width, x: i64, y: i64) -> i64 {
    from_f64(width, to_f64(width, x) / to_f64(width, y))
}

pub(super) fn sqrt(width: Width, x: i64) -> i64 {
    match width {
        Width::W32 => from_f64(width, libm::sqrtf(to_f64(width, x) as f32) as f64),
        _ => from_f64(width, libm::sqrt(to_f64(width, x))),
    }
}

pub(super) fn ceil(width: Width, x: i64) -> i64 {
    match width {
        Width::W32 => from_f64(width, libm::ceilf(to_f64(width, x) as f32) as f64),
        _ => from_f64(width, libm::ceil(to_f64(width, x))),
    }
}

pub(super) fn floor(width: Width, x: i64) -> i64 {
    match width {
        Width::W32 => from_f64(width, libm::floorf(to_f64(width, x) as f32) as f64),
        _ => from_f64(width, libm::floor(to_f64(width, x))),
    }
}

pub(super) fn eq(width: Width, x: i64, y: i64) -> i64 {
    mask_bool(width, to_f64(width, x) == to_f64(width, y))
}

pub(super) fn lt(width: Width, x: i64, y: i64) -> i64 {
    mask_bool(width, to_f64(width, x) < to_f64(width, y))
}

pub(super) fn le(width: Width, x: i64, y: i64) -> i64 {
    mask_bool(width, to_f64(width, x) <= to_f64(width, y))
}

/// `result_width` is the wider of the pair; the source value was carried at `result_width`'s
/// next width down.
pub(super) fn widen(result_width: Width, x: i64) -> i64 {
    let source_width = result_width
        .narrowed()
        .expect("widen_f has no source for W8");
    from_f64(result_width, to_f64(source_width, x))
}

/// `result_width` is the narrower of the pair; the source value was carried at `result_width`'s
/// next width up.
pub(super) fn narrow(result_width: Width, x: i64) -> i64 {
    let source_width = result_width
        .widened()
        .expect("narrow_f has no source for W64");
    from_f64(result_width, to_f64(source_width, x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_roundtrip_of_common_values() {
        for v in [0.0f32, 1.0, -1.0, 0.5, 2.0, 65504.0, -65504.0] {
            let bits = f32_to_f16(v);
            assert_eq!(f16_to_f32(bits), v);
        }
    }

    #[test]
    fn arithmetic_matches_native_f32() {
        let x = Width::W32.truncate_imm(1.5f32.to_bits() as i64);
        let y = Width::W32.truncate_imm(2.25f32.to_bits() as i64);
        let sum = add(Width::W32, x, y);
        assert_eq!(f32::from_bits(sum as u32), 3.75f32);
    }

    #[test]
    fn widen_then_narrow_f16_is_lossless_for_exact_values() {
        let half = f32_to_f16(3.5);
        let as16 = Width::W16.truncate_imm(half as i64);
        let wide = widen(Width::W32, as16);
        let back = narrow(Width::W16, wide);
        assert_eq!(back, as16);
    }
}
