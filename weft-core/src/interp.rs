//! The interpreter: walks a compiled [`Program`] in fixed-width chunks against caller-supplied
//! pointers.
//!
//! The reference implementation dispatches each stage through a per-instruction function pointer
//! that tail-calls into the next stage, threading a moving write cursor `R` along the chain (see
//! `weft.c`'s `stage`/`next` macros). Since every operand offset our compiler produces is already
//! an absolute byte offset into the scratch buffer (not a cursor relative to the instruction doing
//! the writing), that chain collapses to an ordinary loop over a tagged instruction array with a
//! `match` on `(kind, op)` — the "tagged dispatch" alternative the design notes call out as an
//! equally correct substitute for the function-pointer chain.

use crate::inst::Kind;
use crate::ops;
use crate::program::{Program, LANES};
use crate::value::{Op, Width};
use core::ptr;
use std::vec::Vec;

unsafe fn read_lane(base: *const u8, width: Width, lane: usize) -> i64 {
    let p = base.add(lane * width.bytes());
    match width {
        Width::W8 => ptr::read_unaligned(p as *const i8) as i64,
        Width::W16 => ptr::read_unaligned(p as *const i16) as i64,
        Width::W32 => ptr::read_unaligned(p as *const i32) as i64,
        Width::W64 => ptr::read_unaligned(p as *const i64),
    }
}

unsafe fn write_lane(base: *mut u8, width: Width, lane: usize, value: i64) {
    let p = base.add(lane * width.bytes());
    match width {
        Width::W8 => ptr::write_unaligned(p as *mut i8, value as i8),
        Width::W16 => ptr::write_unaligned(p as *mut i16, value as i16),
        Width::W32 => ptr::write_unaligned(p as *mut i32, value as i32),
        Width::W64 => ptr::write_unaligned(p as *mut i64, value),
    }
}

/// Run `program` over `n` independent elements. `ptr[0]` is conventionally the output pointer;
/// `ptr[i]` for `i > 0` are inputs, indexed by the `ptr_idx` immediates baked into `load`/
/// `store`/`uniform` at construction time.
///
/// # Safety
///
/// Every `ptr[i]` referenced by a `load`, `store` or `uniform` in this program's kernel must be
/// valid for `n` elements of that operation's width, non-overlapping with every other referenced
/// pointer in a way that would violate the kernel's own ordering assumptions, and remain valid for
/// the duration of this call. `ptr` itself must have at least as many entries as the highest
/// `ptr_idx` used by the kernel. None of this is checked; violating it is undefined behavior, the
/// same contract the reference C `weft_run` places on its caller.
pub unsafe fn run(program: &Program, n: usize, ptr: &[*mut u8]) {
    if program.insts.is_empty() {
        return;
    }

    let mut scratch = vec![0u8; program.scratch_units * LANES];
    let base = scratch.as_mut_ptr();

    let full_chunks = n / LANES;
    let tail = n % LANES;
    let mut off = 0usize;
    let mut invariants_done = false;

    for _ in 0..full_chunks {
        let start = if invariants_done { program.loop_inst } else { 0 };
        execute_chunk(program, start, off, LANES, base, ptr);
        invariants_done = true;
        off += LANES;
    }
    if tail > 0 {
        let start = if invariants_done { program.loop_inst } else { 0 };
        execute_chunk(program, start, off, tail, base, ptr);
    }
}

unsafe fn execute_chunk(
    program: &Program,
    start: usize,
    off: usize,
    lanes: usize,
    base: *mut u8,
    ptr: &[*mut u8],
) {
    for inst in &program.insts[start..] {
        let out = base.add(inst.out);
        match inst.kind {
            Kind::Splat => {
                for lane in 0..lanes {
                    write_lane(out, inst.width, lane, inst.imm);
                }
            }
            Kind::Uniform => {
                let src = ptr[inst.imm as usize];
                let scalar = read_lane(src, inst.width, 0);
                for lane in 0..lanes {
                    write_lane(out, inst.width, lane, scalar);
                }
            }
            Kind::Load => {
                let bytes = lanes * inst.width.bytes();
                let src = ptr[inst.imm as usize].add(off * inst.width.bytes());
                ptr::copy_nonoverlapping(src, out, bytes);
            }
            Kind::SideEffect if inst.op == Op::Store => {
                let bytes = lanes * inst.width.bytes();
                let x = base.add(inst.x);
                let dst = ptr[inst.imm as usize].add(off * inst.width.bytes());
                ptr::copy_nonoverlapping(x, dst, bytes);
            }
            Kind::SideEffect => {
                debug_assert_eq!(inst.op, Op::Assert);
                let x = base.add(inst.x);
                for lane in 0..lanes {
                    if read_lane(x, inst.width, lane) == 0 {
                        panic!("weft: assert_{} failed at lane {lane}", inst.width);
                    }
                }
            }
            Kind::Math => {
                let arity = inst.op.arity();
                let x = base.add(inst.x);
                let y = base.add(inst.y);
                let z = base.add(inst.z);
                let imm_shift = is_imm_shift(inst.op);
                for lane in 0..lanes {
                    let xv = if arity >= 1 {
                        read_lane(x, operand_width(inst.op, inst.width, 0), lane)
                    } else {
                        0
                    };
                    let yv = if arity >= 2 {
                        read_lane(y, operand_width(inst.op, inst.width, 1), lane)
                    } else {
                        0
                    };
                    let zv = if inst.op == Op::Sel {
                        read_lane(z, inst.width, lane)
                    } else if imm_shift {
                        inst.imm
                    } else {
                        0
                    };
                    let result = ops::eval(inst.op, inst.width, xv, yv, zv);
                    write_lane(out, inst.width, lane, result);
                }
            }
        }
    }
}

/// Widen/narrow and cast ops read an operand at a *different* width than they produce; every
/// other op's operands share its own width. `which` is 0 for `x`, 1 for `y`.
fn operand_width(op: Op, result_width: Width, which: u8) -> Width {
    match (op, which) {
        (Op::WidenS, 0) | (Op::WidenU, 0) | (Op::WidenF, 0) => {
            result_width.narrowed().expect("widen has a narrower source width")
        }
        (Op::NarrowI, 0) | (Op::NarrowF, 0) => {
            result_width.widened().expect("narrow has a wider source width")
        }
        _ => result_width,
    }
}

fn is_imm_shift(op: Op) -> bool {
    matches!(op, Op::ShlIImm | Op::ShrSImm | Op::ShrUImm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::program::compile;
    use crate::value::{V32, V8};

    fn run_with(program: &Program, n: usize, ptrs: &mut [*mut u8]) {
        unsafe { run(program, n, ptrs) };
    }

    #[test]
    fn s1_memset8() {
        let mut b = Builder::new();
        let c: V8 = b.splat(0x42);
        b.store(0, c);
        let p = compile(b);

        let mut buf = [0u8; 31];
        let mut ptrs = [buf.as_mut_ptr()];
        run_with(&p, 31, &mut ptrs);
        assert!(buf.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn s2_memcpy32() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        b.store(0, x);
        let p = compile(b);

        let src: Vec<i32> = (0..31).collect();
        let mut dst = vec![0i32; 31];
        let mut ptrs = [dst.as_mut_ptr() as *mut u8, src.as_ptr() as *mut u8];
        run_with(&p, 31, &mut ptrs);
        assert_eq!(dst, src);
    }

    #[test]
    fn s3_float_identity_chain_cses_and_round_trips() {
        let mut b = Builder::new();
        let one: V32 = b.splat(1.0f32.to_bits() as i64);
        let x: V32 = b.load(1);
        let y = b.add_f(x, one);
        let z = b.add_f(x, one);
        assert_eq!(y.handle(), z.handle());
        let result = b.sub_f(y, one);
        b.store(0, result);
        let p = compile(b);

        let src: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut dst = vec![0f32; 16];
        let mut ptrs = [dst.as_mut_ptr() as *mut u8, src.as_ptr() as *mut u8];
        run_with(&p, 16, &mut ptrs);
        assert_eq!(dst, src);
    }

    #[test]
    fn s6_assert_on_true_condition_does_not_abort() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        let a: V32 = b.load(1);
        let d = b.sub_i(a, a);
        let zero: V32 = b.splat(0);
        let cond = b.eq_i(d, zero);
        b.assert(cond);
        let sum = b.add_i(x, d);
        b.store(0, sum);
        let p = compile(b);

        let src: Vec<i32> = (0..16).collect();
        let mut dst = vec![0i32; 16];
        let mut ptrs = [dst.as_mut_ptr() as *mut u8, src.as_ptr() as *mut u8];
        run_with(&p, 16, &mut ptrs);
        assert_eq!(dst, src);
    }

    #[test]
    #[should_panic(expected = "assert")]
    fn assert_on_false_condition_panics() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        let zero: V32 = b.splat(0);
        let cond = b.eq_i(x, zero);
        b.assert(cond);
        let p = compile(b);

        let src: Vec<i32> = vec![1, 2, 3];
        let mut ptrs = [core::ptr::null_mut(), src.as_ptr() as *mut u8];
        run_with(&p, 3, &mut ptrs);
    }

    #[test]
    fn empty_kernel_never_touches_ptr() {
        let b = Builder::new();
        let p = compile(b);
        let mut buf = [0xAAu8; 31];
        let before = buf;
        let mut ptrs = [buf.as_mut_ptr()];
        run_with(&p, 31, &mut ptrs);
        assert_eq!(buf, before);
    }

    #[test]
    fn tail_writes_exactly_n_lanes_no_more() {
        let mut b = Builder::new();
        let c: V8 = b.splat(1);
        b.store(0, c);
        let p = compile(b);

        let mut buf = [0u8; 20];
        buf[11] = 0xFF; // sentinel just past n=11, must survive untouched.
        let mut ptrs = [buf.as_mut_ptr()];
        run_with(&p, 11, &mut ptrs);
        assert!(buf[..11].iter().all(|&b| b == 1));
        assert_eq!(buf[11], 0xFF);
    }

    #[test]
    fn store_twice_is_a_true_read_after_write() {
        let mut b = Builder::new();
        let one: V8 = b.splat(1);
        let first: V8 = b.load(1);
        b.store(0, b.xor(first, one));
        let second: V8 = b.load(0);
        b.store(0, b.xor(second, one));
        let p = compile(b);

        let src = [0x55u8; 5];
        let mut buf = [0u8; 5];
        let mut ptrs = [buf.as_mut_ptr(), src.as_ptr() as *mut u8];
        run_with(&p, 5, &mut ptrs);
        // xor 1 twice, with the second read observing the first store: cancels out.
        assert_eq!(buf, src);
    }

    #[test]
    fn sel_parity_kernel_matches_reference_computation() {
        let mut b = Builder::new();
        let one: V8 = b.splat(1);
        let x: V8 = b.load(1);
        let odd = b.and(x, one);
        let shifted = b.shl_i(b.shr_u_i(x, one), one);
        let result = b.sel(odd, x, shifted);
        b.store(0, result);
        let p = compile(b);

        let src: Vec<u8> = (0..20u8).collect();
        let mut dst = vec![0u8; 20];
        let mut ptrs = [dst.as_mut_ptr(), src.as_ptr() as *mut u8];
        run_with(&p, 20, &mut ptrs);

        for (i, &s) in src.iter().enumerate() {
            let m = s & 1;
            let shifted = (s >> 1) << 1;
            let expect = (m & s) | (!m & shifted);
            assert_eq!(dst[i], expect, "lane {i}");
        }
    }

    #[test]
    fn loop_invariant_uniform_is_computed_once_per_run() {
        use core::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        // Not directly observable through the public API, so this test pins the documented
        // contract indirectly: a uniform-derived value must be identical across every chunk
        // even when a naive re-evaluation would be free to read a *different* scalar if the
        // caller mutated ptr[1] mid-run (which a spec-compliant caller must not do, but the
        // interpreter should not re-read regardless).
        CALLS.store(0, Ordering::SeqCst);
        let mut b = Builder::new();
        let u: V32 = b.uniform(1);
        b.store(0, u);
        let p = compile(b);
        assert_eq!(p.loop_invariant_count(), 1);

        let scalar = 7i32;
        let mut dst = vec![0i32; 19];
        let mut ptrs = [dst.as_mut_ptr() as *mut u8, &scalar as *const i32 as *mut u8];
        run_with(&p, 19, &mut ptrs);
        assert!(dst.iter().all(|&v| v == 7));
    }
}
