//! The jit interface: a parallel code path to [`weft_core::run`](weft_core::run), not a
//! replacement for it.
//!
//! A per-target [`Target`] supplies a [`CodeEmitter`] for whichever `(Op, Width)` pairs it knows
//! how to lower to native code; [`jit`] walks a compiled [`Program`](weft_core::Program), asks the
//! target for an emitter at each live instruction, and assigns registers with a simple first-fit
//! allocator. Per the specification, this crate stops at the interface: it ships no AArch64 NEON
//! or AVX encoders, the same way `weft-core` ships an interpreter but no code generator. A caller
//! wanting real native execution provides a `Target` impl for their ISA; everyone else just calls
//! [`weft_core::run`] and never touches this crate.
//!
//! Jit emission can fail for reasons that are not bugs: an op has no emitter on this target, or
//! register allocation ran out of registers for a wide kernel. Neither is reported as an error
//! type; both make [`jit`] return `0`, which the caller reads as "fall back to the interpreter".
//! The interpreter is always correct; the jit is always optional.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc as std;

use core::sync::atomic::{AtomicBool, Ordering};
use std::vec::Vec;
use weft_core::{Kind, Op, PInst, Program, Width};

/// Registers are numbered `0..REGISTER_COUNT`, a sufficient abstraction for both AArch64 NEON's
/// 32 vector registers and an AVX-class target's 16 (mapped onto the low half).
pub const REGISTER_COUNT: u8 = 32;

/// Fragments a value of `width` occupies: widths up to 16 bits fit in one register per chunk, 32
/// bits takes two, 64 bits takes four (`max(1, bits/16)`).
pub fn fragments_for(width: Width) -> usize {
    core::cmp::max(1, width.bits() as usize / 16)
}

/// A per-target, per-`(op, width)` instruction encoder.
///
/// `emit` appends the native bytes for one operation to `buf` and returns nothing; the caller
/// tracks the cursor as `buf.len()`. `out`/`x`/`y`/`z` are register fragment lists (length
/// [`fragments_for`] of the relevant width, empty where an operand is unused), and `imm` is the
/// instruction's immediate payload verbatim.
pub trait CodeEmitter {
    /// Append this op's native encoding to `buf`.
    fn emit(&self, buf: &mut Vec<u8>, out: &[u8], x: &[u8], y: &[u8], z: &[u8], imm: i64);
}

/// A code-generation target: supplies an emitter per `(op, width)` the jit might need, plus the
/// loop prologue/epilogue around the kernel body. Per-target instruction encodings are
/// deliberately not provided by this crate — implement this trait for your own ISA.
pub trait Target {
    /// The emitter for this `(op, width)` pair, or `None` if this target cannot jit it (the whole
    /// [`jit`] call then fails with length `0`).
    fn emitter(&self, op: Op, width: Width) -> Option<&dyn CodeEmitter>;

    /// Registers this target reserves (e.g. callee-saved, or a frame/base-pointer register) and
    /// which the allocator must never hand out.
    fn reserved_registers(&self) -> &[u8];

    /// Zero the induction counter; emit a debug-break instruction first if `debug_break` is set.
    fn emit_prologue(&self, buf: &mut Vec<u8>, debug_break: bool);

    /// Increment the induction counter, decrement the remaining-element count, branch to the loop
    /// top while nonzero, and return.
    fn emit_epilogue(&self, buf: &mut Vec<u8>);
}

static DEBUG_BREAK: AtomicBool = AtomicBool::new(false);

/// Set the global flag that causes [`jit`] to emit a debug-break instruction in the prologue of
/// every kernel compiled from now on. Intended for attaching a debugger to freshly jitted code;
/// not meant to be toggled mid-compile from multiple threads.
pub fn set_debug_break(enabled: bool) {
    DEBUG_BREAK.store(enabled, Ordering::SeqCst);
}

/// A first-fit register allocator over `0..REGISTER_COUNT`, excluding a target's reserved set.
/// Spill is a non-goal: [`RegAlloc::alloc`] returns `None` rather than spilling to the stack, and
/// the caller (here, [`jit`]) treats that as total allocation failure.
struct RegAlloc {
    free: [bool; REGISTER_COUNT as usize],
}

impl RegAlloc {
    fn new(reserved: &[u8]) -> Self {
        let mut free = [true; REGISTER_COUNT as usize];
        for &r in reserved {
            if (r as usize) < free.len() {
                free[r as usize] = false;
            }
        }
        RegAlloc { free }
    }

    /// Grab `count` free registers, or `None` (rolling back) if fewer than `count` are free.
    fn alloc(&mut self, count: usize) -> Option<Vec<u8>> {
        let mut taken = Vec::with_capacity(count);
        for (i, slot) in self.free.iter_mut().enumerate() {
            if *slot {
                *slot = false;
                taken.push(i as u8);
                if taken.len() == count {
                    return Some(taken);
                }
            }
        }
        for r in taken {
            self.free[r as usize] = true;
        }
        None
    }

    fn release(&mut self, regs: &[u8]) {
        for &r in regs {
            self.free[r as usize] = true;
        }
    }
}

/// For every scratch-buffer byte offset read by some instruction, the index of the last
/// instruction that reads it — so the allocator can release a dead value's registers as soon as
/// its final use has been emitted, instead of holding them for the rest of the program.
fn last_use(insts: &[PInst]) -> std::collections::BTreeMap<usize, usize> {
    let mut last = std::collections::BTreeMap::new();
    for (i, d) in insts.iter().enumerate() {
        for &(used, offset) in &[(d.x_used, d.x), (d.y_used, d.y), (d.z_used, d.z)] {
            if used {
                last.insert(offset, i);
            }
        }
    }
    last
}

/// Compute the jit size for `program` against `target` (with `buf = None`), or emit it into `buf`
/// and return the number of bytes written. Returns `0` if any live instruction lacks an emitter
/// on this target, or if register allocation fails — in both cases the caller should fall back to
/// [`weft_core::run`].
pub fn jit(program: &Program, target: &dyn Target, buf: Option<&mut [u8]>) -> usize {
    match emit(program, target) {
        Some(bytes) => {
            if let Some(dst) = buf {
                if dst.len() < bytes.len() {
                    return 0;
                }
                dst[..bytes.len()].copy_from_slice(&bytes);
            }
            bytes.len()
        }
        None => 0,
    }
}

fn emit(program: &Program, target: &dyn Target) -> Option<Vec<u8>> {
    let insts = program.instructions();
    let mut alloc = RegAlloc::new(target.reserved_registers());
    // Track each scratch byte-offset's assigned register fragments, and the last program index
    // that reads it, so registers are released the instruction after their final use.
    let mut regs_at: std::collections::BTreeMap<usize, Vec<u8>> = Default::default();
    let last_use = last_use(insts);

    let mut buf = Vec::new();
    target.emit_prologue(&mut buf, DEBUG_BREAK.load(Ordering::SeqCst));

    for (i, d) in insts.iter().enumerate() {
        let emitter = target.emitter(d.op, d.width).or_else(|| {
            log::debug!("jit: no emitter for {:?}/{:?} at instruction {i}, falling back", d.op, d.width);
            None
        })?;

        let x = if d.x_used { regs_at.get(&d.x).cloned().unwrap_or_default() } else { Vec::new() };
        let y = if d.y_used { regs_at.get(&d.y).cloned().unwrap_or_default() } else { Vec::new() };
        let z = if d.z_used { regs_at.get(&d.z).cloned().unwrap_or_default() } else { Vec::new() };

        let out = if d.kind == Kind::SideEffect {
            Vec::new()
        } else {
            let fragments = fragments_for(d.width);
            let regs = alloc.alloc(fragments).or_else(|| {
                log::debug!("jit: register allocation failed at instruction {i}, falling back");
                None
            })?;
            regs_at.insert(d.out, regs.clone());
            regs
        };

        emitter.emit(&mut buf, &out, &x, &y, &z, d.imm);

        for &(used, offset) in &[(d.x_used, d.x), (d.y_used, d.y), (d.z_used, d.z)] {
            if used && last_use.get(&offset) == Some(&i) {
                if let Some(regs) = regs_at.remove(&offset) {
                    alloc.release(&regs);
                }
            }
        }
    }

    target.emit_epilogue(&mut buf);
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{Builder, compile, V32};

    struct NeverEmits;
    impl Target for NeverEmits {
        fn emitter(&self, _op: Op, _width: Width) -> Option<&dyn CodeEmitter> {
            None
        }
        fn reserved_registers(&self) -> &[u8] {
            &[]
        }
        fn emit_prologue(&self, _buf: &mut Vec<u8>, _debug_break: bool) {}
        fn emit_epilogue(&self, _buf: &mut Vec<u8>) {}
    }

    #[test]
    fn missing_emitter_fails_closed() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        b.store(0, x);
        let p = compile(b);
        assert_eq!(jit(&p, &NeverEmits, None), 0);
    }

    struct CountingEmitter;
    impl CodeEmitter for CountingEmitter {
        fn emit(&self, buf: &mut Vec<u8>, _out: &[u8], _x: &[u8], _y: &[u8], _z: &[u8], _imm: i64) {
            buf.push(0);
        }
    }

    struct TrivialTarget;
    impl Target for TrivialTarget {
        fn emitter(&self, _op: Op, _width: Width) -> Option<&dyn CodeEmitter> {
            Some(&CountingEmitter)
        }
        fn reserved_registers(&self) -> &[u8] {
            &[]
        }
        fn emit_prologue(&self, buf: &mut Vec<u8>, _debug_break: bool) {
            buf.push(0xAA);
        }
        fn emit_epilogue(&self, buf: &mut Vec<u8>) {
            buf.push(0xBB);
        }
    }

    #[test]
    fn first_pass_reports_length_second_pass_emits_equal_bytes() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        let one: V32 = b.splat(1);
        let y = b.add_i(x, one);
        b.store(0, y);
        let p = compile(b);

        let len = jit(&p, &TrivialTarget, None);
        assert!(len > 0);
        let mut out = vec![0u8; len];
        assert_eq!(jit(&p, &TrivialTarget, Some(&mut out)), len);
    }

    #[test]
    fn undersized_buffer_fails_closed() {
        let mut b = Builder::new();
        let x: V32 = b.load(1);
        b.store(0, x);
        let p = compile(b);
        let len = jit(&p, &TrivialTarget, None);
        let mut too_small = vec![0u8; len.saturating_sub(1)];
        assert_eq!(jit(&p, &TrivialTarget, Some(&mut too_small)), 0);
    }
}
