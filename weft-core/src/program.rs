//! The compiler: lowers a [`Builder`](crate::builder::Builder)'s graph into an immutable
//! [`Program`] ready to run.
//!
//! Lowering is four passes over the builder's instruction array, each described in the value
//! algebra's design notes:
//!
//! 1. **Backward liveness (DCE).** Every `SideEffect` instruction is a root; an instruction is
//!    live iff it is a root or an operand of a live instruction. Everything else never makes it
//!    into the compiled program.
//! 2. **Forward loop-dependence.** An instruction is loop-dependent iff it is a `Load` or
//!    `SideEffect`, or any operand is loop-dependent; otherwise it is loop-invariant
//!    (`Splat`/`Uniform`/pure `Math` over invariants).
//! 3. **Scheduling.** Live instructions are emitted invariant-first, dependent-second, each group
//!    keeping its original relative order.
//! 4. **Slot allocation.** Each emitted instruction is assigned a contiguous byte region of the
//!    scratch buffer sized to its own width; downstream operands reference that region by offset.
//!    `SideEffect` instructions produce no value and claim no scratch space.

use crate::builder::Builder;
use crate::entity::Handle;
use crate::inst::{BInst, Kind};
use crate::value::{Op, Width};
use std::vec::Vec;

/// Lanes processed per chunk by the interpreter (and the unit the jit's native loop vectorizes
/// over). Fixed, unlike the reference implementation's `#define N`, only because Rust has no
/// compile-time configuration knob as convenient as a header macro; changing it is a one-line
/// edit and nothing elsewhere depends on the specific value 8.
pub const LANES: usize = 8;

/// One lowered instruction. Operand fields are byte offsets into the interpreter's scratch
/// buffer, already multiplied by [`LANES`] at compile time (see the module docs). `out` is this
/// instruction's own result region, by the same convention.
///
/// Offset `0` is a valid real scratch address (whichever instruction is scheduled first owns it),
/// so it cannot double as an "unused operand" sentinel the way `Handle::NONE` does in the builder
/// graph; the explicit `x_used`/`y_used`/`z_used` flags carry that instead. Public so a jit
/// backend in a sibling crate can walk a compiled program without reaching into crate internals.
#[derive(Copy, Clone, Debug)]
pub struct PInst {
    /// Which instruction family this is; determines how `op` is interpreted.
    pub kind: Kind,
    /// The operation this instruction performs.
    pub op: Op,
    /// This instruction's result width (or, for `Store`/`Assert`, its operand's width).
    pub width: Width,
    /// Byte offset of the `x` operand's value; meaningless unless `x_used`.
    pub x: usize,
    /// Whether `x` is used. `Splat`/`Uniform`/`Load` use none of `x`/`y`/`z`.
    pub x_used: bool,
    /// Byte offset of the `y` operand's value; meaningless unless `y_used`.
    pub y: usize,
    /// Whether `y` is used.
    pub y_used: bool,
    /// Byte offset of the `z` operand's value; meaningless unless `z_used`. Only `Sel` uses this.
    pub z: usize,
    /// Whether `z` is used.
    pub z_used: bool,
    /// Byte offset of this instruction's own result region. Unused (and not scratch-backed) for
    /// `Store`/`Assert`, which produce no value.
    pub out: usize,
    /// Splat bits, a `ptr[]` index, or an immediate shift count, depending on `op`.
    pub imm: i64,
}

/// An optimized, immutable kernel produced by [`compile`]. Safe to run concurrently from
/// multiple threads against distinct scratch buffers and pointer arrays; `run` never mutates a
/// `Program`.
pub struct Program {
    pub(crate) insts: Vec<PInst>,
    /// Total scratch bytes-per-lane consumed across every live instruction; the interpreter's
    /// scratch buffer is `scratch_units * LANES` bytes.
    pub(crate) scratch_units: usize,
    /// Count of instructions in the loop-invariant prefix of `insts`.
    pub(crate) loop_inst: usize,
    /// Scratch bytes-per-lane consumed by the invariant prefix alone, i.e. the byte offset (pre
    /// `* LANES`) at which the loop-dependent group's instructions begin. Exposed for parity with
    /// the reference `Program` layout (`loop_slot`); the tagged-dispatch interpreter does not
    /// need it to run correctly, since every operand offset is already absolute.
    pub(crate) loop_slot: usize,
}

impl Program {
    /// Number of live instructions actually scheduled, post-DCE. Useful for asserting dead code
    /// was in fact eliminated.
    pub fn instruction_count(&self) -> usize {
        self.insts.len()
    }

    /// Count of instructions computed once per [`run`](crate::interp::run) regardless of `n`,
    /// rather than once per chunk.
    pub fn loop_invariant_count(&self) -> usize {
        self.loop_inst
    }

    /// The lowered instruction stream, in schedule order (loop-invariant prefix, then
    /// loop-dependent suffix). A jit backend walks this to emit native code; the interpreter has
    /// its own (identical) view via `crate::interp`.
    pub fn instructions(&self) -> &[PInst] {
        &self.insts
    }
}

/// Lower `builder`'s graph into an optimized [`Program`], consuming the builder.
pub fn compile(builder: Builder) -> Program {
    let insts = builder.into_insts();
    let len = insts.len();

    let alive = mark_live(&insts);
    let loop_dependent = mark_loop_dependent(&insts);

    let mut order: Vec<usize> = (0..len).filter(|&i| alive[i] && !loop_dependent[i]).collect();
    let loop_inst = order.len();
    order.extend((0..len).filter(|&i| alive[i] && loop_dependent[i]));

    let mut offset_of: Vec<usize> = vec![0; len];
    let mut cursor = 0usize;
    let mut loop_slot = 0usize;
    let mut out = Vec::with_capacity(order.len());

    for (scheduled, &old_index) in order.iter().enumerate() {
        if scheduled == loop_inst {
            loop_slot = cursor;
        }
        let inst = insts[old_index];
        offset_of[old_index] = cursor;
        let this_offset = cursor * LANES;
        if inst.kind != Kind::SideEffect {
            cursor += inst.width.bytes();
        }

        let operand_offset = |h: Handle| -> usize {
            if h.is_some() {
                offset_of[h.index()] * LANES
            } else {
                0
            }
        };

        out.push(PInst {
            kind: inst.kind,
            op: inst.op,
            width: inst.width,
            x: operand_offset(inst.x),
            x_used: inst.x.is_some(),
            y: operand_offset(inst.y),
            y_used: inst.y.is_some(),
            z: operand_offset(inst.z),
            z_used: inst.z.is_some(),
            out: this_offset,
            imm: inst.imm,
        });
    }
    if loop_inst == order.len() {
        loop_slot = cursor;
    }

    log::debug!(
        "compiled {} of {} instructions live ({} loop-invariant), {} scratch bytes/lane",
        out.len(),
        len,
        loop_inst,
        cursor,
    );

    Program {
        insts: out,
        scratch_units: cursor,
        loop_inst,
        loop_slot,
    }
}

fn mark_live(insts: &[BInst]) -> Vec<bool> {
    let mut alive = vec![false; insts.len()];
    for (i, inst) in insts.iter().enumerate() {
        if inst.kind == Kind::SideEffect {
            alive[i] = true;
        }
    }
    for i in (0..insts.len()).rev() {
        if alive[i] {
            for h in insts[i].operands() {
                if h.is_some() {
                    alive[h.index()] = true;
                }
            }
        }
    }
    alive
}

fn mark_loop_dependent(insts: &[BInst]) -> Vec<bool> {
    let mut dep = vec![false; insts.len()];
    for (i, inst) in insts.iter().enumerate() {
        dep[i] = matches!(inst.kind, Kind::Load | Kind::SideEffect)
            || inst.operands().iter().any(|h| h.is_some() && dep[h.index()]);
    }
    dep
}
