//! `BInst`: the record a [`Builder`](crate::builder::Builder) appends per instruction.
//!
//! The source implementation packs a function pointer and a "done" variant into each record so
//! the interpreter can tail-call from one stage to the next. We keep a linear schedule of typed
//! records instead and dispatch on `(kind, op, width)` with a match in the interpreter — see the
//! "Function-pointer chain -> tagged dispatch" design note. Nothing here needs to be `repr(C)`;
//! the CSE hash is computed field-by-field (see [`crate::cse`]), not over the raw struct bytes,
//! so Rust is free to lay the fields out however it likes.

use crate::entity::Handle;
use crate::value::{Op, Width};

/// What family an instruction belongs to. Ordered the same way the liveness/loop-dependence
/// passes reason about it: `Load` and `SideEffect` are always loop-dependent and are never
/// deduplicated by CSE; everything before them may be either, depending on their operands.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Kind {
    Math,
    Splat,
    Uniform,
    Load,
    SideEffect,
}

/// One recorded instruction. Operand handles always reference instructions earlier in the
/// builder's array (topological order falls out of the single-pass builder automatically).
#[derive(Copy, Clone, Debug)]
pub struct BInst {
    pub kind: Kind,
    pub op: Op,
    /// Result width in bytes; `0` for a side-effect instruction with no result.
    pub width: Width,
    /// Operand handles, `Handle::NONE` if unused. For `Sel` this is `(mask, a, b)`; for `Store`
    /// this is `(value, _, _)`.
    pub x: Handle,
    pub y: Handle,
    pub z: Handle,
    /// Splat bits, a `ptr[]` index, or a shift count, depending on `op`.
    pub imm: i64,
}

impl BInst {
    pub(crate) fn operands(&self) -> [Handle; 3] {
        [self.x, self.y, self.z]
    }

    /// `true` if this instruction's value is a compile-time constant lane pattern.
    pub(crate) fn is_splat(&self) -> bool {
        matches!(self.kind, Kind::Splat)
    }
}
