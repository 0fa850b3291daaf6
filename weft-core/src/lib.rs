//! Weft is an embeddable library for building, optimizing and executing small data-parallel
//! kernels over arrays of primitive scalars.
//!
//! A caller describes a computation with a [`Builder`]: a directed acyclic graph of typed vector
//! operations over 8/16/32/64-bit lanes, deduplicated by common-subexpression elimination and
//! simplified by algebraic identities and constant folding as it is built. [`compile`] lowers that
//! graph into an immutable [`Program`] — dead-code-eliminated, with loop-invariant computation
//! hoisted out of the per-chunk schedule — which [`run`] then walks in [`LANES`]-wide chunks
//! (with scalar-width tail handling) against the caller's input and output pointers.
//!
//! ```
//! use weft_core::{Builder, compile, run, V32};
//!
//! let mut b = Builder::new();
//! let x: V32 = b.load(1);              // ptr[1]
//! let one: V32 = b.splat(1);
//! b.store(0, b.add_i(x, one));         // ptr[0] = ptr[1] + 1
//! let program = compile(b);
//!
//! let src = [1i32, 2, 3, 4];
//! let mut dst = [0i32; 4];
//! let mut ptr = [dst.as_mut_ptr() as *mut u8, src.as_ptr() as *mut u8];
//! unsafe { run(&program, src.len(), &mut ptr) };
//! assert_eq!(dst, [2, 3, 4, 5]);
//! ```
//!
//! A `Builder` is single-threaded and not `Sync`: one producer constructs it, then hands
//! ownership to [`compile`]. The resulting `Program` is immutable and safe to run concurrently
//! from multiple threads, each against its own scratch buffer and pointer array.
//!
//! Out of scope for this crate: a textual source language, control flow inside a kernel, heap
//! data structures, I/O, and multi-threaded execution of a single `run` call. An optional
//! ahead-of-time code emitter is sketched as an interface in the sibling `weft-jit` crate; this
//! crate is the correctness reference regardless of whether a jit is used.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc as std;

mod builder;
mod cse;
mod entity;
mod inst;
mod interp;
mod ops;
mod program;
mod value;

pub use builder::Builder;
pub use entity::Handle;
pub use interp::run;
pub use program::{compile, PInst, Program, LANES};
pub use value::{Lane, Op, Width, V16, V32, V64, V8};

// Re-exported so a jit crate (or any code walking a compiled program) can name the lowered
// instruction kind without duplicating it.
pub use inst::Kind;
