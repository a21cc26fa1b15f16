//! Glue ABI (§6): the small set of code addresses the compiler emits and
//! the runtime patches into or calls through task stacks. All four are
//! position-relative to the owning crate's base, which is why they're
//! plain addresses here rather than function pointers into this process's
//! own code — `crate_image::RostCrate` is what resolves them.

pub use crate::crate_image::ActivateGlue;

/// A bare code address: `exit_task`, `unwind`, and `yield` glue are never
/// called directly by the runtime as Rust functions — they're addresses
/// spliced into a task's stack (`stack::splice_exit_frame`) for compiled
/// code to transfer control to.
pub type GlueAddr = usize;
