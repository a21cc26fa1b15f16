//! Core of a small cooperatively-scheduled task runtime: one domain per OS
//! thread, many tasks per domain communicating over typed ports and
//! channels, and a per-domain cache of dynamically resolved crate symbols.
//! Compiled code is meant to drive this through [`upcall`]; everything
//! else here is the safe engine that surface delegates to.

pub mod circbuf;
pub mod comm;
pub mod condition;
pub mod crate_cache;
pub mod crate_image;
pub mod domain;
pub mod dwarf;
pub mod error;
pub mod flags;
pub mod glue;
pub mod loader;
pub mod log;
pub mod rost_mem;
pub mod service;
pub mod stack;
pub mod task;
pub mod upcall;
