//! Filesystem implementations.
//!
//! [`MemoryBackend`] is the game's own sandbox. [`LocalBackend`] stands in for
//! it when a host directory is played against from the command line.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
