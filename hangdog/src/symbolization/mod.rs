//! # Symbol Resolution for Sampled Stacks
//!
//! Turns the raw return addresses the stack sampler collects into function
//! names, files and lines, using the DWARF debug info of the running
//! executable.
//!
//! ## Address Translation
//!
//! The executable is position independent, so runtime addresses are offset
//! by the load base chosen at exec time:
//!
//! ```text
//! File Offset = Runtime Address - Base Address
//! ```
//!
//! [`current_exe_range`] reads the base from `/proc/self/maps`. Addresses
//! outside that range belong to shared libraries and are printed without a
//! name.
//!
//! ## Module Structure
//!
//! - **`symbolizer`**: DWARF lookups with a symbol-table fallback, per-address cache
//! - **`memory_maps`**: executable range from `/proc/self/maps`
//!
//! ## Limitations
//!
//! - Needs debug info (`debug = true` in the release profile) for file/line
//! - Only the executable itself is symbolized, not shared libraries

pub mod memory_maps;
pub mod symbolizer;

pub use memory_maps::{current_exe_range, find_binary_range, MemoryRange};
pub use symbolizer::Symbolizer;
