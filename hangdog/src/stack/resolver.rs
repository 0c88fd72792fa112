//! Stack trace resolution and display
//!
//! Turns the raw addresses of one sample into the text attached to sampling
//! records: one frame per line, symbolized when the address lies in the
//! executable, `<shared library>` otherwise.

use log::debug;

use crate::symbolization::{current_exe_range, MemoryRange, Symbolizer};

/// Stack trace resolver for this process
///
/// This type consolidates the logic for:
/// - Adjusting addresses for PIE executables
/// - Resolving addresses to symbols
/// - Formatting the stack trace
pub struct StackResolver {
    symbolizer: Option<Symbolizer>,
    memory_range: Option<MemoryRange>,
}

impl StackResolver {
    #[must_use]
    pub fn new(symbolizer: Option<Symbolizer>, memory_range: Option<MemoryRange>) -> Self {
        Self { symbolizer, memory_range }
    }

    /// Resolver for the running executable. Missing debug info or maps only
    /// degrade the output to raw addresses.
    #[must_use]
    pub fn for_current_exe() -> Self {
        let symbolizer = Symbolizer::for_current_exe()
            .map_err(|e| debug!("Symbolization disabled: {e:#}"))
            .ok();
        let memory_range = current_exe_range()
            .map_err(|e| debug!("No executable range: {e:#}"))
            .ok();
        Self::new(symbolizer, memory_range)
    }

    /// Format a sampled stack.
    ///
    /// `frames[0]` is the interrupted instruction; every later entry is a
    /// return address, looked up one byte back so the call site is found.
    #[must_use]
    pub fn format_stack(&self, frames: &[u64]) -> String {
        let mut lines = Vec::with_capacity(frames.len());

        for (i, &addr) in frames.iter().enumerate() {
            if addr == 0 {
                break;
            }
            let lookup = if i == 0 { addr } else { addr - 1 };
            let (file_offset, in_executable) = self.adjust_address(lookup);

            match (&self.symbolizer, in_executable) {
                (Some(symbolizer), true) => {
                    lines.push(symbolizer.resolve(file_offset).format(i, addr));
                }
                (None, true) => lines.push(format!("#{i:<2} 0x{addr:016x} <unknown>")),
                (_, false) => lines.push(format!("#{i:<2} 0x{addr:016x} <shared library>")),
            }
        }

        lines.join("\n")
    }

    /// Adjust an address for PIE executables
    ///
    /// Returns (`adjusted_address`, `is_in_executable`)
    fn adjust_address(&self, addr: u64) -> (u64, bool) {
        match self.memory_range {
            Some(range) if range.contains(addr) => (addr - range.start, true),
            Some(_) => (addr, false),
            // No range info, use address as-is
            None => (addr, true),
        }
    }
}
