// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianArcSlice, RunTimeEndian};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Symbolizer for resolving instruction pointers of a binary to source locations
///
/// DWARF first; when the binary carries no line info for an address the ELF
/// symbol table still gives a function name. Resolved addresses are cached,
/// since a stuck thread is sampled at the same return addresses over and over.
///
/// `Send` but not `Sync`: share one behind a mutex.
pub struct Symbolizer {
    ctx: Context<EndianArcSlice<RunTimeEndian>>,
    /// Function symbols sorted by start address
    symbols: Vec<(u64, u64, String)>,
    cache: RefCell<HashMap<u64, ResolvedFrame>>,
}

impl Symbolizer {
    /// Load debug info of the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_data = fs::read(binary_path.as_ref()).context("Failed to read binary file")?;
        let obj_file = object::File::parse(&*binary_data).context("Failed to parse object file")?;

        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianArcSlice::new(Arc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        let mut symbols: Vec<(u64, u64, String)> = obj_file
            .symbols()
            .filter(|s| s.kind() == SymbolKind::Text && s.address() != 0)
            .filter_map(|s| Some((s.address(), s.size(), s.name().ok()?.to_string())))
            .collect();
        symbols.sort_unstable_by_key(|&(addr, _, _)| addr);

        Ok(Self { ctx, symbols, cache: RefCell::new(HashMap::new()) })
    }

    /// Symbolizer for the running executable
    ///
    /// # Errors
    /// Returns an error if the executable path is unknown or unreadable
    pub fn for_current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate current executable")?;
        Self::new(exe)
    }

    /// Resolve a file-relative address to source location information
    pub fn resolve(&self, addr: u64) -> ResolvedFrame {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let mut result = Vec::new();

        if let Ok(mut frame_iter) = self.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function = frame
                    .function
                    .and_then(|f| f.raw_name().ok().map(|s| Self::demangle_symbol(&s)))
                    .or_else(|| self.symbol_name(addr))
                    .unwrap_or_else(|| "<unknown>".to_string());

                let location = frame.location.map(|loc| SourceLocation {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                });

                result.push(InlinedFrame { function, location });
            }
        }

        if result.is_empty() {
            let function = self.symbol_name(addr).unwrap_or_else(|| "<unknown>".to_string());
            result.push(InlinedFrame { function, location: None });
        }

        let resolved = ResolvedFrame { addr, frames: result };
        self.cache.borrow_mut().insert(addr, resolved.clone());
        resolved
    }

    fn symbol_name(&self, addr: u64) -> Option<String> {
        let idx = self.symbols.partition_point(|&(start, _, _)| start <= addr).checked_sub(1)?;
        let (start, size, name) = &self.symbols[idx];
        // size 0 means unknown extent; accept the nearest preceding symbol
        if *size != 0 && addr >= start + size {
            return None;
        }
        Some(Self::demangle_symbol(name))
    }

    /// Demangle a Rust symbol name, without the hash suffix
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

/// A resolved stack frame (may contain multiple inlined frames)
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub addr: u64,
    pub frames: Vec<InlinedFrame>,
}

/// An inlined frame within a resolved frame
#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// Source code location
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ResolvedFrame {
    /// Format as stack lines, showing `display_addr` (the runtime address).
    ///
    /// ```text
    /// #3  0x000055d0c1a2b4c0 demo::stall
    ///     at src/main.rs:88
    /// ```
    #[must_use]
    pub fn format(&self, frame_num: usize, display_addr: u64) -> String {
        let mut output = String::new();

        for (idx, inlined) in self.frames.iter().enumerate() {
            let prefix = if idx == 0 { format!("#{frame_num:<2}") } else { "   ".to_string() };
            output.push_str(&format!("{prefix} 0x{display_addr:016x} {}", inlined.function));

            if let Some(file) = inlined.location.as_ref().and_then(|l| l.file.as_ref()) {
                output.push_str(&format!("\n    at {file}"));
                if let Some(line) = inlined.location.as_ref().and_then(|l| l.line) {
                    output.push_str(&format!(":{line}"));
                }
            }

            if idx < self.frames.len() - 1 {
                output.push('\n');
            }
        }

        output
    }
}
