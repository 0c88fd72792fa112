//! Memory mapping utilities for PIE address adjustment
//!
//! The stack sampler records runtime addresses; DWARF wants addresses
//! relative to the executable's load base. `/proc/self/maps` tells us where
//! the executable is mapped.

use anyhow::{Context, Result};
use log::debug;
use std::fs;

/// Memory range of a loaded binary in the process address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Find the range spanned by every mapping of `binary_path` in a maps listing
///
/// Lines look like `start-end perms offset dev inode pathname`.
#[must_use]
pub fn find_binary_range(maps: &str, binary_path: &str) -> Option<MemoryRange> {
    let mut range: Option<MemoryRange> = None;

    for line in maps.lines() {
        let mut parts = line.split_whitespace();
        let Some(span) = parts.next() else { continue };
        if parts.nth(4) != Some(binary_path) {
            continue;
        }
        let Some((start, end)) = span.split_once('-') else { continue };
        let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };

        range = Some(match range {
            Some(r) => MemoryRange { start: r.start.min(start), end: r.end.max(end) },
            None => MemoryRange { start, end },
        });
    }

    range
}

/// Range of the running executable, from `/proc/self/maps`
///
/// # Errors
/// Returns an error if the maps cannot be read or the executable is not listed
pub fn current_exe_range() -> Result<MemoryRange> {
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let exe_path = exe.to_string_lossy();
    let maps = fs::read_to_string("/proc/self/maps").context("Failed to read /proc/self/maps")?;

    let range = find_binary_range(&maps, &exe_path)
        .with_context(|| format!("Could not find memory range for {exe_path}"))?;
    debug!(
        "Executable memory range: 0x{:x} - 0x{:x} (size: {} KB)",
        range.start,
        range.end,
        (range.end - range.start) / 1024
    );
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d0c1a00000-55d0c1a2c000 r--p 00000000 fd:01 1311 /opt/app/bin/demo
55d0c1a2c000-55d0c1b90000 r-xp 0002c000 fd:01 1311 /opt/app/bin/demo
55d0c1b90000-55d0c1bd0000 r--p 00190000 fd:01 1311 /opt/app/bin/demo
55d0c2f1e000-55d0c2f3f000 rw-p 00000000 00:00 0    [heap]
7f2a4c000000-7f2a4c1c6000 r-xp 00000000 fd:01 2201 /usr/lib/libc.so.6
7f2a4d000000-7f2a4d001000 r--p 00000000 fd:01 1312 /opt/app/bin/demo-helper
";

    #[test]
    fn test_memory_range_contains() {
        let range = MemoryRange { start: 0x1000, end: 0x2000 };

        assert!(range.contains(0x1000));
        assert!(range.contains(0x1FFF));
        assert!(!range.contains(0x0FFF));
        assert!(!range.contains(0x2000));
    }

    #[test]
    fn test_find_binary_range_spans_all_mappings() {
        let range = find_binary_range(MAPS, "/opt/app/bin/demo").unwrap();
        assert_eq!(range, MemoryRange { start: 0x55d0_c1a0_0000, end: 0x55d0_c1bd_0000 });
    }

    #[test]
    fn test_find_binary_range_exact_path_only() {
        // "demo-helper" must not widen the "demo" range, and vice versa
        let helper = find_binary_range(MAPS, "/opt/app/bin/demo-helper").unwrap();
        assert_eq!(helper.start, 0x7f2a_4d00_0000);
        assert!(find_binary_range(MAPS, "/opt/app/bin/missing").is_none());
    }

    #[test]
    fn test_current_exe_range() {
        // /proc is not mounted everywhere tests run
        if let Ok(range) = current_exe_range() {
            assert!(range.start < range.end);
        }
    }
}
