//! Kernel, architecture and CPU frequency of the host

#![allow(unsafe_code)]

use hangdog_common::{Collector, CollectorError};
use serde_json::{json, Value};
use std::path::PathBuf;

use super::read_trimmed;

pub const NAME: &str = "DeviceCollector";

const CPUFREQ_DIR: &str = "/sys/devices/system/cpu/cpu0/cpufreq";

pub struct DeviceCollector {
    cpufreq_dir: PathBuf,
}

impl DeviceCollector {
    #[must_use]
    pub fn with_cpufreq_dir(dir: impl Into<PathBuf>) -> Self {
        Self { cpufreq_dir: dir.into() }
    }

    /// Frequency file content in kHz, `""` if unreadable
    fn freq(&self, file: &str) -> String {
        read_trimmed(self.cpufreq_dir.join(file)).unwrap_or_default()
    }
}

impl Default for DeviceCollector {
    fn default() -> Self {
        Self::with_cpufreq_dir(CPUFREQ_DIR)
    }
}

struct Uname {
    sysname: String,
    release: String,
    machine: String,
}

#[cfg(unix)]
fn uname() -> Option<Uname> {
    fn field(raw: &[libc::c_char]) -> String {
        let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    // SAFETY: utsname is plain old data and uname fills it completely on success
    let name = unsafe {
        let mut name: libc::utsname = std::mem::zeroed();
        if libc::uname(&mut name) != 0 {
            return None;
        }
        name
    };
    Some(Uname {
        sysname: field(&name.sysname),
        release: field(&name.release),
        machine: field(&name.machine),
    })
}

#[cfg(not(unix))]
fn uname() -> Option<Uname> {
    None
}

impl Collector for DeviceCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn collect(&self) -> Result<Value, CollectorError> {
        let uname = uname().unwrap_or(Uname {
            sysname: std::env::consts::OS.to_string(),
            release: String::new(),
            machine: std::env::consts::ARCH.to_string(),
        });
        let cpu_count = std::thread::available_parallelism()
            .ok()
            .and_then(|n| i64::try_from(n.get()).ok())
            .unwrap_or(-1);

        Ok(json!({
            "os": uname.sysname,
            "kernel_release": uname.release,
            "arch": uname.machine,
            "cpu_count": cpu_count,
            "cpu_min_freq": self.freq("scaling_min_freq"),
            "cpu_max_freq": self.freq("scaling_max_freq"),
            "cpu_cur_freq": self.freq("scaling_cur_freq"),
        }))
    }
}
