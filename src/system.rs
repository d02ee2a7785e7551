//! Process memory counters from the /proc filesystem.
//!
//! This module reads the governor's own memory figures from
//! `/proc/self/status` and exposes the host's manual collection hook.

use std::fs;

use crate::error::{GovernorError, Result};

const SELF_STATUS_PATH: &str = "/proc/self/status";

/// Memory counters of the current process in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessMemory {
    /// Resident set size (VmRSS).
    pub rss: u64,
    /// Data segment incl. heap mappings (VmData).
    pub heap_total: u64,
    /// Resident anonymous memory (RssAnon).
    pub heap_used: u64,
    /// Resident file-backed and shared memory (RssFile + RssShmem).
    pub external: u64,
}

/// Reads memory counters for the current process from /proc/self/status.
pub fn read_process_memory() -> Result<ProcessMemory> {
    let content = fs::read_to_string(SELF_STATUS_PATH)
        .map_err(|e| GovernorError::io(SELF_STATUS_PATH, e))?;
    parse_status_content(&content)
}

/// Parses the content of a /proc/<pid>/status file.
///
/// `VmRSS` is required; the remaining fields default to 0 when the kernel
/// does not report them (older kernels lack RssAnon/RssFile/RssShmem).
pub fn parse_status_content(content: &str) -> Result<ProcessMemory> {
    let mut rss: Option<u64> = None;
    let mut mem = ProcessMemory::default();
    let mut rss_file = 0;
    let mut rss_shmem = 0;

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("VmRSS:") {
            rss = parse_kb_value(v).map(|kb| kb * 1024);
        } else if let Some(v) = line.strip_prefix("VmData:") {
            mem.heap_total = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("RssAnon:") {
            mem.heap_used = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("RssFile:") {
            rss_file = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("RssShmem:") {
            rss_shmem = parse_kb_value(v).unwrap_or(0) * 1024;
        }
    }

    mem.rss = rss.ok_or(GovernorError::Unavailable("VmRSS"))?;
    mem.external = rss_file + rss_shmem;
    Ok(mem)
}

/// Parses kilobyte values such as "   12345 kB"
fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// Host hook that hands freed allocator memory back to the OS.
///
/// Only glibc exposes `malloc_trim`; everywhere else this returns `false`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn trim_allocator() -> bool {
    // SAFETY: malloc_trim has no preconditions and only touches allocator state.
    unsafe { libc::malloc_trim(0) == 1 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn trim_allocator() -> bool {
    false
}

/// Whether [`trim_allocator`] is backed by a real allocator call.
pub const fn allocator_trim_supported() -> bool {
    cfg!(all(target_os = "linux", target_env = "gnu"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tgovernor\nUmask:\t0022\nState:\tS (sleeping)\n\
        VmPeak:\t  215324 kB\nVmSize:\t  215320 kB\nVmRSS:\t   12288 kB\n\
        RssAnon:\t    8192 kB\nRssFile:\t    3072 kB\nRssShmem:\t    1024 kB\n\
        VmData:\t   40960 kB\nVmStk:\t     132 kB\n";

    #[test]
    fn test_parse_status_content() {
        let mem = parse_status_content(STATUS).unwrap();
        assert_eq!(mem.rss, 12288 * 1024);
        assert_eq!(mem.heap_used, 8192 * 1024);
        assert_eq!(mem.heap_total, 40960 * 1024);
        assert_eq!(mem.external, (3072 + 1024) * 1024);
    }

    #[test]
    fn test_parse_status_missing_rss() {
        let result = parse_status_content("Name:\tgovernor\nVmData:\t 100 kB\n");
        assert!(matches!(result, Err(GovernorError::Unavailable("VmRSS"))));
    }

    #[test]
    fn test_parse_status_old_kernel_fields() {
        // No RssAnon/RssFile/RssShmem lines
        let mem = parse_status_content("VmRSS:\t 2048 kB\nVmData:\t 4096 kB\n").unwrap();
        assert_eq!(mem.rss, 2048 * 1024);
        assert_eq!(mem.heap_used, 0);
        assert_eq!(mem.external, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_own_process_memory() {
        let mem = read_process_memory().unwrap();
        assert!(mem.rss > 0);
    }
}
