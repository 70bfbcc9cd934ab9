//! Process resident-memory observation for the heap-pressure tiers (§4.11
//! step 6). Rust has no managed heap to query, so this reads the kernel's
//! own accounting of the process instead.

/// Current resident set size in bytes, or `None` if it can't be determined
/// (non-Linux, or `/proc` unavailable).
pub fn resident_bytes() -> Option<u64> {
    read_vm_rss_kb().map(|kb| kb * 1024)
}

#[cfg(target_os = "linux")]
fn read_vm_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
            return digits.parse().ok();
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_vm_rss_kb() -> Option<u64> {
    None
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn reads_a_plausible_rss() {
        let rss = resident_bytes().expect("VmRSS should be readable under /proc on Linux");
        assert!(rss > 0);
    }
}
