//! Process-wide CPU-pin bookkeeping.
//!
//! Pinning is advisory: every caller tolerates `None`/`false` and keeps
//! running unpinned. The claimed-core registry is explicit state with
//! [`reset`], not module-load-time side effects, so tests and repeated runs
//! start clean.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

/// Sampling interval for the two /proc/stat reads in [`pick_and_pin`].
const SAMPLE_INTERVAL: Duration = Duration::from_millis(150);

struct Registry {
    claimed: Vec<usize>,
    rr: usize,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    claimed: Vec::new(),
    rr: 0,
});

/// Clears claimed-core state. Call once at startup.
pub fn reset() {
    let mut reg = REGISTRY.lock();
    reg.claimed.clear();
    reg.rr = 0;
}

/// Pins the calling thread to `cpu`. Logs one line on success.
pub fn pin_current(who: &str, cpu: usize) -> bool {
    let ok = core_affinity::set_for_current(core_affinity::CoreId { id: cpu });
    if ok {
        info!("[affinity] {who} pinned to CPU {cpu}");
    } else {
        warn!("[affinity] {who} failed to pin to CPU {cpu}");
    }
    ok
}

/// Claims the first not-yet-claimed CPU from an explicit list and pins the
/// calling thread to it.
pub fn pin_from_list(who: &str, cpus: &[usize]) -> Option<usize> {
    let chosen = {
        let mut reg = REGISTRY.lock();
        let cpu = cpus.iter().copied().find(|c| !reg.claimed.contains(c))?;
        reg.claimed.push(cpu);
        cpu
    };
    pin_current(who, chosen).then_some(chosen)
}

/// Picks the least-busy allowed CPU not yet claimed (two /proc/stat samples,
/// 150 ms apart), falling back to round-robin over already-claimed cores,
/// and pins the calling thread. Returns `None` where no selection can be
/// made (non-Linux, restricted masks); the thread then runs unpinned.
pub fn pick_and_pin(who: &str) -> Option<usize> {
    let chosen = {
        let mut reg = REGISTRY.lock();
        match pick_least_busy_excluding(&reg.claimed) {
            Some(cpu) => {
                reg.claimed.push(cpu);
                cpu
            }
            None if !reg.claimed.is_empty() => {
                let cpu = reg.claimed[reg.rr % reg.claimed.len()];
                reg.rr += 1;
                cpu
            }
            None => return None,
        }
    };
    pin_current(who, chosen).then_some(chosen)
}

struct CpuSample {
    idle: u64,
    total: u64,
}

fn read_proc_stat() -> Option<Vec<CpuSample>> {
    let text = std::fs::read_to_string("/proc/stat").ok()?;
    let mut out = Vec::new();
    for line in text.lines() {
        let rest = match line.strip_prefix("cpu") {
            Some(r) if r.starts_with(|c: char| c.is_ascii_digit()) => r,
            _ => continue,
        };
        let fields: Vec<u64> = rest
            .split_ascii_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            continue;
        }
        // user nice system idle iowait irq softirq steal ...
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().take(8).sum();
        out.push(CpuSample { idle, total });
    }
    (!out.is_empty()).then_some(out)
}

fn pick_least_busy_excluding(exclude: &[usize]) -> Option<usize> {
    let allowed: Vec<usize> = core_affinity::get_core_ids()?
        .into_iter()
        .map(|c| c.id)
        .collect();

    let a = read_proc_stat()?;
    std::thread::sleep(SAMPLE_INTERVAL);
    let b = read_proc_stat()?;

    let mut best: Option<(usize, f64)> = None;
    for cpu in 0..a.len().min(b.len()) {
        if !allowed.contains(&cpu) || exclude.contains(&cpu) {
            continue;
        }
        let total_delta = b[cpu].total.saturating_sub(a[cpu].total).max(1);
        let idle_delta = b[cpu].idle.saturating_sub(a[cpu].idle);
        let util = 1.0 - idle_delta as f64 / total_delta as f64;
        if best.map_or(true, |(_, u)| util < u) {
            best = Some((cpu, util));
        }
    }
    best.map(|(cpu, _)| cpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Registry state is process-global; keep it in one test to avoid
    // cross-test interference.
    #[test]
    fn registry_claims_and_resets() {
        reset();
        {
            let mut reg = REGISTRY.lock();
            reg.claimed.push(0);
            reg.claimed.push(2);
        }
        {
            let reg = REGISTRY.lock();
            assert_eq!(reg.claimed, vec![0, 2]);
        }
        reset();
        let reg = REGISTRY.lock();
        assert!(reg.claimed.is_empty());
        assert_eq!(reg.rr, 0);
    }

    #[test]
    fn proc_stat_parses_on_linux() {
        if cfg!(target_os = "linux") {
            let samples = read_proc_stat().expect("per-cpu lines in /proc/stat");
            assert!(!samples.is_empty());
            for s in &samples {
                assert!(s.total >= s.idle);
            }
        }
    }
}
