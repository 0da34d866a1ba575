//! CPU affinity and scheduling priority for producer processes
//!
//! Pinning is best-effort: the orchestrator logs a failure and runs the trial
//! unpinned. Platforms without support get [`NoAffinity`].

use core_affinity::get_core_ids;

/// Capability to restrict a process to N cores and raise its priority
pub trait AffinityControl: Send + Sync {
    /// Restrict every thread of `pid` to the first `core_count` usable cores
    fn pin_process(&self, pid: u32, core_count: usize) -> anyhow::Result<()>;

    /// Request the highest scheduling priority for `pid`
    fn raise_priority(&self, pid: u32) -> anyhow::Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// No-op fallback; every request succeeds without doing anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAffinity;

impl AffinityControl for NoAffinity {
    fn pin_process(&self, _pid: u32, _core_count: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn raise_priority(&self, _pid: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Operating-system backed affinity control
#[derive(Debug, Clone, Copy, Default)]
pub struct OsAffinity;

#[cfg(target_os = "linux")]
impl AffinityControl for OsAffinity {
    fn pin_process(&self, pid: u32, core_count: usize) -> anyhow::Result<()> {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        let cores = pinning_cores(core_count)?;
        let mut cpu_set = CpuSet::new();
        for core in &cores {
            cpu_set.set(*core)?;
        }

        // Affinity is per thread on Linux; cover threads that already exist.
        // Threads spawned later inherit the mask from their creator.
        let mut pinned = 0usize;
        for tid in process_threads(pid)? {
            match sched_setaffinity(Pid::from_raw(tid), &cpu_set) {
                Ok(()) => pinned += 1,
                // Thread exited between listing and pinning
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => anyhow::bail!("sched_setaffinity({tid}) failed: {e}"),
            }
        }
        if pinned == 0 {
            anyhow::bail!("Process {pid} has no live threads to pin");
        }

        tracing::debug!("Pinned {} threads of pid {} to cores {:?}", pinned, pid, cores);
        Ok(())
    }

    fn raise_priority(&self, pid: u32) -> anyhow::Result<()> {
        // SAFETY: setpriority only reads its scalar arguments
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, -20) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            anyhow::bail!("setpriority({pid}, -20) failed: {err} (needs root or CAP_SYS_NICE)");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "linux"
    }
}

#[cfg(not(target_os = "linux"))]
impl AffinityControl for OsAffinity {
    fn pin_process(&self, _pid: u32, _core_count: usize) -> anyhow::Result<()> {
        anyhow::bail!("Process affinity is not supported on this platform")
    }

    fn raise_priority(&self, _pid: u32) -> anyhow::Result<()> {
        anyhow::bail!("Process priority control is not supported on this platform")
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// Affinity backend for the current platform
pub fn platform_affinity() -> Box<dyn AffinityControl> {
    if cfg!(target_os = "linux") {
        Box::new(OsAffinity)
    } else {
        Box::new(NoAffinity)
    }
}

/// Thread ids of a process, from `/proc/<pid>/task`
#[cfg(target_os = "linux")]
fn process_threads(pid: u32) -> anyhow::Result<Vec<i32>> {
    let dir = format!("/proc/{pid}/task");
    let mut tids = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        if let Some(tid) = entry?.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) {
            tids.push(tid);
        }
    }
    Ok(tids)
}

/// The first `core_count` cores this process may run on
///
/// Taking them from the current affinity set keeps the mask a subset of what
/// the orchestrator itself was given.
pub fn pinning_cores(core_count: usize) -> anyhow::Result<Vec<usize>> {
    let core_ids = get_core_ids().ok_or_else(|| {
        anyhow::anyhow!(
            "Failed to get available CPU core IDs - CPU pinning may not be supported on this platform"
        )
    })?;

    if core_count == 0 || core_count > core_ids.len() {
        anyhow::bail!(
            "Cannot pin to {} cores: only {} cores available",
            core_count,
            core_ids.len()
        );
    }

    Ok(core_ids.iter().take(core_count).map(|core| core.id).collect())
}

/// Get number of logical cores available to this process
///
/// Falls back to `available_parallelism` when core enumeration is not
/// supported on this platform.
pub fn get_core_count() -> usize {
    get_core_ids()
        .map(|ids| ids.len())
        .filter(|n| *n > 0)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}
