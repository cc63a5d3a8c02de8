//! Worker CPU affinity classes.
//!
//! Each worker is tagged at spawn time with one of two scheduling classes:
//! even-indexed or odd-indexed logical CPUs. Successive new workers
//! alternate classes, so the pool spreads across the core topology as it
//! grows instead of stacking render threads onto the cores the OS already
//! favors for the UI and allocator threads. On big.LITTLE devices this is a
//! hint, not a guarantee; pinning failures are logged and ignored.

use serde::Deserialize;

/// Scheduling class a worker is pinned to for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Affinity {
    /// Logical CPUs 0, 2, 4, …
    Even,
    /// Logical CPUs 1, 3, 5, …
    Odd,
}

impl Affinity {
    /// The opposite class, used to alternate assignment across spawns.
    pub fn other(self) -> Self {
        match self {
            Self::Even => Self::Odd,
            Self::Odd => Self::Even,
        }
    }

    fn first_cpu(self) -> usize {
        match self {
            Self::Even => 0,
            Self::Odd => 1,
        }
    }

    /// Pin the calling thread to this class of logical CPUs.
    ///
    /// Best-effort: on single-core devices, unsupported platforms, or
    /// syscall failure the thread stays unpinned and a warning is logged.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) fn apply(self) {
        let cpus = num_cpus::get();
        if cpus < 2 {
            log::debug!("[Affinity] single logical CPU, not pinning");
            return;
        }

        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            let mut selected = 0;
            let mut cpu = self.first_cpu();
            while cpu < cpus {
                libc::CPU_SET(cpu, &mut set);
                selected += 1;
                cpu += 2;
            }

            // pid 0 targets the calling thread.
            let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
            if rc != 0 {
                log::warn!(
                    "[Affinity] sched_setaffinity({:?}) failed: {}",
                    self,
                    std::io::Error::last_os_error()
                );
            } else {
                log::trace!(
                    "[Affinity] pinned to {} {:?} CPUs of {}",
                    selected,
                    self,
                    cpus
                );
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(crate) fn apply(self) {
        log::trace!("[Affinity] {:?} pinning unsupported on this platform", self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_alternate() {
        assert_eq!(Affinity::Even.other(), Affinity::Odd);
        assert_eq!(Affinity::Odd.other(), Affinity::Even);
        assert_eq!(Affinity::Odd.other().other(), Affinity::Odd);
    }

    #[test]
    fn classes_start_on_their_cpu_parity() {
        assert_eq!(Affinity::Even.first_cpu(), 0);
        assert_eq!(Affinity::Odd.first_cpu(), 1);
    }

    #[test]
    fn apply_is_best_effort() {
        // Must not panic regardless of platform or core count.
        Affinity::Even.apply();
    }
}
