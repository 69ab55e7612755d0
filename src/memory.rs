//! Process memory ceiling management
//!
//! Before a regeneration run the governor estimates how much memory one chunk needs
//! (plus the alias tables when they are prefetched) and raises the process ceiling if it
//! is finite and too low. Failing to raise it is logged and otherwise ignored.

use crate::alias::AliasProvider;
use crate::config::{Config, MemoryConfig};
use crate::error::Result;
use std::io;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Access to the memory ceiling of the running process
pub trait MemoryCeiling: Send + Sync {
    /// Current ceiling in bytes, `None` when unlimited
    fn current(&self) -> io::Result<Option<u64>>;

    /// Raise the ceiling to `bytes`
    fn raise_to(&self, bytes: u64) -> io::Result<()>;
}

/// Address-space limit of the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCeiling;

#[cfg(unix)]
fn get_rlimit() -> io::Result<libc::rlimit> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we own
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut limit) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(limit)
}

#[cfg(unix)]
impl MemoryCeiling for ProcessCeiling {
    fn current(&self) -> io::Result<Option<u64>> {
        let limit = get_rlimit()?;
        if limit.rlim_cur == libc::RLIM_INFINITY {
            Ok(None)
        } else {
            Ok(Some(limit.rlim_cur as u64))
        }
    }

    fn raise_to(&self, bytes: u64) -> io::Result<()> {
        let limit = get_rlimit()?;
        let target = bytes as libc::rlim_t;
        if limit.rlim_max != libc::RLIM_INFINITY && target > limit.rlim_max {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("requested {} bytes exceeds hard limit {}", bytes, limit.rlim_max),
            ));
        }
        let raised = libc::rlimit {
            rlim_cur: target,
            rlim_max: limit.rlim_max,
        };
        // SAFETY: setrlimit only reads the struct we pass
        let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &raised) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl MemoryCeiling for ProcessCeiling {
    fn current(&self) -> io::Result<Option<u64>> {
        Ok(None)
    }

    fn raise_to(&self, _bytes: u64) -> io::Result<()> {
        Ok(())
    }
}

/// What `ensure_memory_limit` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAdjustment {
    /// No ceiling in place
    Unlimited,
    /// Ceiling already at or above the estimate
    Sufficient { current: u64, optimal: u64 },
    /// Ceiling raised to the estimate
    Raised { from: u64, to: u64 },
    /// The ceiling could not be read or raised
    Failed,
}

/// Estimates and enforces the memory needed for one generation run
pub struct MemoryGovernor {
    memory: MemoryConfig,
    chunk_size: u64,
    prefetch_aliases: bool,
    ceiling: Box<dyn MemoryCeiling>,
    optimal: OnceCell<u64>,
}

impl MemoryGovernor {
    pub fn new(config: &Config) -> Self {
        Self::with_ceiling(config, Box::new(ProcessCeiling))
    }

    pub fn with_ceiling(config: &Config, ceiling: Box<dyn MemoryCeiling>) -> Self {
        Self {
            memory: config.memory.clone(),
            chunk_size: config.generate.chunk_size as u64,
            prefetch_aliases: config.generate.prefetch_aliases && config.generate.resolve_aliases,
            ceiling,
            optimal: OnceCell::new(),
        }
    }

    /// Estimated bytes needed to generate one chunk, computed once per governor
    pub async fn optimal_memory_limit(&self, aliases: &dyn AliasProvider) -> Result<u64> {
        let optimal = self
            .optimal
            .get_or_try_init(|| async {
                let mut bytes = self
                    .memory
                    .floor_bytes
                    .saturating_add(self.chunk_size.saturating_mul(self.memory.per_link_bytes));
                if self.prefetch_aliases {
                    let alias_count = aliases.count_aliases().await?;
                    bytes = bytes
                        .saturating_add(alias_count.saturating_mul(self.memory.per_alias_bytes));
                }
                debug!(optimal_bytes = bytes, "Estimated generation memory");
                Ok::<u64, crate::error::Error>(bytes)
            })
            .await?;
        Ok(*optimal)
    }

    /// Raise the process ceiling to the estimate when it is finite and too low
    pub async fn ensure_memory_limit(&self, aliases: &dyn AliasProvider) -> MemoryAdjustment {
        let current = match self.ceiling.current() {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!("Memory ceiling is unlimited");
                return MemoryAdjustment::Unlimited;
            }
            Err(e) => {
                warn!("Could not read memory ceiling: {}", e);
                return MemoryAdjustment::Failed;
            }
        };

        let optimal = match self.optimal_memory_limit(aliases).await {
            Ok(optimal) => optimal,
            Err(e) => {
                warn!("Could not estimate memory requirement: {}", e);
                return MemoryAdjustment::Failed;
            }
        };

        if current >= optimal {
            return MemoryAdjustment::Sufficient { current, optimal };
        }

        match self.ceiling.raise_to(optimal) {
            Ok(()) => {
                info!(from = current, to = optimal, "Raised memory ceiling");
                MemoryAdjustment::Raised {
                    from: current,
                    to: optimal,
                }
            }
            Err(e) => {
                warn!(
                    "Could not raise memory ceiling from {} to {} bytes: {}",
                    current, optimal, e
                );
                MemoryAdjustment::Failed
            }
        }
    }
}
