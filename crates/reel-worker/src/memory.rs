//! Background memory monitor.
//!
//! Polls resident-set size and clears the artifact cache at three ordered
//! thresholds (warning, critical, emergency), progressively more eager. A
//! cooldown prevents tight-loop cleanups. The monitor only mitigates
//! pressure; it never fails the task.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use reel_cache::ArtifactCache;

use crate::config::WorkerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PressureLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

fn classify(rss_mb: u64, config: &WorkerConfig) -> PressureLevel {
    if rss_mb >= config.memory_emergency_threshold_mb {
        PressureLevel::Emergency
    } else if rss_mb >= config.memory_critical_threshold_mb {
        PressureLevel::Critical
    } else if rss_mb >= config.memory_warning_threshold_mb {
        PressureLevel::Warning
    } else {
        PressureLevel::Normal
    }
}

/// Spawn the monitor loop. Abort the handle to stop it.
pub fn spawn(config: WorkerConfig, cache: Arc<ArtifactCache>) -> Option<JoinHandle<()>> {
    if !config.enable_memory_monitoring {
        info!("Memory monitoring disabled");
        return None;
    }

    let Ok(pid) = sysinfo::get_current_pid() else {
        warn!("Cannot resolve own pid, memory monitoring disabled");
        return None;
    };

    info!(
        warning_mb = config.memory_warning_threshold_mb,
        critical_mb = config.memory_critical_threshold_mb,
        emergency_mb = config.memory_emergency_threshold_mb,
        "Starting memory monitor"
    );

    Some(tokio::spawn(monitor_loop(config, cache, pid)))
}

async fn monitor_loop(config: WorkerConfig, cache: Arc<ArtifactCache>, pid: Pid) {
    let mut system = System::new();
    let mut last_cleanup: Option<Instant> = None;

    loop {
        tokio::time::sleep(config.memory_monitor_interval).await;

        system.refresh_process(pid);
        let Some(process) = system.process(pid) else {
            error!("Own process vanished from the process table, stopping memory monitor");
            return;
        };
        let rss_mb = process.memory() / (1024 * 1024);
        let level = classify(rss_mb, &config);

        if level == PressureLevel::Normal {
            continue;
        }

        let in_cooldown = last_cleanup
            .map(|at| at.elapsed() < config.memory_cleanup_cooldown)
            .unwrap_or(false);
        // Emergency pressure ignores the cooldown.
        if in_cooldown && level != PressureLevel::Emergency {
            continue;
        }

        match level {
            PressureLevel::Warning => {
                warn!(rss_mb, "High memory usage, clearing cache");
                cache.clear().await;
            }
            PressureLevel::Critical => {
                error!(rss_mb, "Critical memory usage, clearing cache aggressively");
                cache.clear().await;
            }
            PressureLevel::Emergency => {
                error!(rss_mb, "Emergency memory usage, running emergency cleanup");
                cache.clear().await;
                // Also drop stale temp artifacts older than this process.
                clear_temp_dir(&config).await;
            }
            PressureLevel::Normal => unreachable!(),
        }
        last_cleanup = Some(Instant::now());
    }
}

/// Emergency-only: drop leftover scene/asset intermediates from the temp
/// directory. Errors are logged and ignored.
async fn clear_temp_dir(config: &WorkerConfig) {
    let Ok(mut entries) = tokio::fs::read_dir(&config.temp_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("asset_") || name.starts_with("scene_") || name.starts_with("bg_frame_")
        {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_classification() {
        let config = WorkerConfig {
            memory_warning_threshold_mb: 1000,
            memory_critical_threshold_mb: 2000,
            memory_emergency_threshold_mb: 3000,
            ..Default::default()
        };

        assert_eq!(classify(500, &config), PressureLevel::Normal);
        assert_eq!(classify(1000, &config), PressureLevel::Warning);
        assert_eq!(classify(2500, &config), PressureLevel::Critical);
        assert_eq!(classify(9000, &config), PressureLevel::Emergency);
    }

    #[test]
    fn test_disabled_monitor_spawns_nothing() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let dir = tempfile::TempDir::new().unwrap();
            let cache = Arc::new(ArtifactCache::open(dir.path().join("c")).await.unwrap());
            let config = WorkerConfig {
                enable_memory_monitoring: false,
                ..Default::default()
            };
            assert!(spawn(config, cache).is_none());
        });
    }
}
