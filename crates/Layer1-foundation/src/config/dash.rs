//! Dash Config - 통합 설정
//!
//! Worker pool and monitor settings, loaded from the global store and then
//! overlaid with the project store.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 설정 파일명
pub const DASH_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Dash Config (통합)
// ============================================================================

/// DashDeep 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashConfig {
    /// 버전 (마이그레이션용)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolSettings,

    /// Status monitor settings
    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            pool: PoolSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl DashConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let stores = [JsonStore::global().ok(), JsonStore::current_project().ok()];
        Self::load_layers(stores.iter().flatten())
    }

    /// Overlay each store onto the defaults, later stores winning.
    /// A store without a config file is skipped.
    pub fn load_layers<'a>(stores: impl IntoIterator<Item = &'a JsonStore>) -> Result<Self> {
        let mut config = Self::new();
        for store in stores {
            if let Some(layer) = store.load_optional::<DashConfig>(DASH_CONFIG_FILE)? {
                config.merge(layer);
            }
        }
        Ok(config)
    }

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: DashConfig) {
        self.pool.merge(other.pool);
        self.monitor.merge(other.monitor);
    }
}

// ============================================================================
// Pool Settings
// ============================================================================

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    /// Maximum number of live worker processes
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Tasks a worker runs before it is torn down and replaced.
    /// 1 releases accelerator memory after every experiment.
    #[serde(default = "default_tasks_per_worker")]
    pub tasks_per_worker_before_restart: usize,

    /// Run each worker in its own process group and signal the whole group
    #[serde(default = "default_true")]
    pub kill_process_group: bool,

    /// Grace period between SIGTERM and SIGKILL (ms)
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// How long to wait for a worker after SIGKILL (ms)
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            tasks_per_worker_before_restart: default_tasks_per_worker(),
            kill_process_group: true,
            grace_period_ms: default_grace_period_ms(),
            kill_wait_ms: default_kill_wait_ms(),
        }
    }
}

impl PoolSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }

    fn merge(&mut self, other: PoolSettings) {
        if other.max_workers != default_max_workers() {
            self.max_workers = other.max_workers;
        }
        if other.tasks_per_worker_before_restart != default_tasks_per_worker() {
            self.tasks_per_worker_before_restart = other.tasks_per_worker_before_restart;
        }
        if other.kill_process_group != default_true() {
            self.kill_process_group = other.kill_process_group;
        }
        if other.grace_period_ms != default_grace_period_ms() {
            self.grace_period_ms = other.grace_period_ms;
        }
        if other.kill_wait_ms != default_kill_wait_ms() {
            self.kill_wait_ms = other.kill_wait_ms;
        }
    }
}

// ============================================================================
// Monitor Settings
// ============================================================================

/// Status monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    /// Polling interval of the status display (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn merge(&mut self, other: MonitorSettings) {
        if other.poll_interval_ms != default_poll_interval_ms() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_version() -> u32 {
    1
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_tasks_per_worker() -> usize {
    1
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_kill_wait_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dash_config_default() {
        let config = DashConfig::new();
        assert_eq!(config.version, 1);
        assert_eq!(config.pool.tasks_per_worker_before_restart, 1);
        assert!(config.pool.kill_process_group);
        assert!(config.pool.max_workers >= 1);
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: DashConfig =
            serde_json::from_str(r#"{ "pool": { "maxWorkers": 3 } }"#).unwrap();
        assert_eq!(config.pool.max_workers, 3);
        assert_eq!(config.pool.grace_period(), Duration::from_secs(5));
        assert_eq!(config.monitor.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_config_merge() {
        let mut base = DashConfig::new();
        base.pool.max_workers = 8;

        let mut overlay = DashConfig::new();
        overlay.pool.tasks_per_worker_before_restart = 4;
        overlay.monitor.poll_interval_ms = 250;

        base.merge(overlay);

        assert_eq!(base.pool.max_workers, 8);
        assert_eq!(base.pool.tasks_per_worker_before_restart, 4);
        assert_eq!(base.monitor.poll_interval_ms, 250);
    }

    fn write_config(store: &JsonStore, content: &str) {
        std::fs::create_dir_all(store.file_path("")).unwrap();
        std::fs::write(store.file_path(DASH_CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_load_layers_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::project(dir.path());

        let config = DashConfig::load_layers([&store]).unwrap();
        assert_eq!(config.pool, PoolSettings::default());
    }

    #[test]
    fn test_project_layer_keeps_global_kill_process_group() {
        let global_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let global = JsonStore::new(global_dir.path());
        let project = JsonStore::project(project_dir.path());

        write_config(&global, r#"{ "pool": { "killProcessGroup": false, "killWaitMs": 10 } }"#);
        write_config(&project, r#"{ "monitor": { "pollIntervalMs": 250 } }"#);

        let config = DashConfig::load_layers([&global, &project]).unwrap();
        assert!(!config.pool.kill_process_group);
        assert_eq!(config.pool.kill_wait(), Duration::from_millis(10));
        assert_eq!(config.monitor.poll_interval_ms, 250);
    }
}
