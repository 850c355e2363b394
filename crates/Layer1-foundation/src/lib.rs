//! # dashdeep-foundation
//!
//! Foundation layer for DashDeep:
//! - Error: 구조적 에러 타입 (scheduling, invalid state, shutdown timeout)
//! - Config: 통합 설정 (DashConfig: pool + monitor)
//! - Storage: JsonStore (글로벌 / 프로젝트)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{DashConfig, MonitorSettings, PoolSettings, DASH_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;
