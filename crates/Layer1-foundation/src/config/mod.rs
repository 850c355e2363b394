//! Config - 통합 설정 관리
//!
//! - `dash.rs` - DashConfig 통합 설정 (pool, monitor)

mod dash;

pub use dash::{DashConfig, MonitorSettings, PoolSettings, DASH_CONFIG_FILE};
