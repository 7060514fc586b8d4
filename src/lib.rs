pub mod config;
pub mod core;
pub mod notify;
pub mod pipeline;

pub use config::{load_config, MonitorConfig};
pub use core::alert::{Alert, ThreatLevel};
pub use core::error::MonitorError;
pub use core::event::{SecurityEvent, SecurityEventType, Severity};
pub use core::monitor::{Dashboard, MonitorBuilder, SecurityMonitor};
