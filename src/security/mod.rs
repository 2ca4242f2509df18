mod monitor;

pub use monitor::{SecurityMonitor, Severity, ViolationKind};
