//! Small shared enums used across the store, layer, and RPC surfaces.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum LogSeverity {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl LogSeverity {
    pub fn from_i32(value: i32) -> Self {
        match value {
            v if v >= LogSeverity::Critical as i32 => LogSeverity::Critical,
            v if v >= LogSeverity::Error as i32 => LogSeverity::Error,
            v if v >= LogSeverity::Warning as i32 => LogSeverity::Warning,
            v if v >= LogSeverity::Info as i32 => LogSeverity::Info,
            _ => LogSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum JobResult {
    #[default]
    Unknown = 0,
    Success = 1,
    Failure = 2,
    Aborted = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricScope {
    Own,
    Group,
}

impl std::fmt::Display for MetricScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricScope::Own => write!(f, "_OWN_"),
            MetricScope::Group => write!(f, "_GROUP_"),
        }
    }
}
