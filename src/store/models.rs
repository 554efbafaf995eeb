//! Insertable/queryable record shapes, one per concrete artifact type. There
//! is no runtime type registry: each record type gets its own table and its
//! own typed accessors on `Store` (see `DESIGN.md` for why).

use diesel::prelude::*;

use super::schema::{attributes, child_entries, log_entries, metrics, proc_stats};
use crate::types::{JobResult, LogSeverity, MetricScope};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = log_entries)]
pub struct LogEntry {
    pub uid: i64,
    pub severity: i32,
    pub message: String,
    pub timestamp: i64,
}

impl LogEntry {
    pub fn severity(&self) -> LogSeverity {
        LogSeverity::from_i32(self.severity)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = log_entries)]
pub struct NewLogEntry {
    pub severity: i32,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = attributes)]
pub struct Attribute {
    pub uid: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = attributes)]
pub struct NewAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = proc_stats)]
pub struct ProcStat {
    pub uid: i64,
    pub nproc: i32,
    pub cpu: f64,
    pub mem: i64,
    pub vmem: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = proc_stats)]
pub struct NewProcStat {
    pub nproc: i32,
    pub cpu: f64,
    pub mem: i64,
    pub vmem: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = metrics)]
pub struct Metric {
    pub uid: i64,
    pub scope: String,
    pub name: String,
    pub value: i64,
}

impl Metric {
    pub fn scope(&self) -> Option<MetricScope> {
        match self.scope.as_str() {
            "_OWN_" => Some(MetricScope::Own),
            "_GROUP_" => Some(MetricScope::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = metrics)]
pub struct NewMetric {
    pub scope: String,
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = child_entries)]
pub struct ChildEntry {
    pub uid: i64,
    pub ident: String,
    pub server_url: String,
    pub db_file: String,
    pub started: Option<i64>,
    pub updated: Option<i64>,
    pub stopped: Option<i64>,
    pub result: i32,
    pub expected_children: i32,
}

impl ChildEntry {
    pub fn result(&self) -> JobResult {
        match self.result {
            1 => JobResult::Success,
            2 => JobResult::Failure,
            3 => JobResult::Aborted,
            _ => JobResult::Unknown,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = child_entries)]
pub struct NewChildEntry {
    pub ident: String,
    pub server_url: String,
    pub db_file: String,
    pub started: Option<i64>,
    pub updated: Option<i64>,
    pub stopped: Option<i64>,
    pub result: i32,
    pub expected_children: i32,
}
