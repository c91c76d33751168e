//! In-memory database backend
//!
//! Implements [`Database`] against plain in-process maps. It understands the
//! statement shapes the engine itself issues (version-history upserts, log
//! inserts, status queries) and treats everything else as an opaque script
//! that succeeds. Intended for tests and examples; it is not a SQL engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::database::{Database, DbError, Row};

#[derive(Debug, Clone)]
struct VersionRow {
    version: String,
    name: String,
    checksum: String,
    applied_at: i64,
    status: String,
    execution_time_ms: i64,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct LogRow {
    id: String,
    migration_id: String,
    action: String,
    timestamp: i64,
    message: String,
    details: Option<String>,
    level: String,
}

#[derive(Default)]
pub struct MemoryDatabase {
    versions: Mutex<BTreeMap<String, VersionRow>>,
    logs: Mutex<Vec<LogRow>>,
    executed: Mutex<Vec<String>>,
    /// Substring -> remaining injected failures for matching statements.
    failures: Mutex<Vec<(String, u32)>>,
    ping_ok: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        let db = Self::default();
        db.ping_ok.store(true, Ordering::SeqCst);
        db
    }

    /// Every statement passed to `execute`, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Fail the next `times` statements containing `fragment`.
    pub fn fail_matching(&self, fragment: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .push((fragment.to_string(), times));
    }

    /// Make the connectivity probe succeed or fail.
    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    fn check_failure(&self, sql: &str) -> Result<(), DbError> {
        let mut failures = self.failures.lock().unwrap();
        for entry in failures.iter_mut() {
            if entry.1 > 0 && sql.contains(&entry.0) {
                entry.1 -= 1;
                return Err(DbError(format!("injected failure for '{}'", entry.0)));
            }
        }
        Ok(())
    }

    fn param_str(params: &[Value], idx: usize) -> String {
        match params.get(idx) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    fn param_i64(params: &[Value], idx: usize) -> i64 {
        match params.get(idx) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            _ => 0,
        }
    }

    fn param_opt_str(params: &[Value], idx: usize) -> Option<String> {
        match params.get(idx) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn version_row_to_row(row: &VersionRow) -> Row {
        let mut out = Row::new();
        out.insert("version".into(), json!(row.version));
        out.insert("name".into(), json!(row.name));
        out.insert("checksum".into(), json!(row.checksum));
        out.insert("applied_at".into(), json!(row.applied_at));
        out.insert("status".into(), json!(row.status));
        out.insert("execution_time_ms".into(), json!(row.execution_time_ms));
        out.insert(
            "error".into(),
            row.error.as_ref().map(|e| json!(e)).unwrap_or(Value::Null),
        );
        out
    }

    fn log_row_to_row(row: &LogRow) -> Row {
        let mut out = Row::new();
        out.insert("id".into(), json!(row.id));
        out.insert("migration_id".into(), json!(row.migration_id));
        out.insert("action".into(), json!(row.action));
        out.insert("timestamp".into(), json!(row.timestamp));
        out.insert("message".into(), json!(row.message));
        out.insert(
            "details".into(),
            row.details
                .as_ref()
                .map(|d| json!(d))
                .unwrap_or(Value::Null),
        );
        out.insert("level".into(), json!(row.level));
        out
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.check_failure(sql)?;
        self.executed.lock().unwrap().push(sql.to_string());
        let lowered = sql.to_lowercase();

        if lowered.starts_with("create table") || lowered.starts_with("create index") {
            return Ok(0);
        }

        if lowered.contains("insert into") && lowered.contains("(version, name, checksum") {
            let version = Self::param_str(params, 0);
            let row = VersionRow {
                version: version.clone(),
                name: Self::param_str(params, 1),
                checksum: Self::param_str(params, 2),
                applied_at: Self::param_i64(params, 3),
                status: "running".to_string(),
                execution_time_ms: 0,
                error: None,
            };
            self.versions.lock().unwrap().insert(version, row);
            return Ok(1);
        }

        if lowered.contains("insert into") && lowered.contains("(id, migration_id") {
            let id = Self::param_str(params, 0);
            let mut logs = self.logs.lock().unwrap();
            if !logs.iter().any(|l| l.id == id) {
                logs.push(LogRow {
                    id,
                    migration_id: Self::param_str(params, 1),
                    action: Self::param_str(params, 2),
                    timestamp: Self::param_i64(params, 3),
                    message: Self::param_str(params, 4),
                    details: Self::param_opt_str(params, 5),
                    level: Self::param_str(params, 6),
                });
            }
            return Ok(1);
        }

        if lowered.starts_with("update") {
            let version = Self::param_str(params, 0);
            let mut versions = self.versions.lock().unwrap();
            let Some(row) = versions.get_mut(&version) else {
                return Ok(0);
            };
            if lowered.contains("'completed'") {
                row.status = "completed".to_string();
                row.execution_time_ms = Self::param_i64(params, 1);
                row.error = None;
            } else if lowered.contains("'failed'") {
                row.status = "failed".to_string();
                row.error = Self::param_opt_str(params, 1);
            } else if lowered.contains("'rolled_back'") {
                row.status = "rolled_back".to_string();
            }
            return Ok(1);
        }

        if lowered.starts_with("delete from") {
            let mut logs = self.logs.lock().unwrap();
            let before = logs.len();
            if lowered.contains("timestamp <") {
                let cutoff = Self::param_i64(params, 0);
                logs.retain(|l| l.timestamp >= cutoff);
            } else if lowered.contains("migration_id = $1") {
                let id = Self::param_str(params, 0);
                logs.retain(|l| l.migration_id != id);
            } else {
                logs.clear();
            }
            return Ok((before - logs.len()) as u64);
        }

        // Anything else is a user migration script; it "succeeds".
        Ok(1)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.check_failure(sql)?;
        let lowered = sql.to_lowercase();

        if lowered.starts_with("select 1") {
            if !self.ping_ok.load(Ordering::SeqCst) {
                return Err(DbError("connection refused".to_string()));
            }
            let mut row = Row::new();
            row.insert("ok".into(), json!(1));
            return Ok(vec![row]);
        }

        if lowered.contains("select version from") {
            let versions = self.versions.lock().unwrap();
            let mut completed: Vec<&VersionRow> = versions
                .values()
                .filter(|r| r.status == "completed")
                .collect();
            completed.sort_by(|a, b| a.version.cmp(&b.version));
            if lowered.contains("desc") {
                completed.reverse();
            }
            if lowered.contains("limit 1") {
                completed.truncate(1);
            }
            return Ok(completed
                .into_iter()
                .map(|r| {
                    let mut row = Row::new();
                    row.insert("version".into(), json!(r.version));
                    row
                })
                .collect());
        }

        if lowered.contains("where version = $1") {
            let version = Self::param_str(params, 0);
            let versions = self.versions.lock().unwrap();
            return Ok(versions
                .get(&version)
                .map(|r| vec![Self::version_row_to_row(r)])
                .unwrap_or_default());
        }

        if lowered.contains("select version, name, checksum") {
            let versions = self.versions.lock().unwrap();
            let mut all: Vec<&VersionRow> = versions.values().collect();
            all.sort_by(|a, b| {
                b.applied_at
                    .cmp(&a.applied_at)
                    .then(b.version.cmp(&a.version))
            });
            if lowered.contains("limit $1") {
                all.truncate(Self::param_i64(params, 0).max(0) as usize);
            }
            return Ok(all.into_iter().map(Self::version_row_to_row).collect());
        }

        if lowered.contains("select id, migration_id") {
            let logs = self.logs.lock().unwrap();
            let mut all: Vec<&LogRow> = logs.iter().collect();
            all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            if lowered.contains("limit $1") {
                all.truncate(Self::param_i64(params, 0).max(0) as usize);
            }
            return Ok(all.into_iter().map(Self::log_row_to_row).collect());
        }

        Ok(Vec::new())
    }
}
