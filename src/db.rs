//! Database storage and lookup helpers.
//!
//! The `Database` is the whole persisted state: employees, tasks and attendance records, kept in one
//! JSON file and written atomically (temp file + rename).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::attendance::AttendanceRecord;
use crate::error::{EngineError, Result};
use crate::task::Task;

/// An employee and the department they can claim tasks from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub department: String,
    /// Settlement recipient address. The employee id is used when unset.
    pub wallet: Option<String>,
}

impl Employee {
    pub fn recipient(&self) -> &str {
        self.wallet.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,
}

impl Database {
    /// Load from a JSON file. A missing file is an empty database; an unreadable one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Database::default());
        }
        let mut buf = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(|e| EngineError::UpstreamUnavailable(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&buf)
            .map_err(|e| EngineError::UpstreamUnavailable(format!("cannot parse {}: {e}", path.display())))
    }

    /// Save to a JSON file using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        let data = serde_json::to_string_pretty(self)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn next_task_id(&self) -> u64 {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    pub fn next_record_id(&self) -> u64 {
        self.attendance.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    pub fn employee(&self, id: &str) -> Option<&Employee> {
        self.employees.iter().find(|e| e.id == id)
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u64) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::task_not_found(id))
    }

    pub fn record(&self, id: u64) -> Option<&AttendanceRecord> {
        self.attendance.iter().find(|r| r.id == id)
    }

    pub fn record_mut(&mut self, id: u64) -> Result<&mut AttendanceRecord> {
        self.attendance
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EngineError::record_not_found(id))
    }

    pub fn record_for_day(&self, employee_id: &str, day: NaiveDate) -> Option<&AttendanceRecord> {
        self.attendance.iter().find(|r| r.employee_id == employee_id && r.day == day)
    }

    /// Settlement recipient for an employee id.
    pub fn recipient_for(&self, employee_id: &str) -> String {
        self.employee(employee_id)
            .map(|e| e.recipient().to_string())
            .unwrap_or_else(|| employee_id.to_string())
    }

    /// Task counts keyed by department.
    pub fn tasks_per_department(&self) -> HashMap<&str, usize> {
        let mut m = HashMap::new();
        for t in &self.tasks {
            *m.entry(t.department.as_str()).or_insert(0) += 1;
        }
        m
    }
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out = String::new();
        for (i, ch) in s.chars().enumerate() {
            if i + 1 >= width {
                out.push('…');
                break;
            }
            out.push(ch);
        }
        out
    }
}

/// Parse `YYYY-MM-DD`, or "today" / "yesterday".
pub fn parse_day(s: &str, today: NaiveDate) -> Result<NaiveDate> {
    match s.trim().to_lowercase().as_str() {
        "today" => Ok(today),
        "yesterday" => today
            .pred_opt()
            .ok_or_else(|| EngineError::InvalidArgument("no day before today".into())),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .map_err(|_| EngineError::InvalidArgument(format!("unrecognised day '{s}', use YYYY-MM-DD"))),
    }
}
