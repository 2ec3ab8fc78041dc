use csv::{Reader, StringRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::database::{Database, Profile};
use crate::error::WriteError;
use crate::model::{Role, RowId};
use crate::value::FieldMap;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot open roster {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("roster has no readable header row: {0}")]
    Headers(csv::Error),
}

/// One line of a roster CSV. Student and faculty lines share the file; the
/// columns that do not apply to a line's role are left empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub role: Role,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub roll_number: Option<String>,
    pub semester: Option<u32>,
    pub section: Option<String>,
    pub batch: Option<String>,
    pub admission_date: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_contact: Option<String>,
    pub employee_id: Option<String>,
    pub designation: Option<String>,
    pub specialization: Option<String>,
    pub joining_date: Option<String>,
    pub contact: Option<String>,
}

impl RosterEntry {
    fn account_fields(&self) -> FieldMap {
        object(json!({
            "email": self.email,
            "passwordHash": self.password_hash,
            "role": self.role,
            "firstName": self.first_name,
            "lastName": self.last_name,
        }))
    }

    /// Profile fields for the entry's role. Empty optional columns are
    /// omitted so schema defaults and required-field checks apply.
    pub fn profile(&self) -> Option<Profile> {
        let mut fields = FieldMap::new();
        fields.insert("department".to_string(), json!(self.department));
        let mut put = |name: &str, value: &Option<String>| {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                fields.insert(name.to_string(), json!(value));
            }
        };

        match self.role {
            Role::Student => {
                put("rollNumber", &self.roll_number);
                put("section", &self.section);
                put("batch", &self.batch);
                put("admissionDate", &self.admission_date);
                put("guardianName", &self.guardian_name);
                put("guardianContact", &self.guardian_contact);
                if let Some(semester) = self.semester {
                    fields.insert("semester".to_string(), json!(semester));
                }
                Some(Profile::Student(fields))
            }
            Role::Faculty => {
                put("employeeId", &self.employee_id);
                put("designation", &self.designation);
                put("specialization", &self.specialization);
                put("joiningDate", &self.joining_date);
                put("contact", &self.contact);
                Some(Profile::Faculty(fields))
            }
            Role::Admin => None,
        }
    }
}

fn object(value: serde_json::Value) -> FieldMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => FieldMap::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledLine {
    pub line: u64,
    pub account: RowId,
    pub profile: RowId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLine {
    pub line: u64,
    pub reason: String,
    /// Violation codes when the line failed validation.
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub enrolled: Vec<EnrolledLine>,
    pub rejected: Vec<RejectedLine>,
}

/// Enrolls every line of the roster read from `source`. A bad line is
/// recorded and skipped; it never stops the import.
pub fn import_roster<R: io::Read>(db: &Database, source: R) -> Result<ImportSummary, ImportError> {
    let mut rdr = Reader::from_reader(source);
    let headers = rdr.headers().map_err(ImportError::Headers)?.clone();
    let mut summary = ImportSummary::default();

    for result in rdr.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map(|pos| pos.line()).unwrap_or(0);
                summary.rejected.push(rejected(line, err.to_string()));
                continue;
            }
        };
        let line = line_of(&record);
        match import_line(db, &headers, &record) {
            Ok((account, profile)) => summary.enrolled.push(EnrolledLine { line, account, profile }),
            Err(rejection) => summary.rejected.push(RejectedLine { line, ..rejection }),
        }
    }

    info!(
        enrolled = summary.enrolled.len(),
        rejected = summary.rejected.len(),
        "roster imported"
    );
    for line in &summary.rejected {
        warn!(line = line.line, reason = %line.reason, "roster line rejected");
    }
    Ok(summary)
}

pub fn seed_from_file(db: &Database, path: impl AsRef<Path>) -> Result<ImportSummary, ImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    import_roster(db, file)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|pos| pos.line()).unwrap_or(0)
}

fn rejected(line: u64, reason: String) -> RejectedLine {
    RejectedLine {
        line,
        reason,
        violations: Vec::new(),
    }
}

fn import_line(
    db: &Database,
    headers: &StringRecord,
    record: &StringRecord,
) -> Result<(RowId, RowId), RejectedLine> {
    let entry: RosterEntry = record
        .deserialize(Some(headers))
        .map_err(|err| rejected(0, err.to_string()))?;
    let profile = entry
        .profile()
        .ok_or_else(|| rejected(0, "admin accounts are not created from a roster".to_string()))?;

    match db.enroll(&entry.account_fields(), &profile) {
        Ok(enrollment) => Ok((enrollment.account.id, enrollment.profile.id)),
        Err(WriteError::Validation(err)) => Err(RejectedLine {
            line: 0,
            reason: err.to_string(),
            violations: err.codes(),
        }),
        Err(err) => Err(rejected(0, err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_skips_empty_columns() {
        let entry = RosterEntry {
            role: Role::Student,
            email: "meera@college.edu".to_string(),
            password_hash: "x".to_string(),
            first_name: "Meera".to_string(),
            last_name: "Iyer".to_string(),
            department: "CS".to_string(),
            roll_number: Some("CS-014".to_string()),
            semester: Some(3),
            section: Some("B".to_string()),
            batch: Some("2023".to_string()),
            admission_date: Some("2023-07-15".to_string()),
            guardian_name: Some("  ".to_string()),
            guardian_contact: None,
            employee_id: Some("EMP-1".to_string()),
            designation: None,
            specialization: None,
            joining_date: None,
            contact: None,
        };
        let Some(Profile::Student(fields)) = entry.profile() else {
            panic!("expected a student profile");
        };
        assert_eq!(fields.get("semester"), Some(&json!(3)));
        assert!(!fields.contains_key("guardianName"));
        assert!(!fields.contains_key("employeeId"));
    }
}
