#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use college_records::database::{Database, Profile, Record};
use college_records::lifecycle::ManualClock;
use college_records::model::{EntityKind, RowId};
use college_records::value::FieldMap;

pub const HASH: &str = "$2b$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap()
}

pub fn setup() -> (Arc<Database>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let db = Database::standard(clock.clone()).unwrap();
    (Arc::new(db), clock)
}

pub fn fields(value: serde_json::Value) -> FieldMap {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn account(email: &str, role: &str) -> FieldMap {
    fields(json!({
        "email": email,
        "passwordHash": HASH,
        "role": role,
        "firstName": "Kiran",
        "lastName": "Rao"
    }))
}

pub fn student_profile(roll_number: &str) -> Profile {
    Profile::Student(fields(json!({
        "rollNumber": roll_number,
        "department": "Computer Science",
        "semester": 3,
        "section": "A",
        "batch": "2023",
        "admissionDate": "2023-07-15"
    })))
}

pub fn faculty_profile(employee_id: &str) -> Profile {
    Profile::Faculty(fields(json!({
        "employeeId": employee_id,
        "department": "Computer Science",
        "designation": "Assistant Professor",
        "joiningDate": "2018-06-01"
    })))
}

/// Enrolls a student and returns (account id, student id).
pub fn enroll_student(db: &Database, email: &str, roll_number: &str) -> (RowId, RowId) {
    let enrollment = db
        .enroll(&account(email, "student"), &student_profile(roll_number))
        .unwrap();
    (enrollment.account.id, enrollment.profile.id)
}

/// Enrolls a faculty member and returns (account id, faculty id).
pub fn enroll_faculty(db: &Database, email: &str, employee_id: &str) -> (RowId, RowId) {
    let enrollment = db
        .enroll(&account(email, "faculty"), &faculty_profile(employee_id))
        .unwrap();
    (enrollment.account.id, enrollment.profile.id)
}

pub fn subject(db: &Database, code: &str, faculty: Option<RowId>) -> RowId {
    let mut raw = fields(json!({
        "name": "Data Structures",
        "code": code,
        "department": "Computer Science",
        "semester": 3,
        "credits": 4
    }));
    if let Some(faculty) = faculty {
        raw.insert("facultyId".to_string(), json!(faculty.0));
    }
    db.create(EntityKind::Subject, &raw).unwrap().id
}

pub fn grade(db: &Database, student: RowId, subject: RowId, marks: f64, max_marks: f64) -> Record {
    db.create(
        EntityKind::Grade,
        &fields(json!({
            "studentId": student.0,
            "subjectId": subject.0,
            "examType": "midterm",
            "marks": marks,
            "maxMarks": max_marks,
            "semester": 3
        })),
    )
    .unwrap()
}
