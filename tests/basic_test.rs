mod common;

use chrono::Duration;
use serde_json::json;

use college_records::error::{ReferenceProblem, WriteError};
use college_records::lifecycle::Sweeper;
use college_records::model::{Account, EntityKind, Notification, RowId, Student};
use college_records::value::Value;

use common::*;

#[test]
fn test_duplicate_roll_number_is_rejected() {
    let (db, _) = setup();
    enroll_student(&db, "first@college.edu", "CS-2023-001");

    let err = db
        .enroll(&account("second@college.edu", "student"), &student_profile("CS-2023-001"))
        .unwrap_err();
    let validation = err.validation().unwrap();
    assert_eq!(validation.entity, EntityKind::Student);
    assert!(validation.has_code("uniqueness:rollNumber"));

    // The account half of the failed enrollment was rolled back.
    assert_eq!(db.list(EntityKind::Account).len(), 1);
    assert_eq!(db.list(EntityKind::Student).len(), 1);
}

#[test]
fn test_marks_above_max_marks_is_rejected() {
    let (db, _) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let subject = subject(&db, "CS201", None);

    let err = db
        .create(
            EntityKind::Grade,
            &fields(json!({
                "studentId": student.0,
                "subjectId": subject.0,
                "examType": "midterm",
                "marks": 95,
                "maxMarks": 90,
                "semester": 3
            })),
        )
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["marks<=maxMarks"]);

    let record = grade(&db, student, subject, 90.0, 90.0);
    assert_eq!(record.get("marks"), Some(&Value::Decimal(90.0)));
}

#[test]
fn test_expired_notification_is_reported_once() {
    let (db, clock) = setup();
    let (account, _) = enroll_student(&db, "s@college.edu", "CS-001");
    let reader: Account = db.get(EntityKind::Account, account).unwrap().decode().unwrap();
    let expires_at = start() + Duration::hours(24);
    let created = db
        .create(
            EntityKind::Notification,
            &fields(json!({
                "title": "Fee deadline",
                "message": "Semester fees are due tomorrow.",
                "priority": "high",
                "targetRole": "student",
                "expiresAt": expires_at.to_rfc3339()
            })),
        )
        .unwrap();

    let before: Notification = created.decode().unwrap();
    assert!(before.is_addressed_to(&reader));

    let sweeper = Sweeper::new(db.clone());
    let early = sweeper.sweep(expires_at - Duration::seconds(1));
    assert!(early.is_empty());

    clock.set(expires_at + Duration::seconds(1));
    let first = sweeper.sweep_now();
    assert_eq!(first.expired_notifications, vec![created.id]);
    assert!(!first.skipped);

    let second = sweeper.sweep_now();
    assert!(second.is_empty());

    let notification: Notification = db.get(EntityKind::Notification, created.id).unwrap().decode().unwrap();
    assert!(notification.expired);
    assert!(!notification.is_addressed_to(&reader));
    assert_eq!(notification.updated_at, expires_at + Duration::seconds(1));
    assert_eq!(db.list(EntityKind::Notification).len(), 1);
}

#[test]
fn test_analytics_confidence_out_of_range() {
    let (db, _) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");

    let err = db
        .create(
            EntityKind::AiAnalytics,
            &fields(json!({
                "type": "placement_analysis",
                "studentId": student.0,
                "data": {"source": "placement-model", "signals": {"cgpa": 8.1}},
                "predictions": {"kind": "placement_analysis", "probability": 72.0},
                "confidence": 150
            })),
        )
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["range:confidence"]);
}

#[test]
fn test_confidence_and_satisfaction_bounds() {
    let (db, _) = setup();
    let (account, student) = enroll_student(&db, "s@college.edu", "CS-001");

    let analysis = |confidence: f64| {
        db.create(
            EntityKind::AiAnalytics,
            &fields(json!({
                "type": "placement_analysis",
                "studentId": student.0,
                "data": {"source": "placement-model"},
                "predictions": {"kind": "placement_analysis", "probability": 50.0},
                "confidence": confidence
            })),
        )
    };
    assert!(analysis(0.0).is_ok());
    assert!(analysis(100.0).is_ok());
    let err = analysis(100.5).unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["range:confidence"]);

    let conversation = |session: &str, satisfaction: i64| {
        db.create(
            EntityKind::ChatbotConversation,
            &fields(json!({
                "accountId": account.0,
                "sessionId": session,
                "satisfaction": satisfaction
            })),
        )
    };
    assert!(conversation("sess-1", 1).is_ok());
    assert!(conversation("sess-5", 5).is_ok());
    for out_of_range in [0, 6] {
        let err = conversation("sess-x", out_of_range).unwrap_err();
        assert_eq!(err.validation().unwrap().codes(), vec!["range:satisfaction"]);
    }
}

#[test]
fn test_attendance_for_missing_student() {
    let (db, _) = setup();
    let (_, faculty) = enroll_faculty(&db, "f@college.edu", "EMP-001");
    let subject = subject(&db, "CS201", Some(faculty));

    let err = db
        .create(
            EntityKind::Attendance,
            &fields(json!({
                "studentId": 999,
                "subjectId": subject.0,
                "facultyId": faculty.0,
                "date": "2024-09-02",
                "status": "present"
            })),
        )
        .unwrap_err();
    assert!(matches!(err, WriteError::Validation(_)), "unexpected error: {err:?}");
    let validation = err.validation().unwrap();
    assert!(validation.is_referential());
    let reference = validation.referential().next().unwrap();
    assert_eq!(reference.field, "studentId");
    assert_eq!(reference.id, RowId(999));
    assert_eq!(reference.problem, ReferenceProblem::Missing);
    assert!(db.list(EntityKind::Attendance).is_empty());
}

#[test]
fn test_student_reads_back_as_written() {
    let (db, _) = setup();
    let (account, student) = enroll_student(&db, "Round.Trip@College.edu", "CS-042");

    let record = db.get(EntityKind::Student, student).unwrap();
    let typed: Student = record.decode().unwrap();
    assert_eq!(typed.account_id, account);
    assert_eq!(typed.roll_number, "CS-042");
    assert_eq!(typed.department, "Computer Science");
    assert_eq!(typed.semester, 3);
    assert_eq!(typed.admission_date.to_string(), "2023-07-15");
    assert_eq!(typed.behavior_score, 5.0);
    assert_eq!(typed.created_at, start());

    let email = db.get(EntityKind::Account, account).unwrap();
    assert_eq!(email.get("email"), Some(&Value::Text("round.trip@college.edu".to_string())));
}

#[test]
fn test_boundary_values() {
    let (db, _) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let record = db.get(EntityKind::Student, student).unwrap();

    let ok = db.update(
        EntityKind::Student,
        student,
        record.version,
        &fields(json!({"cgpa": 10, "placementProbability": 0, "semester": 12})),
    );
    assert!(ok.is_ok());

    let err = db
        .update(
            EntityKind::Student,
            student,
            record.version + 1,
            &fields(json!({"cgpa": 10.01, "semester": 0})),
        )
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["range:semester", "range:cgpa"]);
}
