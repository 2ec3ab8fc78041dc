mod common;

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;

use college_records::database::Correction;
use college_records::error::{StaleWriteError, WriteError};
use college_records::lifecycle::{self, Sweeper};
use college_records::model::{AiAnalytics, AnalyticsStatus, EntityKind, RowId};
use college_records::value::Value;

use common::*;

fn analytics(student: RowId, kind: &str, valid_for: Option<Duration>) -> serde_json::Map<String, serde_json::Value> {
    let predictions = match kind {
        "attendance_prediction" => json!({"kind": kind, "predictedPercentage": 81.5, "atRisk": false}),
        "behavior_analysis" => json!({"kind": kind, "score": 7.5}),
        _ => json!({"kind": kind, "probability": 64.0}),
    };
    let mut raw = fields(json!({
        "type": kind,
        "studentId": student.0,
        "data": {"source": "nightly-batch", "windowStart": "2024-07-01", "windowEnd": "2024-08-31"},
        "predictions": predictions,
        "confidence": 78
    }));
    if let Some(valid_for) = valid_for {
        raw.insert("validUntil".to_string(), json!((start() + valid_for).to_rfc3339()));
    }
    raw
}

fn status(db: &college_records::Database, id: RowId) -> AnalyticsStatus {
    let typed: AiAnalytics = db.get(EntityKind::AiAnalytics, id).unwrap().decode().unwrap();
    typed.status
}

#[test]
fn test_lapsed_analytics_are_archived_once() {
    let (db, clock) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let short = db
        .create(EntityKind::AiAnalytics, &analytics(student, "attendance_prediction", Some(Duration::days(1))))
        .unwrap();
    let open_ended = db
        .create(EntityKind::AiAnalytics, &analytics(student, "behavior_analysis", None))
        .unwrap();

    let sweeper = Sweeper::new(db.clone());
    clock.advance(Duration::days(2));
    let first = sweeper.sweep_now();
    assert_eq!(first.archived_analytics, vec![short.id]);
    assert!(first.expired_notifications.is_empty());

    assert!(sweeper.sweep_now().is_empty());
    assert_eq!(status(&db, short.id), AnalyticsStatus::Archived);
    assert_eq!(status(&db, open_ended.id), AnalyticsStatus::Active);
    assert_eq!(db.get(EntityKind::AiAnalytics, short.id).unwrap().version, 2);
}

#[test]
fn test_newer_analytics_supersede_older() {
    let (db, clock) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let (_, other_student) = enroll_student(&db, "t@college.edu", "CS-002");

    let older = db
        .create(EntityKind::AiAnalytics, &analytics(student, "placement_analysis", None))
        .unwrap();
    let unrelated = db
        .create(EntityKind::AiAnalytics, &analytics(other_student, "placement_analysis", None))
        .unwrap();

    clock.advance(Duration::days(7));
    let newer = db
        .create(EntityKind::AiAnalytics, &analytics(student, "placement_analysis", None))
        .unwrap();

    assert_eq!(status(&db, older.id), AnalyticsStatus::Archived);
    assert_eq!(status(&db, newer.id), AnalyticsStatus::Active);
    assert_eq!(status(&db, unrelated.id), AnalyticsStatus::Active);

    let archived = db.get(EntityKind::AiAnalytics, older.id).unwrap();
    assert_eq!(archived.get("updatedAt"), Some(&Value::Timestamp(start() + Duration::days(7))));

    let active: Vec<_> = db
        .list(EntityKind::AiAnalytics)
        .into_iter()
        .filter(|record| record.get("studentId") == Some(&Value::Ref(student)))
        .filter(|record| record.get("status") == Some(&Value::Text("active".to_string())))
        .collect();
    assert_eq!(active.len(), 1);
}

#[test]
fn test_reactivating_archived_analytics_retires_the_current_one() {
    let (db, _) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let older = db
        .create(EntityKind::AiAnalytics, &analytics(student, "behavior_analysis", None))
        .unwrap();
    let newer = db
        .create(EntityKind::AiAnalytics, &analytics(student, "behavior_analysis", None))
        .unwrap();

    let archived = db.get(EntityKind::AiAnalytics, older.id).unwrap();
    db.update(
        EntityKind::AiAnalytics,
        older.id,
        archived.version,
        &fields(json!({"status": "active"})),
    )
    .unwrap();

    assert_eq!(status(&db, older.id), AnalyticsStatus::Active);
    assert_eq!(status(&db, newer.id), AnalyticsStatus::Archived);
}

#[test]
fn test_concurrent_updates_one_goes_stale() {
    let (db, _) = setup();
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let read_by_both = db.get(EntityKind::Student, student).unwrap();

    db.update(
        EntityKind::Student,
        student,
        read_by_both.version,
        &fields(json!({"section": "B"})),
    )
    .unwrap();
    let err = db
        .update(
            EntityKind::Student,
            student,
            read_by_both.version,
            &fields(json!({"section": "C"})),
        )
        .unwrap_err();
    assert_eq!(
        err,
        WriteError::Stale(StaleWriteError {
            entity: EntityKind::Student,
            id: student,
            expected: 1,
            actual: 2,
        })
    );
    let current = db.get(EntityKind::Student, student).unwrap();
    assert_eq!(current.get("section"), Some(&Value::Text("B".to_string())));
}

#[test]
fn test_grade_is_append_only_but_correctable() {
    let (db, clock) = setup();
    let (admin, _) = enroll_faculty(&db, "hod@college.edu", "EMP-001");
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let subject = subject(&db, "CS201", None);
    let original = grade(&db, student, subject, 62.0, 100.0);

    let err = db
        .update(EntityKind::Grade, original.id, original.version, &fields(json!({"marks": 72})))
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["append_only:marks"]);

    let missing_reason = Correction {
        reason: "  ".to_string(),
        corrected_by: admin,
    };
    let err = db
        .correct(EntityKind::Grade, original.id, &fields(json!({"marks": 72})), &missing_reason)
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["required:reason"]);

    clock.advance(Duration::hours(3));
    let correction = Correction {
        reason: "re-totalled answer script".to_string(),
        corrected_by: admin,
    };
    let corrected = db
        .correct(EntityKind::Grade, original.id, &fields(json!({"marks": 72, "grade": "B+"})), &correction)
        .unwrap();
    assert_eq!(corrected.version, 2);
    assert_eq!(corrected.get("marks"), Some(&Value::Decimal(72.0)));

    let audit = db.audit_log();
    assert_eq!(audit.len(), 1);
    let entry = &audit[0];
    assert_eq!(entry.row, original.id);
    assert_eq!(entry.corrected_by, admin);
    assert_eq!(entry.reason, "re-totalled answer script");
    assert_eq!(entry.at, start() + Duration::hours(3));
    let changed: Vec<_> = entry.changes.iter().map(|change| change.field).collect();
    assert_eq!(changed, vec!["grade", "marks"]);
    assert_eq!(entry.changes[1].before, Value::Decimal(62.0));
}

#[test]
fn test_correction_still_checks_marks() {
    let (db, _) = setup();
    let (admin, _) = enroll_faculty(&db, "hod@college.edu", "EMP-001");
    let (_, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let subject = subject(&db, "CS201", None);
    let original = grade(&db, student, subject, 40.0, 50.0);

    let correction = Correction {
        reason: "typo".to_string(),
        corrected_by: admin,
    };
    let err = db
        .correct(EntityKind::Grade, original.id, &fields(json!({"marks": 55})), &correction)
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["marks<=maxMarks"]);
    assert!(db.audit_log().is_empty());
}

#[test]
fn test_non_append_only_rows_are_not_corrected() {
    let (db, _) = setup();
    let (admin, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let correction = Correction {
        reason: "fix".to_string(),
        corrected_by: admin,
    };
    assert_eq!(
        db.correct(EntityKind::Student, student, &fields(json!({"section": "B"})), &correction),
        Err(WriteError::NotCorrectable(EntityKind::Student))
    );
}

#[test]
fn test_enrollment_rolls_back_on_bad_profile() {
    let (db, _) = setup();
    let mut profile = match student_profile("CS-001") {
        college_records::Profile::Student(fields) => fields,
        college_records::Profile::Faculty(_) => unreachable!(),
    };
    profile.insert("semester".to_string(), json!(13));

    let err = db
        .enroll(
            &account("s@college.edu", "student"),
            &college_records::Profile::Student(profile),
        )
        .unwrap_err();
    assert_eq!(err.validation().unwrap().codes(), vec!["range:semester"]);
    assert!(db.list(EntityKind::Account).is_empty());
    assert!(db.list(EntityKind::Student).is_empty());

    // The email is still free for a corrected enrollment.
    enroll_student(&db, "s@college.edu", "CS-001");
    assert_eq!(db.list(EntityKind::Account).len(), 1);
}

#[test]
fn test_deactivation_keeps_dependents() {
    let (db, _) = setup();
    let (account, student) = enroll_student(&db, "s@college.edu", "CS-001");
    let conversation = db
        .create(
            EntityKind::ChatbotConversation,
            &fields(json!({"accountId": account.0, "sessionId": "sess-1"})),
        )
        .unwrap();

    let deactivated = db.deactivate(EntityKind::Account, account).unwrap();
    assert_eq!(deactivated.get("isActive"), Some(&Value::Bool(false)));

    let profile = db.get(EntityKind::Student, student).unwrap();
    assert_eq!(profile.version, 1);
    let chat = db.get(EntityKind::ChatbotConversation, conversation.id).unwrap();
    assert_eq!(chat.get("isActive"), Some(&Value::Bool(true)));

    assert_eq!(db.record_login(account), Err(WriteError::Inactive(account)));
    assert_eq!(
        db.deactivate(EntityKind::Grade, RowId(1)),
        Err(WriteError::NotDeactivatable(EntityKind::Grade))
    );
}

#[test]
fn test_record_login_stamps_last_login() {
    let (db, clock) = setup();
    let (account, _) = enroll_student(&db, "s@college.edu", "CS-001");
    clock.advance(Duration::minutes(5));
    let record = db.record_login(account).unwrap();
    assert_eq!(
        record.get("lastLogin"),
        Some(&Value::Timestamp(start() + Duration::minutes(5)))
    );
}

#[tokio::test]
async fn test_scheduled_sweep_expires_notifications() {
    let (db, clock) = setup();
    let expires_at = start() + Duration::minutes(30);
    let notice = db
        .create(
            EntityKind::Notification,
            &fields(json!({
                "title": "Library closing",
                "message": "The library closes early today.",
                "expiresAt": expires_at.to_rfc3339()
            })),
        )
        .unwrap();
    clock.set(expires_at);

    let sweeper = Arc::new(Sweeper::new(Arc::clone(&db)));
    let task = lifecycle::spawn(sweeper, std::time::Duration::from_millis(10));

    let mut expired = false;
    for _ in 0..200 {
        let current = db.get(EntityKind::Notification, notice.id).unwrap();
        if current.get("expired") == Some(&Value::Bool(true)) {
            expired = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    task.abort();
    assert!(expired, "scheduled sweep never expired the notification");
}
