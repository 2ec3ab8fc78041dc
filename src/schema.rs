//! Entity schema registry.
//!
//! The registry is the single description of every entity's fields: type,
//! default, bounds, format and the write rules that apply to it. It is built
//! once with [`SchemaRegistry::standard`] and shared read-only; nothing in it
//! changes after construction.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::SchemaError;
use crate::model::{
    AnalyticsStatus, AnalyticsType, AttendanceStatus, EntityKind, ExamType,
    FacultyAttendanceStatus, LeaveType, NotificationType, Priority, RiskLevel, Role, TargetRole,
};
use crate::value::{Bounds, FieldType, StructuredKind, TextFormat, Value};

/// Who may write a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Caller,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    pub unique: bool,
    pub immutable: bool,
    pub access: Access,
}

impl FieldSpec {
    fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
            bounds: None,
            unique: false,
            immutable: false,
            access: Access::Caller,
        }
    }

    fn text(name: &'static str) -> Self {
        Self::new(name, FieldType::Text { format: TextFormat::Plain })
    }

    fn formatted(name: &'static str, format: TextFormat) -> Self {
        Self::new(name, FieldType::Text { format })
    }

    fn one_of(name: &'static str, variants: &'static [&'static str]) -> Self {
        Self::new(name, FieldType::Enum { variants })
    }

    fn reference(name: &'static str, target: EntityKind) -> Self {
        Self::new(name, FieldType::Ref { target })
    }

    fn structured(name: &'static str, shape: StructuredKind) -> Self {
        Self::new(name, FieldType::Structured { shape })
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn bounded(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some(Bounds { min, max });
        self
    }

    fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    fn system(mut self) -> Self {
        self.access = Access::System;
        self
    }

    pub fn is_system(&self) -> bool {
        self.access == Access::System
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub fields: Vec<FieldSpec>,
    /// Field groups whose combined values must be unique.
    pub unique_together: Vec<&'static [&'static str]>,
    /// Rows are only changed through audited corrections.
    pub append_only: bool,
}

impl EntitySchema {
    fn new(kind: EntityKind, fields: Vec<FieldSpec>) -> Self {
        let mut all = vec![
            FieldSpec::new("id", FieldType::Integer).system(),
            FieldSpec::new("createdAt", FieldType::Timestamp).system(),
            FieldSpec::new("updatedAt", FieldType::Timestamp).system(),
        ];
        all.extend(fields);
        Self {
            kind,
            fields: all,
            unique_together: Vec::new(),
            append_only: false,
        }
    }

    fn unique_together(mut self, group: &'static [&'static str]) -> Self {
        self.unique_together.push(group);
        self
    }

    fn append_only(mut self) -> Self {
        self.append_only = true;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entities: BTreeMap<EntityKind, EntitySchema>,
}

impl SchemaRegistry {
    /// Registry covering every [`EntityKind`].
    pub fn standard() -> Self {
        let entities = EntityKind::ALL
            .iter()
            .map(|kind| (*kind, schema_for(*kind)))
            .collect();
        Self { entities }
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.entities.keys().copied()
    }

    pub fn entity(&self, kind: EntityKind) -> &EntitySchema {
        // Every kind is populated by `standard`, the only constructor.
        &self.entities[&kind]
    }

    pub fn resolve(&self, entity: &str) -> Result<EntityKind, SchemaError> {
        EntityKind::from_str(entity).map_err(|_| SchemaError::UnknownEntity(entity.to_string()))
    }

    pub fn describe(&self, entity: &str) -> Result<&[FieldSpec], SchemaError> {
        let kind = self.resolve(entity)?;
        Ok(&self.entity(kind).fields)
    }

    pub fn field(&self, kind: EntityKind, field: &str) -> Result<&FieldSpec, SchemaError> {
        self.entity(kind)
            .field(field)
            .ok_or_else(|| SchemaError::UnknownField {
                entity: kind,
                field: field.to_string(),
            })
    }

    /// Default of `entity.field`, or [`Value::Null`] when the field has none.
    pub fn default_of(&self, entity: &str, field: &str) -> Result<Value, SchemaError> {
        let kind = self.resolve(entity)?;
        let spec = self.field(kind, field)?;
        Ok(spec.default.clone().unwrap_or(Value::Null))
    }
}

fn schema_for(kind: EntityKind) -> EntitySchema {
    use FieldSpec as F;

    let semester = || F::new("semester", FieldType::Integer).required().bounded(1.0, 12.0);

    match kind {
        EntityKind::Account => EntitySchema::new(
            kind,
            vec![
                F::formatted("email", TextFormat::Email).required().unique(),
                F::formatted("passwordHash", TextFormat::PasswordHash).required(),
                F::one_of("role", Role::VARIANTS).required().immutable(),
                F::text("firstName").required(),
                F::text("lastName").required(),
                F::text("profilePicture"),
                F::new("isActive", FieldType::Bool)
                    .required()
                    .default_value(Value::Bool(true)),
                F::new("lastLogin", FieldType::Timestamp),
                F::structured("aiPreferences", StructuredKind::AiPreferences)
                    .required()
                    .default_value(Value::Structured(json!({
                        "enablePredictions": true,
                        "notificationLevel": "medium",
                        "analyticsVisibility": "detailed"
                    }))),
            ],
        ),
        EntityKind::Student => EntitySchema::new(
            kind,
            vec![
                F::reference("accountId", EntityKind::Account)
                    .required()
                    .unique()
                    .immutable(),
                F::text("rollNumber").required().unique(),
                F::text("department").required(),
                semester(),
                F::text("section").required(),
                F::text("batch").required(),
                F::new("admissionDate", FieldType::Date).required(),
                F::text("guardianName"),
                F::text("guardianContact"),
                F::text("address"),
                F::new("cgpa", FieldType::Decimal)
                    .required()
                    .bounded(0.0, 10.0)
                    .default_value(Value::Decimal(0.0)),
                F::one_of("attendanceRisk", RiskLevel::VARIANTS)
                    .required()
                    .default_value(Value::Text(RiskLevel::Low.to_string())),
                F::one_of("academicRisk", RiskLevel::VARIANTS)
                    .required()
                    .default_value(Value::Text(RiskLevel::Low.to_string())),
                F::new("placementProbability", FieldType::Decimal)
                    .required()
                    .bounded(0.0, 100.0)
                    .default_value(Value::Decimal(0.0)),
                F::new("behaviorScore", FieldType::Decimal)
                    .required()
                    .bounded(0.0, 10.0)
                    .default_value(Value::Decimal(5.0)),
                F::structured("aiInsights", StructuredKind::AiInsights)
                    .required()
                    .default_value(Value::Structured(json!({
                        "strengths": [],
                        "improvements": [],
                        "predictions": {}
                    }))),
            ],
        ),
        EntityKind::Faculty => EntitySchema::new(
            kind,
            vec![
                F::reference("accountId", EntityKind::Account)
                    .required()
                    .unique()
                    .immutable(),
                F::text("employeeId").required().unique(),
                F::text("department").required(),
                F::text("designation").required(),
                F::text("specialization"),
                F::new("joiningDate", FieldType::Date).required(),
                F::text("contact"),
                F::new("assignedSections", FieldType::TextList { distinct: true })
                    .required()
                    .default_value(Value::TextList(Vec::new())),
                F::new("subjects", FieldType::RefSet { target: EntityKind::Subject })
                    .required()
                    .default_value(Value::RefSet(Default::default())),
                F::new("totalWorkingDays", FieldType::Integer)
                    .required()
                    .bounded(0.0, 366.0)
                    .default_value(Value::Integer(0)),
                F::new("presentDays", FieldType::Integer)
                    .required()
                    .bounded(0.0, 366.0)
                    .default_value(Value::Integer(0)),
                F::new("attendancePercentage", FieldType::Decimal)
                    .required()
                    .bounded(0.0, 100.0)
                    .default_value(Value::Decimal(0.0)),
            ],
        ),
        EntityKind::Subject => EntitySchema::new(
            kind,
            vec![
                F::text("name").required(),
                F::text("code").required().unique(),
                F::text("department").required(),
                semester(),
                F::new("credits", FieldType::Integer).required().bounded(0.0, 30.0),
                F::reference("facultyId", EntityKind::Faculty),
            ],
        ),
        EntityKind::Attendance => EntitySchema::new(
            kind,
            vec![
                F::reference("studentId", EntityKind::Student).required(),
                F::reference("subjectId", EntityKind::Subject).required(),
                F::reference("facultyId", EntityKind::Faculty).required(),
                F::new("date", FieldType::Date).required(),
                F::one_of("status", AttendanceStatus::VARIANTS).required(),
                F::reference("markedBy", EntityKind::Faculty),
                F::new("isPatternAnomaly", FieldType::Bool)
                    .required()
                    .default_value(Value::Bool(false)),
                F::new("riskScore", FieldType::Decimal)
                    .required()
                    .bounded(0.0, 10.0)
                    .default_value(Value::Decimal(0.0)),
            ],
        )
        .unique_together(&["studentId", "subjectId", "date"])
        .append_only(),
        EntityKind::FacultyAttendance => EntitySchema::new(
            kind,
            vec![
                F::reference("facultyId", EntityKind::Faculty).required(),
                F::new("date", FieldType::Date).required(),
                F::new("checkInTime", FieldType::Time),
                F::new("checkOutTime", FieldType::Time),
                F::one_of("status", FacultyAttendanceStatus::VARIANTS).required(),
                F::reference("markedBy", EntityKind::Account),
                F::one_of("leaveType", LeaveType::VARIANTS),
                F::text("remarks"),
            ],
        )
        .append_only(),
        EntityKind::Grade => EntitySchema::new(
            kind,
            vec![
                F::reference("studentId", EntityKind::Student).required(),
                F::reference("subjectId", EntityKind::Subject).required(),
                F::one_of("examType", ExamType::VARIANTS).required(),
                F::new("marks", FieldType::Decimal).required().bounded(0.0, 1000.0),
                F::new("maxMarks", FieldType::Decimal).required().bounded(1.0, 1000.0),
                semester(),
                F::formatted("grade", TextFormat::GradeLetter),
                F::formatted("predictedGrade", TextFormat::GradeLetter),
                F::new("improvementSuggestions", FieldType::TextList { distinct: false })
                    .required()
                    .default_value(Value::TextList(Vec::new())),
            ],
        )
        .append_only(),
        EntityKind::Notification => EntitySchema::new(
            kind,
            vec![
                F::text("title").required(),
                F::text("message").required(),
                F::one_of("type", NotificationType::VARIANTS)
                    .required()
                    .default_value(Value::Text(NotificationType::Info.to_string())),
                F::one_of("priority", Priority::VARIANTS)
                    .required()
                    .default_value(Value::Text(Priority::Medium.to_string())),
                F::one_of("targetRole", TargetRole::VARIANTS)
                    .required()
                    .default_value(Value::Text(TargetRole::All.to_string())),
                F::new("targetUsers", FieldType::RefSet { target: EntityKind::Account })
                    .required()
                    .default_value(Value::RefSet(Default::default())),
                F::new("isRead", FieldType::Bool)
                    .required()
                    .default_value(Value::Bool(false)),
                F::new("isAIGenerated", FieldType::Bool)
                    .required()
                    .default_value(Value::Bool(false)),
                F::structured("data", StructuredKind::NotificationData)
                    .required()
                    .default_value(Value::Structured(json!({}))),
                F::new("expiresAt", FieldType::Timestamp),
                F::new("expired", FieldType::Bool)
                    .required()
                    .default_value(Value::Bool(false))
                    .system(),
            ],
        ),
        EntityKind::AiAnalytics => EntitySchema::new(
            kind,
            vec![
                F::one_of("type", AnalyticsType::VARIANTS).required(),
                F::reference("studentId", EntityKind::Student).required(),
                F::structured("data", StructuredKind::AnalyticsData).required(),
                F::structured("predictions", StructuredKind::Predictions).required(),
                F::new("confidence", FieldType::Decimal).required().bounded(0.0, 100.0),
                F::one_of("status", AnalyticsStatus::VARIANTS)
                    .required()
                    .default_value(Value::Text(AnalyticsStatus::Active.to_string())),
                F::new("validUntil", FieldType::Timestamp),
            ],
        ),
        EntityKind::ChatbotConversation => EntitySchema::new(
            kind,
            vec![
                F::reference("accountId", EntityKind::Account).required(),
                F::text("sessionId").required(),
                F::structured("messages", StructuredKind::ChatMessages)
                    .required()
                    .default_value(Value::Structured(json!([]))),
                F::structured("context", StructuredKind::ConversationContext)
                    .required()
                    .default_value(Value::Structured(json!({}))),
                F::new("isActive", FieldType::Bool)
                    .required()
                    .default_value(Value::Bool(true)),
                F::new("satisfaction", FieldType::Integer).bounded(1.0, 5.0),
            ],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entity_has_system_fields() {
        let registry = SchemaRegistry::standard();
        for kind in EntityKind::ALL {
            let schema = registry.entity(kind);
            for name in ["id", "createdAt", "updatedAt"] {
                assert!(schema.field(name).is_some_and(FieldSpec::is_system), "{kind}.{name}");
            }
        }
    }

    #[test]
    fn test_describe_unknown_entity() {
        let registry = SchemaRegistry::standard();
        assert_eq!(
            registry.describe("Library"),
            Err(SchemaError::UnknownEntity("Library".to_string()))
        );
        assert!(registry.describe("Grade").is_ok());
    }

    #[test]
    fn test_default_of() {
        let registry = SchemaRegistry::standard();
        assert_eq!(
            registry.default_of("Student", "attendanceRisk"),
            Ok(Value::Text("low".to_string()))
        );
        assert_eq!(registry.default_of("Student", "behaviorScore"), Ok(Value::Decimal(5.0)));
        assert_eq!(registry.default_of("Grade", "marks"), Ok(Value::Null));
        assert!(matches!(
            registry.default_of("Grade", "score"),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_unique_fields() {
        let registry = SchemaRegistry::standard();
        let unique: Vec<_> = registry
            .kinds()
            .flat_map(|kind| {
                registry
                    .entity(kind)
                    .fields
                    .iter()
                    .filter(|spec| spec.unique)
                    .map(move |spec| format!("{kind}.{}", spec.name))
            })
            .collect();
        assert_eq!(
            unique,
            vec![
                "Account.email",
                "Student.accountId",
                "Student.rollNumber",
                "Faculty.accountId",
                "Faculty.employeeId",
                "Subject.code",
            ]
        );
    }

    fn numeric(ty: &FieldType, n: f64) -> serde_json::Value {
        match ty {
            FieldType::Integer => json!(n as i64),
            _ => json!(n),
        }
    }

    #[test]
    fn test_every_bound_is_inclusive() {
        let registry = SchemaRegistry::standard();
        let mut checked = Vec::new();
        for kind in registry.kinds() {
            for spec in &registry.entity(kind).fields {
                let Some(bounds) = spec.bounds else { continue };
                let step = match spec.ty {
                    FieldType::Integer => 1.0,
                    _ => 0.01,
                };
                for edge in [bounds.min, bounds.max] {
                    let raw = numeric(&spec.ty, edge);
                    assert!(
                        crate::value::coerce(&spec.ty, spec.bounds, &raw).is_ok(),
                        "{kind}.{} rejected {raw}",
                        spec.name
                    );
                }
                for outside in [bounds.min - step, bounds.max + step] {
                    let raw = numeric(&spec.ty, outside);
                    assert_eq!(
                        crate::value::coerce(&spec.ty, spec.bounds, &raw),
                        Err(crate::error::ViolationKind::Range { min: bounds.min, max: bounds.max }),
                        "{kind}.{} accepted {raw}",
                        spec.name
                    );
                }
                checked.push(format!("{kind}.{}", spec.name));
            }
        }
        for name in ["AIAnalytics.confidence", "ChatbotConversation.satisfaction", "Grade.maxMarks"] {
            assert!(checked.iter().any(|seen| seen == name), "{name} has no bounds");
        }
    }
}
