//! Error taxonomy for the records core.
//!
//! - [`SchemaError`]: programmer error (unknown entity or field, malformed
//!   relationship graph). Surfaces at startup, never on a well-formed request.
//! - [`ValidationError`]: every violation found in one proposed write.
//!   Recoverable and returned to the caller as a whole.
//! - [`ReferentialIntegrityError`]: the dangling or mistyped reference case of
//!   a validation failure, carried inside a [`ValidationError`].
//! - [`StaleWriteError`]: optimistic concurrency conflict on update.
//! - [`WriteError`]: what the row store returns from a write.

use serde::Serialize;
use thiserror::Error;

use crate::model::{EntityKind, Role, RowId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("entity {entity} has no field '{field}'")]
    UnknownField { entity: EntityKind, field: String },

    #[error("edge {entity}.{field} is malformed: {reason}")]
    MalformedEdge {
        entity: EntityKind,
        field: &'static str,
        reason: String,
    },

    #[error("ownership edges form a cycle: {}", format_cycle(.0))]
    OwnershipCycle(Vec<EntityKind>),
}

fn format_cycle(path: &[EntityKind]) -> String {
    path.iter().map(|kind| kind.as_str()).collect::<Vec<_>>().join(" -> ")
}

/// Why a reference field failed to resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum ReferenceProblem {
    Missing,
    WrongEntity { found: EntityKind },
    WrongRole { expected: Role, found: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{field} -> {target} {id}: {}", describe_problem(.problem))]
pub struct ReferentialIntegrityError {
    /// Reported by the enclosing [`Violation`].
    #[serde(skip_serializing)]
    pub field: String,
    pub target: EntityKind,
    pub id: RowId,
    #[serde(flatten)]
    pub problem: ReferenceProblem,
}

fn describe_problem(problem: &ReferenceProblem) -> String {
    match problem {
        ReferenceProblem::Missing => "no such row".to_string(),
        ReferenceProblem::WrongEntity { found } => format!("row is a {found}"),
        ReferenceProblem::WrongRole { expected, found } => {
            format!("account has role '{found}', expected '{expected}'")
        }
    }
}

/// The rule a field broke. Variants are declared in the order the checks run,
/// which is also the order violations are reported in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ViolationKind {
    UnknownField,
    ReadOnly,
    Immutable,
    AppendOnly,
    Required,
    Type { expected: &'static str },
    Format { reason: String },
    Enumeration { allowed: &'static [&'static str] },
    Range { min: f64, max: f64 },
    Uniqueness { conflicting: RowId },
    Reference(ReferentialIntegrityError),
    CrossField { code: &'static str, reason: String },
    Contract { reason: String },
}

impl ViolationKind {
    /// Position of the check in the validation pipeline.
    pub fn stage(&self) -> u8 {
        match self {
            ViolationKind::UnknownField
            | ViolationKind::ReadOnly
            | ViolationKind::Immutable
            | ViolationKind::AppendOnly
            | ViolationKind::Required => 0,
            ViolationKind::Type { .. } | ViolationKind::Format { .. } => 1,
            ViolationKind::Enumeration { .. } => 2,
            ViolationKind::Range { .. } => 3,
            ViolationKind::Uniqueness { .. } => 4,
            ViolationKind::Reference(_) => 5,
            ViolationKind::CrossField { .. } => 6,
            ViolationKind::Contract { .. } => 7,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ViolationKind::UnknownField => "unknown",
            ViolationKind::ReadOnly => "read_only",
            ViolationKind::Immutable => "immutable",
            ViolationKind::AppendOnly => "append_only",
            ViolationKind::Required => "required",
            ViolationKind::Type { .. } => "type",
            ViolationKind::Format { .. } => "format",
            ViolationKind::Enumeration { .. } => "enumeration",
            ViolationKind::Range { .. } => "range",
            ViolationKind::Uniqueness { .. } => "uniqueness",
            ViolationKind::Reference(_) => "reference",
            ViolationKind::CrossField { code, .. } => *code,
            ViolationKind::Contract { .. } => "contract",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        let field = field.into();
        let message = match &kind {
            ViolationKind::UnknownField => format!("{field} is not a field of this record"),
            ViolationKind::ReadOnly => format!("{field} is managed by the system"),
            ViolationKind::Immutable => format!("{field} cannot change after creation"),
            ViolationKind::AppendOnly => {
                "record is append-only; submit a correction instead".to_string()
            }
            ViolationKind::Required => format!("{field} is required"),
            ViolationKind::Type { expected } => format!("{field} must be {expected}"),
            ViolationKind::Format { reason } => format!("{field} {reason}"),
            ViolationKind::Enumeration { allowed } => {
                format!("{field} must be one of: {}", allowed.join(", "))
            }
            ViolationKind::Range { min, max } => format!("{field} must be within [{min}, {max}]"),
            ViolationKind::Uniqueness { conflicting } => {
                format!("{field} is already used by {conflicting}")
            }
            ViolationKind::Reference(err) => err.to_string(),
            ViolationKind::CrossField { reason, .. } | ViolationKind::Contract { reason } => {
                reason.clone()
            }
        };
        Self { field, kind, message }
    }

    /// Short code such as `uniqueness:rollNumber` or `marks<=maxMarks`.
    pub fn code(&self) -> String {
        match &self.kind {
            ViolationKind::CrossField { code, .. } => (*code).to_string(),
            kind => format!("{}:{}", kind.label(), self.field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{entity} rejected with {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub entity: EntityKind,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(entity: EntityKind, mut violations: Vec<Violation>) -> Self {
        violations.sort_by_key(|v| v.kind.stage());
        Self { entity, violations }
    }

    pub fn single(entity: EntityKind, violation: Violation) -> Self {
        Self::new(entity, vec![violation])
    }

    pub fn codes(&self) -> Vec<String> {
        self.violations.iter().map(Violation::code).collect()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.violations.iter().any(|v| v.code() == code)
    }

    pub fn on_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Violation> + 'a {
        self.violations.iter().filter(move |v| v.field == field)
    }

    /// The referential integrity failures among the violations.
    pub fn referential(&self) -> impl Iterator<Item = &ReferentialIntegrityError> {
        self.violations.iter().filter_map(|v| match &v.kind {
            ViolationKind::Reference(err) => Some(err),
            _ => None,
        })
    }

    pub fn is_referential(&self) -> bool {
        self.referential().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{entity} {id} is at version {actual}, write expected version {expected}")]
pub struct StaleWriteError {
    pub entity: EntityKind,
    pub id: RowId,
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Stale(#[from] StaleWriteError),

    #[error("{entity} {id} does not exist")]
    NotFound { entity: EntityKind, id: RowId },

    #[error("{0} records cannot be deactivated")]
    NotDeactivatable(EntityKind),

    #[error("{0} records are updated directly, not corrected")]
    NotCorrectable(EntityKind),

    #[error("account {0} is deactivated")]
    Inactive(RowId),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl WriteError {
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            WriteError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is a {actual}, not a {expected}")]
    KindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("record does not match its typed view: {0}")]
    Shape(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violations_sorted_by_stage() {
        let err = ValidationError::new(
            EntityKind::Grade,
            vec![
                Violation::new(
                    "marks",
                    ViolationKind::CrossField {
                        code: "marks<=maxMarks",
                        reason: "marks exceed maxMarks".to_string(),
                    },
                ),
                Violation::new("studentId", ViolationKind::Required),
            ],
        );
        assert_eq!(err.codes(), vec!["required:studentId", "marks<=maxMarks"]);
    }

    #[test]
    fn test_referential_violations_are_queryable() {
        let reference = ReferentialIntegrityError {
            field: "studentId".to_string(),
            target: EntityKind::Student,
            id: RowId(42),
            problem: ReferenceProblem::Missing,
        };
        let err = ValidationError::single(
            EntityKind::Attendance,
            Violation::new("studentId", ViolationKind::Reference(reference.clone())),
        );
        assert!(err.is_referential());
        assert_eq!(err.referential().next(), Some(&reference));
        assert_eq!(err.violations[0].message, "studentId -> Student #42: no such row");
    }

    #[test]
    fn test_reference_violation_serializes_flat() {
        let wrong_role = ReferentialIntegrityError {
            field: "accountId".to_string(),
            target: EntityKind::Account,
            id: RowId(7),
            problem: ReferenceProblem::WrongRole {
                expected: Role::Student,
                found: "faculty".to_string(),
            },
        };
        let violation = Violation::new("accountId", ViolationKind::Reference(wrong_role));

        let text = serde_json::to_string(&violation).unwrap();
        assert_eq!(text.matches("\"field\"").count(), 1);
        assert_eq!(text.matches("\"problem\"").count(), 1);

        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["field"], "accountId");
        assert_eq!(body["rule"], "reference");
        assert_eq!(body["target"], "Account");
        assert_eq!(body["id"], 7);
        assert_eq!(body["problem"], "wrong_role");
        assert_eq!(body["expected"], "student");
        assert_eq!(body["found"], "faculty");
    }

    #[test]
    fn test_cross_field_code_is_the_rule_name() {
        let violation = Violation::new(
            "presentDays",
            ViolationKind::CrossField {
                code: "presentDays<=totalWorkingDays",
                reason: "presentDays 21 exceed totalWorkingDays 20".to_string(),
            },
        );
        assert_eq!(violation.code(), "presentDays<=totalWorkingDays");
        let body = serde_json::to_value(&violation).unwrap();
        assert_eq!(body["rule"], "cross_field");
        assert_eq!(body["code"], "presentDays<=totalWorkingDays");
    }
}
