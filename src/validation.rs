//! Validate-before-commit for every proposed write.
//!
//! A write is checked in a fixed order: write permissions (unknown,
//! system-managed, immutable and append-only fields), required fields,
//! type and format, enumeration membership, numeric bounds, uniqueness, and
//! foreign keys. Cross-field rules and the analytics contract run last, on
//! the merged row, and only over fields that passed the per-field checks.
//! Every violation is collected; nothing short-circuits after the first.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::analytics::AnalyticsContract;
use crate::error::{
    ReferenceProblem, ReferentialIntegrityError, ValidationError, Violation, ViolationKind,
};
use crate::model::{ChatMessage, EntityKind, RowId};
use crate::relations::RelationshipGraph;
use crate::schema::{FieldSpec, SchemaRegistry};
use crate::value::{coerce, FieldMap, Row, Value};

/// Read access to committed rows, as needed for uniqueness and foreign-key
/// checks.
pub trait RowLookup {
    /// Entity kind of the row with `id`, if any row has that id.
    fn kind_of(&self, id: RowId) -> Option<EntityKind>;

    fn row(&self, id: RowId) -> Option<&Row>;

    fn rows(&self, kind: EntityKind) -> Box<dyn Iterator<Item = (RowId, &Row)> + '_>;
}

#[derive(Clone, Copy)]
enum Mode<'a> {
    Create,
    Update { id: RowId, existing: &'a Row },
    Correct { id: RowId, existing: &'a Row },
}

impl<'a> Mode<'a> {
    fn target(&self) -> Option<(RowId, &'a Row)> {
        match *self {
            Mode::Create => None,
            Mode::Update { id, existing } | Mode::Correct { id, existing } => Some((id, existing)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    schema: Arc<SchemaRegistry>,
    graph: Arc<RelationshipGraph>,
    contract: AnalyticsContract,
}

impl Validator {
    pub fn new(schema: Arc<SchemaRegistry>, graph: Arc<RelationshipGraph>) -> Self {
        Self {
            schema,
            graph,
            contract: AnalyticsContract::standard(),
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub fn contract(&self) -> &AnalyticsContract {
        &self.contract
    }

    /// Validates a new row. On success returns the full row with defaults
    /// filled in; system-managed timestamps and the id are left to the store.
    pub fn validate_create(
        &self,
        kind: EntityKind,
        fields: &FieldMap,
        store: &dyn RowLookup,
    ) -> Result<Row, ValidationError> {
        self.validate(kind, Mode::Create, fields, store)
    }

    /// Validates a partial update of `existing`. Append-only entities reject
    /// every plain update.
    pub fn validate_update(
        &self,
        kind: EntityKind,
        id: RowId,
        existing: &Row,
        fields: &FieldMap,
        store: &dyn RowLookup,
    ) -> Result<Row, ValidationError> {
        self.validate(kind, Mode::Update { id, existing }, fields, store)
    }

    /// Validates an audited correction of an append-only row.
    pub fn validate_correction(
        &self,
        kind: EntityKind,
        id: RowId,
        existing: &Row,
        fields: &FieldMap,
        store: &dyn RowLookup,
    ) -> Result<Row, ValidationError> {
        self.validate(kind, Mode::Correct { id, existing }, fields, store)
    }

    fn validate(
        &self,
        kind: EntityKind,
        mode: Mode<'_>,
        fields: &FieldMap,
        store: &dyn RowLookup,
    ) -> Result<Row, ValidationError> {
        let schema = self.schema.entity(kind);
        let mut violations = Vec::new();
        let mut invalid: BTreeSet<String> = BTreeSet::new();

        if matches!(mode, Mode::Update { .. }) && schema.append_only {
            let mut rejected: Vec<Violation> = fields
                .keys()
                .map(|field| Violation::new(field.as_str(), ViolationKind::AppendOnly))
                .collect();
            if rejected.is_empty() {
                rejected.push(Violation::new("*", ViolationKind::AppendOnly));
            }
            return Err(ValidationError::new(kind, rejected));
        }

        for field in fields.keys() {
            match schema.field(field) {
                None => {
                    violations.push(Violation::new(field.as_str(), ViolationKind::UnknownField));
                }
                Some(spec) if spec.is_system() => {
                    violations.push(Violation::new(field.as_str(), ViolationKind::ReadOnly));
                }
                Some(_) => {}
            }
        }

        let mut row = match mode.target() {
            Some((_, existing)) => existing.clone(),
            None => Row::new(),
        };

        for spec in &schema.fields {
            if spec.is_system() {
                if mode.target().is_none() {
                    if let Some(default) = &spec.default {
                        row.insert(spec.name, default.clone());
                    }
                }
                continue;
            }
            match self.resolve_field(spec, mode, fields.get(spec.name)) {
                Ok(Some(value)) => {
                    row.insert(spec.name, value);
                }
                Ok(None) => {}
                Err(rule) => {
                    invalid.insert(spec.name.to_string());
                    violations.push(Violation::new(spec.name, rule));
                }
            }
        }

        let self_id = mode.target().map(|(id, _)| id);
        violations.extend(self.check_uniqueness(kind, &row, self_id, &invalid, store));
        violations.extend(self.check_references(kind, &row, &invalid, store));

        let before_rules = violations.len();
        violations.extend(cross_field_rules(kind, &row, &invalid));
        for violation in &violations[before_rules..] {
            invalid.insert(violation.field.clone());
        }
        violations.extend(self.contract.check(kind, &row, &invalid));

        if violations.is_empty() {
            Ok(row)
        } else {
            Err(ValidationError::new(kind, violations))
        }
    }

    /// The value to store for one caller-writable field, `None` to leave the
    /// row as it is.
    fn resolve_field(
        &self,
        spec: &FieldSpec,
        mode: Mode<'_>,
        raw: Option<&serde_json::Value>,
    ) -> Result<Option<Value>, ViolationKind> {
        let raw = match raw {
            Some(raw) => raw,
            None if mode.target().is_some() => return Ok(None),
            None => {
                return match &spec.default {
                    Some(default) => Ok(Some(default.clone())),
                    None if spec.required => Err(ViolationKind::Required),
                    None => Ok(Some(Value::Null)),
                };
            }
        };

        let value = if raw.is_null() {
            if spec.required {
                return Err(ViolationKind::Required);
            }
            Value::Null
        } else {
            coerce(&spec.ty, spec.bounds, raw)?
        };

        if let Some((_, existing)) = mode.target() {
            let current = existing.get(spec.name).unwrap_or(&Value::Null);
            if spec.immutable && *current != value {
                return Err(ViolationKind::Immutable);
            }
        }
        Ok(Some(value))
    }

    fn check_uniqueness(
        &self,
        kind: EntityKind,
        row: &Row,
        self_id: Option<RowId>,
        invalid: &BTreeSet<String>,
        store: &dyn RowLookup,
    ) -> Vec<Violation> {
        let schema = self.schema.entity(kind);
        let mut violations = Vec::new();

        let mut groups: Vec<&[&'static str]> = schema
            .fields
            .iter()
            .filter(|spec| spec.unique)
            .map(|spec| std::slice::from_ref(&spec.name))
            .collect();
        for group in &schema.unique_together {
            groups.push(*group);
        }

        for group in groups {
            if group.iter().any(|field| invalid.contains(*field)) {
                continue;
            }
            let Some(key) = group
                .iter()
                .map(|field| row.get(field).filter(|value| !value.is_null()))
                .collect::<Option<Vec<_>>>()
            else {
                continue;
            };
            let conflict = store.rows(kind).find(|(id, other)| {
                Some(*id) != self_id
                    && group
                        .iter()
                        .zip(&key)
                        .all(|(field, value)| other.get(field) == Some(*value))
            });
            if let Some((conflicting, _)) = conflict {
                violations.push(Violation::new(
                    group.join("+"),
                    ViolationKind::Uniqueness { conflicting },
                ));
            }
        }
        violations
    }

    fn check_references(
        &self,
        kind: EntityKind,
        row: &Row,
        invalid: &BTreeSet<String>,
        store: &dyn RowLookup,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        for spec in &self.schema.entity(kind).fields {
            let Some(target) = spec.ty.reference_target() else {
                continue;
            };
            if invalid.contains(spec.name) {
                continue;
            }
            let owner_role = self
                .graph
                .edge(kind, spec.name)
                .and_then(|edge| edge.owner_role);
            let ids = row.get(spec.name).map(Value::row_ids).unwrap_or_default();

            for id in ids {
                let problem = match store.kind_of(id) {
                    None => Some(ReferenceProblem::Missing),
                    Some(found) if found != target => Some(ReferenceProblem::WrongEntity { found }),
                    Some(_) => owner_role.and_then(|expected| {
                        let found = store
                            .row(id)
                            .and_then(|owner| owner.get("role"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        (found != expected.as_str()).then(|| ReferenceProblem::WrongRole {
                            expected,
                            found: found.to_string(),
                        })
                    }),
                };
                if let Some(problem) = problem {
                    let err = ReferentialIntegrityError {
                        field: spec.name.to_string(),
                        target,
                        id,
                        problem,
                    };
                    violations.push(Violation::new(spec.name, ViolationKind::Reference(err)));
                }
            }
        }
        violations
    }
}

fn cross_field_rules(kind: EntityKind, row: &Row, invalid: &BTreeSet<String>) -> Vec<Violation> {
    let valid = |field: &str| {
        if invalid.contains(field) {
            None
        } else {
            row.get(field).filter(|value| !value.is_null())
        }
    };
    let mut violations = Vec::new();
    let mut broken = |field: &str, code: &'static str, reason: String| {
        violations.push(Violation::new(field, ViolationKind::CrossField { code, reason }));
    };

    match kind {
        EntityKind::Grade => {
            let marks = valid("marks").and_then(Value::as_f64);
            let max = valid("maxMarks").and_then(Value::as_f64);
            if let (Some(marks), Some(max)) = (marks, max) {
                if marks > max {
                    broken(
                        "marks",
                        "marks<=maxMarks",
                        format!("marks {marks} exceed maxMarks {max}"),
                    );
                }
            }
        }
        EntityKind::Faculty => {
            let present = valid("presentDays").and_then(Value::as_f64);
            let total = valid("totalWorkingDays").and_then(Value::as_f64);
            if let (Some(present), Some(total)) = (present, total) {
                if present > total {
                    broken(
                        "presentDays",
                        "presentDays<=totalWorkingDays",
                        format!("presentDays {present} exceed totalWorkingDays {total}"),
                    );
                }
            }
        }
        EntityKind::FacultyAttendance => {
            let check_in = valid("checkInTime").and_then(Value::as_time);
            let check_out = valid("checkOutTime").and_then(Value::as_time);
            if let (Some(check_in), Some(check_out)) = (check_in, check_out) {
                if check_out < check_in {
                    broken(
                        "checkOutTime",
                        "checkOutTime>=checkInTime",
                        format!("checked out at {check_out} before checking in at {check_in}"),
                    );
                }
            }
        }
        EntityKind::ChatbotConversation => {
            let messages = valid("messages").and_then(|value| value.decode::<Vec<ChatMessage>>());
            if let Some(messages) = messages {
                if let Some(position) = messages.iter().position(|m| m.content.trim().is_empty()) {
                    broken(
                        "messages",
                        "messages.content",
                        format!("message {position} has no content"),
                    );
                }
                if let Some(position) = messages
                    .windows(2)
                    .position(|pair| pair[1].sent_at < pair[0].sent_at)
                {
                    broken(
                        "messages",
                        "messages.sentAt",
                        format!("message {} was sent before message {position}", position + 1),
                    );
                }
            }
        }
        _ => {}
    }
    violations
}
