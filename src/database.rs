use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{
    DecodeError, ReferenceProblem, ReferentialIntegrityError, SchemaError, StaleWriteError,
    ValidationError, Violation, ViolationKind, WriteError,
};
use crate::lifecycle::{self, Clock};
use crate::model::{Entity, EntityKind, Role, RowId};
use crate::relations::RelationshipGraph;
use crate::schema::SchemaRegistry;
use crate::validation::{RowLookup, Validator};
use crate::value::{FieldMap, Row, Value};

/// A committed row together with its concurrency version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub entity: EntityKind,
    pub id: RowId,
    pub version: u64,
    pub fields: Row,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Decodes into the typed view of the entity.
    pub fn decode<T: Entity>(&self) -> Result<T, DecodeError> {
        if T::KIND != self.entity {
            return Err(DecodeError::KindMismatch {
                expected: T::KIND,
                actual: self.entity,
            });
        }
        let raw = serde_json::to_value(&self.fields)?;
        Ok(serde_json::from_value(raw)?)
    }
}

/// Who corrected an append-only row, and why.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub reason: String,
    pub corrected_by: RowId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entity: EntityKind,
    pub row: RowId,
    pub reason: String,
    pub corrected_by: RowId,
    pub at: DateTime<Utc>,
    pub changes: Vec<FieldChange>,
}

/// Profile half of an enrollment.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    Student(FieldMap),
    Faculty(FieldMap),
}

impl Profile {
    pub fn kind(&self) -> EntityKind {
        match self {
            Profile::Student(_) => EntityKind::Student,
            Profile::Faculty(_) => EntityKind::Faculty,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Profile::Student(_) => Role::Student,
            Profile::Faculty(_) => Role::Faculty,
        }
    }

    fn fields(&self) -> &FieldMap {
        match self {
            Profile::Student(fields) | Profile::Faculty(fields) => fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrollment {
    pub account: Record,
    pub profile: Record,
}

#[derive(Debug, Clone, PartialEq)]
struct Stored {
    version: u64,
    fields: Row,
}

/// How to put one row back the way it was before a transaction touched it.
#[derive(Debug)]
enum Undo {
    Created { kind: EntityKind, id: RowId },
    Changed { kind: EntityKind, id: RowId, prior: Stored },
}

/// Undo log of the open transaction.
#[derive(Debug)]
struct Journal {
    undo: Vec<Undo>,
    next_id: u64,
    audit_len: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    rows: BTreeMap<EntityKind, BTreeMap<RowId, Stored>>,
    kinds: BTreeMap<RowId, EntityKind>,
    next_id: u64,
    audit: Vec<AuditEntry>,
    journal: Option<Journal>,
}

impl RowLookup for Tables {
    fn kind_of(&self, id: RowId) -> Option<EntityKind> {
        self.kinds.get(&id).copied()
    }

    fn row(&self, id: RowId) -> Option<&Row> {
        let kind = self.kind_of(id)?;
        self.rows.get(&kind)?.get(&id).map(|stored| &stored.fields)
    }

    fn rows(&self, kind: EntityKind) -> Box<dyn Iterator<Item = (RowId, &Row)> + '_> {
        match self.rows.get(&kind) {
            Some(table) => Box::new(table.iter().map(|(id, stored)| (*id, &stored.fields))),
            None => Box::new(std::iter::empty()),
        }
    }
}

impl Tables {
    fn record(&self, kind: EntityKind, id: RowId) -> Result<Record, WriteError> {
        self.rows
            .get(&kind)
            .and_then(|table| table.get(&id))
            .map(|stored| Record {
                entity: kind,
                id,
                version: stored.version,
                fields: stored.fields.clone(),
            })
            .ok_or(WriteError::NotFound { entity: kind, id })
    }

    fn list(&self, kind: EntityKind) -> Vec<Record> {
        self.rows
            .get(&kind)
            .into_iter()
            .flatten()
            .map(|(id, stored)| Record {
                entity: kind,
                id: *id,
                version: stored.version,
                fields: stored.fields.clone(),
            })
            .collect()
    }

    fn stored(&self, kind: EntityKind, id: RowId) -> Result<&Stored, WriteError> {
        self.rows
            .get(&kind)
            .and_then(|table| table.get(&id))
            .ok_or(WriteError::NotFound { entity: kind, id })
    }

    /// Mutable access to a row. Inside a transaction the row's current state
    /// is journaled first.
    fn stored_mut(&mut self, kind: EntityKind, id: RowId) -> Result<&mut Stored, WriteError> {
        let stored = self
            .rows
            .get_mut(&kind)
            .and_then(|table| table.get_mut(&id))
            .ok_or(WriteError::NotFound { entity: kind, id })?;
        if let Some(journal) = &mut self.journal {
            journal.undo.push(Undo::Changed {
                kind,
                id,
                prior: stored.clone(),
            });
        }
        Ok(stored)
    }

    fn begin(&mut self) {
        self.journal = Some(Journal {
            undo: Vec::new(),
            next_id: self.next_id,
            audit_len: self.audit.len(),
        });
    }

    fn finish(&mut self) {
        self.journal = None;
    }

    /// Undoes every write since `begin`, newest first. No-op outside a
    /// transaction.
    fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        let undone = journal.undo.len();
        for undo in journal.undo.into_iter().rev() {
            match undo {
                Undo::Created { kind, id } => {
                    if let Some(table) = self.rows.get_mut(&kind) {
                        table.remove(&id);
                    }
                    self.kinds.remove(&id);
                }
                Undo::Changed { kind, id, prior } => {
                    self.rows.entry(kind).or_default().insert(id, prior);
                }
            }
        }
        self.next_id = journal.next_id;
        self.audit.truncate(journal.audit_len);
        debug!(undone, "transaction rolled back");
    }

    /// Replaces a row's fields, stamping `updatedAt` and bumping its version.
    fn commit(&mut self, kind: EntityKind, id: RowId, mut fields: Row, now: DateTime<Utc>) -> Result<Record, WriteError> {
        lifecycle::stamp_updated(&mut fields, now);
        let stored = self.stored_mut(kind, id)?;
        stored.version += 1;
        stored.fields = fields;
        self.record(kind, id)
    }

    fn create(
        &mut self,
        validator: &Validator,
        now: DateTime<Utc>,
        kind: EntityKind,
        fields: &FieldMap,
    ) -> Result<Record, WriteError> {
        let mut row = validator.validate_create(kind, fields, &*self)?;
        self.next_id += 1;
        let id = RowId(self.next_id);
        lifecycle::stamp_created(&mut row, id, now);

        if kind == EntityKind::AiAnalytics {
            self.retire_superseded(&row, now);
        }
        if let Some(journal) = &mut self.journal {
            journal.undo.push(Undo::Created { kind, id });
        }
        self.rows.entry(kind).or_default().insert(id, Stored { version: 1, fields: row });
        self.kinds.insert(id, kind);
        self.record(kind, id)
    }

    fn update(
        &mut self,
        validator: &Validator,
        now: DateTime<Utc>,
        kind: EntityKind,
        id: RowId,
        expected_version: u64,
        fields: &FieldMap,
    ) -> Result<Record, WriteError> {
        let stored = self.stored(kind, id)?;
        if stored.version != expected_version {
            return Err(StaleWriteError {
                entity: kind,
                id,
                expected: expected_version,
                actual: stored.version,
            }
            .into());
        }
        let existing = stored.fields.clone();
        let row = validator.validate_update(kind, id, &existing, fields, &*self)?;

        if kind == EntityKind::AiAnalytics {
            let others: Vec<RowId> = self
                .rows(kind)
                .filter(|(other, older)| *other != id && lifecycle::supersedes(&row, older))
                .map(|(other, _)| other)
                .collect();
            self.archive_all(&others, now);
        }
        self.commit(kind, id, row, now)
    }

    fn correct(
        &mut self,
        validator: &Validator,
        now: DateTime<Utc>,
        kind: EntityKind,
        id: RowId,
        fields: &FieldMap,
        correction: &Correction,
    ) -> Result<Record, WriteError> {
        if !validator.schema().entity(kind).append_only {
            return Err(WriteError::NotCorrectable(kind));
        }
        let existing = self.record(kind, id)?.fields;

        let mut problems = Vec::new();
        if correction.reason.trim().is_empty() {
            problems.push(Violation::new("reason", ViolationKind::Required));
        }
        let corrector = match self.kind_of(correction.corrected_by) {
            Some(EntityKind::Account) => None,
            Some(found) => Some(ReferenceProblem::WrongEntity { found }),
            None => Some(ReferenceProblem::Missing),
        };
        if let Some(problem) = corrector {
            let err = ReferentialIntegrityError {
                field: "correctedBy".to_string(),
                target: EntityKind::Account,
                id: correction.corrected_by,
                problem,
            };
            problems.push(Violation::new("correctedBy", ViolationKind::Reference(err)));
        }

        let row = match validator.validate_correction(kind, id, &existing, fields, &*self) {
            Ok(row) if problems.is_empty() => row,
            Ok(_) => return Err(ValidationError::new(kind, problems).into()),
            Err(mut err) => {
                problems.append(&mut err.violations);
                return Err(ValidationError::new(kind, problems).into());
            }
        };

        let changes: Vec<FieldChange> = row
            .iter()
            .filter_map(|(field, after)| {
                let before = existing.get(field).cloned().unwrap_or(Value::Null);
                (before != *after).then(|| FieldChange {
                    field: *field,
                    before,
                    after: after.clone(),
                })
            })
            .collect();

        self.audit.push(AuditEntry {
            entity: kind,
            row: id,
            reason: correction.reason.trim().to_string(),
            corrected_by: correction.corrected_by,
            at: now,
            changes,
        });
        self.commit(kind, id, row, now)
    }

    fn deactivate(&mut self, now: DateTime<Utc>, kind: EntityKind, id: RowId) -> Result<Record, WriteError> {
        if !matches!(kind, EntityKind::Account | EntityKind::ChatbotConversation) {
            return Err(WriteError::NotDeactivatable(kind));
        }
        let current = self.record(kind, id)?;
        if current.get("isActive").and_then(Value::as_bool) == Some(false) {
            return Ok(current);
        }
        let mut row = current.fields;
        row.insert("isActive", Value::Bool(false));
        self.commit(kind, id, row, now)
    }

    fn retire_superseded(&mut self, newer: &Row, now: DateTime<Utc>) {
        let older: Vec<RowId> = self
            .rows(EntityKind::AiAnalytics)
            .filter(|(_, older)| lifecycle::supersedes(newer, older))
            .map(|(id, _)| id)
            .collect();
        self.archive_all(&older, now);
    }

    fn archive_all(&mut self, ids: &[RowId], now: DateTime<Utc>) {
        for id in ids {
            if let Ok(stored) = self.stored_mut(EntityKind::AiAnalytics, *id) {
                lifecycle::archive(&mut stored.fields);
                lifecycle::stamp_updated(&mut stored.fields, now);
                stored.version += 1;
                debug!(id = %id, "analytics superseded");
            }
        }
    }
}

/// Writes that commit together or not at all.
pub struct Transaction<'a> {
    tables: &'a mut Tables,
    validator: &'a Validator,
    now: DateTime<Utc>,
}

impl Transaction<'_> {
    pub fn create(&mut self, kind: EntityKind, fields: &FieldMap) -> Result<Record, WriteError> {
        self.tables.create(self.validator, self.now, kind, fields)
    }

    pub fn get(&self, kind: EntityKind, id: RowId) -> Result<Record, WriteError> {
        self.tables.record(kind, id)
    }

    pub fn update(
        &mut self,
        kind: EntityKind,
        id: RowId,
        expected_version: u64,
        fields: &FieldMap,
    ) -> Result<Record, WriteError> {
        self.tables
            .update(self.validator, self.now, kind, id, expected_version, fields)
    }

    pub fn correct(
        &mut self,
        kind: EntityKind,
        id: RowId,
        fields: &FieldMap,
        correction: &Correction,
    ) -> Result<Record, WriteError> {
        self.tables
            .correct(self.validator, self.now, kind, id, fields, correction)
    }

    pub fn deactivate(&mut self, kind: EntityKind, id: RowId) -> Result<Record, WriteError> {
        self.tables.deactivate(self.now, kind, id)
    }
}

/// In-memory row store. Every write is validated and committed under one
/// write lock, so no write is checked against state that changes before it
/// lands.
pub struct Database {
    validator: Validator,
    clock: Arc<dyn Clock>,
    tables: RwLock<Tables>,
}

impl Database {
    pub fn new(validator: Validator, clock: Arc<dyn Clock>) -> Self {
        Database {
            validator,
            clock,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Store over the standard schema and relationship graph.
    pub fn standard(clock: Arc<dyn Clock>) -> Result<Self, SchemaError> {
        let schema = Arc::new(SchemaRegistry::standard());
        let graph = Arc::new(RelationshipGraph::standard(&schema)?);
        Ok(Self::new(Validator::new(schema, graph), clock))
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, Tables> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        // A transaction that panicked leaves its journal behind.
        tables.rollback();
        tables
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&*tables)
    }

    pub fn create(&self, kind: EntityKind, fields: &FieldMap) -> Result<Record, WriteError> {
        let now = self.now();
        let result = self.write_tables().create(&self.validator, now, kind, fields);
        log_write("create", kind, &result);
        result
    }

    pub fn get(&self, kind: EntityKind, id: RowId) -> Result<Record, WriteError> {
        self.read(|tables| tables.record(kind, id))
    }

    pub fn list(&self, kind: EntityKind) -> Vec<Record> {
        self.read(|tables| tables.list(kind))
    }

    /// Applies a partial update if the row is still at `expected_version`.
    pub fn update(
        &self,
        kind: EntityKind,
        id: RowId,
        expected_version: u64,
        fields: &FieldMap,
    ) -> Result<Record, WriteError> {
        let now = self.now();
        let result = self
            .write_tables()
            .update(&self.validator, now, kind, id, expected_version, fields);
        log_write("update", kind, &result);
        result
    }

    /// Corrects an append-only row and records the change in the audit log.
    pub fn correct(
        &self,
        kind: EntityKind,
        id: RowId,
        fields: &FieldMap,
        correction: &Correction,
    ) -> Result<Record, WriteError> {
        let now = self.now();
        let result = self
            .write_tables()
            .correct(&self.validator, now, kind, id, fields, correction);
        if result.is_ok() {
            info!(entity = %kind, %id, corrected_by = %correction.corrected_by, "record corrected");
        }
        log_write("correct", kind, &result);
        result
    }

    /// Sets `isActive = false`. Rows owned by or referencing the row are
    /// left untouched.
    pub fn deactivate(&self, kind: EntityKind, id: RowId) -> Result<Record, WriteError> {
        let now = self.now();
        let result = self.write_tables().deactivate(now, kind, id);
        if result.is_ok() {
            info!(entity = %kind, %id, "deactivated");
        }
        result
    }

    pub fn record_login(&self, account: RowId) -> Result<Record, WriteError> {
        let now = self.now();
        let mut tables = self.write_tables();
        let current = tables.record(EntityKind::Account, account)?;
        if current.get("isActive").and_then(Value::as_bool) == Some(false) {
            return Err(WriteError::Inactive(account));
        }
        let mut row = current.fields;
        row.insert("lastLogin", Value::Timestamp(now));
        tables.commit(EntityKind::Account, account, row, now)
    }

    /// Runs `f` under the write lock, journaling the prior state of every
    /// row it touches. If `f` fails the journal is replayed and the tables
    /// are left as they were.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, WriteError>,
    ) -> Result<T, WriteError> {
        let now = self.now();
        let mut tables = self.write_tables();
        tables.begin();
        let out = f(&mut Transaction {
            tables: &mut *tables,
            validator: &self.validator,
            now,
        });
        match out {
            Ok(_) => tables.finish(),
            Err(_) => tables.rollback(),
        }
        out
    }

    /// Creates an Account and its Student or Faculty profile together. The
    /// profile's `accountId` is filled in from the new account.
    pub fn enroll(&self, account: &FieldMap, profile: &Profile) -> Result<Enrollment, WriteError> {
        let result = self.transaction(|tx| {
            let account = tx.create(EntityKind::Account, account)?;
            let mut fields = profile.fields().clone();
            fields.insert("accountId".to_string(), serde_json::Value::from(account.id.0));
            let profile = tx.create(profile.kind(), &fields)?;
            Ok(Enrollment { account, profile })
        });
        match &result {
            Ok(enrollment) => info!(
                account = %enrollment.account.id,
                profile = %enrollment.profile.id,
                role = %profile.role(),
                "enrolled"
            ),
            Err(err) => debug!(role = %profile.role(), error = %err, "enrollment rolled back"),
        }
        result
    }

    /// Validates a create without committing it.
    pub fn dry_run(&self, kind: EntityKind, fields: &FieldMap) -> Result<Row, ValidationError> {
        self.read(|tables| self.validator.validate_create(kind, fields, tables))
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.read(|tables| tables.audit.clone())
    }

    /// Applies `change` to every `kind` row matching `pred`, as one write.
    pub(crate) fn modify_where(
        &self,
        kind: EntityKind,
        now: DateTime<Utc>,
        pred: impl Fn(&Row) -> bool,
        change: impl Fn(&mut Row),
    ) -> Vec<RowId> {
        let mut tables = self.write_tables();
        let Some(table) = tables.rows.get_mut(&kind) else {
            return Vec::new();
        };
        let mut touched = Vec::new();
        for (id, stored) in table.iter_mut().filter(|(_, stored)| pred(&stored.fields)) {
            change(&mut stored.fields);
            lifecycle::stamp_updated(&mut stored.fields, now);
            stored.version += 1;
            touched.push(*id);
        }
        touched
    }
}

fn log_write(action: &str, kind: EntityKind, result: &Result<Record, WriteError>) {
    match result {
        Ok(record) => debug!(action, entity = %kind, id = %record.id, version = record.version, "write committed"),
        Err(WriteError::Validation(err)) => {
            debug!(action, entity = %kind, codes = ?err.codes(), "write rejected")
        }
        Err(err) => debug!(action, entity = %kind, error = %err, "write failed"),
    }
}
