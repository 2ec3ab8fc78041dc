//! Foreign-key edges between entities.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::SchemaError;
use crate::model::{EntityKind, Role};
use crate::schema::SchemaRegistry;
use crate::value::FieldType;

/// Cardinality read from the target's side: one Account owns one Student
/// (`1:1`), one Student has many Grades (`1:N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:M")]
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The source row belongs to the target row.
    Ownership,
    Reference,
}

/// What happens to the source row when its target is deactivated. Rows are
/// never deleted, so the only rule is to keep them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDeactivate {
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: EntityKind,
    pub field: &'static str,
    pub target: EntityKind,
    pub cardinality: Cardinality,
    pub nullable: bool,
    pub kind: EdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_role: Option<Role>,
    pub on_deactivate: OnDeactivate,
}

impl Edge {
    fn new(
        source: EntityKind,
        field: &'static str,
        target: EntityKind,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            source,
            field,
            target,
            cardinality,
            nullable: false,
            kind: EdgeKind::Reference,
            owner_role: None,
            on_deactivate: OnDeactivate::Retain,
        }
    }

    fn owned(mut self) -> Self {
        self.kind = EdgeKind::Ownership;
        self
    }

    fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn owner_role(mut self, role: Role) -> Self {
        self.owner_role = Some(role);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    edges: Vec<Edge>,
}

impl RelationshipGraph {
    /// Checks every edge against `schema` and rejects ownership cycles.
    pub fn new(schema: &SchemaRegistry, edges: Vec<Edge>) -> Result<Self, SchemaError> {
        for edge in &edges {
            check_edge(schema, edge)?;
        }
        if let Some(cycle) = find_ownership_cycle(&edges) {
            return Err(SchemaError::OwnershipCycle(cycle));
        }
        Ok(Self { edges })
    }

    pub fn standard(schema: &SchemaRegistry) -> Result<Self, SchemaError> {
        Self::new(schema, standard_edges())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges declared on `kind`'s own fields.
    pub fn edges_from(&self, kind: EntityKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.source == kind)
    }

    pub fn edges_of(&self, entity: &str) -> Result<Vec<&Edge>, SchemaError> {
        let kind = entity
            .parse::<EntityKind>()
            .map_err(|_| SchemaError::UnknownEntity(entity.to_string()))?;
        Ok(self.edges_from(kind).collect())
    }

    /// Edges pointing at `kind` from other entities.
    pub fn dependents_of(&self, kind: EntityKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.target == kind)
    }

    pub fn edge(&self, source: EntityKind, field: &str) -> Option<&Edge> {
        self.edges_from(source).find(|edge| edge.field == field)
    }
}

fn standard_edges() -> Vec<Edge> {
    use Cardinality::*;
    use EntityKind::*;

    vec![
        Edge::new(Student, "accountId", Account, OneToOne)
            .owned()
            .owner_role(Role::Student),
        Edge::new(Faculty, "accountId", Account, OneToOne)
            .owned()
            .owner_role(Role::Faculty),
        Edge::new(Faculty, "subjects", Subject, ManyToMany),
        Edge::new(Subject, "facultyId", Faculty, OneToMany).nullable(),
        Edge::new(Attendance, "studentId", Student, OneToMany).owned(),
        Edge::new(Attendance, "subjectId", Subject, OneToMany),
        Edge::new(Attendance, "facultyId", Faculty, OneToMany),
        Edge::new(Attendance, "markedBy", Faculty, OneToMany).nullable(),
        Edge::new(FacultyAttendance, "facultyId", Faculty, OneToMany).owned(),
        Edge::new(FacultyAttendance, "markedBy", Account, OneToMany).nullable(),
        Edge::new(Grade, "studentId", Student, OneToMany).owned(),
        Edge::new(Grade, "subjectId", Subject, OneToMany),
        Edge::new(Notification, "targetUsers", Account, ManyToMany).nullable(),
        Edge::new(AiAnalytics, "studentId", Student, OneToMany).owned(),
        Edge::new(ChatbotConversation, "accountId", Account, OneToMany).owned(),
    ]
}

fn check_edge(schema: &SchemaRegistry, edge: &Edge) -> Result<(), SchemaError> {
    let malformed = |reason: &str| SchemaError::MalformedEdge {
        entity: edge.source,
        field: edge.field,
        reason: reason.to_string(),
    };

    let spec = schema
        .entity(edge.source)
        .field(edge.field)
        .ok_or_else(|| malformed("field does not exist"))?;

    match (spec.ty, edge.cardinality) {
        (FieldType::Ref { target }, Cardinality::OneToOne | Cardinality::OneToMany)
        | (FieldType::RefSet { target }, Cardinality::ManyToMany) => {
            if target != edge.target {
                return Err(malformed(&format!(
                    "field references {target}, edge declares {}",
                    edge.target
                )));
            }
        }
        _ => return Err(malformed("field type does not match the edge cardinality")),
    }

    if edge.cardinality == Cardinality::OneToOne && !spec.unique {
        return Err(malformed("one-to-one edge on a non-unique field"));
    }
    // Sets may always be empty; plain references are nullable only when optional.
    if matches!(spec.ty, FieldType::Ref { .. }) && edge.nullable == spec.required {
        return Err(malformed("nullability disagrees with the field's required flag"));
    }
    if edge.owner_role.is_some() && edge.target != EntityKind::Account {
        return Err(malformed("owner role only applies to edges into Account"));
    }
    Ok(())
}

fn find_ownership_cycle(edges: &[Edge]) -> Option<Vec<EntityKind>> {
    let mut owners: BTreeMap<EntityKind, Vec<EntityKind>> = BTreeMap::new();
    for edge in edges.iter().filter(|edge| edge.kind == EdgeKind::Ownership) {
        owners.entry(edge.source).or_default().push(edge.target);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit(
        node: EntityKind,
        owners: &BTreeMap<EntityKind, Vec<EntityKind>>,
        marks: &mut BTreeMap<EntityKind, Mark>,
        path: &mut Vec<EntityKind>,
    ) -> Option<Vec<EntityKind>> {
        match marks.get(&node) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let start = path.iter().position(|seen| *seen == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::InProgress);
        path.push(node);
        for next in owners.get(&node).into_iter().flatten() {
            if let Some(cycle) = visit(*next, owners, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for node in owners.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(*node, &owners, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}
