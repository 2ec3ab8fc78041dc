use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::error::ViolationKind;
use crate::model::{
    AiInsights, AiPreferences, AnalyticsData, ChatMessage, ConversationContext, EntityKind,
    NotificationData, Predictions, RowId,
};

/// Raw field values as submitted by a caller, before validation.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// A validated row: field name to typed value.
pub type Row = BTreeMap<&'static str, Value>;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

static BCRYPT_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$2[abxy]?\$\d{2}\$[./A-Za-z0-9]{53}$").expect("bcrypt pattern compiles")
});

static GRADE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(O|[A-F][+-]?|P)$").expect("grade pattern compiles"));

pub fn is_grade_letter(text: &str) -> bool {
    GRADE_LETTER.is_match(text)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
    Ref(RowId),
    RefSet(BTreeSet<RowId>),
    TextList(Vec<String>),
    Structured(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Decimal(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_row_id(&self) -> Option<RowId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(at) => Some(*at),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(at) => Some(*at),
            _ => None,
        }
    }

    /// Every row id this value points at.
    pub fn row_ids(&self) -> Vec<RowId> {
        match self {
            Value::Ref(id) => vec![*id],
            Value::RefSet(ids) => ids.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Value::Structured(raw) => serde_json::from_value(raw.clone()).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    Plain,
    Email,
    PasswordHash,
    GradeLetter,
}

/// Sub-documents that replace free-form JSON columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredKind {
    AiPreferences,
    AiInsights,
    NotificationData,
    AnalyticsData,
    Predictions,
    ChatMessages,
    ConversationContext,
}

impl StructuredKind {
    /// Parses `raw` strictly into the sub-document type and returns its
    /// canonical JSON form.
    pub fn canonicalize(self, raw: &serde_json::Value) -> Result<serde_json::Value, String> {
        match self {
            StructuredKind::AiPreferences => canonical::<AiPreferences>(raw),
            StructuredKind::AiInsights => canonical::<AiInsights>(raw),
            StructuredKind::NotificationData => canonical::<NotificationData>(raw),
            StructuredKind::AnalyticsData => canonical::<AnalyticsData>(raw),
            StructuredKind::Predictions => canonical::<Predictions>(raw),
            StructuredKind::ChatMessages => canonical::<Vec<ChatMessage>>(raw),
            StructuredKind::ConversationContext => canonical::<ConversationContext>(raw),
        }
    }
}

fn canonical<T: Serialize + DeserializeOwned>(
    raw: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    let parsed: T = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    serde_json::to_value(parsed).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    Text { format: TextFormat },
    Integer,
    Decimal,
    Bool,
    Date,
    Time,
    Timestamp,
    Enum { variants: &'static [&'static str] },
    Ref { target: EntityKind },
    RefSet { target: EntityKind },
    TextList { distinct: bool },
    Structured { shape: StructuredKind },
}

impl FieldType {
    pub fn reference_target(&self) -> Option<EntityKind> {
        match self {
            FieldType::Ref { target } | FieldType::RefSet { target } => Some(*target),
            _ => None,
        }
    }
}

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, n: f64) -> bool {
        n >= self.min && n <= self.max
    }
}

/// Converts one raw, non-null input value into a typed [`Value`], checking
/// type and format, enumeration membership and bounds, in that order.
pub fn coerce(
    ty: &FieldType,
    bounds: Option<Bounds>,
    raw: &serde_json::Value,
) -> Result<Value, ViolationKind> {
    let value = coerce_type(ty, raw)?;
    if let Some(bounds) = bounds {
        if let Some(n) = value.as_f64() {
            if !bounds.contains(n) {
                return Err(ViolationKind::Range {
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }
    }
    Ok(value)
}

fn coerce_type(ty: &FieldType, raw: &serde_json::Value) -> Result<Value, ViolationKind> {
    match ty {
        FieldType::Text { format } => {
            let text = expect_str(raw, "a string")?.trim();
            if text.is_empty() {
                return Err(format_error("must not be blank"));
            }
            coerce_text(*format, text)
        }
        FieldType::Integer => raw
            .as_i64()
            .map(Value::Integer)
            .ok_or(ViolationKind::Type { expected: "an integer" }),
        FieldType::Decimal => raw
            .as_f64()
            .map(Value::Decimal)
            .ok_or(ViolationKind::Type { expected: "a number" }),
        FieldType::Bool => raw
            .as_bool()
            .map(Value::Bool)
            .ok_or(ViolationKind::Type { expected: "a boolean" }),
        FieldType::Date => {
            let text = expect_str(raw, "a date string (YYYY-MM-DD)")?;
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| format_error("is not a valid YYYY-MM-DD date"))
        }
        FieldType::Time => {
            let text = expect_str(raw, "a time string (HH:MM[:SS])")?;
            NaiveTime::parse_from_str(text, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .map(Value::Time)
                .map_err(|_| format_error("is not a valid HH:MM[:SS] time"))
        }
        FieldType::Timestamp => {
            let text = expect_str(raw, "an RFC 3339 timestamp")?;
            DateTime::parse_from_rfc3339(text)
                .map(|at| Value::Timestamp(at.with_timezone(&Utc)))
                .map_err(|_| format_error("is not a valid RFC 3339 timestamp"))
        }
        FieldType::Enum { variants } => {
            let text = expect_str(raw, "a string")?;
            if variants.iter().any(|variant| *variant == text) {
                Ok(Value::Text(text.to_string()))
            } else {
                Err(ViolationKind::Enumeration { allowed: *variants })
            }
        }
        FieldType::Ref { .. } => row_id(raw).map(Value::Ref),
        FieldType::RefSet { .. } => {
            let items = raw
                .as_array()
                .ok_or(ViolationKind::Type { expected: "a list of row ids" })?;
            items
                .iter()
                .map(row_id)
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Value::RefSet)
        }
        FieldType::TextList { distinct } => {
            let items = raw
                .as_array()
                .ok_or(ViolationKind::Type { expected: "a list of strings" })?;
            let mut out: Vec<String> = Vec::with_capacity(items.len());
            for item in items {
                let text = expect_str(item, "a list of strings")?.trim();
                if text.is_empty() {
                    return Err(format_error("must not contain blank entries"));
                }
                if !*distinct || !out.iter().any(|seen| seen == text) {
                    out.push(text.to_string());
                }
            }
            Ok(Value::TextList(out))
        }
        FieldType::Structured { shape } => shape
            .canonicalize(raw)
            .map(Value::Structured)
            .map_err(|reason| format_error(&format!("is malformed: {reason}"))),
    }
}

fn coerce_text(format: TextFormat, text: &str) -> Result<Value, ViolationKind> {
    match format {
        TextFormat::Plain => Ok(Value::Text(text.to_string())),
        TextFormat::Email => {
            if EMAIL.is_match(text) {
                Ok(Value::Text(text.to_lowercase()))
            } else {
                Err(format_error("is not a valid email address"))
            }
        }
        TextFormat::PasswordHash => {
            if BCRYPT_HASH.is_match(text) {
                Ok(Value::Text(text.to_string()))
            } else {
                Err(format_error("is not a bcrypt hash"))
            }
        }
        TextFormat::GradeLetter => {
            if is_grade_letter(text) {
                Ok(Value::Text(text.to_string()))
            } else {
                Err(format_error("is not a grade letter"))
            }
        }
    }
}

fn expect_str<'a>(raw: &'a serde_json::Value, expected: &'static str) -> Result<&'a str, ViolationKind> {
    raw.as_str().ok_or(ViolationKind::Type { expected })
}

fn row_id(raw: &serde_json::Value) -> Result<RowId, ViolationKind> {
    match raw.as_u64() {
        Some(id) if id > 0 => Ok(RowId(id)),
        _ => Err(ViolationKind::Type { expected: "a positive row id" }),
    }
}

fn format_error(reason: &str) -> ViolationKind {
    ViolationKind::Format {
        reason: reason.to_string(),
    }
}
