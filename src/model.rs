use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a stored row. Ids are allocated from one counter shared by
/// every entity, so an id alone tells which table it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub enumeration: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid {}", self.value, self.enumeration)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a closed enumeration whose wire spelling is fixed by the record
/// contract, with the list of legal spellings exposed as `VARIANTS`.
macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub const VARIANTS: &'static [&'static str] = &[$($text),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        enumeration: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_enum!(
    /// Every table the records core knows about.
    EntityKind {
        Account => "Account",
        Student => "Student",
        Faculty => "Faculty",
        Subject => "Subject",
        Attendance => "Attendance",
        FacultyAttendance => "FacultyAttendance",
        Grade => "Grade",
        Notification => "Notification",
        AiAnalytics => "AIAnalytics",
        ChatbotConversation => "ChatbotConversation",
    }
);

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Account,
        EntityKind::Student,
        EntityKind::Faculty,
        EntityKind::Subject,
        EntityKind::Attendance,
        EntityKind::FacultyAttendance,
        EntityKind::Grade,
        EntityKind::Notification,
        EntityKind::AiAnalytics,
        EntityKind::ChatbotConversation,
    ];
}

closed_enum!(Role { Admin => "admin", Faculty => "faculty", Student => "student" });

closed_enum!(RiskLevel { Low => "low", Medium => "medium", High => "high" });

closed_enum!(AttendanceStatus { Present => "present", Absent => "absent", Late => "late" });

closed_enum!(FacultyAttendanceStatus {
    Present => "present",
    Absent => "absent",
    Leave => "leave",
    HalfDay => "half_day",
});

closed_enum!(LeaveType {
    Sick => "sick",
    Casual => "casual",
    Earned => "earned",
    Maternity => "maternity",
    Other => "other",
});

closed_enum!(ExamType {
    Assignment => "assignment",
    Quiz => "quiz",
    Midterm => "midterm",
    Final => "final",
    Project => "project",
});

closed_enum!(NotificationType {
    Info => "info",
    Warning => "warning",
    Success => "success",
    Error => "error",
    AiAlert => "ai_alert",
});

closed_enum!(Priority { Low => "low", Medium => "medium", High => "high", Urgent => "urgent" });

closed_enum!(TargetRole { All => "all", Admin => "admin", Faculty => "faculty", Student => "student" });

closed_enum!(AnalyticsType {
    AttendancePrediction => "attendance_prediction",
    GradePrediction => "grade_prediction",
    PlacementAnalysis => "placement_analysis",
    BehaviorAnalysis => "behavior_analysis",
});

closed_enum!(AnalyticsStatus { Active => "active", Archived => "archived" });

closed_enum!(NotificationLevel { Low => "low", Medium => "medium", High => "high" });

closed_enum!(AnalyticsVisibility { Basic => "basic", Detailed => "detailed" });

closed_enum!(Sender { User => "user", Assistant => "assistant" });

// Structured sub-documents. Each replaces a free-form JSON column and is
// parsed strictly (unknown keys rejected) before a row is accepted.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AiPreferences {
    pub enable_predictions: bool,
    pub notification_level: NotificationLevel,
    pub analytics_visibility: AnalyticsVisibility,
}

impl Default for AiPreferences {
    fn default() -> Self {
        Self {
            enable_predictions: true,
            notification_level: NotificationLevel::Medium,
            analytics_visibility: AnalyticsVisibility::Detailed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AiInsights {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    /// Named probabilities, each a percentage.
    #[serde(default)]
    pub predictions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationData(pub BTreeMap<String, String>);

/// Input window and signals an analytics run was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalyticsData {
    pub source: String,
    #[serde(default)]
    pub window_start: Option<NaiveDate>,
    #[serde(default)]
    pub window_end: Option<NaiveDate>,
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubjectForecast {
    pub subject_code: String,
    #[serde(default)]
    pub current_grade: Option<String>,
    pub predicted_grade: String,
}

/// Prediction payload of an AIAnalytics row, tagged with the analysis kind
/// so a payload can never be filed under the wrong `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Predictions {
    #[serde(rename_all = "camelCase")]
    AttendancePrediction { predicted_percentage: f64, at_risk: bool },
    #[serde(rename_all = "camelCase")]
    GradePrediction { forecasts: Vec<SubjectForecast> },
    #[serde(rename_all = "camelCase")]
    PlacementAnalysis {
        probability: f64,
        #[serde(default)]
        recommended_roles: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    BehaviorAnalysis {
        score: f64,
        #[serde(default)]
        observations: Vec<String>,
    },
}

impl Predictions {
    pub fn kind(&self) -> AnalyticsType {
        match self {
            Predictions::AttendancePrediction { .. } => AnalyticsType::AttendancePrediction,
            Predictions::GradePrediction { .. } => AnalyticsType::GradePrediction,
            Predictions::PlacementAnalysis { .. } => AnalyticsType::PlacementAnalysis,
            Predictions::BehaviorAnalysis { .. } => AnalyticsType::BehaviorAnalysis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatMessage {
    pub sender: Sender,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConversationContext {
    #[serde(default)]
    pub portal: Option<Role>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub last_intent: Option<String>,
}

/// Typed view of a stored row. Rows are decoded into these after they pass
/// validation, so decoding only fails on a kind mismatch.
pub trait Entity: serde::de::DeserializeOwned {
    const KIND: EntityKind;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: RowId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub ai_preferences: AiPreferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: RowId,
    pub account_id: RowId,
    pub roll_number: String,
    pub department: String,
    pub semester: u32,
    pub section: String,
    pub batch: String,
    pub admission_date: NaiveDate,
    pub guardian_name: Option<String>,
    pub guardian_contact: Option<String>,
    pub address: Option<String>,
    pub cgpa: f64,
    pub attendance_risk: RiskLevel,
    pub academic_risk: RiskLevel,
    pub placement_probability: f64,
    pub behavior_score: f64,
    pub ai_insights: AiInsights,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Faculty {
    pub id: RowId,
    pub account_id: RowId,
    pub employee_id: String,
    pub department: String,
    pub designation: String,
    pub specialization: Option<String>,
    pub joining_date: NaiveDate,
    pub contact: Option<String>,
    pub assigned_sections: Vec<String>,
    pub subjects: BTreeSet<RowId>,
    pub total_working_days: u32,
    pub present_days: u32,
    pub attendance_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: RowId,
    pub name: String,
    pub code: String,
    pub department: String,
    pub semester: u32,
    pub credits: u32,
    pub faculty_id: Option<RowId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id: RowId,
    pub student_id: RowId,
    pub subject_id: RowId,
    pub faculty_id: RowId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: Option<RowId>,
    pub is_pattern_anomaly: bool,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyAttendance {
    pub id: RowId,
    pub faculty_id: RowId,
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveTime>,
    pub check_out_time: Option<NaiveTime>,
    pub status: FacultyAttendanceStatus,
    pub marked_by: Option<RowId>,
    pub leave_type: Option<LeaveType>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: RowId,
    pub student_id: RowId,
    pub subject_id: RowId,
    pub exam_type: ExamType,
    pub marks: f64,
    pub max_marks: f64,
    pub semester: u32,
    pub grade: Option<String>,
    pub predicted_grade: Option<String>,
    pub improvement_suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grade {
    pub fn percentage(&self) -> f64 {
        self.marks / self.max_marks * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: RowId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub priority: Priority,
    pub target_role: TargetRole,
    pub target_users: BTreeSet<RowId>,
    pub is_read: bool,
    #[serde(rename = "isAIGenerated")]
    pub is_ai_generated: bool,
    pub data: NotificationData,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Whether this notification should be shown to `account`. Expired
    /// notifications are addressed to nobody.
    pub fn is_addressed_to(&self, account: &Account) -> bool {
        if self.expired {
            return false;
        }
        let role_matches = match self.target_role {
            TargetRole::All => true,
            TargetRole::Admin => account.role == Role::Admin,
            TargetRole::Faculty => account.role == Role::Faculty,
            TargetRole::Student => account.role == Role::Student,
        };
        role_matches && (self.target_users.is_empty() || self.target_users.contains(&account.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalytics {
    pub id: RowId,
    #[serde(rename = "type")]
    pub kind: AnalyticsType,
    pub student_id: RowId,
    pub data: AnalyticsData,
    pub predictions: Predictions,
    pub confidence: f64,
    pub status: AnalyticsStatus,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotConversation {
    pub id: RowId,
    pub account_id: RowId,
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub context: ConversationContext,
    pub is_active: bool,
    pub satisfaction: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

macro_rules! entity_kind {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$kind;
        })+
    };
}

entity_kind!(
    Account => Account,
    Student => Student,
    Faculty => Faculty,
    Subject => Subject,
    Attendance => Attendance,
    FacultyAttendance => FacultyAttendance,
    Grade => Grade,
    Notification => Notification,
    AiAnalytics => AiAnalytics,
    ChatbotConversation => ChatbotConversation,
);
