use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Violation, ViolationKind};
use crate::model::{AiInsights, AnalyticsData, AnalyticsType, EntityKind, Predictions};
use crate::value::{is_grade_letter, Row};

/// Shape and legal ranges of the values an external analytics process writes
/// back into the records. Nothing here computes a score; it only decides
/// whether a submitted one is acceptable.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsContract {
    derived: BTreeMap<EntityKind, &'static [&'static str]>,
}

impl AnalyticsContract {
    pub fn standard() -> Self {
        let mut derived: BTreeMap<EntityKind, &'static [&'static str]> = BTreeMap::new();
        derived.insert(
            EntityKind::Student,
            &[
                "attendanceRisk",
                "academicRisk",
                "placementProbability",
                "behaviorScore",
                "aiInsights",
            ],
        );
        derived.insert(EntityKind::Attendance, &["riskScore", "isPatternAnomaly"]);
        derived.insert(EntityKind::Grade, &["predictedGrade"]);
        derived.insert(
            EntityKind::AiAnalytics,
            &["type", "data", "predictions", "confidence", "validUntil"],
        );
        Self { derived }
    }

    pub fn is_derived(&self, kind: EntityKind, field: &str) -> bool {
        self.derived_fields(kind).iter().any(|name| *name == field)
    }

    pub fn derived_fields(&self, kind: EntityKind) -> &'static [&'static str] {
        self.derived.get(&kind).copied().unwrap_or(&[])
    }

    /// Contract violations in `row`. Fields listed in `skip` already failed an
    /// earlier check and are not looked at again.
    pub fn check(&self, kind: EntityKind, row: &Row, skip: &BTreeSet<String>) -> Vec<Violation> {
        let usable = |field: &str| !skip.contains(field);
        let mut violations = Vec::new();

        match kind {
            EntityKind::AiAnalytics => {
                if usable("predictions") && usable("type") {
                    let declared = row
                        .get("type")
                        .and_then(|value| value.as_str())
                        .and_then(|text| text.parse::<AnalyticsType>().ok());
                    let payload = row.get("predictions").and_then(|value| value.decode::<Predictions>());
                    if let (Some(declared), Some(payload)) = (declared, payload) {
                        if let Err(reason) = check_predictions(declared, &payload) {
                            violations.push(contract("predictions", reason));
                        }
                    }
                }
                if usable("data") {
                    if let Some(data) = row.get("data").and_then(|value| value.decode::<AnalyticsData>()) {
                        if let Err(reason) = check_analytics_data(&data) {
                            violations.push(contract("data", reason));
                        }
                    }
                }
            }
            EntityKind::Student if usable("aiInsights") => {
                if let Some(insights) = row.get("aiInsights").and_then(|value| value.decode::<AiInsights>()) {
                    if let Err(reason) = check_insights(&insights) {
                        violations.push(contract("aiInsights", reason));
                    }
                }
            }
            _ => {}
        }
        violations
    }
}

fn contract(field: &str, reason: String) -> Violation {
    Violation::new(field, ViolationKind::Contract { reason })
}

fn within(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value >= min && value <= max
}

fn check_predictions(declared: AnalyticsType, payload: &Predictions) -> Result<(), String> {
    if payload.kind() != declared {
        return Err(format!(
            "predictions are a {} payload but type is {declared}",
            payload.kind()
        ));
    }
    match payload {
        Predictions::AttendancePrediction { predicted_percentage, .. } => {
            if !within(*predicted_percentage, 0.0, 100.0) {
                return Err(format!("predictedPercentage {predicted_percentage} is outside [0, 100]"));
            }
        }
        Predictions::PlacementAnalysis { probability, .. } => {
            if !within(*probability, 0.0, 100.0) {
                return Err(format!("probability {probability} is outside [0, 100]"));
            }
        }
        Predictions::BehaviorAnalysis { score, .. } => {
            if !within(*score, 0.0, 10.0) {
                return Err(format!("score {score} is outside [0, 10]"));
            }
        }
        Predictions::GradePrediction { forecasts } => {
            for forecast in forecasts {
                if forecast.subject_code.trim().is_empty() {
                    return Err("forecast subjectCode must not be blank".to_string());
                }
                let letters = std::iter::once(&forecast.predicted_grade).chain(&forecast.current_grade);
                if let Some(bad) = letters.into_iter().find(|letter| !is_grade_letter(letter)) {
                    return Err(format!(
                        "'{bad}' for {} is not a grade letter",
                        forecast.subject_code
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_analytics_data(data: &AnalyticsData) -> Result<(), String> {
    if data.source.trim().is_empty() {
        return Err("source must not be blank".to_string());
    }
    if let (Some(start), Some(end)) = (data.window_start, data.window_end) {
        if start > end {
            return Err(format!("window starts {start} after it ends {end}"));
        }
    }
    if let Some((name, _)) = data.signals.iter().find(|(_, value)| !value.is_finite()) {
        return Err(format!("signal '{name}' is not a finite number"));
    }
    Ok(())
}

fn check_insights(insights: &AiInsights) -> Result<(), String> {
    match insights
        .predictions
        .iter()
        .find(|(_, value)| !within(**value, 0.0, 100.0))
    {
        Some((name, value)) => Err(format!("prediction '{name}' = {value} is outside [0, 100]")),
        None => Ok(()),
    }
}
