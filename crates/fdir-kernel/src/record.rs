//! Outcome records
//!
//! One record per completed recovery-action invocation. Records are
//! immutable once appended; review produces a new record.

use crate::phase::Phase;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confidence assigned when a recovery action reports success
pub const SUCCESS_CONFIDENCE: f64 = 1.0;
/// Confidence assigned when a recovery action reports failure
pub const FAILURE_CONFIDENCE: f64 = 0.5;

/// Verdict on a recovery action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLabel {
    /// The action fixed the anomaly
    Correct,
    /// The action was the wrong response
    Wrong,
    /// The action helped but did not resolve the anomaly
    Insufficient,
}

impl FeedbackLabel {
    /// Every label a reviewer may assign
    pub const ALL: [FeedbackLabel; 3] = [
        FeedbackLabel::Correct,
        FeedbackLabel::Wrong,
        FeedbackLabel::Insufficient,
    ];

    /// Machine verdict for an action outcome
    #[inline]
    #[must_use]
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Correct
        } else {
            Self::Wrong
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Wrong => "wrong",
            Self::Insufficient => "insufficient",
        }
    }
}

impl fmt::Display for FeedbackLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized label text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label: {0:?}")]
pub struct UnknownLabel(pub String);

impl FromStr for FeedbackLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// Heuristic confidence for an action outcome; not a probability
#[inline]
#[must_use]
pub fn confidence_for(success: bool) -> f64 {
    if success {
        SUCCESS_CONFIDENCE
    } else {
        FAILURE_CONFIDENCE
    }
}

/// One completed invocation of a recovery action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Anomaly being addressed
    pub fault_id: String,
    /// Anomaly class
    pub anomaly_type: String,
    /// Name of the action invoked
    pub recovery_action: String,
    /// Phase at invocation time
    pub mission_phase: Phase,
    /// Machine verdict, revisable by review
    pub label: FeedbackLabel,
    /// Machine-assigned confidence
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
    /// Creation instant. Timestamps without an offset are read as UTC.
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Reviewer notes
    #[serde(default)]
    pub operator_notes: Option<String>,
}

fn default_confidence() -> f64 {
    SUCCESS_CONFIDENCE
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// RFC 3339, or an ISO 8601 local time such as `2026-01-04T14:00:00` taken as UTC
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| Utc.from_utc_datetime(&naive))
        })
}

impl OutcomeRecord {
    /// Machine-generated record for an action outcome, stamped now
    #[must_use]
    pub fn new(
        fault_id: impl Into<String>,
        anomaly_type: impl Into<String>,
        recovery_action: impl Into<String>,
        mission_phase: Phase,
        success: bool,
    ) -> Self {
        Self {
            fault_id: fault_id.into(),
            anomaly_type: anomaly_type.into(),
            recovery_action: recovery_action.into(),
            mission_phase,
            label: FeedbackLabel::from_success(success),
            confidence_score: confidence_for(success),
            timestamp: Utc::now(),
            operator_notes: None,
        }
    }

    /// Copy of this record carrying a reviewer's verdict
    #[must_use]
    pub fn reviewed(&self, label: FeedbackLabel, operator_notes: Option<String>) -> Self {
        Self {
            label,
            operator_notes,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_correct_with_full_confidence() {
        let r = OutcomeRecord::new("f1", "power", "cycle_power", Phase::NominalOps, true);
        assert_eq!(r.label, FeedbackLabel::Correct);
        assert!((r.confidence_score - 1.0).abs() < f64::EPSILON);
        assert!(r.operator_notes.is_none());
    }

    #[test]
    fn failure_is_wrong_with_half_confidence() {
        let r = OutcomeRecord::new("f1", "power", "cycle_power", Phase::NominalOps, false);
        assert_eq!(r.label, FeedbackLabel::Wrong);
        assert!((r.confidence_score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn serializes_flat_with_wire_names() {
        let r = OutcomeRecord::new("f1", "thermal", "vent", Phase::PayloadOps, true);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["mission_phase"], "PAYLOAD_OPS");
        assert_eq!(v["label"], "correct");
        assert_eq!(v["confidence_score"], 1.0);
        assert!(v["operator_notes"].is_null());
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn minimal_object_fills_defaults() {
        let r: OutcomeRecord = serde_json::from_str(
            r#"{"fault_id":"test1","anomaly_type":"power","recovery_action":"cycle_power",
                "mission_phase":"NOMINAL_OPS","label":"correct"}"#,
        )
        .unwrap();
        assert_eq!(r.fault_id, "test1");
        assert!(r.operator_notes.is_none());
    }

    #[test]
    fn naive_timestamps_read_as_utc() {
        let records: Vec<OutcomeRecord> = serde_json::from_str(
            r#"[{"fault_id":"test1","anomaly_type":"power","recovery_action":"cycle",
                "mission_phase":"NOMINAL_OPS","label":"correct",
                "timestamp":"2026-01-04T14:00:00","confidence_score":1.0,
                "operator_notes":"Good"}]"#,
        )
        .unwrap();
        assert_eq!(records[0].timestamp, Utc.with_ymd_and_hms(2026, 1, 4, 14, 0, 0).unwrap());
        assert_eq!(records[0].operator_notes.as_deref(), Some("Good"));

        let fractional: OutcomeRecord = serde_json::from_str(
            r#"{"fault_id":"f","anomaly_type":"a","recovery_action":"r","mission_phase":"SAFE_MODE",
                "label":"wrong","timestamp":"2026-01-04T14:00:00.250000"}"#,
        )
        .unwrap();
        assert_eq!(fractional.timestamp.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn written_timestamps_read_back_exactly() {
        let r = OutcomeRecord::new("f1", "power", "cycle", Phase::NominalOps, true);
        let back: OutcomeRecord = serde_json::from_str(&serde_json::to_string(&r).unwrap()).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let err = serde_json::from_str::<OutcomeRecord>(
            r#"{"fault_id":"f","anomaly_type":"a","recovery_action":"r","mission_phase":"SAFE_MODE",
                "label":"wrong","timestamp":"yesterday"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn reviewed_leaves_original_untouched() {
        let r = OutcomeRecord::new("f1", "power", "cycle", Phase::NominalOps, true);
        let reviewed = r.reviewed(FeedbackLabel::Insufficient, Some("slow".to_string()));
        assert_eq!(r.label, FeedbackLabel::Correct);
        assert_eq!(reviewed.label, FeedbackLabel::Insufficient);
        assert_eq!(reviewed.timestamp, r.timestamp);
    }

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("CORRECT".parse::<FeedbackLabel>().unwrap(), FeedbackLabel::Correct);
        assert_eq!(" insufficient ".parse::<FeedbackLabel>().unwrap(), FeedbackLabel::Insufficient);
        assert!("invalid".parse::<FeedbackLabel>().is_err());
    }
}
