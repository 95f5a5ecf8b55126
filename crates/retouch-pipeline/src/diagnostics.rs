//! Run diagnostics: one record per generation call.
//!
//! Every run driven by the [`Orchestrator`](crate::orchestrator::Orchestrator)
//! collects a [`RunDiagnostics`] alongside the pipeline state. Durations
//! are measured with `tokio::time::Instant`, so they follow the paused
//! clock in tests.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::FailureKind;
use crate::state::Phase;

/// Serde support for `std::time::Duration` as fractional seconds.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// How a single call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The gateway returned an image.
    Image,
    /// The gateway returned a failure (including an enforced timeout).
    Failure(FailureKind),
}

/// Diagnostics for a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDiagnostics {
    /// The phase the call was made for.
    pub phase: Phase,
    /// 1-based attempt within that phase.
    pub attempt: u32,
    /// Wall-clock duration of the call (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// How the call ended.
    pub outcome: CallOutcome,
}

/// Diagnostics collected across a run and any refinements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Calls in the order they were made.
    pub calls: Vec<CallDiagnostics>,
    /// Total wall-clock time spent inside generation calls (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl RunDiagnostics {
    /// Record one call.
    pub fn record(&mut self, call: CallDiagnostics) {
        self.total_duration += call.duration;
        self.calls.push(call);
    }

    /// Number of calls that ended in a failure.
    #[must_use]
    pub fn failed_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c.outcome, CallOutcome::Failure(_)))
            .count()
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Generation Calls\n{}", "=".repeat(60)));
        lines.push(format!(
            "{} call(s), {} failed, {:.3}s total",
            self.calls.len(),
            self.failed_calls(),
            self.total_duration.as_secs_f64(),
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<28} {:>7} {:>10}  {}",
            "Phase", "Attempt", "Duration", "Outcome"
        ));
        lines.push("-".repeat(60));

        for call in &self.calls {
            let outcome = match call.outcome {
                CallOutcome::Image => "image".to_string(),
                CallOutcome::Failure(kind) => kind.to_string(),
            };
            lines.push(format!(
                "{:<28} {:>7} {:>9.3}s  {outcome}",
                call.phase.to_string(),
                call.attempt,
                call.duration.as_secs_f64(),
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn call(outcome: CallOutcome, millis: u64) -> CallDiagnostics {
        CallDiagnostics {
            phase: Phase::ZoneEdit {
                index: 0,
                attempt: 1,
            },
            attempt: 1,
            duration: Duration::from_millis(millis),
            outcome,
        }
    }

    #[test]
    fn record_accumulates_total() {
        let mut diag = RunDiagnostics::default();
        diag.record(call(CallOutcome::Image, 250));
        diag.record(call(CallOutcome::Failure(FailureKind::Timeout), 750));
        assert_eq!(diag.total_duration, Duration::from_secs(1));
        assert_eq!(diag.failed_calls(), 1);
    }

    #[test]
    fn report_lists_every_call() {
        let mut diag = RunDiagnostics::default();
        diag.record(call(CallOutcome::Image, 10));
        diag.record(call(CallOutcome::Failure(FailureKind::SafetyBlocked), 20));
        let report = diag.report();
        assert!(report.contains("2 call(s), 1 failed"));
        assert!(report.contains("safety_blocked"));
        assert!(report.contains("zone edit 1 (attempt 1)"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let mut diag = RunDiagnostics::default();
        diag.record(call(CallOutcome::Image, 1500));
        let json = serde_json::to_value(&diag).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(json["calls"][0]["outcome"], "image");
        let back: RunDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back, diag);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"calls":[],"total_duration":-1.0}"#;
        assert!(serde_json::from_str::<RunDiagnostics>(json).is_err());
    }
}
