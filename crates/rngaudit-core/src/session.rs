//! Validation sessions.
//!
//! A run starts an [`OpenSession`], which only ever grows by appending
//! outcomes. Finalising it with the aggregate produces a frozen
//! [`ValidationSession`]: read-only accessors, serialisable to JSON.
//! Re-testing a generator means starting a new session.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::aggregate::{Aggregate, SecondOrderCheck, TestAssessment, Verdict};
use crate::battery::BatteryDefinition;
use crate::entropy::EntropyReport;
use crate::executor::Termination;
use crate::outcome::TestOutcome;
use crate::source::{BitBuffer, BitSource, SourceKind};

// ---------------------------------------------------------------------------
// Open session
// ---------------------------------------------------------------------------

/// A session still collecting outcomes.
#[derive(Debug)]
pub struct OpenSession {
    id: String,
    source_id: String,
    source_kind: SourceKind,
    reproducible: bool,
    battery_name: String,
    significance_level: f64,
    sample_bits: usize,
    sample_sha256: String,
    created_at: SystemTime,
    started_at: Option<SystemTime>,
    outcomes: Vec<TestOutcome>,
}

impl OpenSession {
    pub fn new(source: &dyn BitSource, battery: &BatteryDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source.id().to_string(),
            source_kind: source.kind(),
            reproducible: source.reproducible(),
            battery_name: battery.name.clone(),
            significance_level: battery.significance_level,
            sample_bits: 0,
            sample_sha256: String::new(),
            created_at: SystemTime::now(),
            started_at: None,
            outcomes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record the analysed sample's length and digest.
    pub fn record_sample(&mut self, sample: &BitBuffer) {
        self.sample_bits = sample.len();
        self.sample_sha256 = hex_encode(&Sha256::digest(sample.as_bytes()));
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(SystemTime::now());
    }

    pub fn append(&mut self, outcome: TestOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    /// Freeze the session.
    pub fn finalize(
        self,
        aggregate: Aggregate,
        entropy: Option<EntropyReport>,
        termination: Termination,
    ) -> ValidationSession {
        let finished = SystemTime::now();
        let started = self.started_at.unwrap_or(self.created_at);
        let duration_ms = finished
            .duration_since(started)
            .unwrap_or_default()
            .as_millis() as u64;
        ValidationSession {
            id: self.id,
            source_id: self.source_id,
            source_kind: self.source_kind,
            reproducible: self.reproducible,
            battery_name: self.battery_name,
            significance_level: self.significance_level,
            sample_bits: self.sample_bits,
            sample_sha256: self.sample_sha256,
            per_test: self.outcomes,
            assessments: aggregate.assessments,
            second_order: aggregate.second_order,
            entropy_report: entropy,
            verdict: aggregate.verdict,
            rationale: aggregate.rationale,
            termination,
            timestamps: Timestamps {
                created_at: iso8601(self.created_at),
                started_at: iso8601(started),
                finished_at: iso8601(finished),
                duration_ms,
            },
            rngaudit_version: crate::VERSION.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frozen session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

/// Immutable record of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSession {
    id: String,
    source_id: String,
    source_kind: SourceKind,
    reproducible: bool,
    battery_name: String,
    significance_level: f64,
    sample_bits: usize,
    sample_sha256: String,
    per_test: Vec<TestOutcome>,
    assessments: Vec<TestAssessment>,
    second_order: Vec<SecondOrderCheck>,
    entropy_report: Option<EntropyReport>,
    verdict: Verdict,
    rationale: Vec<String>,
    termination: Termination,
    timestamps: Timestamps,
    rngaudit_version: String,
}

impl ValidationSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn reproducible(&self) -> bool {
        self.reproducible
    }

    pub fn battery_name(&self) -> &str {
        &self.battery_name
    }

    pub fn significance_level(&self) -> f64 {
        self.significance_level
    }

    pub fn sample_bits(&self) -> usize {
        self.sample_bits
    }

    /// Hex SHA-256 of the packed sample, for re-verification.
    pub fn sample_sha256(&self) -> &str {
        &self.sample_sha256
    }

    /// Outcomes ordered by battery entry, then sequence.
    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.per_test
    }

    pub fn outcomes_for<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a TestOutcome> {
        self.per_test.iter().filter(move |o| o.entry == label)
    }

    pub fn assessments(&self) -> &[TestAssessment] {
        &self.assessments
    }

    pub fn second_order(&self) -> &[SecondOrderCheck] {
        &self.second_order
    }

    pub fn entropy_report(&self) -> Option<&EntropyReport> {
        self.entropy_report.as_ref()
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn rationale(&self) -> &[String] {
        &self.rationale
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn iso8601(t: SystemTime) -> String {
    format_iso8601(t.duration_since(UNIX_EPOCH).unwrap_or_default())
}

/// Format a duration-since-epoch as a full ISO-8601 timestamp.
/// Example: `2026-02-15T01:30:00Z`
fn format_iso8601(since_epoch: Duration) -> String {
    let (year, month, day, hour, min, sec) = secs_to_utc(since_epoch.as_secs());
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}Z")
}

/// Seconds since the Unix epoch to (year, month, day, hour, minute, second) UTC.
/// No leap seconds.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let sec = secs % 60;
    let min = (secs / 60) % 60;
    let hour = (secs / 3600) % 24;

    let mut days = secs / 86400;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let months_days: [u64; 12] = if is_leap(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };
    let mut month = 1u64;
    for &md in &months_days {
        if days < md {
            break;
        }
        days -= md;
        month += 1;
    }
    (year, month, days + 1, hour, min, sec)
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryEntry;
    use crate::outcome::TestStatus;
    use crate::source::BufferSource;

    fn open() -> OpenSession {
        let source = BufferSource::new("mem", vec![0xAB; 16]);
        let battery = BatteryDefinition::new("b", 128).entry(BatteryEntry::new("monobit"));
        OpenSession::new(&source, &battery)
    }

    fn aggregate(verdict: Verdict) -> Aggregate {
        Aggregate {
            assessments: Vec::new(),
            second_order: Vec::new(),
            verdict,
            rationale: vec!["because".to_string()],
        }
    }

    // -----------------------------------------------------------------------
    // ISO-8601 formatting tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_format_iso8601_epoch() {
        assert_eq!(format_iso8601(Duration::from_secs(0)), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_format_iso8601_known_date() {
        // 2026-02-15 01:30:00 UTC
        assert_eq!(
            format_iso8601(Duration::from_secs(1_771_119_000)),
            "2026-02-15T01:30:00Z"
        );
    }

    #[test]
    fn test_format_iso8601_leap_day() {
        // 2024-02-29 12:00:00 UTC
        assert_eq!(
            format_iso8601(Duration::from_secs(1_709_208_000)),
            "2024-02-29T12:00:00Z"
        );
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[]), "");
        assert_eq!(hex_encode(&[0xab, 0xcd, 0x01]), "abcd01");
    }

    // -----------------------------------------------------------------------
    // Session lifecycle tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_sample_digest() {
        let mut session = open();
        session.record_sample(&BitBuffer::from_bytes(b"abc".to_vec()));
        let frozen = session.finalize(aggregate(Verdict::Compliant), None, Termination::Completed);
        assert_eq!(frozen.sample_bits(), 24);
        assert_eq!(
            frozen.sample_sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_finalize_carries_everything() {
        let mut session = open();
        let id = session.id().to_string();
        session.mark_started();
        session.append(TestOutcome::without_result("monobit", "monobit", 0, TestStatus::Error, "x"));
        assert_eq!(session.outcomes().len(), 1);

        let frozen = session.finalize(aggregate(Verdict::Inconclusive), None, Termination::TimedOut);
        assert_eq!(frozen.id(), id);
        assert_eq!(frozen.source_id(), "mem");
        assert_eq!(frozen.source_kind(), SourceKind::Buffer);
        assert!(frozen.reproducible());
        assert_eq!(frozen.battery_name(), "b");
        assert_eq!(frozen.verdict(), Verdict::Inconclusive);
        assert_eq!(frozen.termination(), Termination::TimedOut);
        assert_eq!(frozen.outcomes_for("monobit").count(), 1);
        assert!(frozen.timestamps().finished_at.ends_with('Z'));
    }

    #[test]
    fn test_json_shape() {
        let frozen = open().finalize(aggregate(Verdict::NonCompliant), None, Termination::Completed);
        let json = frozen.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for key in [
            "id",
            "source_id",
            "source_kind",
            "reproducible",
            "battery_name",
            "significance_level",
            "sample_bits",
            "sample_sha256",
            "per_test",
            "assessments",
            "second_order",
            "entropy_report",
            "verdict",
            "rationale",
            "termination",
            "timestamps",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["verdict"], "non_compliant");
        assert_eq!(ValidationSession::from_json(&json).unwrap(), frozen);
    }

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(open().id(), open().id());
    }
}
