use fdir_kernel::review::{ReviewOutcome, ReviewSession};
use fdir_kernel::{EventLog, FeedbackLabel, OutcomeRecord, Phase};
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{self, BufRead, Cursor, Read};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    pending: EventLog,
    processed: EventLog,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            pending: EventLog::open(dir.path().join("feedback_pending.json")),
            processed: EventLog::open(dir.path().join("feedback_processed.json")),
            _dir: dir,
        }
    }

    fn with_pending(records: &[OutcomeRecord]) -> Self {
        let f = Self::new();
        f.pending.replace_all(records).unwrap();
        f
    }

    /// Run a review fed with `answers`, returning the outcome and everything printed
    fn review(&self, answers: &[&str]) -> (ReviewOutcome, String) {
        let input = answers.iter().map(|a| format!("{a}\n")).collect::<String>();
        let mut session = ReviewSession::with_io(
            self.pending.clone(),
            self.processed.clone(),
            Cursor::new(input.into_bytes()),
            Vec::new(),
        );
        let outcome = session.run().unwrap();
        (outcome, String::from_utf8(session.into_output()).unwrap())
    }
}

/// Answers from a script, appending one record to `log` when first read,
/// like a recovery action finishing while the operator is at the prompt
struct AppendOnFirstRead {
    answers: Cursor<Vec<u8>>,
    log: EventLog,
    late: Option<OutcomeRecord>,
}

impl AppendOnFirstRead {
    fn fire(&mut self) {
        if let Some(record) = self.late.take() {
            self.log.append(record).unwrap();
        }
    }
}

impl Read for AppendOnFirstRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fire();
        self.answers.read(buf)
    }
}

impl BufRead for AppendOnFirstRead {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.fire();
        self.answers.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.answers.consume(amt);
    }
}

fn event(fault_id: &str) -> OutcomeRecord {
    OutcomeRecord::new(fault_id, "test", "test", Phase::NominalOps, true)
}

#[test]
fn test_no_pending_events() {
    let f = Fixture::new();
    let (outcome, out) = f.review(&[]);
    assert_eq!(outcome, ReviewOutcome::NothingPending);
    assert!(out.contains("✅ No pending feedback events"));
}

#[test]
fn test_corrupt_pending_is_cleared_with_warning() {
    let f = Fixture::new();
    fs::write(f.pending.path(), "invalid json {").unwrap();

    let (outcome, out) = f.review(&[]);
    assert_eq!(outcome, ReviewOutcome::NothingPending);
    assert!(out.contains("⚠️"));
    assert!(!f.pending.path().exists());
}

#[test]
fn test_single_event_relabelled_without_notes() {
    let f = Fixture::with_pending(&[OutcomeRecord::new("test1", "power", "cycle", Phase::NominalOps, false)]);

    let (outcome, _) = f.review(&["correct", ""]);
    assert_eq!(outcome, ReviewOutcome::Completed { reviewed: 1 });

    let processed = f.processed.read_strict().unwrap();
    assert_eq!(processed[0].label, FeedbackLabel::Correct);
    assert_eq!(processed[0].operator_notes, None);
    assert!(!f.pending.path().exists());
}

#[test]
fn test_operator_notes_are_kept() {
    let f = Fixture::with_pending(&[event("test1")]);
    f.review(&["correct", "Fixed in 2.3 seconds"]);

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(f.processed.path()).unwrap()).unwrap();
    assert_eq!(raw[0]["operator_notes"], "Fixed in 2.3 seconds");
}

#[test]
fn test_invalid_label_reprompts() {
    let f = Fixture::with_pending(&[event("test1")]);
    let (outcome, out) = f.review(&["invalid", "maybe", "correct", ""]);
    assert_eq!(outcome, ReviewOutcome::Completed { reviewed: 1 });
    assert_eq!(out.matches("❌ Invalid").count(), 2);
}

#[test]
fn test_quit_leaves_logs_untouched() {
    let f = Fixture::with_pending(&[event("test1"), event("test2")]);
    f.processed.replace_all(&[event("earlier")]).unwrap();

    let (outcome, _) = f.review(&["wrong", "", "q"]);
    assert_eq!(outcome, ReviewOutcome::Quit);
    assert_eq!(f.pending.read_strict().unwrap().len(), 2);
    let processed = f.processed.read_strict().unwrap();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].fault_id, "earlier");
}

#[test]
fn test_multiple_events_in_sequence() {
    let f = Fixture::with_pending(&[event("test0"), event("test1")]);
    f.review(&["correct", "", "insufficient", ""]);

    let processed = f.processed.read_strict().unwrap();
    assert_eq!(processed.len(), 2);
    assert_eq!(processed[0].label, FeedbackLabel::Correct);
    assert_eq!(processed[1].label, FeedbackLabel::Insufficient);
}

#[test]
fn test_processed_log_accumulates_across_sessions() {
    let f = Fixture::with_pending(&[event("first")]);
    f.review(&["correct", ""]);
    f.pending.append(event("second")).unwrap();
    f.review(&["wrong", "late"]);

    let ids: Vec<_> = f
        .processed
        .read_strict()
        .unwrap()
        .into_iter()
        .map(|r| r.fault_id)
        .collect();
    assert_eq!(ids, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn test_prints_event_details_and_summary() {
    let f = Fixture::with_pending(&[OutcomeRecord::new(
        "power_loss_001",
        "power_subsystem",
        "emergency_power_cycle",
        Phase::NominalOps,
        true,
    )]);

    let (_, out) = f.review(&["correct", ""]);
    for expected in ["power_loss_001", "power_subsystem", "emergency_power_cycle", "NOMINAL_OPS", "🎉"] {
        assert!(out.contains(expected), "missing {expected:?} in:\n{out}");
    }
}

#[test]
fn test_records_appended_during_review_stay_pending() {
    let f = Fixture::with_pending(&[event("f1")]);
    let input = AppendOnFirstRead {
        answers: Cursor::new(b"correct\n\n".to_vec()),
        log: f.pending.clone(),
        late: Some(event("late_fault")),
    };
    let mut session = ReviewSession::with_io(f.pending.clone(), f.processed.clone(), input, Vec::new());

    assert_eq!(session.run().unwrap(), ReviewOutcome::Completed { reviewed: 1 });

    let processed: Vec<_> = f.processed.read_strict().unwrap().into_iter().map(|r| r.fault_id).collect();
    assert_eq!(processed, vec!["f1".to_string()]);
    let pending: Vec<_> = f.pending.read_strict().unwrap().into_iter().map(|r| r.fault_id).collect();
    assert_eq!(pending, vec!["late_fault".to_string()]);
}

#[test]
fn test_original_timestamp_format_is_reviewable() {
    let f = Fixture::new();
    fs::write(
        f.pending.path(),
        r#"[{"fault_id":"test1","anomaly_type":"power","recovery_action":"cycle",
             "mission_phase":"NOMINAL_OPS","label":"correct",
             "timestamp":"2026-01-04T14:00:00","confidence_score":1.0,"operator_notes":null}]"#,
    )
    .unwrap();

    let (outcome, out) = f.review(&["wrong", "rechecked"]);
    assert_eq!(outcome, ReviewOutcome::Completed { reviewed: 1 });
    assert!(!out.contains("⚠️"));
    assert!(!f.pending.path().exists());
    assert_eq!(f.processed.read_strict().unwrap()[0].label, FeedbackLabel::Wrong);
}
