//! Operator review of pending outcome records
//!
//! Walks the pending log record by record, asks for a verdict and optional
//! notes, then moves the reviewed records to the processed log. Records
//! appended to the pending log during the session are left for the next one.
//! Input and output are injectable so the flow can be driven without a
//! terminal.

use crate::error::{LogError, ReviewError};
use crate::event_log::EventLog;
use crate::record::{FeedbackLabel, OutcomeRecord};
use std::io::{self, BufRead, Write};

/// How a review session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Pending log was empty
    NothingPending,
    /// Every pending record was reviewed and moved to the processed log
    Completed {
        /// Records moved
        reviewed: usize,
    },
    /// Operator quit (or input ended); both logs are untouched
    Quit,
}

/// Answer to the label prompt
enum Verdict {
    Label(FeedbackLabel),
    Quit,
}

/// Interactive review over a pending and a processed log
pub struct ReviewSession<R, W> {
    pending: EventLog,
    processed: EventLog,
    input: R,
    output: W,
}

impl ReviewSession<io::StdinLock<'static>, io::Stdout> {
    /// Review on the process terminal
    #[must_use]
    pub fn new(pending: EventLog, processed: EventLog) -> Self {
        Self::with_io(pending, processed, io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ReviewSession<R, W> {
    /// Review reading answers from `input` and writing prompts to `output`
    pub fn with_io(pending: EventLog, processed: EventLog, input: R, output: W) -> Self {
        Self {
            pending,
            processed,
            input,
            output,
        }
    }

    /// Give back the output sink
    pub fn into_output(self) -> W {
        self.output
    }

    /// Pending records. A corrupt pending log is deleted and reads as empty.
    ///
    /// # Errors
    /// [`ReviewError::Log`] if the log cannot be read or deleted.
    pub fn load_pending(&mut self) -> Result<Vec<OutcomeRecord>, ReviewError> {
        match self.pending.read_strict() {
            Ok(records) => Ok(records),
            Err(LogError::Corrupt { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "clearing corrupt pending log");
                self.pending.remove()?;
                writeln!(
                    self.output,
                    "⚠️  Corrupt pending log {} ({source}), cleared",
                    path.display()
                )?;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the review.
    ///
    /// # Errors
    /// [`ReviewError::Prompt`] on terminal I/O failure, [`ReviewError::Log`]
    /// if either log cannot be read or written.
    pub fn run(&mut self) -> Result<ReviewOutcome, ReviewError> {
        let pending = self.load_pending()?;
        if pending.is_empty() {
            writeln!(self.output, "✅ No pending feedback events")?;
            return Ok(ReviewOutcome::NothingPending);
        }

        let total = pending.len();
        writeln!(self.output, "📋 {total} pending feedback events")?;

        let mut reviewed = Vec::with_capacity(total);
        for (i, record) in pending.iter().enumerate() {
            self.show(i + 1, total, record)?;
            let label = match self.ask_label()? {
                Verdict::Label(label) => label,
                Verdict::Quit => {
                    writeln!(self.output, "👋 Review aborted, nothing saved")?;
                    tracing::info!(reviewed = i, total, "review quit by operator");
                    return Ok(ReviewOutcome::Quit);
                }
            };
            let notes = self
                .ask("Notes (optional): ")?
                .filter(|n| !n.is_empty());
            reviewed.push(record.reviewed(label, notes));
        }

        let count = reviewed.len();
        self.processed.append_all(reviewed)?;
        // records appended while the operator was answering stay pending
        let cleared = self.pending.remove_records(&pending)?;
        tracing::info!(
            reviewed = count,
            cleared,
            processed = %self.processed.path().display(),
            "review complete"
        );
        writeln!(
            self.output,
            "🎉 {count} events reviewed and saved to {}",
            self.processed.path().display()
        )?;
        Ok(ReviewOutcome::Completed { reviewed: count })
    }

    fn show(&mut self, n: usize, total: usize, record: &OutcomeRecord) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "[{n}/{total}] {}", record.fault_id)?;
        writeln!(self.output, "  Anomaly:    {}", record.anomaly_type)?;
        writeln!(self.output, "  Action:     {}", record.recovery_action)?;
        writeln!(self.output, "  Phase:      {}", record.mission_phase)?;
        writeln!(
            self.output,
            "  Label:      {} (confidence {:.2})",
            record.label, record.confidence_score
        )
    }

    fn ask_label(&mut self) -> io::Result<Verdict> {
        loop {
            let Some(answer) = self.ask("Label [correct/wrong/insufficient, q to quit]: ")? else {
                return Ok(Verdict::Quit);
            };
            if answer.eq_ignore_ascii_case("q") {
                return Ok(Verdict::Quit);
            }
            match answer.parse::<FeedbackLabel>() {
                Ok(label) => return Ok(Verdict::Label(label)),
                Err(_) => writeln!(self.output, "❌ Invalid label: {answer:?}")?,
            }
        }
    }

    /// `None` at end of input
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}
