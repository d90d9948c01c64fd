//! Stage progress events.
//!
//! # Invariants
//! - Each started stage emits exactly one `running` start event.
//! - `current` never decreases within a stage.
//! - Each started stage emits exactly one terminal event (`done` or
//!   `error`); dropping an unfinished stage emits `error`.

use serde::Serialize;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    #[serde(rename = "tables/enumerate")]
    Tables,
    #[serde(rename = "resources/copy")]
    Resources,
    #[serde(rename = "decode/transcode")]
    Decode,
    #[serde(rename = "write/persist")]
    Write,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Tables, Stage::Resources, Stage::Decode, Stage::Write];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tables => "tables/enumerate",
            Self::Resources => "resources/copy",
            Self::Decode => "decode/transcode",
            Self::Write => "write/persist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Running,
    Done,
    Error,
}

impl StageState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current: u64,
    pub total: u64,
    pub state: StageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Emits progress events to an optional channel.
///
/// A disconnected receiver is ignored; progress never fails the import.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<Sender<ProgressEvent>>,
    every: u64,
}

impl ProgressReporter {
    pub fn new(sender: Option<Sender<ProgressEvent>>, every: u64) -> Self {
        Self {
            sender,
            every: every.max(1),
        }
    }

    /// Starts a stage and emits its `running` start event.
    pub fn start(&self, stage: Stage, total: u64) -> StageProgress<'_> {
        self.emit(ProgressEvent {
            stage,
            current: 0,
            total,
            state: StageState::Running,
            message: None,
        });
        StageProgress {
            reporter: self,
            stage,
            total,
            current: 0,
            finished: false,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// Progress of one running stage.
pub struct StageProgress<'a> {
    reporter: &'a ProgressReporter,
    stage: Stage,
    total: u64,
    current: u64,
    finished: bool,
}

impl StageProgress<'_> {
    /// Counts one processed item; emits every Nth item.
    pub fn advance(&mut self) {
        self.current += 1;
        if self.current % self.reporter.every == 0 && self.current < self.total {
            self.emit(StageState::Running, None);
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Emits the terminal `done` event.
    pub fn done(mut self, message: Option<String>) {
        self.current = self.current.max(self.total);
        self.finished = true;
        self.emit(StageState::Done, message);
    }

    /// Emits the terminal `error` event.
    pub fn fail(mut self, message: String) {
        self.finished = true;
        self.emit(StageState::Error, Some(message));
    }

    fn emit(&self, state: StageState, message: Option<String>) {
        self.reporter.emit(ProgressEvent {
            stage: self.stage,
            current: self.current,
            total: self.total,
            state,
            message,
        });
    }
}

impl Drop for StageProgress<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.emit(StageState::Error, Some("stage ended unexpectedly".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProgressReporter, Stage, StageState};
    use std::sync::mpsc;

    #[test]
    fn emits_start_every_nth_and_one_terminal() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::new(Some(tx), 10);
        let mut stage = reporter.start(Stage::Decode, 25);
        for _ in 0..25 {
            stage.advance();
        }
        stage.done(None);
        drop(reporter);

        let events = rx.iter().collect::<Vec<_>>();
        let currents = events.iter().map(|e| e.current).collect::<Vec<_>>();
        assert_eq!(currents, vec![0, 10, 20, 25]);
        assert_eq!(events[0].state, StageState::Running);
        assert_eq!(
            events.iter().filter(|e| e.state.is_terminal()).count(),
            1
        );
        assert_eq!(events[3].state, StageState::Done);
    }

    #[test]
    fn dropped_stage_reports_error() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::new(Some(tx), 10);
        {
            let mut stage = reporter.start(Stage::Write, 1);
            stage.advance();
        }
        drop(reporter);

        let last = rx.iter().last().unwrap();
        assert_eq!(last.state, StageState::Error);
        assert_eq!(last.current, 1);
    }

    #[test]
    fn disconnected_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let reporter = ProgressReporter::new(Some(tx), 1);
        reporter.start(Stage::Tables, 0).done(None);
    }

    #[test]
    fn stage_names_serialize_with_slashes() {
        assert_eq!(
            serde_json::to_string(&Stage::Resources).unwrap(),
            "\"resources/copy\""
        );
    }
}
