//! Session state
//!
//! The single record a flashing session mutates, and the snapshot handed to
//! the presentation layer.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Progress value meaning "indeterminate, hide the bar"
pub const PROGRESS_INDETERMINATE: f64 = -1.0;

/// Session stages, in the only order they are visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Ready,
    Connecting,
    Downloading,
    Unpacking,
    Flashing,
    Erasing,
    Done,
}

impl Step {
    /// Stages that write to the device or depend on an open connection
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Step::Downloading | Step::Unpacking | Step::Flashing | Step::Erasing
        )
    }
}

/// Snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub step: Step,
    pub error: Option<ErrorKind>,
    /// Current sub-stage label, e.g. "Flashing boot"
    pub message: String,
    /// Fraction in [0, 1], or [`PROGRESS_INDETERMINATE`]
    pub progress: f64,
    pub connected: bool,
    pub serial: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            step: Step::Ready,
            error: None,
            message: String::new(),
            progress: PROGRESS_INDETERMINATE,
            connected: false,
            serial: None,
        }
    }
}

impl SessionState {
    /// Move to `step`, clearing the label and hiding progress
    pub fn enter(&mut self, step: Step) {
        self.step = step;
        self.message.clear();
        self.progress = PROGRESS_INDETERMINATE;
    }

    /// Record a failure; progress is hidden from then on
    pub fn fail(&mut self, kind: ErrorKind) {
        self.error = Some(kind);
        self.progress = PROGRESS_INDETERMINATE;
    }

    /// Update progress unless an error has hidden it
    pub fn set_progress(&mut self, progress: f64) {
        if self.error.is_none() {
            self.progress = progress;
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ready_without_error() {
        let state = SessionState::default();
        assert_eq!(state.step, Step::Ready);
        assert_eq!(state.error, None);
        assert_eq!(state.progress, PROGRESS_INDETERMINATE);
        assert!(!state.connected);
    }

    #[test]
    fn test_enter_resets_label_and_progress() {
        let mut state = SessionState::default();
        state.message = "Downloading boot".to_string();
        state.progress = 1.0;
        state.enter(Step::Unpacking);
        assert_eq!(state.step, Step::Unpacking);
        assert!(state.message.is_empty());
        assert_eq!(state.progress, PROGRESS_INDETERMINATE);
    }

    #[test]
    fn test_error_forces_indeterminate_progress() {
        let mut state = SessionState::default();
        state.set_progress(0.5);
        state.fail(ErrorKind::FlashFailed);
        assert_eq!(state.progress, PROGRESS_INDETERMINATE);
        state.set_progress(0.7);
        assert_eq!(state.progress, PROGRESS_INDETERMINATE);
    }

    #[test]
    fn test_steps_are_ordered() {
        assert!(Step::Ready < Step::Connecting);
        assert!(Step::Erasing < Step::Done);
        assert!(Step::Flashing.is_destructive());
        assert!(!Step::Connecting.is_destructive());
        assert!(!Step::Done.is_destructive());
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(SessionState::default()).unwrap();
        assert_eq!(json["step"], "READY");
        assert_eq!(json["error"], serde_json::Value::Null);
    }
}
