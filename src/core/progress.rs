//! Coarse-grained progress reporting
//!
//! The pipeline reports phase transitions through an optional caller-supplied
//! sink. Passing no sink changes nothing about the run.

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parse,
    Analyze,
    Build,
    Persist,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Analyze => "analyze",
            Self::Build => "build",
            Self::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// 0.0 ..= 1.0 within the phase
    pub fraction: f32,
    pub detail: String,
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Logs every event through `tracing`
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, event: ProgressEvent) {
        info!(
            phase = event.phase.as_str(),
            "{:>3.0}% {}",
            event.fraction * 100.0,
            event.detail
        );
    }
}

pub(crate) fn emit(
    sink: Option<&dyn ProgressSink>,
    phase: Phase,
    fraction: f32,
    detail: impl Into<String>,
) {
    if let Some(sink) = sink {
        sink.report(ProgressEvent {
            phase,
            fraction: fraction.clamp(0.0, 1.0),
            detail: detail.into(),
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records events for assertions
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
