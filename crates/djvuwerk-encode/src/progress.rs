// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-stage progress reporting.

use std::fmt;

use tracing::{debug, info, warn};

use djvuwerk_core::types::{PageId, Stage};

/// State of one stage within a processing run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageState {
    /// Percent done, 0..=100.
    InProgress(f32),
    Completed,
    /// Nothing to do: every artifact of the stage was reused.
    Skipped,
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress(pct) => write!(f, "{pct:.0}%"),
            Self::Completed => f.write_str("completed"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Page the run was requested for.
    pub page: PageId,
    pub stage: Stage,
    pub state: StageState,
}

impl ProgressEvent {
    /// `done` of `total` units finished.
    pub fn fraction(page: &PageId, stage: Stage, done: usize, total: usize) -> Self {
        let pct = if total == 0 {
            100.0
        } else {
            100.0 * done as f32 / total as f32
        };
        Self {
            page: page.clone(),
            stage,
            state: StageState::InProgress(pct),
        }
    }

    pub fn finished(page: &PageId, stage: Stage, state: StageState) -> Self {
        Self {
            page: page.clone(),
            stage,
            state,
        }
    }
}

/// Receiver of progress events. Called from worker tasks; must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Writes progress to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        let ProgressEvent { page, stage, state } = event;
        match state {
            StageState::InProgress(_) => debug!(page = %page, stage = %stage, state = %state, "stage progress"),
            StageState::Completed | StageState::Skipped => {
                info!(page = %page, stage = %stage, state = %state, "stage finished")
            }
            StageState::Failed => warn!(page = %page, stage = %stage, "stage failed"),
        }
    }
}
