// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// djvuwerk encode: external tool runner, encoder command lines, stage
// planning and the pipeline orchestrator that ties them to the document
// state in `djvuwerk-document`.

pub mod bundle;
pub mod commands;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod runner;

pub use bundle::Bundler;
pub use orchestrator::{BatchOutcome, LayerExporter, PrecomputedLayers, ProcessOutcome, Publisher};
pub use plan::{StagePlan, plan};
pub use progress::{ProgressEvent, ProgressReporter, StageState, TracingProgress};
pub use runner::{ToolInvocation, parse_progress_marker, run, run_with_progress};
