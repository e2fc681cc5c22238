// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: opens a project on disk and hands the command handlers a
// ready `Publisher`.

pub mod project_dir;
pub mod workspace;
