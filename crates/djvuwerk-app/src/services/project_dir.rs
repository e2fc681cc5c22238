// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Project directory resolution.

use std::path::{Path, PathBuf};

/// File name of the project database inside a project directory.
pub const DATABASE_FILE: &str = "project.db";

/// Locations derived from the `--project` argument.
#[derive(Debug, Clone)]
pub struct ProjectDir {
    /// Holds the database and `config.json`.
    pub root: PathBuf,
    pub database: PathBuf,
    pub out_dir: PathBuf,
}

impl ProjectDir {
    /// `project` may name the directory or the database file inside it.
    /// Without `out_dir` the output goes to `<root>/out`.
    pub fn resolve(project: &Path, out_dir: Option<&Path>) -> Self {
        let (root, database) = if project.extension().is_some_and(|ext| ext == "db") {
            let root = project
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (root, project.to_path_buf())
        } else {
            (project.to_path_buf(), project.join(DATABASE_FILE))
        };
        let out_dir = out_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join("out"));
        Self {
            root,
            database,
            out_dir,
        }
    }

    /// Create the project directory if needed.
    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}
