// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Publishing configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::DictionaryParams;

/// File name of the persisted configuration, next to the project database.
pub const CONFIG_FILE: &str = "config.json";

/// Locations of the external DjVu encoder binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Wavelet encoder for background layers.
    pub c44: PathBuf,
    /// Shared-dictionary JB2 encoder.
    pub minidjvu: PathBuf,
    /// Chunk assembler.
    pub djvumake: PathBuf,
    /// Metadata / rotation editor.
    pub djvused: PathBuf,
    /// Multi-page bundler.
    pub djvm: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            c44: "c44".into(),
            minidjvu: "minidjvu-mod".into(),
            djvumake: "djvumake".into(),
            djvused: "djvused".into(),
            djvm: "djvm".into(),
        }
    }
}

/// Persistent publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub tools: ToolPaths,
    /// Capacity of newly created shared dictionaries. Values below 2
    /// disable sharing: every page goes to the sentinel dictionary.
    pub pages_per_dictionary: usize,
    /// Subfolder of the output directory receiving per-page DjVu files.
    pub pages_subfolder: String,
    /// Subfolder of `pages_subfolder` receiving exported layer images.
    pub layers_subfolder: String,
    /// Upper bound on concurrently running per-page encoder processes.
    pub max_parallel_tools: usize,
    /// Encoder tuning given to newly created dictionaries.
    pub dictionary_defaults: DictionaryParams,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            pages_per_dictionary: 25,
            pages_subfolder: "djvu".into(),
            layers_subfolder: "layers".into(),
            max_parallel_tools: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            dictionary_defaults: DictionaryParams::default(),
        }
    }
}

impl PublishConfig {
    /// Whether new pages may share a dictionary at all.
    pub fn sharing_enabled(&self) -> bool {
        self.pages_per_dictionary >= 2
    }

    /// Load `config.json` from `dir`, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    /// Persist as pretty-printed JSON into `dir/config.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PublishConfig::load_or_default(dir.path());
        assert_eq!(config.pages_per_dictionary, 25);
        assert!(config.sharing_enabled());
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PublishConfig {
            pages_per_dictionary: 1,
            ..PublishConfig::default()
        };
        config.save(dir.path()).expect("save");

        let loaded = PublishConfig::load_or_default(dir.path());
        assert_eq!(loaded.pages_per_dictionary, 1);
        assert!(!loaded.sharing_enabled());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"pages_subfolder":"out"}"#).expect("write");
        let loaded = PublishConfig::load_or_default(dir.path());
        assert_eq!(loaded.pages_subfolder, "out");
        assert_eq!(loaded.layers_subfolder, "layers");
    }
}
