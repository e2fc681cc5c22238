// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the djvuwerk publishing engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Which half of a scanned image a page was split from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubPage {
    Single,
    Left,
    Right,
}

impl SubPage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single" => Some(Self::Single),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Stable identity of a scanned page.
///
/// Ordered by source path first, then by sub-page, so that iteration over
/// page sets is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub path: PathBuf,
    pub sub_page: SubPage,
}

impl PageId {
    pub fn new(path: impl Into<PathBuf>, sub_page: SubPage) -> Self {
        Self {
            path: path.into(),
            sub_page,
        }
    }

    /// A whole (unsplit) page.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self::new(path, SubPage::Single)
    }

    /// File stem used for every artifact produced for this page
    /// (`scan_0001` → `scan_0001.bg44`, `scan_0001.djvu`, ...).
    pub fn base_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".into());
        match self.sub_page {
            SubPage::Single => stem,
            SubPage::Left => format!("{stem}_1L"),
            SubPage::Right => format!("{stem}_2R"),
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.sub_page.as_str())
    }
}

/// Handle of a shared dictionary (djbz).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DictionaryId(String);

impl DictionaryId {
    /// Reserved id for pages that are not encoded with a shared dictionary.
    pub const SENTINEL: &'static str = "[none]";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn sentinel() -> Self {
        Self(Self::SENTINEL.to_owned())
    }

    /// Zero-padded id minted from the registry counter (`1` → `0001`).
    pub fn numbered(counter: u32) -> Self {
        Self(format!("{counter:04}"))
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == Self::SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream classification of a page's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSuggestion {
    /// The page has a bitonal (text) layer.
    pub has_bw_layer: bool,
    /// The page has a colour/greyscale picture layer.
    pub has_color_layer: bool,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl ExportSuggestion {
    /// Both layers present: the page must be split before encoding.
    pub fn is_layered(&self) -> bool {
        self.has_bw_layer && self.has_color_layer
    }

    /// Neither layer present.
    pub fn is_blank(&self) -> bool {
        !self.has_bw_layer && !self.has_color_layer
    }
}

/// Export suggestions for every page of the project.
pub type ExportSuggestions = BTreeMap<PageId, ExportSuggestion>;

/// Pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Split pages into foreground/background layer images.
    Export,
    /// Encode background layers into BG44 chunks (c44).
    EncodeRaster,
    /// Encode bitonal layers into JB2 chunks with a shared dictionary (minidjvu).
    EncodeText,
    /// Assemble per-page DjVu files (djvumake).
    Assemble,
    /// Apply titles and rotation (djvused).
    Postprocess,
    /// Bundle all pages into one document (djvm).
    Bundle,
}

impl Stage {
    /// Per-page pipeline stages run by a reprocess request.
    pub const PIPELINE: [Stage; 5] = [
        Stage::Export,
        Stage::EncodeRaster,
        Stage::EncodeText,
        Stage::Assemble,
        Stage::Postprocess,
    ];

    /// Group stages process every page of a dictionary in one invocation.
    pub fn is_group_stage(&self) -> bool {
        matches!(self, Self::EncodeText | Self::Bundle)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::EncodeRaster => "encode-raster",
            Self::EncodeText => "encode-text",
            Self::Assemble => "assemble",
            Self::Postprocess => "postprocess",
            Self::Bundle => "bundle",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifier tier passed to the shared-dictionary encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierType {
    Legacy = 1,
    Normal = 2,
    Maximal = 3,
}

impl ClassifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Normal => "normal",
            Self::Maximal => "maximal",
        }
    }

    /// Unknown names fall back to `maximal`.
    pub fn parse(value: &str) -> Self {
        match value {
            "legacy" => Self::Legacy,
            "normal" => Self::Normal,
            _ => Self::Maximal,
        }
    }
}

/// Encoder tuning of a shared dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryParams {
    #[serde(rename = "prototypes")]
    pub use_prototypes: bool,
    #[serde(rename = "averaging")]
    pub use_averaging: bool,
    #[serde(rename = "erosion")]
    pub use_erosion: bool,
    pub aggression: u32,
    #[serde(rename = "type")]
    pub classifier: ClassifierType,
    #[serde(rename = "ext")]
    pub extension: String,
}

impl Default for DictionaryParams {
    fn default() -> Self {
        Self {
            use_prototypes: true,
            use_averaging: false,
            use_erosion: false,
            aggression: 100,
            classifier: ClassifierType::Maximal,
            extension: "djbz".into(),
        }
    }
}

/// Recorded identity of a file on disk: name, size and modification time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub path: PathBuf,
    pub size: u64,
    #[serde(with = "timestamp::option")]
    pub modified: Option<DateTime<Utc>>,
}

impl FileStamp {
    /// Stat `path` now. A missing file yields size 0 and no mtime.
    pub fn stat(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                path: path.to_path_buf(),
                size: meta.len(),
                modified: meta
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Utc>::from(t).trunc_subsecs(3)),
            },
            Err(_) => Self {
                path: path.to_path_buf(),
                size: 0,
                modified: None,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// The file still exists with exactly the recorded size and mtime.
    pub fn matches_disk(&self) -> bool {
        if self.is_empty() || self.modified.is_none() {
            return false;
        }
        let live = Self::stat(&self.path);
        live.modified.is_some() && live.size == self.size && live.modified == self.modified
    }

    /// The file still exists with the recorded size (mtime not compared).
    pub fn size_matches_disk(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        std::fs::metadata(&self.path)
            .map(|meta| meta.len() == self.size)
            .unwrap_or(false)
    }
}

/// Current time truncated to the persisted (millisecond) precision.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Next revision after `previous`: the current time, or one millisecond past
/// `previous` when the clock has not advanced.
pub fn next_revision(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

/// Fixed-format (`dd.MM.yyyy hh:mm:ss.zzz`) timestamp serialization used by
/// the project file.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%d.%m.%Y %H:%M:%S%.3f";

    pub fn format(value: &DateTime<Utc>) -> String {
        value.format(FORMAT).to_string()
    }

    pub fn parse(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(value, FORMAT).map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Same format for optional timestamps; `None` is written as an empty string.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&super::format(v)),
                None => serializer.serialize_str(""),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = String::deserialize(deserializer)?;
            if raw.is_empty() {
                return Ok(None);
            }
            super::parse(&raw).map(Some).map_err(serde::de::Error::custom)
        }
    }
}
