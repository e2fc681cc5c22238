// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output directory layout and the per-page source-image snapshot.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use djvuwerk_core::config::PublishConfig;
use djvuwerk_core::types::{DictionaryId, ExportSuggestion, ExportSuggestions, PageId};

/// Extension of the processed page images produced upstream.
pub const PAGE_IMAGE_EXTENSION: &str = "tif";

/// Where every artifact of a publishing run lives.
///
/// ```text
/// <out_dir>/<page>.tif                      processed page image
/// <out_dir>/<djvu>/<page>.djvu|.bg44|.jb2   encoder artifacts
/// <out_dir>/<djvu>/<id>.<ext>               shared dictionaries
/// <out_dir>/<djvu>/<layers>/pic|txt/<page>.tif
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub out_dir: PathBuf,
    pub djvu_dir: PathBuf,
    pub layers_dir: PathBuf,
}

impl OutputLayout {
    pub fn new(out_dir: impl Into<PathBuf>, config: &PublishConfig) -> Self {
        let out_dir = out_dir.into();
        let djvu_dir = out_dir.join(&config.pages_subfolder);
        let layers_dir = djvu_dir.join(&config.layers_subfolder);
        Self {
            out_dir,
            djvu_dir,
            layers_dir,
        }
    }

    /// Create the artifact directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layers_dir.join("pic"))?;
        std::fs::create_dir_all(self.layers_dir.join("txt"))?;
        Ok(())
    }

    fn image_name(page: &PageId) -> String {
        format!("{}.{PAGE_IMAGE_EXTENSION}", page.base_name())
    }

    pub fn page_image(&self, page: &PageId) -> PathBuf {
        self.out_dir.join(Self::image_name(page))
    }

    pub fn background_layer(&self, page: &PageId) -> PathBuf {
        self.layers_dir.join("pic").join(Self::image_name(page))
    }

    pub fn foreground_layer(&self, page: &PageId) -> PathBuf {
        self.layers_dir.join("txt").join(Self::image_name(page))
    }

    pub fn page_djvu(&self, page: &PageId) -> PathBuf {
        self.djvu_dir.join(format!("{}.djvu", page.base_name()))
    }

    pub fn bg44(&self, page: &PageId) -> PathBuf {
        self.djvu_dir.join(format!("{}.bg44", page.base_name()))
    }

    pub fn jb2(&self, page: &PageId) -> PathBuf {
        self.djvu_dir.join(format!("{}.jb2", page.base_name()))
    }

    pub fn dictionary_file(&self, id: &DictionaryId, extension: &str) -> PathBuf {
        self.djvu_dir.join(format!("{id}.{extension}"))
    }

    /// Bundled multi-page document.
    pub fn bundle(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{name}.djvu"))
    }
}

/// A file name with the size it had when last looked at. An empty path
/// means the file does not apply to the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedFile {
    pub path: PathBuf,
    pub size: u64,
}

impl SizedFile {
    /// Stat `path`; a missing file has size 0.
    pub fn stat(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self { path, size }
    }

    pub fn is_named(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    pub fn refresh(&mut self) {
        if self.is_named() {
            self.size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        }
    }

    /// The file exists with the recorded size.
    pub fn is_cached(&self) -> bool {
        self.is_named()
            && std::fs::metadata(&self.path)
                .map(|m| m.len() == self.size)
                .unwrap_or(false)
    }
}

/// Raw material and intermediate artifacts of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceImagesInfo {
    #[serde(rename = "suggest")]
    pub suggestion: ExportSuggestion,
    pub output: SizedFile,
    pub foreground: SizedFile,
    pub background: SizedFile,
    pub bg44: SizedFile,
    pub jb2: SizedFile,
}

impl SourceImagesInfo {
    /// Snapshot the current state of `page` on disk.
    pub fn compute(page: &PageId, layout: &OutputLayout, suggestions: &ExportSuggestions) -> Self {
        let suggestion = suggestions.get(page).copied().unwrap_or_default();
        let named = |applies: bool, path: PathBuf| {
            if applies {
                SizedFile::stat(path)
            } else {
                SizedFile::default()
            }
        };
        let layered = suggestion.is_layered();

        Self {
            suggestion,
            output: SizedFile::stat(layout.page_image(page)),
            foreground: named(layered, layout.foreground_layer(page)),
            background: named(layered, layout.background_layer(page)),
            bg44: named(suggestion.has_color_layer, layout.bg44(page)),
            jb2: named(suggestion.has_bw_layer, layout.jb2(page)),
        }
    }

    /// Re-stat every named file.
    pub fn refresh(&mut self) {
        self.output.refresh();
        self.foreground.refresh();
        self.background.refresh();
        self.bg44.refresh();
        self.jb2.refresh();
    }

    /// Same page image and layer images as `other`. Encoder outputs are
    /// not compared.
    pub fn inputs_match(&self, other: &SourceImagesInfo) -> bool {
        self.suggestion == other.suggestion
            && self.output == other.output
            && self.foreground == other.foreground
            && self.background == other.background
    }

    pub fn is_valid(&self) -> bool {
        self.output.is_named()
    }

    /// The page was split into foreground and background layers.
    pub fn is_layered(&self) -> bool {
        self.background.is_named()
    }

    /// Image fed to the wavelet encoder.
    pub fn raster_source(&self) -> &Path {
        if self.is_layered() {
            &self.background.path
        } else {
            &self.output.path
        }
    }

    /// Image fed to the shared-dictionary encoder.
    pub fn text_source(&self) -> &Path {
        if self.foreground.is_named() {
            &self.foreground.path
        } else {
            &self.output.path
        }
    }
}
