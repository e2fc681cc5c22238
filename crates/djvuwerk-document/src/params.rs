// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-page publishing parameters and the remembered-output snapshot.
//
// Every field that affects an encoder belongs to exactly one or more field
// groups (raster, text, assembly, postprocess). The stage planner compares
// groups individually so a title edit does not re-run the wavelet encoder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::types::{DictionaryId, DictionaryParams, FileStamp, timestamp};

use crate::source_images::SourceImagesInfo;

/// Bitmask of pending force-reprocess requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForceReprocess(u8);

impl ForceReprocess {
    pub const NONE: Self = Self(0);
    /// Rebuild the page, ignoring every cached artifact.
    pub const PAGE: Self = Self(1);
    /// Rebuild every page sharing the dictionary of this page.
    pub const DICTIONARY: Self = Self(2);
    pub const ALL: Self = Self(Self::PAGE.0 | Self::DICTIONARY.0);

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Resampling filter used when the background is subsampled (`-bsm`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMethod {
    Box,
    Triangle,
    Bell,
    Bspline,
    Hermite,
    #[default]
    Lanczos,
    Mitchell,
}

impl ScaleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Box => "box",
            Self::Triangle => "triangle",
            Self::Bell => "bell",
            Self::Bspline => "bspline",
            Self::Hermite => "hermite",
            Self::Lanczos => "lanczos",
            Self::Mitchell => "mitchell",
        }
    }
}

/// Solid foreground colour applied to a rectangle of the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorRect {
    /// `#rrggbb`.
    pub color: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ColorRect {
    /// FGbz zone syntax: `#rrggbb:x,y,w,h`.
    pub fn to_fgbz(&self) -> String {
        format!(
            "{}:{},{},{},{}",
            self.color, self.x, self.y, self.width, self.height
        )
    }
}

/// Persisted publishing state of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageParams {
    #[serde(rename = "djbz_id")]
    pub dictionary_id: Option<DictionaryId>,
    pub dpi: u32,
    pub clean: bool,
    pub erosion: bool,
    pub smooth: bool,
    /// Background subsample factor; 1 disables subsampling.
    pub bsf: u32,
    pub scale_method: ScaleMethod,
    /// Foreground colour option; empty means plain black.
    pub fgbz: String,
    pub color_rects: Vec<ColorRect>,
    /// Quarter turns, 0..=3.
    pub rotation: u8,
    pub title: String,
    pub source_images: SourceImagesInfo,
    #[serde(rename = "output_params")]
    pub remembered: Option<Box<RememberedOutputParams>>,
    pub djvu: FileStamp,
    pub force: ForceReprocess,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            dictionary_id: None,
            dpi: 600,
            clean: true,
            erosion: false,
            smooth: false,
            bsf: 1,
            scale_method: ScaleMethod::default(),
            fgbz: String::new(),
            color_rects: Vec::new(),
            rotation: 0,
            title: String::new(),
            source_images: SourceImagesInfo::default(),
            remembered: None,
            djvu: FileStamp::default(),
            force: ForceReprocess::NONE,
        }
    }
}

impl PageParams {
    /// Reject values no encoder accepts.
    pub fn check(&self) -> Result<()> {
        if self.dpi == 0 {
            return Err(PublishError::Configuration("output dpi must be positive".into()));
        }
        if self.rotation > 3 {
            return Err(PublishError::Configuration(format!(
                "rotation must be 0..=3 quarter turns, got {}",
                self.rotation
            )));
        }
        if !(1..=12).contains(&self.bsf) {
            return Err(PublishError::Configuration(format!(
                "background subsample factor must be 1..=12, got {}",
                self.bsf
            )));
        }
        if let Some(rect) = self.color_rects.iter().find(|r| !r.color.starts_with('#')) {
            return Err(PublishError::Configuration(format!(
                "colour {:?} is not of the form #rrggbb",
                rect.color
            )));
        }
        Ok(())
    }

    /// All user-settable fields equal. Snapshots, stamps, flags and the
    /// dictionary assignment are not compared.
    pub fn settings_match(&self, other: &PageParams) -> bool {
        self.raster_matches(other)
            && self.text_matches(other)
            && self.assembly_matches(other)
            && self.postprocess_matches(other)
    }

    pub fn raster_matches(&self, used: &PageParams) -> bool {
        self.dpi == used.dpi && self.bsf == used.bsf && self.scale_method == used.scale_method
    }

    pub fn text_matches(&self, used: &PageParams) -> bool {
        self.dpi == used.dpi
            && self.clean == used.clean
            && self.erosion == used.erosion
            && self.smooth == used.smooth
    }

    pub fn assembly_matches(&self, used: &PageParams) -> bool {
        self.dpi == used.dpi && self.fgbz == used.fgbz && self.color_rects == used.color_rects
    }

    pub fn postprocess_matches(&self, used: &PageParams) -> bool {
        self.title == used.title && self.rotation == used.rotation
    }

    /// The page title was removed since `used`. The post-processor cannot
    /// delete a title, so the page has to be assembled again.
    pub fn title_cleared_since(&self, used: &PageParams) -> bool {
        self.title.is_empty() && !used.title.is_empty()
    }

    /// Settings last used to produce the page, if it was ever produced.
    pub fn used_params(&self) -> Option<&PageParams> {
        self.remembered.as_deref().map(|r| &r.params)
    }

    /// The recorded page DjVu file is still on disk, unchanged.
    pub fn is_djvu_cached(&self) -> bool {
        self.djvu.matches_disk()
    }

    /// Value of the FGbz chunk argument (`#black` when no option is set).
    pub fn fgbz_chunk(&self) -> String {
        let mut chunk = if self.fgbz.is_empty() {
            "#black".to_owned()
        } else {
            self.fgbz.clone()
        };
        for rect in &self.color_rects {
            chunk.push_str(&rect.to_fgbz());
        }
        chunk
    }

    /// Record the inputs of a completed build.
    pub fn remember(&mut self, dictionary_id: DictionaryId, revision: DateTime<Utc>, dictionary_params: DictionaryParams) {
        self.remembered = Some(Box::new(RememberedOutputParams::new(
            self,
            dictionary_id,
            revision,
            dictionary_params,
        )));
    }
}

/// Inputs in effect the last time a page was fully produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberedOutputParams {
    pub params: PageParams,
    #[serde(rename = "djbz_id")]
    pub dictionary_id: DictionaryId,
    #[serde(rename = "djbz_rev", with = "timestamp")]
    pub dictionary_revision: DateTime<Utc>,
    #[serde(rename = "djbz_dict_params")]
    pub dictionary_params: DictionaryParams,
}

impl RememberedOutputParams {
    /// Snapshot of `params` without its own nested snapshot.
    pub fn new(
        params: &PageParams,
        dictionary_id: DictionaryId,
        dictionary_revision: DateTime<Utc>,
        dictionary_params: DictionaryParams,
    ) -> Self {
        let mut params = params.clone();
        params.remembered = None;
        params.force = ForceReprocess::NONE;
        Self {
            params,
            dictionary_id,
            dictionary_revision,
            dictionary_params,
        }
    }

    pub fn matches(&self, other: &RememberedOutputParams) -> bool {
        self.dictionary_id == other.dictionary_id
            && self.dictionary_revision == other.dictionary_revision
            && self.params.settings_match(&other.params)
            && self.dictionary_params == other.dictionary_params
    }
}
