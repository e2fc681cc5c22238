// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage planning: which pages of a dictionary group go through which stage,
// and which cached artifacts may be reused.

use std::collections::{BTreeMap, BTreeSet};

use djvuwerk_core::types::{PageId, Stage};
use djvuwerk_document::PageParams;

/// Work for one processing run, partitioned by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePlan {
    /// Pages to split into foreground/background layers.
    pub to_export: BTreeSet<PageId>,
    pub to_encode_raster: BTreeSet<PageId>,
    /// Pages whose bg44 chunk is reused.
    pub raster_cached: BTreeSet<PageId>,
    pub to_encode_text: BTreeSet<PageId>,
    /// Pages whose jb2 chunk (or, for blank pages, whole DjVu) is reused.
    pub text_cached: BTreeSet<PageId>,
    pub to_assemble: BTreeSet<PageId>,
    pub to_postprocess: BTreeSet<PageId>,
}

impl StagePlan {
    /// Pages scheduled for `stage`. Bundling is not planned per group.
    pub fn pages(&self, stage: Stage) -> &BTreeSet<PageId> {
        match stage {
            Stage::Export => &self.to_export,
            Stage::EncodeRaster => &self.to_encode_raster,
            Stage::EncodeText => &self.to_encode_text,
            Stage::Assemble => &self.to_assemble,
            Stage::Postprocess | Stage::Bundle => &self.to_postprocess,
        }
    }

    /// No stage has work.
    pub fn is_empty(&self) -> bool {
        Stage::PIPELINE.iter().all(|stage| self.pages(*stage).is_empty())
    }
}

/// Plan the stages for every member of a dictionary group.
///
/// `forced` pages reuse nothing. `dictionary_cached` tells whether the
/// encoded dictionary of the group is still valid; without it no jb2 chunk
/// can be reused.
pub fn plan(
    members: &BTreeMap<PageId, PageParams>,
    forced: &BTreeSet<PageId>,
    dictionary_cached: bool,
) -> StagePlan {
    let mut plan = StagePlan::default();

    for (page, params) in members {
        let info = &params.source_images;
        let suggestion = info.suggestion;
        let is_forced = forced.contains(page);
        let used = if is_forced { None } else { params.used_params() };

        let same_inputs = used.is_some_and(|u| info.inputs_match(&u.source_images));
        let may_reuse_raster = same_inputs && used.is_some_and(|u| params.raster_matches(u));
        let may_reuse_text = same_inputs && used.is_some_and(|u| params.text_matches(u));
        let mut reuse_raster = false;
        let mut reuse_text = false;

        if suggestion.has_bw_layer {
            if may_reuse_text && dictionary_cached && info.jb2.is_cached() {
                reuse_text = true;
                plan.text_cached.insert(page.clone());
            } else {
                plan.to_encode_text.insert(page.clone());
            }
        }

        if suggestion.has_color_layer {
            if may_reuse_raster && info.bg44.is_cached() {
                reuse_raster = true;
                plan.raster_cached.insert(page.clone());
            } else {
                plan.to_encode_raster.insert(page.clone());
            }
        }

        if suggestion.is_layered() {
            if !reuse_raster || !reuse_text {
                plan.to_export.insert(page.clone());
            }
        } else if suggestion.is_blank() {
            if !is_forced && params.is_djvu_cached() {
                plan.text_cached.insert(page.clone());
            } else {
                plan.to_encode_text.insert(page.clone());
            }
        }

        if used.is_none_or(|u| !params.assembly_matches(u)) || !params.is_djvu_cached() {
            plan.to_assemble.insert(page.clone());
        }

        if used.is_none_or(|u| !params.postprocess_matches(u)) {
            plan.to_postprocess.insert(page.clone());
            // A title cannot be removed in place.
            if used.is_some_and(|u| params.title_cleared_since(u)) {
                plan.to_assemble.insert(page.clone());
            }
        }
    }

    plan.to_assemble.extend(plan.to_encode_raster.iter().cloned());
    plan.to_assemble.extend(plan.to_encode_text.iter().cloned());

    // The dictionary is rebuilt from all members at once.
    if !plan.to_encode_text.is_empty() {
        let promoted = std::mem::take(&mut plan.text_cached);
        plan.to_assemble.extend(promoted.iter().cloned());
        plan.to_encode_text.extend(promoted);
    }

    // A freshly assembled page carries neither title nor rotation.
    for page in &plan.to_assemble {
        let params = &members[page];
        if !params.title.is_empty() || params.rotation != 0 {
            plan.to_postprocess.insert(page.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use djvuwerk_core::config::PublishConfig;
    use djvuwerk_core::types::{
        DictionaryId, DictionaryParams, ExportSuggestion, ExportSuggestions, FileStamp, now_millis,
    };
    use djvuwerk_document::{OutputLayout, SourceImagesInfo};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: OutputLayout,
        suggestions: ExportSuggestions,
    }

    fn page(name: &str) -> PageId {
        PageId::single(format!("{name}.tif"))
    }

    fn fixture(pages: &[(&str, bool, bool)]) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = OutputLayout::new(dir.path(), &PublishConfig::default());
        layout.ensure_dirs().expect("dirs");
        let mut suggestions = ExportSuggestions::new();
        for (name, bw, color) in pages {
            suggestions.insert(
                page(name),
                ExportSuggestion {
                    has_bw_layer: *bw,
                    has_color_layer: *color,
                    width: 100,
                    height: 100,
                    dpi: 300,
                },
            );
        }
        Fixture {
            _dir: dir,
            layout,
            suggestions,
        }
    }

    fn write(path: &Path) {
        std::fs::write(path, b"artifact").expect("write artifact");
    }

    /// Params of a page produced by a previous run, with every artifact on
    /// disk.
    fn produced(fx: &Fixture, p: &PageId) -> PageParams {
        write(&fx.layout.page_image(p));
        write(&fx.layout.jb2(p));
        write(&fx.layout.bg44(p));
        write(&fx.layout.page_djvu(p));
        let mut params = PageParams {
            dictionary_id: Some(DictionaryId::numbered(1)),
            source_images: SourceImagesInfo::compute(p, &fx.layout, &fx.suggestions),
            djvu: FileStamp::stat(fx.layout.page_djvu(p)),
            ..PageParams::default()
        };
        params.remember(DictionaryId::numbered(1), now_millis(), DictionaryParams::default());
        params
    }

    fn set(pages: &[PageId]) -> BTreeSet<PageId> {
        pages.iter().cloned().collect()
    }

    #[test]
    fn unchanged_group_has_no_work() {
        let fx = fixture(&[("a", true, true), ("b", true, false)]);
        let members: BTreeMap<_, _> = [page("a"), page("b")]
            .into_iter()
            .map(|p| {
                let params = produced(&fx, &p);
                (p, params)
            })
            .collect();

        let plan = plan(&members, &BTreeSet::new(), true);
        assert!(plan.is_empty(), "{plan:?}");
        assert_eq!(plan.text_cached, set(&[page("a"), page("b")]));
        assert_eq!(plan.raster_cached, set(&[page("a")]));
    }

    #[test]
    fn never_produced_page_runs_everything() {
        let fx = fixture(&[("a", true, true)]);
        let params = PageParams {
            source_images: SourceImagesInfo::compute(&page("a"), &fx.layout, &fx.suggestions),
            ..PageParams::default()
        };
        let members = BTreeMap::from([(page("a"), params)]);

        let plan = plan(&members, &BTreeSet::new(), true);
        let all = set(&[page("a")]);
        assert_eq!(plan.to_export, all);
        assert_eq!(plan.to_encode_raster, all);
        assert_eq!(plan.to_encode_text, all);
        assert_eq!(plan.to_assemble, all);
        assert_eq!(plan.to_postprocess, all);
    }

    #[test]
    fn cleared_title_reassembles_but_keeps_chunks() {
        let fx = fixture(&[("a", true, true)]);
        let mut params = produced(&fx, &page("a"));
        params.title = "X".into();
        params.remember(DictionaryId::numbered(1), now_millis(), DictionaryParams::default());
        params.title.clear();
        let members = BTreeMap::from([(page("a"), params)]);

        let plan = plan(&members, &BTreeSet::new(), true);
        assert_eq!(plan.to_assemble, set(&[page("a")]));
        assert_eq!(plan.to_postprocess, set(&[page("a")]));
        assert!(plan.to_encode_raster.is_empty());
        assert!(plan.to_encode_text.is_empty());
        assert!(plan.to_export.is_empty());
    }

    #[test]
    fn new_title_only_postprocesses() {
        let fx = fixture(&[("a", true, false)]);
        let mut params = produced(&fx, &page("a"));
        params.title = "Preface".into();
        let members = BTreeMap::from([(page("a"), params)]);

        let plan = plan(&members, &BTreeSet::new(), true);
        assert_eq!(plan.to_postprocess, set(&[page("a")]));
        assert!(plan.to_assemble.is_empty());
    }

    #[test]
    fn forced_page_reuses_nothing() {
        let fx = fixture(&[("a", true, true)]);
        let members = BTreeMap::from([(page("a"), produced(&fx, &page("a")))]);

        let plan = plan(&members, &set(&[page("a")]), true);
        assert_eq!(plan.to_encode_raster, set(&[page("a")]));
        assert_eq!(plan.to_encode_text, set(&[page("a")]));
        assert_eq!(plan.to_export, set(&[page("a")]));
    }

    #[test]
    fn text_change_promotes_cached_members() {
        let fx = fixture(&[("a", true, false), ("b", true, false), ("c", false, false)]);
        let mut members: BTreeMap<_, _> = [page("a"), page("b"), page("c")]
            .into_iter()
            .map(|p| {
                let params = produced(&fx, &p);
                (p, params)
            })
            .collect();
        if let Some(params) = members.get_mut(&page("a")) {
            params.erosion = true;
        }

        let plan = plan(&members, &BTreeSet::new(), true);
        let all = set(&[page("a"), page("b"), page("c")]);
        assert_eq!(plan.to_encode_text, all);
        assert_eq!(plan.to_assemble, all);
        assert!(plan.text_cached.is_empty());
    }

    #[test]
    fn raster_change_on_layered_page_needs_export() {
        let fx = fixture(&[("a", true, true)]);
        let mut params = produced(&fx, &page("a"));
        params.bsf = 2;
        let members = BTreeMap::from([(page("a"), params)]);

        let plan = plan(&members, &BTreeSet::new(), true);
        assert_eq!(plan.to_export, set(&[page("a")]));
        assert_eq!(plan.to_encode_raster, set(&[page("a")]));
        assert_eq!(plan.text_cached, set(&[page("a")]));
    }

    #[test]
    fn stale_dictionary_invalidates_text() {
        let fx = fixture(&[("a", true, false)]);
        let members = BTreeMap::from([(page("a"), produced(&fx, &page("a")))]);

        let plan = plan(&members, &BTreeSet::new(), false);
        assert_eq!(plan.to_encode_text, set(&[page("a")]));
        assert_eq!(plan.to_assemble, set(&[page("a")]));
    }

    #[test]
    fn replaced_page_image_reencodes_and_reassembles() {
        let fx = fixture(&[("a", false, true)]);
        let mut params = produced(&fx, &page("a"));
        std::fs::write(fx.layout.page_image(&page("a")), b"retouched scan").expect("rewrite");
        params.source_images = SourceImagesInfo::compute(&page("a"), &fx.layout, &fx.suggestions);
        let members = BTreeMap::from([(page("a"), params)]);

        let plan = plan(&members, &BTreeSet::new(), true);
        assert_eq!(plan.to_encode_raster, set(&[page("a")]));
        assert_eq!(plan.to_assemble, set(&[page("a")]));
        assert!(plan.raster_cached.is_empty());
    }

    #[test]
    fn reassembled_page_keeps_title_and_rotation() {
        let fx = fixture(&[("a", true, false), ("b", true, false)]);
        let mut members: BTreeMap<_, _> = [page("a"), page("b")]
            .into_iter()
            .map(|p| {
                let mut params = produced(&fx, &p);
                params.title = "Chapter".into();
                params.rotation = 1;
                params.remember(DictionaryId::numbered(1), now_millis(), DictionaryParams::default());
                (p, params)
            })
            .collect();
        if let Some(params) = members.get_mut(&page("a")) {
            params.erosion = true;
        }

        let plan = plan(&members, &BTreeSet::new(), true);
        let all = set(&[page("a"), page("b")]);
        assert_eq!(plan.to_assemble, all);
        assert_eq!(plan.to_postprocess, all);
    }

    #[test]
    fn blank_page_with_output_is_cached() {
        let fx = fixture(&[("a", false, false)]);
        let members = BTreeMap::from([(page("a"), produced(&fx, &page("a")))]);

        let plan = plan(&members, &BTreeSet::new(), true);
        assert!(plan.is_empty());
        assert_eq!(plan.text_cached, set(&[page("a")]));
    }
}
