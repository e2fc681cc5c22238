// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Staleness analysis: does a page, or the dictionary group it belongs to,
// have to be rebuilt?

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use djvuwerk_core::error::Result;
use djvuwerk_core::types::{DictionaryId, PageId};

use crate::params::{ForceReprocess, PageParams, RememberedOutputParams};
use crate::project::Project;
use crate::registry::DictionaryRegistry;
use crate::source_images::SourceImagesInfo;

/// Outcome of [`StalenessAnalyzer::needs_reprocess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub reprocess: bool,
    /// The encoded dictionary of the subject page is still valid on disk.
    pub dictionary_cached: bool,
}

/// Cache state of a page, computed without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Never produced.
    Unprocessed,
    /// Produced before, but something changed since.
    NeedsProcessing,
    /// Output on disk matches the current inputs.
    Cached,
}

impl PageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::NeedsProcessing => "stale",
            Self::Cached => "cached",
        }
    }
}

/// The remembered build of `page` still describes the current inputs:
/// same source images, same settings, same dictionary revision and params,
/// and the page's DjVu file is unchanged on disk.
fn output_is_current(
    registry: &DictionaryRegistry,
    project: &Project,
    page: &PageId,
    params: &PageParams,
    id: &DictionaryId,
) -> bool {
    let fresh = SourceImagesInfo::compute(page, &project.layout, &project.suggestions);
    if fresh != params.source_images {
        return false;
    }
    let Some(remembered) = params.remembered.as_deref() else {
        return false;
    };
    let dict = registry.dictionary(id);
    let current = RememberedOutputParams::new(params, id.clone(), dict.revision, dict.params.clone());
    remembered.matches(&current) && params.is_djvu_cached()
}

/// Staleness checks for one processing request.
///
/// Force flags are consumed as they are found; the analyzer remembers which
/// pages were forced so the stage planner does not reuse their caches.
pub struct StalenessAnalyzer<'a> {
    registry: &'a DictionaryRegistry,
    store: &'a crate::store::PageParamsStore,
    project: &'a Project,
    subject: PageId,
    forced: BTreeSet<PageId>,
}

impl<'a> StalenessAnalyzer<'a> {
    pub fn new(
        registry: &'a DictionaryRegistry,
        store: &'a crate::store::PageParamsStore,
        project: &'a Project,
        subject: PageId,
    ) -> Self {
        Self {
            registry,
            store,
            project,
            subject,
            forced: BTreeSet::new(),
        }
    }

    pub fn needs_page_reprocess(&mut self, page: &PageId) -> Result<bool> {
        let Some(mut params) = self.store.get(page)? else {
            return Ok(true);
        };

        if params.force.contains(ForceReprocess::PAGE) || params.force.contains(ForceReprocess::DICTIONARY) {
            let whole_group = params.force.contains(ForceReprocess::DICTIONARY);
            params.force.remove(ForceReprocess::ALL);
            self.store.put(page, &params)?;

            self.forced.insert(page.clone());
            if whole_group {
                self.forced.extend(self.registry.members_of_same(page));
            }
            debug!(page = %page, whole_group, "force flag consumed");
            return Ok(true);
        }

        let Some(id) = self.registry.dictionary_of(page) else {
            return Ok(true);
        };

        Ok(!output_is_current(self.registry, self.project, page, &params, id))
    }

    /// Whether any member other than the subject page needs a rebuild. The
    /// subject must have been checked first.
    pub fn needs_dictionary_reprocess(&mut self, id: &DictionaryId) -> Result<bool> {
        if id.is_sentinel() {
            return Ok(false);
        }
        let subject = self.subject.clone();
        let members: Vec<PageId> = self.registry.members_of(id).iter().cloned().collect();
        for page in members.iter().filter(|p| **p != subject) {
            if self.needs_page_reprocess(page)? {
                debug!(page = %page, dictionary = %id, "group member is stale");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Full decision for the subject page. Without a valid encoded
    /// dictionary nothing can be reused and the answer is always yes.
    #[instrument(skip(self), fields(page = %self.subject))]
    pub fn needs_reprocess(&mut self) -> Result<Decision> {
        let subject = self.subject.clone();
        let Some(id) = self.registry.dictionary_of(&subject).cloned() else {
            return Ok(Decision {
                reprocess: true,
                dictionary_cached: false,
            });
        };

        let dictionary_cached = self.registry.is_output_cached(&id);
        let reprocess = if dictionary_cached {
            self.needs_page_reprocess(&subject)? || self.needs_dictionary_reprocess(&id)?
        } else {
            true
        };

        debug!(reprocess, dictionary_cached, "staleness decided");
        Ok(Decision {
            reprocess,
            dictionary_cached,
        })
    }

    /// Pages whose force flag was consumed during analysis.
    pub fn forced(&self) -> &BTreeSet<PageId> {
        &self.forced
    }

    pub fn into_forced(self) -> BTreeSet<PageId> {
        self.forced
    }
}

/// Cache state of `page` for listings. Reads only.
pub fn page_status(
    registry: &DictionaryRegistry,
    store: &crate::store::PageParamsStore,
    project: &Project,
    page: &PageId,
) -> Result<PageStatus> {
    let Some(params) = store.get(page)? else {
        return Ok(PageStatus::Unprocessed);
    };
    if params.remembered.is_none() {
        return Ok(PageStatus::Unprocessed);
    }
    if !params.force.is_empty() {
        return Ok(PageStatus::NeedsProcessing);
    }
    let Some(id) = registry.dictionary_of(page) else {
        return Ok(PageStatus::NeedsProcessing);
    };
    if registry.is_output_cached(id) && output_is_current(registry, project, page, &params, id) {
        Ok(PageStatus::Cached)
    } else {
        Ok(PageStatus::NeedsProcessing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_images::OutputLayout;
    use crate::store::PageParamsStore;
    use djvuwerk_core::config::PublishConfig;
    use djvuwerk_core::types::{DictionaryParams, ExportSuggestion, ExportSuggestions, FileStamp};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        project: Project,
        registry: DictionaryRegistry,
        store: PageParamsStore,
    }

    fn page(n: u32) -> PageId {
        PageId::single(format!("p{n:02}.tif"))
    }

    /// Two text pages sharing one dictionary, both fully produced.
    fn produced_group() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = OutputLayout::new(dir.path(), &PublishConfig::default());
        layout.ensure_dirs().expect("dirs");

        let mut suggestions = ExportSuggestions::new();
        for n in [1, 2] {
            suggestions.insert(
                page(n),
                ExportSuggestion {
                    has_bw_layer: true,
                    has_color_layer: false,
                    width: 10,
                    height: 10,
                    dpi: 600,
                },
            );
        }
        let project = Project::new(layout, suggestions, 10);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());

        let mut id = DictionaryId::sentinel();
        for n in [1, 2] {
            id = registry.assign_new_page(&page(n), 10);
        }
        let dict_file = project.layout.dictionary_file(&id, "djbz");
        write(&dict_file, b"djbz");
        registry.set_output(&id, FileStamp::stat(&dict_file));

        for n in [1, 2] {
            let p = page(n);
            write(&project.layout.page_image(&p), b"tiff");
            write(&project.layout.jb2(&p), b"jb2");
            write(&project.layout.page_djvu(&p), b"djvu");
            let mut params = PageParams {
                dictionary_id: Some(id.clone()),
                source_images: SourceImagesInfo::compute(&p, &project.layout, &project.suggestions),
                djvu: FileStamp::stat(project.layout.page_djvu(&p)),
                ..PageParams::default()
            };
            let dict = registry.dictionary(&id);
            params.remember(id.clone(), dict.revision, dict.params.clone());
            store.put(&p, &params).expect("put");
        }

        Fixture {
            _dir: dir,
            project,
            registry,
            store,
        }
    }

    fn write(path: &Path, bytes: &[u8]) {
        std::fs::write(path, bytes).expect("write fixture");
    }

    #[test]
    fn everything_matching_is_cached() {
        let fx = produced_group();
        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        assert_eq!(
            analyzer.needs_reprocess().expect("decide"),
            Decision {
                reprocess: false,
                dictionary_cached: true
            }
        );
        assert_eq!(
            page_status(&fx.registry, &fx.store, &fx.project, &page(2)).expect("status"),
            PageStatus::Cached
        );
    }

    #[test]
    fn missing_snapshot_forces_reprocess() {
        let fx = produced_group();
        let mut params = fx.store.get(&page(1)).expect("get").expect("params");
        params.remembered = None;
        fx.store.put(&page(1), &params).expect("put");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        assert!(analyzer.needs_page_reprocess(&page(1)).expect("check"));
        assert_eq!(
            page_status(&fx.registry, &fx.store, &fx.project, &page(1)).expect("status"),
            PageStatus::Unprocessed
        );
    }

    #[test]
    fn unknown_page_needs_reprocess() {
        let fx = produced_group();
        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(9));
        assert!(analyzer.needs_page_reprocess(&page(9)).expect("check"));
        assert!(analyzer.needs_reprocess().expect("decide").reprocess);
    }

    #[test]
    fn force_flag_is_consumed() {
        let fx = produced_group();
        fx.store.invalidate(&page(1), ForceReprocess::PAGE).expect("invalidate");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        assert!(analyzer.needs_page_reprocess(&page(1)).expect("first"));
        assert!(analyzer.forced().contains(&page(1)));
        assert!(!analyzer.needs_page_reprocess(&page(1)).expect("second"));

        let stored = fx.store.get(&page(1)).expect("get").expect("params");
        assert!(stored.force.is_empty());
    }

    #[test]
    fn dictionary_flag_forces_whole_group() {
        let fx = produced_group();
        fx.store.invalidate(&page(2), ForceReprocess::ALL).expect("invalidate");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        let decision = analyzer.needs_reprocess().expect("decide");
        assert!(decision.reprocess);
        assert_eq!(analyzer.into_forced(), BTreeSet::from([page(1), page(2)]));
    }

    #[test]
    fn stale_group_member_triggers_rebuild() {
        let fx = produced_group();
        write(&fx.project.layout.page_image(&page(2)), b"retouched tiff");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        assert!(!analyzer.needs_page_reprocess(&page(1)).expect("subject"));
        let id = fx.registry.dictionary_of(&page(1)).cloned().expect("assigned");
        assert!(analyzer.needs_dictionary_reprocess(&id).expect("group"));
    }

    #[test]
    fn group_check_skips_the_subject() {
        let fx = produced_group();
        fx.store.invalidate(&page(1), ForceReprocess::PAGE).expect("invalidate");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        let id = fx.registry.dictionary_of(&page(1)).cloned().expect("assigned");
        assert!(!analyzer.needs_dictionary_reprocess(&id).expect("group"));
        assert!(analyzer.forced().is_empty());
        let params = fx.store.get(&page(1)).expect("get").expect("params");
        assert!(params.force.contains(ForceReprocess::PAGE), "subject flag left for the page check");
    }

    #[test]
    fn changed_dictionary_file_is_not_cached() {
        let fx = produced_group();
        let id = fx.registry.dictionary_of(&page(1)).cloned().expect("assigned");
        write(&fx.project.layout.dictionary_file(&id, "djbz"), b"djbz, rewritten");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(1));
        assert_eq!(
            analyzer.needs_reprocess().expect("decide"),
            Decision {
                reprocess: true,
                dictionary_cached: false
            }
        );
    }

    #[test]
    fn settings_edit_makes_page_stale() {
        let fx = produced_group();
        let mut params = fx.store.get(&page(2)).expect("get").expect("params");
        params.title = "Index".into();
        fx.store.put(&page(2), &params).expect("put");

        let mut analyzer = StalenessAnalyzer::new(&fx.registry, &fx.store, &fx.project, page(2));
        assert!(analyzer.needs_page_reprocess(&page(2)).expect("check"));
        assert_eq!(
            page_status(&fx.registry, &fx.store, &fx.project, &page(2)).expect("status"),
            PageStatus::NeedsProcessing
        );
    }
}
