// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline orchestrator.
//
// One `process()` call decides whether a page (and every page sharing its
// dictionary) must be rebuilt, plans the stages, drives the encoders and,
// only when everything succeeded, records the results so that the next call
// can reuse them.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use djvuwerk_core::config::PublishConfig;
use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::types::{DictionaryId, FileStamp, PageId, Stage};
use djvuwerk_document::assign::{auto_assign, reassign_all_except_locked};
use djvuwerk_document::ordering::batch_representatives;
use djvuwerk_document::validate::{validate, validate_group};
use djvuwerk_document::{
    DictionaryRegistry, ForceReprocess, PageParams, PageParamsStore, PageStatus, Project,
    RememberedOutputParams, SourceImagesInfo, StalenessAnalyzer,
};

use crate::bundle::Bundler;
use crate::commands;
use crate::plan::{StagePlan, plan};
use crate::progress::{ProgressEvent, ProgressReporter, StageState, TracingProgress};
use crate::runner::{self, ToolInvocation};

/// Lock a shared component, turning poisoning into an error.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| PublishError::Database(format!("{what} lock poisoned")))
}

/// Splits a page into its foreground and background layer images.
///
/// Called on a blocking thread.
pub trait LayerExporter: Send + Sync {
    fn export(&self, page: &PageId, info: &SourceImagesInfo) -> Result<()>;
}

/// Exporter for projects whose layers were written upstream: it only
/// checks that both layer images are present.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrecomputedLayers;

impl LayerExporter for PrecomputedLayers {
    fn export(&self, _page: &PageId, info: &SourceImagesInfo) -> Result<()> {
        for layer in [&info.foreground.path, &info.background.path] {
            if !layer.is_file() {
                return Err(PublishError::FilesystemInconsistency(layer.clone()));
            }
        }
        Ok(())
    }
}

/// Result of [`Publisher::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Encoders were run and new results recorded.
    pub reprocessed: bool,
    /// Every project page is ready and the bundled document is out of date.
    pub bundle_ready: bool,
}

/// Result of [`Publisher::process_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Pages (group representatives) visited.
    pub processed: usize,
    pub reprocessed: usize,
    pub bundle_ready: bool,
}

/// Everything a run needs, captured under the locks before any encoder
/// starts.
struct GroupWork {
    dictionary: DictionaryId,
    /// Group members in project order.
    ordered: Vec<PageId>,
    members: BTreeMap<PageId, PageParams>,
    forced: BTreeSet<PageId>,
    plan: StagePlan,
    export: Vec<(PageId, SourceImagesInfo)>,
    raster: Vec<ToolInvocation>,
    /// Settings script and target of the text encoder.
    text: Option<(String, PathBuf)>,
    assemble: Vec<ToolInvocation>,
    postprocess: Vec<ToolInvocation>,
}

/// Incremental publishing engine for one project.
pub struct Publisher {
    registry: Arc<Mutex<DictionaryRegistry>>,
    store: Arc<Mutex<PageParamsStore>>,
    project: Arc<Project>,
    config: Arc<PublishConfig>,
    exporter: Arc<dyn LayerExporter>,
    progress: Arc<dyn ProgressReporter>,
    bundler: Bundler,
    run_lock: tokio::sync::Mutex<()>,
}

impl Publisher {
    /// Open the engine on a project: load the dictionary registry from the
    /// store and bring every page's assignment in line with its content.
    pub fn new(store: PageParamsStore, project: Project, config: PublishConfig) -> Result<Self> {
        let mut registry =
            store.load_registry(config.dictionary_defaults.clone(), project.pages_per_dictionary)?;
        let changed = auto_assign(
            &mut registry,
            &store,
            &project.pages,
            &project.suggestions,
            project.pages_per_dictionary,
        )?;
        if changed > 0 {
            store.save_registry(&registry)?;
        }

        Ok(Self {
            registry: Arc::new(Mutex::new(registry)),
            store: Arc::new(Mutex::new(store)),
            bundler: Bundler::new(config.tools.clone()),
            project: Arc::new(project),
            config: Arc::new(config),
            exporter: Arc::new(PrecomputedLayers),
            progress: Arc::new(TracingProgress),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn LayerExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn registry(&self) -> Arc<Mutex<DictionaryRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn store(&self) -> Arc<Mutex<PageParamsStore>> {
        Arc::clone(&self.store)
    }

    /// Cache state of `page`, without side effects.
    pub fn page_status(&self, page: &PageId) -> Result<PageStatus> {
        let registry = lock(&self.registry, "dictionary registry")?;
        let store = lock(&self.store, "parameter store")?;
        djvuwerk_document::page_status(&registry, &store, &self.project, page)
    }

    /// Mark `page` for a rebuild on its next run.
    pub fn invalidate(&self, page: &PageId, flags: ForceReprocess) -> Result<bool> {
        lock(&self.store, "parameter store")?.invalidate(page, flags)
    }

    /// Rebuild every non-locked dictionary with a new capacity. Waits for a
    /// running `process()` to finish.
    #[instrument(skip(self))]
    pub async fn reassign(&self, pages_per_dictionary: usize) -> Result<usize> {
        let _run = self.run_lock.lock().await;
        let mut registry = lock(&self.registry, "dictionary registry")?;
        let store = lock(&self.store, "parameter store")?;
        let changed = reassign_all_except_locked(
            &mut registry,
            &store,
            &self.project.pages,
            &self.project.suggestions,
            pages_per_dictionary,
        )?;
        store.save_registry(&registry)?;
        info!(changed, "dictionaries reassigned");
        Ok(changed)
    }

    /// Bring `page` and every page sharing its dictionary up to date.
    ///
    /// Nothing is recorded unless every stage succeeds; a failed or
    /// cancelled run leaves the registry and the stored parameters as they
    /// were, apart from validation fixes.
    #[instrument(skip_all, fields(page = %page))]
    pub async fn process(&self, page: &PageId, cancel: &CancellationToken) -> Result<ProcessOutcome> {
        let _run = self.run_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        if !self.project.contains(page) {
            return Err(PublishError::Configuration(format!("page {page} is not part of the project")));
        }
        self.project.layout.ensure_dirs()?;

        let Some(work) = self.snapshot(page)? else {
            debug!("all outputs reusable");
            return Ok(ProcessOutcome {
                reprocessed: false,
                bundle_ready: self.bundle_ready(false)?,
            });
        };

        info!(
            dictionary = %work.dictionary,
            members = work.ordered.len(),
            export = work.plan.to_export.len(),
            raster = work.plan.to_encode_raster.len(),
            text = work.plan.to_encode_text.len(),
            assemble = work.plan.to_assemble.len(),
            postprocess = work.plan.to_postprocess.len(),
            "reprocessing dictionary group"
        );

        if let Err(err) = self.execute(page, &work, cancel).await {
            if !err.is_cancelled() {
                warn!(error = %err, "processing failed");
            }
            self.restore_force_flags(&work.forced);
            return Err(err);
        }

        self.commit(&work)?;
        Ok(ProcessOutcome {
            reprocessed: true,
            bundle_ready: self.bundle_ready(true)?,
        })
    }

    /// Process the whole project, one page per shared dictionary.
    #[instrument(skip_all)]
    pub async fn process_all(&self, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let pages = {
            let store = lock(&self.store, "parameter store")?;
            batch_representatives(&store, &self.project.pages)?
        };

        let mut outcome = BatchOutcome::default();
        for page in &pages {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            let result = self.process(page, cancel).await?;
            outcome.processed += 1;
            if result.reprocessed {
                outcome.reprocessed += 1;
            }
        }
        outcome.bundle_ready = self.bundle_ready(outcome.reprocessed > 0)?;
        info!(
            processed = outcome.processed,
            reprocessed = outcome.reprocessed,
            "batch finished"
        );
        Ok(outcome)
    }

    /// Bundle every project page into `target`. Every page must be ready.
    pub async fn build_bundle(&self, target: &Path, cancel: &CancellationToken) -> Result<FileStamp> {
        let ready = lock(&self.store, "parameter store")?.pages_ready(&self.project.pages)?;
        if !ready {
            return Err(PublishError::Configuration(
                "not every page has been processed yet".into(),
            ));
        }
        self.bundler
            .build(&self.store, &self.project.layout, &self.project.pages, target, cancel)
            .await
    }

    fn bundle_ready(&self, reprocessed: bool) -> Result<bool> {
        let store = lock(&self.store, "parameter store")?;
        if !reprocessed && !store.bundle_needs_update()? {
            return Ok(false);
        }
        store.pages_ready(&self.project.pages)
    }

    // -- Planning -------------------------------------------------------------

    /// Analyse, validate and plan under the locks. `None` when the group's
    /// outputs are all reusable.
    ///
    /// Validation refreshes the stored source-image snapshots, so it runs
    /// only once the analyzer has compared them against the disk.
    fn snapshot(&self, page: &PageId) -> Result<Option<GroupWork>> {
        let mut registry = lock(&self.registry, "dictionary registry")?;
        let store = lock(&self.store, "parameter store")?;
        let project = self.project.as_ref();

        let mut analyzer = StalenessAnalyzer::new(&registry, &store, project, page.clone());
        let decision = analyzer.needs_reprocess()?;
        let mut forced = analyzer.into_forced();
        if !decision.reprocess {
            return Ok(None);
        }

        validate(&mut registry, &store, project, page)?;
        validate_group(&mut registry, &store, project, page)?;
        let dictionary = registry
            .dictionary_of(page)
            .cloned()
            .ok_or_else(|| PublishError::Configuration(format!("page {page} has no dictionary")))?;
        let group = registry.members_of_same(page);
        let ordered: Vec<PageId> = project.pages.iter().filter(|p| group.contains(*p)).cloned().collect();

        let mut members = BTreeMap::new();
        for member in &ordered {
            let mut params = store
                .get(member)?
                .ok_or_else(|| PublishError::Configuration(format!("page {member} has no parameters")))?;
            if !params.force.is_empty() {
                if params.force.contains(ForceReprocess::DICTIONARY) {
                    forced.extend(ordered.iter().cloned());
                }
                forced.insert(member.clone());
                params.force = ForceReprocess::NONE;
                store.put(member, &params)?;
            }
            members.insert(member.clone(), params);
        }

        let plan = plan(&members, &forced, decision.dictionary_cached);
        let layout = &project.layout;
        let tools = &self.config.tools;

        let export = plan
            .to_export
            .iter()
            .map(|p| (p.clone(), members[p].source_images.clone()))
            .collect();
        let raster = plan
            .to_encode_raster
            .iter()
            .map(|p| commands::c44(tools, layout, p, &members[p]))
            .collect();
        let text = if plan.to_encode_text.is_empty() {
            None
        } else {
            let inputs: Vec<(PageId, PageParams)> = ordered
                .iter()
                .filter(|p| plan.to_encode_text.contains(*p))
                .map(|p| (p.clone(), members[p].clone()))
                .collect();
            let script = commands::text_encoder_settings(&registry, layout, &dictionary, &inputs);
            let target = registry.text_encoder_target(&dictionary, &layout.page_djvu(page));
            Some((script, target))
        };
        let assemble = plan
            .to_assemble
            .iter()
            .map(|p| commands::djvumake(tools, &registry, layout, p, &members[p]))
            .collect();
        let postprocess = plan
            .to_postprocess
            .iter()
            .map(|p| commands::djvused(tools, &layout.page_djvu(p), &commands::page_script(&members[p])))
            .collect();

        Ok(Some(GroupWork {
            dictionary,
            ordered,
            members,
            forced,
            plan,
            export,
            raster,
            text,
            assemble,
            postprocess,
        }))
    }

    // -- Execution ------------------------------------------------------------

    async fn execute(&self, subject: &PageId, work: &GroupWork, cancel: &CancellationToken) -> Result<()> {
        let run_cancel = cancel.child_token();

        let exporter = Arc::clone(&self.exporter);
        self.run_stage(subject, Stage::Export, work.export.clone(), &run_cancel, move |(page, info): (PageId, SourceImagesInfo), _cancel: CancellationToken| {
            let exporter = Arc::clone(&exporter);
            async move {
                tokio::task::spawn_blocking(move || exporter.export(&page, &info))
                    .await
                    .map_err(|e| PublishError::tool("export", format!("worker task failed: {e}")))?
            }
        })
        .await?;

        let (raster, text) = tokio::join!(
            async {
                let result = self.run_tools(subject, Stage::EncodeRaster, &work.raster, &run_cancel).await;
                if result.is_err() {
                    run_cancel.cancel();
                }
                result
            },
            async {
                let result = self.encode_text(subject, work.text.as_ref(), &run_cancel).await;
                if result.is_err() {
                    run_cancel.cancel();
                }
                result
            },
        );
        match (raster, text) {
            (Ok(()), Ok(())) => {}
            (Err(e), Ok(())) | (Ok(()), Err(e)) => return Err(e),
            (Err(a), Err(b)) => return Err(if a.is_cancelled() { b } else { a }),
        }

        self.run_tools(subject, Stage::Assemble, &work.assemble, &run_cancel).await?;
        self.run_tools(subject, Stage::Postprocess, &work.postprocess, &run_cancel).await?;
        Ok(())
    }

    async fn run_tools(
        &self,
        subject: &PageId,
        stage: Stage,
        invocations: &[ToolInvocation],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_stage(subject, stage, invocations.to_vec(), cancel, |inv: ToolInvocation, cancel: CancellationToken| async move {
            runner::run(&inv, &cancel).await
        })
        .await
    }

    /// Run one per-page stage on a worker pool bounded by
    /// `max_parallel_tools`. The first failure stops the remaining items.
    async fn run_stage<T, F, Fut>(
        &self,
        subject: &PageId,
        stage: Stage,
        items: Vec<T>,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(T, CancellationToken) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if items.is_empty() {
            self.progress.report(ProgressEvent::finished(subject, stage, StageState::Skipped));
            return Ok(());
        }

        let total = items.len();
        let stage_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tools.max(1)));
        let mut tasks = JoinSet::new();

        for item in items {
            let semaphore = Arc::clone(&semaphore);
            let cancel = stage_cancel.clone();
            let work = work.clone();
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.map_err(|_| PublishError::Cancelled)?,
                    _ = cancel.cancelled() => return Err(PublishError::Cancelled),
                };
                if cancel.is_cancelled() {
                    return Err(PublishError::Cancelled);
                }
                work(item, cancel).await
            });
        }

        let mut done = 0;
        let mut first_error: Option<PublishError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(PublishError::tool(stage.label(), format!("worker task failed: {e}"))));
            match result {
                Ok(()) => {
                    done += 1;
                    self.progress.report(ProgressEvent::fraction(subject, stage, done, total));
                }
                Err(err) => {
                    stage_cancel.cancel();
                    // Prefer the root cause over the cancellations it triggers.
                    let replace = first_error
                        .as_ref()
                        .is_none_or(|prev| prev.is_cancelled() && !err.is_cancelled());
                    if replace {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => {
                self.progress.report(ProgressEvent::finished(subject, stage, StageState::Failed));
                Err(err)
            }
            None => {
                self.progress.report(ProgressEvent::finished(subject, stage, StageState::Completed));
                Ok(())
            }
        }
    }

    /// One encoder run over the whole dictionary group.
    async fn encode_text(
        &self,
        subject: &PageId,
        job: Option<&(String, PathBuf)>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stage = Stage::EncodeText;
        let Some((script, target)) = job else {
            self.progress.report(ProgressEvent::finished(subject, stage, StageState::Skipped));
            return Ok(());
        };

        let mut settings = tempfile::NamedTempFile::new()?;
        settings.write_all(script.as_bytes())?;
        settings.flush()?;

        let inv = commands::minidjvu(&self.config.tools, &self.project.layout, settings.path(), target);
        let progress = Arc::clone(&self.progress);
        let result = runner::run_with_progress(&inv, cancel, |pct| {
            progress.report(ProgressEvent {
                page: subject.clone(),
                stage,
                state: StageState::InProgress(pct),
            });
        })
        .await;

        let state = if result.is_ok() {
            StageState::Completed
        } else {
            StageState::Failed
        };
        self.progress.report(ProgressEvent::finished(subject, stage, state));
        result
    }

    fn restore_force_flags(&self, forced: &BTreeSet<PageId>) {
        let Ok(store) = lock(&self.store, "parameter store") else {
            return;
        };
        for page in forced {
            if let Err(e) = store.invalidate(page, ForceReprocess::PAGE) {
                warn!(page = %page, error = %e, "could not restore force flag");
            }
        }
    }

    // -- Commit ---------------------------------------------------------------

    /// Record the results of a successful run.
    #[instrument(skip_all, fields(dictionary = %work.dictionary))]
    fn commit(&self, work: &GroupWork) -> Result<()> {
        let mut registry = lock(&self.registry, "dictionary registry")?;
        let store = lock(&self.store, "parameter store")?;
        let layout = &self.project.layout;
        let id = &work.dictionary;

        let mut stamps = Vec::with_capacity(work.ordered.len());
        for page in &work.ordered {
            let stamp = FileStamp::stat(layout.page_djvu(page));
            if stamp.modified.is_none() {
                return Err(PublishError::FilesystemInconsistency(stamp.path));
            }
            stamps.push(stamp);
        }

        if !id.is_sentinel() {
            let dict = registry.dictionary(id);
            let output = if dict.page_count() > 1 {
                layout.dictionary_file(id, &dict.params.extension)
            } else {
                work.ordered
                    .first()
                    .map(|p| layout.jb2(p))
                    .unwrap_or_else(|| layout.dictionary_file(id, &dict.params.extension))
            };
            registry.set_output(id, FileStamp::stat(output));
        }
        let dict = registry.dictionary(id);
        let (revision, dictionary_params) = (dict.revision, dict.params.clone());

        for (page, djvu) in work.ordered.iter().zip(stamps) {
            let mut used = work.members[page].clone();
            used.source_images.refresh();
            used.djvu = djvu;
            let remembered = RememberedOutputParams::new(&used, id.clone(), revision, dictionary_params.clone());

            let mut current = store.get(page)?.unwrap_or_else(|| used.clone());
            current.source_images = used.source_images;
            current.djvu = used.djvu;
            current.remembered = Some(Box::new(remembered));
            store.put(page, &current)?;
        }
        store.save_registry(&registry)?;
        debug!(pages = work.ordered.len(), "results recorded");
        Ok(())
    }
}
