// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bundled multi-page document.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use djvuwerk_core::config::ToolPaths;
use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::types::{FileStamp, PageId};
use djvuwerk_document::{OutputLayout, PageParams, PageParamsStore};

use crate::commands;
use crate::orchestrator::lock;
use crate::runner;

/// File receiving the document metadata, inside the pages directory.
pub const META_FILE: &str = "document.meta";

/// Builds the bundled document. Only one build runs at a time.
#[derive(Debug)]
pub struct Bundler {
    tools: ToolPaths,
    busy: AtomicBool,
}

/// Clears the busy flag when dropped.
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Bundler {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<BuildGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PublishError::BundleInProgress)?;
        Ok(BuildGuard(&self.busy))
    }

    /// Bundle `pages`, in order, into `target`, then apply page titles,
    /// rotations and document metadata. Records the bundle's stamp in the
    /// store and returns it.
    #[instrument(skip_all, fields(target = %target.display(), pages = pages.len()))]
    pub async fn build(
        &self,
        store: &Mutex<PageParamsStore>,
        layout: &OutputLayout,
        pages: &[PageId],
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileStamp> {
        let _guard = self.begin()?;

        let (params, metadata) = {
            let store = lock(store, "parameter store")?;
            let mut params = Vec::with_capacity(pages.len());
            for page in pages {
                let page_params = store.get(page)?.ok_or_else(|| {
                    PublishError::Configuration(format!("page {page} has never been processed"))
                })?;
                params.push(page_params);
            }
            (params, store.metadata()?)
        };

        let files = page_files(layout, pages, &params)?;
        runner::run(&commands::djvm(&self.tools, target, &files), cancel).await?;

        let meta_path = layout.djvu_dir.join(META_FILE);
        let meta_file = if metadata.is_empty() {
            if tokio::fs::try_exists(&meta_path).await.unwrap_or(false) {
                tokio::fs::remove_file(&meta_path).await?;
            }
            None
        } else {
            tokio::fs::write(&meta_path, commands::metadata_file(&metadata)).await?;
            Some(meta_path.as_path())
        };

        let script = commands::bundle_script(&params, meta_file);
        if !script.is_empty() {
            runner::run(&commands::djvused(&self.tools, target, &script), cancel).await?;
        }

        let stamp = FileStamp::stat(target);
        if stamp.modified.is_none() {
            return Err(PublishError::FilesystemInconsistency(target.to_path_buf()));
        }
        lock(store, "parameter store")?.set_bundle_stamp(&stamp)?;
        info!(size = stamp.size, "bundled document written");
        Ok(stamp)
    }
}

/// Page DjVu files in bundle order. Every one must exist.
fn page_files(layout: &OutputLayout, pages: &[PageId], params: &[PageParams]) -> Result<Vec<PathBuf>> {
    pages
        .iter()
        .zip(params)
        .map(|(page, params)| {
            let path = if params.djvu.is_empty() {
                layout.page_djvu(page)
            } else {
                params.djvu.path.clone()
            };
            if path.is_file() {
                Ok(path)
            } else {
                Err(PublishError::FilesystemInconsistency(path))
            }
        })
        .collect()
}
