// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Opening a project: configuration, export suggestions, parameter store and
// the publishing engine on top of them.
//
// The suggestions file is a JSON list in project order, one entry per page:
//
//   [{ "path": "scan_0001.tif", "sub_page": "left",
//      "has_bw_layer": true, "has_color_layer": false,
//      "width": 2480, "height": 3508, "dpi": 600 }, ...]

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use djvuwerk_core::config::PublishConfig;
use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::types::{ExportSuggestion, ExportSuggestions, PageId, SubPage};
use djvuwerk_document::{OutputLayout, PageParamsStore, Project};
use djvuwerk_encode::Publisher;

use super::project_dir::ProjectDir;

/// One entry of the suggestions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionEntry {
    pub path: std::path::PathBuf,
    #[serde(default = "single")]
    pub sub_page: SubPage,
    #[serde(flatten)]
    pub suggestion: ExportSuggestion,
}

fn single() -> SubPage {
    SubPage::Single
}

impl SuggestionEntry {
    pub fn page(&self) -> PageId {
        PageId::new(self.path.clone(), self.sub_page)
    }
}

/// Read the suggestions file. Returns the suggestions and the page order.
pub fn load_suggestions(path: &Path) -> Result<(ExportSuggestions, Vec<PageId>)> {
    let data = std::fs::read_to_string(path)?;
    let entries: Vec<SuggestionEntry> = serde_json::from_str(&data)?;

    let mut suggestions = ExportSuggestions::new();
    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        let page = entry.page();
        if suggestions.insert(page.clone(), entry.suggestion).is_some() {
            return Err(PublishError::Configuration(format!(
                "page {page} is listed twice in {}",
                path.display()
            )));
        }
        order.push(page);
    }
    Ok((suggestions, order))
}

/// Parse a page argument: `scan.tif`, `scan.tif#left` or `scan.tif#right`.
pub fn parse_page(arg: &str) -> std::result::Result<PageId, String> {
    match arg.rsplit_once('#') {
        Some((path, side)) => {
            let sub_page = SubPage::parse(side)
                .ok_or_else(|| format!("unknown sub-page `{side}` (expected single, left or right)"))?;
            Ok(PageId::new(path, sub_page))
        }
        None => Ok(PageId::single(arg)),
    }
}

/// Everything a command needs.
pub struct Workspace {
    pub dir: ProjectDir,
    pub config: PublishConfig,
    pub publisher: Publisher,
}

impl Workspace {
    #[instrument(skip_all, fields(project = %dir.root.display()))]
    pub fn open(dir: ProjectDir, suggestions_file: &Path) -> Result<Self> {
        dir.create()?;
        let config = PublishConfig::load_or_default(&dir.root);
        let (suggestions, order) = load_suggestions(suggestions_file)?;

        let layout = OutputLayout::new(&dir.out_dir, &config);
        let project = Project::new(layout, suggestions, config.pages_per_dictionary).with_order(order);
        let store = PageParamsStore::open(&dir.database)?;
        let publisher = Publisher::new(store, project, config.clone())?;

        info!(
            pages = publisher.project().pages.len(),
            out_dir = %dir.out_dir.display(),
            "project opened"
        );
        Ok(Self {
            dir,
            config,
            publisher,
        })
    }

    /// Persist a new dictionary capacity for later runs.
    pub fn save_pages_per_dictionary(&mut self, pages_per_dictionary: usize) -> Result<()> {
        self.config.pages_per_dictionary = pages_per_dictionary;
        self.config.save(&self.dir.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_arguments() {
        assert_eq!(parse_page("a.tif").expect("page"), PageId::single("a.tif"));
        assert_eq!(
            parse_page("scans/a.tif#right").expect("page"),
            PageId::new("scans/a.tif", SubPage::Right)
        );
        assert!(parse_page("a.tif#middle").is_err());
    }

    #[test]
    fn suggestions_keep_file_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pages.json");
        std::fs::write(
            &path,
            r#"[
                {"path": "b.tif", "has_bw_layer": true, "has_color_layer": false,
                 "width": 100, "height": 200, "dpi": 300},
                {"path": "a.tif", "sub_page": "left", "has_bw_layer": false,
                 "has_color_layer": true, "width": 100, "height": 200, "dpi": 300}
            ]"#,
        )
        .expect("write");

        let (suggestions, order) = load_suggestions(&path).expect("load");
        assert_eq!(order, vec![PageId::single("b.tif"), PageId::new("a.tif", SubPage::Left)]);
        assert!(suggestions[&PageId::single("b.tif")].has_bw_layer);
        assert_eq!(suggestions[&PageId::new("a.tif", SubPage::Left)].height, 200);
    }

    #[test]
    fn duplicate_pages_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pages.json");
        let entry = r#"{"path": "a.tif", "has_bw_layer": true, "has_color_layer": false,
                        "width": 1, "height": 1, "dpi": 300}"#;
        std::fs::write(&path, format!("[{entry},{entry}]")).expect("write");

        assert!(matches!(load_suggestions(&path), Err(PublishError::Configuration(_))));
    }

    #[test]
    fn opens_a_fresh_project() {
        let dir = tempfile::tempdir().expect("tempdir");
        let suggestions = dir.path().join("pages.json");
        std::fs::write(
            &suggestions,
            r#"[{"path": "a.tif", "has_bw_layer": true, "has_color_layer": false,
                 "width": 10, "height": 10, "dpi": 300}]"#,
        )
        .expect("write");

        let project = ProjectDir::resolve(&dir.path().join("book"), None);
        let workspace = Workspace::open(project, &suggestions).expect("open");
        assert!(workspace.dir.database.is_file());
        assert_eq!(workspace.publisher.project().pages, vec![PageId::single("a.tif")]);
    }
}
