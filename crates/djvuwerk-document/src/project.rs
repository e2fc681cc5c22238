// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Read-only description of the project being published.

use djvuwerk_core::types::{ExportSuggestion, ExportSuggestions, PageId};

use crate::source_images::OutputLayout;

/// Pages in project order, their export suggestions and the output layout.
#[derive(Debug, Clone)]
pub struct Project {
    pub layout: OutputLayout,
    pub suggestions: ExportSuggestions,
    /// Project (reading) order. Every page here has a suggestion.
    pub pages: Vec<PageId>,
    /// Capacity of newly created dictionaries; below 2 disables sharing.
    pub pages_per_dictionary: usize,
}

impl Project {
    /// Project whose page order is the `PageId` order of `suggestions`.
    pub fn new(layout: OutputLayout, suggestions: ExportSuggestions, pages_per_dictionary: usize) -> Self {
        let pages = suggestions.keys().cloned().collect();
        Self {
            layout,
            suggestions,
            pages,
            pages_per_dictionary,
        }
    }

    /// Override the page order. Pages without a suggestion are dropped.
    pub fn with_order(mut self, pages: Vec<PageId>) -> Self {
        self.pages = pages
            .into_iter()
            .filter(|p| self.suggestions.contains_key(p))
            .collect();
        self
    }

    /// Suggestion for `page`; an unknown page counts as blank.
    pub fn suggestion(&self, page: &PageId) -> ExportSuggestion {
        self.suggestions.get(page).copied().unwrap_or_default()
    }

    pub fn contains(&self, page: &PageId) -> bool {
        self.suggestions.contains_key(page)
    }
}
