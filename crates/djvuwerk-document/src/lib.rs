// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// djvuwerk-document: dictionary registry, page parameters and staleness
// analysis for the djvuwerk publishing engine.
//
// Everything here is synchronous and free of external processes: the
// encoder pipeline in `djvuwerk-encode` drives these types.

pub mod assign;
pub mod ordering;
pub mod params;
pub mod project;
pub mod registry;
pub mod source_images;
pub mod staleness;
pub mod store;
pub mod validate;

// Re-export the primary types so callers can use `djvuwerk_document::DictionaryRegistry` etc.
pub use params::{ColorRect, ForceReprocess, PageParams, RememberedOutputParams, ScaleMethod};
pub use project::Project;
pub use registry::{Dictionary, DictionaryKind, DictionaryRegistry};
pub use source_images::{OutputLayout, SizedFile, SourceImagesInfo};
pub use staleness::{Decision, PageStatus, StalenessAnalyzer, page_status};
pub use store::PageParamsStore;
