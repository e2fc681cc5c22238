// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page ordering helpers for listings and batch runs.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use djvuwerk_core::error::Result;
use djvuwerk_core::types::{DictionaryId, PageId};

use crate::store::PageParamsStore;

/// Pages sorted for a size listing: pages without a finished DjVu file
/// first, then by ascending DjVu size, then by page id.
pub fn order_by_file_size(store: &PageParamsStore, pages: &[PageId]) -> Result<Vec<PageId>> {
    let mut keyed = Vec::with_capacity(pages.len());
    for page in pages {
        let (incomplete, size) = match store.get(page)? {
            Some(params) => (!params.is_djvu_cached(), params.djvu.size),
            None => (true, 0),
        };
        keyed.push((incomplete, size, page.clone()));
    }

    keyed.sort_by(|a, b| match (a.0, b.0) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)),
    });
    Ok(keyed.into_iter().map(|(_, _, page)| page).collect())
}

/// One representative page per shared dictionary, in project order.
/// Processing a representative rebuilds its whole group, so a batch run
/// only needs these. Pages without a dictionary, or in the sentinel, are
/// all kept.
pub fn batch_representatives(store: &PageParamsStore, pages: &[PageId]) -> Result<Vec<PageId>> {
    let mut seen: BTreeSet<DictionaryId> = BTreeSet::new();
    let mut out = Vec::new();
    for page in pages {
        match store.get(page)?.and_then(|p| p.dictionary_id) {
            Some(id) if !id.is_sentinel() => {
                if seen.insert(id) {
                    out.push(page.clone());
                }
            }
            _ => out.push(page.clone()),
        }
    }
    Ok(out)
}
