// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Parameter validation ahead of stage planning.

use tracing::debug;

use djvuwerk_core::error::Result;
use djvuwerk_core::types::{DictionaryId, PageId};

use crate::params::PageParams;
use crate::project::Project;
use crate::registry::DictionaryRegistry;
use crate::source_images::SourceImagesInfo;
use crate::store::PageParamsStore;

/// Bring `page` into a consistent state: parameters exist, the page has a
/// dictionary, and its source-image snapshot reflects the disk. Every fix is
/// persisted immediately.
pub fn validate(
    registry: &mut DictionaryRegistry,
    store: &PageParamsStore,
    project: &Project,
    page: &PageId,
) -> Result<PageParams> {
    let mut params = match store.get(page)? {
        Some(params) => params,
        None => {
            let params = PageParams::default();
            store.put(page, &params)?;
            debug!(page = %page, "default params created");
            params
        }
    };
    params.check()?;

    let assigned = match registry.dictionary_of(page).cloned() {
        Some(id) => id,
        None if project.suggestion(page).has_bw_layer => {
            registry.assign_new_page(page, project.pages_per_dictionary)
        }
        None => {
            let sentinel = DictionaryId::sentinel();
            registry.move_to_dictionary(page, &sentinel);
            sentinel
        }
    };
    if params.dictionary_id.as_ref() != Some(&assigned) {
        debug!(page = %page, dictionary = %assigned, "dictionary assignment recorded");
        params.dictionary_id = Some(assigned);
        store.put(page, &params)?;
    }

    let fresh = SourceImagesInfo::compute(page, &project.layout, &project.suggestions);
    if !params.source_images.is_valid() || params.source_images != fresh {
        params.source_images = fresh;
        store.put(page, &params)?;
    }

    Ok(params)
}

/// Validate every member of the subject's dictionary except the subject,
/// which the caller has validated already.
pub fn validate_group(
    registry: &mut DictionaryRegistry,
    store: &PageParamsStore,
    project: &Project,
    subject: &PageId,
) -> Result<()> {
    for page in registry.members_of_same(subject) {
        if page != *subject {
            validate(registry, store, project, &page)?;
        }
    }
    Ok(())
}
