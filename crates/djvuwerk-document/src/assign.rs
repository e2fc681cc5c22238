// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Automatic dictionary assignment across the whole project.

use tracing::{debug, info, instrument};

use djvuwerk_core::error::Result;
use djvuwerk_core::types::{DictionaryId, ExportSuggestions, PageId};

use crate::params::PageParams;
use crate::registry::DictionaryRegistry;
use crate::store::PageParamsStore;

/// Make every page's dictionary agree with its content: pages without a
/// bitonal layer belong to the sentinel, pages with one to a real
/// dictionary (unless sharing is disabled). Mismatched pages are unassigned
/// and placed again; the new id is persisted.
///
/// Persisted ids the registry does not know yet are replayed quietly.
/// Returns the number of pages whose assignment changed; a second call with
/// unchanged inputs returns 0 and mutates nothing.
#[instrument(skip_all, fields(pages = pages.len()))]
pub fn auto_assign(
    registry: &mut DictionaryRegistry,
    store: &PageParamsStore,
    pages: &[PageId],
    suggestions: &ExportSuggestions,
    pages_per_dictionary: usize,
) -> Result<usize> {
    let sharing = pages_per_dictionary >= 2;
    let mut changed = 0;

    for page in pages {
        let has_bw = suggestions.get(page).is_some_and(|s| s.has_bw_layer);
        let mut params = store.get(page)?;
        let persisted = params.as_ref().and_then(|p| p.dictionary_id.clone());

        if let Some(id) = &persisted {
            if registry.dictionary_of(page).is_none() {
                registry.restore_assignment(page, id, pages_per_dictionary);
            }
        }

        let current = registry.dictionary_of(page).cloned();
        let mismatch = match &current {
            None => true,
            Some(id) if id.is_sentinel() => has_bw && sharing,
            Some(_) => !has_bw,
        };

        let assigned = if mismatch || persisted.is_none() {
            if mismatch {
                registry.remove_page(page);
            }
            if has_bw {
                registry.assign_new_page(page, pages_per_dictionary)
            } else {
                let sentinel = DictionaryId::sentinel();
                registry.move_to_dictionary(page, &sentinel);
                sentinel
            }
        } else {
            match current {
                Some(id) => id,
                None => continue,
            }
        };

        if persisted.as_ref() != Some(&assigned) {
            debug!(page = %page, dictionary = %assigned, "page assigned");
            let params = params.get_or_insert_with(PageParams::default);
            params.dictionary_id = Some(assigned);
            store.put(page, params)?;
            changed += 1;
        }
    }

    if changed > 0 {
        info!(changed, "dictionary assignments updated");
    }
    Ok(changed)
}

/// Rebuild every non-locked dictionary from scratch with the given capacity.
/// Pages in locked dictionaries keep their assignment.
#[instrument(skip_all, fields(pages = pages.len(), pages_per_dictionary))]
pub fn reassign_all_except_locked(
    registry: &mut DictionaryRegistry,
    store: &PageParamsStore,
    pages: &[PageId],
    suggestions: &ExportSuggestions,
    pages_per_dictionary: usize,
) -> Result<usize> {
    registry.reset_non_locked();

    for page in pages {
        let Some(mut params) = store.get(page)? else {
            continue;
        };
        let kept = registry.dictionary_of(page).cloned();
        if params.dictionary_id != kept {
            params.dictionary_id = kept;
            store.put(page, &params)?;
        }
    }

    auto_assign(registry, store, pages, suggestions, pages_per_dictionary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DictionaryKind;
    use djvuwerk_core::types::{DictionaryParams, ExportSuggestion};

    fn page(n: u32) -> PageId {
        PageId::single(format!("p{n:02}.tif"))
    }

    fn suggestions(layers: &[(bool, bool)]) -> (Vec<PageId>, ExportSuggestions) {
        let mut map = ExportSuggestions::new();
        let mut pages = Vec::new();
        for (n, (bw, color)) in layers.iter().enumerate() {
            let p = page(n as u32 + 1);
            map.insert(
                p.clone(),
                ExportSuggestion {
                    has_bw_layer: *bw,
                    has_color_layer: *color,
                    width: 1,
                    height: 1,
                    dpi: 300,
                },
            );
            pages.push(p);
        }
        (pages, map)
    }

    fn snapshot(registry: &DictionaryRegistry, store: &PageParamsStore, pages: &[PageId]) -> String {
        let params: Vec<_> = pages.iter().map(|p| store.get(p).expect("get")).collect();
        format!("{:?}{:?}", registry.to_record(), params)
    }

    #[test]
    fn is_idempotent() {
        let (pages, map) = suggestions(&[(true, false), (true, true), (false, true), (false, false)]);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());

        assert_eq!(auto_assign(&mut registry, &store, &pages, &map, 25).expect("first"), 4);
        let before = snapshot(&registry, &store, &pages);

        assert_eq!(auto_assign(&mut registry, &store, &pages, &map, 25).expect("second"), 0);
        assert_eq!(snapshot(&registry, &store, &pages), before);
    }

    #[test]
    fn colour_only_page_goes_to_sentinel() {
        let (pages, map) = suggestions(&[(false, true)]);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());

        let d = registry.create_dictionary(DictionaryKind::AutoFill, 25);
        registry.move_to_dictionary(&pages[0], &d);
        store
            .put(
                &pages[0],
                &PageParams {
                    dictionary_id: Some(d.clone()),
                    ..PageParams::default()
                },
            )
            .expect("put");

        auto_assign(&mut registry, &store, &pages, &map, 25).expect("assign");

        assert_eq!(registry.dictionary_of(&pages[0]), Some(&DictionaryId::sentinel()));
        assert!(!registry.members_of(&d).contains(&pages[0]));
        let stored = store.get(&pages[0]).expect("get").expect("params");
        assert_eq!(stored.dictionary_id, Some(DictionaryId::sentinel()));
    }

    #[test]
    fn text_page_leaves_sentinel_when_sharing() {
        let (pages, map) = suggestions(&[(true, false)]);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());
        store
            .put(
                &pages[0],
                &PageParams {
                    dictionary_id: Some(DictionaryId::sentinel()),
                    ..PageParams::default()
                },
            )
            .expect("put");

        auto_assign(&mut registry, &store, &pages, &map, 25).expect("assign");
        assert_eq!(registry.dictionary_of(&pages[0]), Some(&DictionaryId::numbered(1)));
    }

    #[test]
    fn disabled_sharing_is_stable() {
        let (pages, map) = suggestions(&[(true, false), (true, false)]);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());

        auto_assign(&mut registry, &store, &pages, &map, 1).expect("first");
        assert_eq!(registry.dictionary_of(&pages[1]), Some(&DictionaryId::sentinel()));
        assert_eq!(auto_assign(&mut registry, &store, &pages, &map, 1).expect("second"), 0);
    }

    #[test]
    fn persisted_ids_are_replayed_without_revision_bump() {
        let (pages, map) = suggestions(&[(true, false)]);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());
        let saved = DictionaryId::new("0007");
        store
            .put(
                &pages[0],
                &PageParams {
                    dictionary_id: Some(saved.clone()),
                    ..PageParams::default()
                },
            )
            .expect("put");

        assert_eq!(auto_assign(&mut registry, &store, &pages, &map, 25).expect("assign"), 0);
        assert_eq!(registry.dictionary_of(&pages[0]), Some(&saved));
    }

    #[test]
    fn reassign_keeps_locked_and_refills_the_rest() {
        let (pages, map) = suggestions(&[(true, false), (true, false), (true, false)]);
        let store = PageParamsStore::open_in_memory().expect("store");
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());
        auto_assign(&mut registry, &store, &pages, &map, 25).expect("assign");

        let locked = registry.create_dictionary(DictionaryKind::Locked, 5);
        registry.move_to_dictionary(&pages[1], &locked);
        let mut params = store.get(&pages[1]).expect("get").expect("params");
        params.dictionary_id = Some(locked.clone());
        store.put(&pages[1], &params).expect("put");

        reassign_all_except_locked(&mut registry, &store, &pages, &map, 2).expect("reassign");

        assert_eq!(registry.dictionary_of(&pages[1]), Some(&locked));
        let first = registry.dictionary_of(&pages[0]).cloned().expect("assigned");
        assert_eq!(registry.dictionary_of(&pages[2]), Some(&first));
        assert_eq!(registry.dictionary(&first).max_pages, 2);
    }
}
