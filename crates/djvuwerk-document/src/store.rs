// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent per-page parameter store backed by SQLite.
//
// Each page's `PageParams` is stored as one JSON document keyed by the
// serialized `PageId`. Project-wide state (the dictionary registry, the
// bundled document stamp, document metadata) lives in a small key/value
// table next to it.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::types::{DictionaryParams, FileStamp, PageId, now_millis, timestamp};

use crate::params::{ForceReprocess, PageParams};
use crate::registry::{DictionaryRegistry, RegistryRecord};

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS page_params (
        page TEXT PRIMARY KEY,
        params TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS project_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

const REGISTRY_KEY: &str = "djbz_dispatcher";
const BUNDLE_KEY: &str = "bundled_doc";
const METADATA_KEY: &str = "metadata";

/// Persistent store of per-page parameters.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively. In an async context, wrap calls in `tokio::task::spawn_blocking`
/// or keep the critical section short.
pub struct PageParamsStore {
    conn: Connection,
}

impl PageParamsStore {
    /// Open (or create) the project database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| PublishError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PublishError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| PublishError::Database(format!("create tables: {e}")))?;

        info!("project database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PublishError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| PublishError::Database(format!("create tables: {e}")))?;

        debug!("in-memory project database opened");
        Ok(Self { conn })
    }

    fn page_key(page: &PageId) -> Result<String> {
        Ok(serde_json::to_string(page)?)
    }

    // -- Page parameters ------------------------------------------------------

    /// Parameters of `page`, or `None` if the page was never seen.
    pub fn get(&self, page: &PageId) -> Result<Option<PageParams>> {
        let key = Self::page_key(page)?;
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT params FROM page_params WHERE page = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| PublishError::Database(format!("get params: {e}")))?;

        json.map(|j| serde_json::from_str(&j).map_err(PublishError::from))
            .transpose()
    }

    /// Insert or replace the parameters of `page`.
    #[instrument(skip(self, params), fields(page = %page))]
    pub fn put(&self, page: &PageId, params: &PageParams) -> Result<()> {
        let key = Self::page_key(page)?;
        let json = serde_json::to_string(params)?;
        self.conn
            .execute(
                "INSERT INTO page_params (page, params, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(page) DO UPDATE SET params = excluded.params,
                 updated_at = excluded.updated_at",
                params![key, json, timestamp::format(&now_millis())],
            )
            .map_err(|e| PublishError::Database(format!("put params: {e}")))?;

        debug!(page = %page, "page params stored");
        Ok(())
    }

    /// Forget a page. Returns whether it existed.
    pub fn remove(&self, page: &PageId) -> Result<bool> {
        let key = Self::page_key(page)?;
        let rows = self
            .conn
            .execute("DELETE FROM page_params WHERE page = ?1", params![key])
            .map_err(|e| PublishError::Database(format!("remove params: {e}")))?;
        Ok(rows > 0)
    }

    /// Every page with stored parameters, in page order.
    pub fn pages(&self) -> Result<Vec<PageId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT page FROM page_params")
            .map_err(|e| PublishError::Database(format!("prepare: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| PublishError::Database(format!("query pages: {e}")))?;

        let mut pages = Vec::new();
        for row in rows {
            let key = row.map_err(|e| PublishError::Database(format!("read row: {e}")))?;
            pages.push(serde_json::from_str::<PageId>(&key)?);
        }
        pages.sort();
        Ok(pages)
    }

    /// Set force-reprocess flags on a page. Returns false if the page has no
    /// parameters yet (it will be processed anyway).
    pub fn invalidate(&self, page: &PageId, flags: ForceReprocess) -> Result<bool> {
        match self.get(page)? {
            Some(mut params) => {
                params.force.insert(flags);
                self.put(page, &params)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Every page has a remembered build made with its current settings,
    /// no pending force flag, and its DjVu file still on disk.
    pub fn pages_ready(&self, pages: &[PageId]) -> Result<bool> {
        for page in pages {
            let ready = self.get(page)?.is_some_and(|p| {
                p.force.is_empty()
                    && p.used_params().is_some_and(|used| p.settings_match(used))
                    && p.is_djvu_cached()
            });
            if !ready {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -- Project state --------------------------------------------------------

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM project_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| PublishError::Database(format!("get {key}: {e}")))
    }

    fn put_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO project_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| PublishError::Database(format!("put {key}: {e}")))?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn save_registry(&self, registry: &DictionaryRegistry) -> Result<()> {
        let json = serde_json::to_string(&registry.to_record())?;
        self.put_state(REGISTRY_KEY, &json)?;
        debug!("dictionary registry saved");
        Ok(())
    }

    /// Load the saved registry and replay every page's persisted dictionary
    /// assignment without bumping revisions.
    #[instrument(skip_all)]
    pub fn load_registry(&self, defaults: DictionaryParams, pages_per_dictionary: usize) -> Result<DictionaryRegistry> {
        let mut registry = match self.get_state(REGISTRY_KEY)? {
            Some(json) => {
                let record: RegistryRecord = serde_json::from_str(&json)?;
                DictionaryRegistry::from_record(&record, defaults)?
            }
            None => DictionaryRegistry::new(defaults),
        };

        for page in self.pages()? {
            if let Some(id) = self.get(&page)?.and_then(|p| p.dictionary_id) {
                registry.restore_assignment(&page, &id, pages_per_dictionary);
            }
        }
        info!(dictionaries = registry.list().len(), "dictionary registry loaded");
        Ok(registry)
    }

    /// Stamp of the last bundled document, if one was ever built.
    pub fn bundle_stamp(&self) -> Result<Option<FileStamp>> {
        self.get_state(BUNDLE_KEY)?
            .map(|json| serde_json::from_str(&json).map_err(PublishError::from))
            .transpose()
    }

    pub fn set_bundle_stamp(&self, stamp: &FileStamp) -> Result<()> {
        self.put_state(BUNDLE_KEY, &serde_json::to_string(stamp)?)
    }

    /// The bundled document is missing or was changed on disk.
    pub fn bundle_needs_update(&self) -> Result<bool> {
        Ok(!self.bundle_stamp()?.is_some_and(|s| s.matches_disk()))
    }

    /// Document-level metadata written into the bundle.
    pub fn metadata(&self) -> Result<BTreeMap<String, String>> {
        match self.get_state(METADATA_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn set_metadata(&self, metadata: &BTreeMap<String, String>) -> Result<()> {
        self.put_state(METADATA_KEY, &serde_json::to_string(metadata)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djvuwerk_core::types::{DictionaryId, SubPage, now_millis};

    fn store() -> PageParamsStore {
        PageParamsStore::open_in_memory().expect("open in-memory store")
    }

    #[test]
    fn put_get_remove() {
        let store = store();
        let page = PageId::new("/scans/p01.tif", SubPage::Left);
        assert!(store.get(&page).expect("get").is_none());

        let params = PageParams {
            title: "Cover".into(),
            ..PageParams::default()
        };
        store.put(&page, &params).expect("put");
        assert_eq!(store.get(&page).expect("get"), Some(params.clone()));

        let updated = PageParams { rotation: 2, ..params };
        store.put(&page, &updated).expect("update");
        assert_eq!(store.get(&page).expect("get").map(|p| p.rotation), Some(2));

        assert!(store.remove(&page).expect("remove"));
        assert!(!store.remove(&page).expect("remove again"));
    }

    #[test]
    fn pages_are_sorted() {
        let store = store();
        for name in ["c.tif", "a.tif", "b.tif"] {
            store.put(&PageId::single(name), &PageParams::default()).expect("put");
        }
        let pages = store.pages().expect("pages");
        assert_eq!(
            pages,
            vec![PageId::single("a.tif"), PageId::single("b.tif"), PageId::single("c.tif")]
        );
    }

    #[test]
    fn invalidate_sets_flags_on_known_pages_only() {
        let store = store();
        let page = PageId::single("p.tif");
        assert!(!store.invalidate(&page, ForceReprocess::PAGE).expect("invalidate"));

        store.put(&page, &PageParams::default()).expect("put");
        assert!(store.invalidate(&page, ForceReprocess::PAGE).expect("invalidate"));
        let params = store.get(&page).expect("get").expect("params");
        assert!(params.force.contains(ForceReprocess::PAGE));
    }

    #[test]
    fn registry_round_trips_with_replayed_assignments() {
        let store = store();
        let mut registry = DictionaryRegistry::new(DictionaryParams::default());
        let page = PageId::single("p.tif");
        let id = registry.assign_new_page(&page, 10);
        let revision = registry.dictionary(&id).revision;

        store
            .put(
                &page,
                &PageParams {
                    dictionary_id: Some(id.clone()),
                    ..PageParams::default()
                },
            )
            .expect("put");
        store.save_registry(&registry).expect("save");

        let loaded = store
            .load_registry(DictionaryParams::default(), 10)
            .expect("load");
        assert_eq!(loaded.dictionary_of(&page), Some(&id));
        assert_eq!(loaded.dictionary(&id).revision, revision);
    }

    #[test]
    fn missing_dictionary_is_recreated_on_load() {
        let store = store();
        let page = PageId::single("p.tif");
        store
            .put(
                &page,
                &PageParams {
                    dictionary_id: Some(DictionaryId::new("0042")),
                    ..PageParams::default()
                },
            )
            .expect("put");

        let loaded = store
            .load_registry(DictionaryParams::default(), 10)
            .expect("load");
        assert_eq!(loaded.dictionary_of(&page), Some(&DictionaryId::new("0042")));
    }

    #[test]
    fn bundle_needs_update_until_stamped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = dir.path().join("book.djvu");
        std::fs::write(&bundle, b"AT&TFORM").expect("write");

        let store = store();
        assert!(store.bundle_needs_update().expect("check"));
        store.set_bundle_stamp(&FileStamp::stat(&bundle)).expect("stamp");
        assert!(!store.bundle_needs_update().expect("check"));

        std::fs::write(&bundle, b"AT&TFORM grown").expect("write");
        assert!(store.bundle_needs_update().expect("check"));
    }

    #[test]
    fn edited_page_is_not_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let djvu = dir.path().join("p.djvu");
        std::fs::write(&djvu, b"AT&TFORM").expect("write");

        let store = store();
        let page = PageId::single("p.tif");
        let mut params = PageParams {
            djvu: FileStamp::stat(&djvu),
            ..PageParams::default()
        };
        assert!(!store.pages_ready(std::slice::from_ref(&page)).expect("never built"));

        params.remember(DictionaryId::sentinel(), now_millis(), DictionaryParams::default());
        store.put(&page, &params).expect("put");
        assert!(store.pages_ready(std::slice::from_ref(&page)).expect("built"));

        params.title = "Index".into();
        store.put(&page, &params).expect("put");
        assert!(!store.pages_ready(std::slice::from_ref(&page)).expect("edited"));

        params.title.clear();
        params.force = ForceReprocess::PAGE;
        store.put(&page, &params).expect("put");
        assert!(!store.pages_ready(std::slice::from_ref(&page)).expect("forced"));
    }

    #[test]
    fn metadata_defaults_to_empty() {
        let store = store();
        assert!(store.metadata().expect("metadata").is_empty());

        let meta = BTreeMap::from([("author".to_owned(), "Anon".to_owned())]);
        store.set_metadata(&meta).expect("set");
        assert_eq!(store.metadata().expect("metadata"), meta);
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("project.db");
        let page = PageId::single("p.tif");
        {
            let store = PageParamsStore::open(&path).expect("open");
            store.put(&page, &PageParams::default()).expect("put");
        }
        let store = PageParamsStore::open(&path).expect("reopen");
        assert!(store.get(&page).expect("get").is_some());
    }
}
