// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dictionary registry: which pages share which symbol dictionary.
//
// The registry owns both directions of the page <-> dictionary relation and
// only exposes paired mutations, so a page is never a member of two
// dictionaries and every assigned page points at an existing dictionary.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use djvuwerk_core::error::{PublishError, Result};
use djvuwerk_core::types::{DictionaryId, DictionaryParams, FileStamp, PageId, next_revision, now_millis, timestamp};

/// How a dictionary takes part in automatic assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DictionaryKind {
    /// Filled with new pages until `max_pages` is reached.
    AutoFill,
    /// Membership is user-managed and survives a full reassignment.
    Locked,
    /// The sentinel: pages encoded without a shared dictionary.
    None,
}

impl DictionaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoFill => "auto",
            Self::Locked => "locked",
            Self::None => "no_dict",
        }
    }

    /// Unknown names are treated as `auto`.
    pub fn parse(value: &str) -> Self {
        match value {
            "locked" => Self::Locked,
            "no_dict" => Self::None,
            _ => Self::AutoFill,
        }
    }
}

/// One shared dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    pub id: DictionaryId,
    pub kind: DictionaryKind,
    pub max_pages: usize,
    pub members: BTreeSet<PageId>,
    pub params: DictionaryParams,
    /// Bumped whenever membership or params change.
    pub revision: DateTime<Utc>,
    /// Encoded dictionary file as last produced.
    pub output: FileStamp,
}

impl Dictionary {
    fn new(id: DictionaryId, kind: DictionaryKind, max_pages: usize, params: DictionaryParams) -> Self {
        Self {
            id,
            kind,
            max_pages,
            members: BTreeSet::new(),
            params,
            revision: now_millis(),
            output: FileStamp::default(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.members.len()
    }

    fn bump(&mut self) {
        self.revision = next_revision(self.revision);
    }

    fn add(&mut self, page: PageId, bump: bool) {
        self.members.insert(page);
        if self.members.len() > self.max_pages {
            self.max_pages = self.members.len();
        }
        if bump {
            self.bump();
        }
    }

    fn remove(&mut self, page: &PageId, bump: bool) {
        if self.members.remove(page) && bump {
            self.bump();
        }
    }
}

/// Owner of every dictionary and of the page -> dictionary map.
#[derive(Debug, Clone)]
pub struct DictionaryRegistry {
    dictionaries: BTreeMap<DictionaryId, Dictionary>,
    page_to_dictionary: BTreeMap<PageId, DictionaryId>,
    counter: u32,
    defaults: DictionaryParams,
}

impl DictionaryRegistry {
    /// Empty registry holding only the sentinel.
    pub fn new(defaults: DictionaryParams) -> Self {
        let mut registry = Self {
            dictionaries: BTreeMap::new(),
            page_to_dictionary: BTreeMap::new(),
            counter: 0,
            defaults,
        };
        registry.ensure_sentinel();
        registry
    }

    fn ensure_sentinel(&mut self) {
        let defaults = self.defaults.clone();
        self.dictionaries
            .entry(DictionaryId::sentinel())
            .or_insert_with(|| Dictionary::new(DictionaryId::sentinel(), DictionaryKind::None, 0, defaults))
            .kind = DictionaryKind::None;
    }

    fn next_id(&mut self) -> DictionaryId {
        loop {
            self.counter += 1;
            let id = DictionaryId::numbered(self.counter);
            if !self.dictionaries.contains_key(&id) {
                return id;
            }
        }
    }

    fn dictionary_mut(&mut self, id: &DictionaryId) -> &mut Dictionary {
        match self.dictionaries.get_mut(id) {
            Some(dict) => dict,
            None => panic!("unknown dictionary id {id}"),
        }
    }

    // -- Mutations ------------------------------------------------------------

    /// Place a page that has no assignment yet.
    ///
    /// Picks the first auto-fill dictionary in id order with spare capacity,
    /// otherwise mints a new one. With `pages_per_dictionary < 2` sharing is
    /// off and the page goes to the sentinel.
    pub fn assign_new_page(&mut self, page: &PageId, pages_per_dictionary: usize) -> DictionaryId {
        if pages_per_dictionary < 2 {
            self.set_to_dictionary(page, &DictionaryId::sentinel(), true);
            return DictionaryId::sentinel();
        }

        if let Some(id) = self.page_to_dictionary.get(page) {
            return id.clone();
        }

        let existing = self
            .dictionaries
            .values()
            .find(|d| d.kind == DictionaryKind::AutoFill && d.page_count() < d.max_pages)
            .map(|d| d.id.clone());

        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_id();
                let dict = Dictionary::new(
                    id.clone(),
                    DictionaryKind::AutoFill,
                    pages_per_dictionary,
                    self.defaults.clone(),
                );
                self.dictionaries.insert(id.clone(), dict);
                debug!(dictionary = %id, "minted dictionary");
                id
            }
        };

        self.dictionary_mut(&id).add(page.clone(), true);
        self.page_to_dictionary.insert(page.clone(), id.clone());
        id
    }

    fn set_to_dictionary(&mut self, page: &PageId, id: &DictionaryId, bump: bool) {
        if self.page_to_dictionary.get(page) == Some(id) {
            return;
        }
        if let Some(old) = self.page_to_dictionary.remove(page) {
            if let Some(dict) = self.dictionaries.get_mut(&old) {
                dict.remove(page, bump);
            }
        }
        self.dictionary_mut(id).add(page.clone(), bump);
        self.page_to_dictionary.insert(page.clone(), id.clone());
    }

    /// Move `page` to `id`, bumping both revisions. No-op if already there.
    ///
    /// Panics if `id` is unknown.
    pub fn move_to_dictionary(&mut self, page: &PageId, id: &DictionaryId) {
        self.set_to_dictionary(page, id, true);
    }

    /// Same as [`move_to_dictionary`](Self::move_to_dictionary) without
    /// touching revisions.
    pub fn move_to_dictionary_quiet(&mut self, page: &PageId, id: &DictionaryId) {
        self.set_to_dictionary(page, id, false);
    }

    /// Replay a persisted assignment. Dictionaries missing from the saved
    /// state are recreated as auto-fill.
    pub fn restore_assignment(&mut self, page: &PageId, id: &DictionaryId, pages_per_dictionary: usize) {
        if !self.dictionaries.contains_key(id) {
            let dict = Dictionary::new(
                id.clone(),
                DictionaryKind::AutoFill,
                pages_per_dictionary,
                self.defaults.clone(),
            );
            self.dictionaries.insert(id.clone(), dict);
        }
        self.set_to_dictionary(page, id, false);
    }

    /// New empty dictionary with a fresh id.
    pub fn create_dictionary(&mut self, kind: DictionaryKind, max_pages: usize) -> DictionaryId {
        let id = self.next_id();
        self.dictionaries
            .insert(id.clone(), Dictionary::new(id.clone(), kind, max_pages, self.defaults.clone()));
        id
    }

    pub fn set_kind(&mut self, id: &DictionaryId, kind: DictionaryKind) {
        if id.is_sentinel() {
            return;
        }
        self.dictionary_mut(id).kind = kind;
    }

    pub fn set_max_pages(&mut self, id: &DictionaryId, max_pages: usize) {
        self.dictionary_mut(id).max_pages = max_pages;
    }

    /// Replace encoder params. Returns whether anything changed (and the
    /// revision was bumped).
    pub fn set_params(&mut self, id: &DictionaryId, params: DictionaryParams) -> bool {
        let dict = self.dictionary_mut(id);
        if dict.params == params {
            return false;
        }
        dict.params = params;
        dict.bump();
        true
    }

    /// Record the encoded dictionary file after a successful run.
    pub fn set_output(&mut self, id: &DictionaryId, output: FileStamp) {
        self.dictionary_mut(id).output = output;
    }

    /// Unassign a page. Returns the dictionary it was in.
    pub fn remove_page(&mut self, page: &PageId) -> Option<DictionaryId> {
        let id = self.page_to_dictionary.remove(page)?;
        if let Some(dict) = self.dictionaries.get_mut(&id) {
            dict.remove(page, true);
        }
        Some(id)
    }

    /// Drop every dictionary that is not locked, together with its page
    /// mappings, and restart the id counter.
    pub fn reset_non_locked(&mut self) {
        self.dictionaries.retain(|_, d| d.kind == DictionaryKind::Locked);
        let locked = &self.dictionaries;
        self.page_to_dictionary.retain(|_, id| locked.contains_key(id));
        self.counter = 0;
        self.ensure_sentinel();
        info!(kept = self.dictionaries.len() - 1, "non-locked dictionaries reset");
    }

    // -- Queries --------------------------------------------------------------

    pub fn dictionary_of(&self, page: &PageId) -> Option<&DictionaryId> {
        self.page_to_dictionary.get(page)
    }

    /// Panics if `id` is unknown.
    pub fn members_of(&self, id: &DictionaryId) -> &BTreeSet<PageId> {
        &self.dictionary(id).members
    }

    /// Pages encoded together with `page`: the page alone for the sentinel
    /// or when unassigned.
    pub fn members_of_same(&self, page: &PageId) -> BTreeSet<PageId> {
        match self.page_to_dictionary.get(page) {
            Some(id) if !id.is_sentinel() => self.members_of(id).clone(),
            _ => BTreeSet::from([page.clone()]),
        }
    }

    pub fn is_sentinel(&self, id: &DictionaryId) -> bool {
        id.is_sentinel()
    }

    /// The encoded dictionary file on disk is exactly the one recorded.
    pub fn is_output_cached(&self, id: &DictionaryId) -> bool {
        if id.is_sentinel() {
            return true;
        }
        self.dictionary(id).output.matches_disk()
    }

    /// Panics if `id` is unknown.
    pub fn dictionary(&self, id: &DictionaryId) -> &Dictionary {
        match self.dictionaries.get(id) {
            Some(dict) => dict,
            None => panic!("unknown dictionary id {id}"),
        }
    }

    pub fn get(&self, id: &DictionaryId) -> Option<&Dictionary> {
        self.dictionaries.get(id)
    }

    /// Every dictionary, sentinel first.
    pub fn list(&self) -> Vec<&Dictionary> {
        let mut list: Vec<&Dictionary> = Vec::with_capacity(self.dictionaries.len());
        list.extend(self.dictionaries.values().filter(|d| d.id.is_sentinel()));
        list.extend(self.dictionaries.values().filter(|d| !d.id.is_sentinel()));
        list
    }

    /// Member count per dictionary.
    pub fn sizes(&self) -> BTreeMap<DictionaryId, usize> {
        self.dictionaries
            .iter()
            .map(|(id, d)| (id.clone(), d.page_count()))
            .collect()
    }

    pub fn defaults(&self) -> &DictionaryParams {
        &self.defaults
    }

    // -- Encoder script -------------------------------------------------------

    /// File the text encoder writes for the dictionary of `page`. A
    /// single-member dictionary is not shared, so the page is encoded
    /// straight into its own DjVu file.
    pub fn text_encoder_target(&self, id: &DictionaryId, page_djvu: &Path) -> PathBuf {
        if !id.is_sentinel() && self.dictionary(id).page_count() > 1 {
            PathBuf::from(format!("_djbz_{id}.djvu"))
        } else {
            page_djvu.to_path_buf()
        }
    }

    /// `(djbz ...)` block of the encoder settings script. `files` are the
    /// bitonal images of the members, in project order. Empty for the
    /// sentinel.
    pub fn settings_block(&self, id: &DictionaryId, files: &[PathBuf]) -> Vec<String> {
        if id.is_sentinel() {
            return Vec::new();
        }
        let params = &self.dictionary(id).params;
        let flag = |on: bool| if on { "1" } else { "0" };

        let mut lines = vec![
            "(djbz ".to_owned(),
            format!("  id            {id}"),
            format!("  xtension      {}", params.extension),
            format!("  averaging     {}", flag(params.use_averaging)),
            format!("  aggression    {}", params.aggression),
            format!("  classifier    {}", params.classifier as u8),
            format!("  no-prototypes {}", flag(!params.use_prototypes)),
            format!("  erosion       {}", flag(params.use_erosion)),
            "      (files".to_owned(),
        ];
        lines.extend(files.iter().map(|f| format!("            {}", f.display())));
        lines.push("      ) #files".to_owned());
        lines.push(") #djbz".to_owned());
        lines
    }

    // -- Persistence ----------------------------------------------------------

    /// Serializable form. Page membership is not included: it is replayed
    /// from the per-page parameters on load.
    pub fn to_record(&self) -> RegistryRecord {
        RegistryRecord {
            djbz: self
                .dictionaries
                .values()
                .map(|d| DictionaryRecord {
                    id: d.id.clone(),
                    kind: d.kind.as_str().to_owned(),
                    max: d.max_pages,
                    last_changed: timestamp::format(&d.revision),
                    output_file: d.output.path.clone(),
                    output_file_size: d.output.size,
                    output_file_last_changed: d.output.modified.as_ref().map(timestamp::format).unwrap_or_default(),
                    djbz_params: d.params.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild from a saved record. The sentinel is re-created if the record
    /// lacks it.
    pub fn from_record(record: &RegistryRecord, defaults: DictionaryParams) -> Result<Self> {
        let mut registry = Self {
            dictionaries: BTreeMap::new(),
            page_to_dictionary: BTreeMap::new(),
            counter: 0,
            defaults,
        };
        for rec in &record.djbz {
            let revision = parse_timestamp(&rec.last_changed)?;
            let modified = if rec.output_file_last_changed.is_empty() {
                None
            } else {
                Some(parse_timestamp(&rec.output_file_last_changed)?)
            };
            registry.dictionaries.insert(
                rec.id.clone(),
                Dictionary {
                    id: rec.id.clone(),
                    kind: DictionaryKind::parse(&rec.kind),
                    max_pages: rec.max,
                    members: BTreeSet::new(),
                    params: rec.djbz_params.clone(),
                    revision,
                    output: FileStamp {
                        path: rec.output_file.clone(),
                        size: rec.output_file_size,
                        modified,
                    },
                },
            );
        }
        registry.ensure_sentinel();
        Ok(registry)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    timestamp::parse(value).map_err(|e| PublishError::Timestamp(format!("{value:?}: {e}")))
}

/// Saved state of the whole registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub djbz: Vec<DictionaryRecord>,
}

/// Saved state of one dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryRecord {
    pub id: DictionaryId,
    #[serde(rename = "type")]
    pub kind: String,
    pub max: usize,
    pub last_changed: String,
    pub output_file: PathBuf,
    pub output_file_size: u64,
    pub output_file_last_changed: String,
    pub djbz_params: DictionaryParams,
}
