//! In-memory index over imported documents.
//!
//! Every document gets a numeric id; tags and link targets map to bitmaps of
//! those ids so lookups stay cheap as the corpus grows. Nothing here is
//! persisted.

// used for the path <-> id mapping
use bimap::BiMap;
// used for the id sets behind tag and link lookups
use roaring::RoaringTreemap;
use seahash::SeaHasher;
use tracing::debug;

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use crate::value::Value;

pub type DocumentId = u64;
type IdHasher = BuildHasherDefault<SeaHasher>;

// ------------- IdGenerator -------------
/// Hands out document ids, reusing the ids of removed documents.
#[derive(Debug, Default)]
struct IdGenerator {
    lower_bound: DocumentId,
    released: Vec<DocumentId>,
}

impl IdGenerator {
    fn generate(&mut self) -> DocumentId {
        self.released.pop().unwrap_or_else(|| {
            self.lower_bound += 1;
            self.lower_bound
        })
    }
    fn release(&mut self, id: DocumentId) {
        self.released.push(id);
    }
}

// ------------- DocumentIndex -------------
#[derive(Debug, Default)]
pub struct DocumentIndex {
    ids: IdGenerator,
    paths: BiMap<String, DocumentId>,
    documents: HashMap<DocumentId, Arc<Value>, IdHasher>,
    tags: HashMap<String, RoaringTreemap, IdHasher>,
    links: HashMap<String, RoaringTreemap, IdHasher>,
    revision: u64,
}

/// Tags compare case-insensitively and with or without their leading `#`.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    if tag.starts_with('#') { tag } else { format!("#{}", tag) }
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` for `path`, replacing any earlier version. Returns the
    /// document id and whether the path was new.
    pub fn insert(&mut self, path: &str, value: Value) -> (DocumentId, bool) {
        let (id, created) = match self.paths.get_by_left(path) {
            Some(id) => (*id, false),
            None => {
                let id = self.ids.generate();
                self.paths.insert(path.to_owned(), id);
                (id, true)
            }
        };
        self.unlink(id);
        for tag in document_tags(&value) {
            self.tags.entry(normalize_tag(&tag)).or_default().insert(id);
        }
        for target in document_links(&value) {
            self.links.entry(target).or_default().insert(id);
        }
        self.documents.insert(id, Arc::new(value));
        self.revision += 1;
        debug!(path, id, created, revision = self.revision, "indexed document");
        (id, created)
    }

    pub fn get(&self, path: &str) -> Option<Arc<Value>> {
        let id = self.paths.get_by_left(path)?;
        self.documents.get(id).cloned()
    }

    pub fn id_of(&self, path: &str) -> Option<DocumentId> {
        self.paths.get_by_left(path).copied()
    }

    pub fn path_of(&self, id: DocumentId) -> Option<&str> {
        self.paths.get_by_right(&id).map(String::as_str)
    }

    pub fn remove(&mut self, path: &str) -> Option<Arc<Value>> {
        let (_, id) = self.paths.remove_by_left(path)?;
        self.unlink(id);
        self.ids.release(id);
        self.revision += 1;
        debug!(path, id, revision = self.revision, "removed document");
        self.documents.remove(&id)
    }

    /// Paths of documents carrying `tag`, in id order.
    pub fn tagged(&self, tag: &str) -> Vec<String> {
        self.resolve(self.tags.get(&normalize_tag(tag)))
    }

    /// Paths of documents with an outlink to `path`, in id order.
    pub fn linking_to(&self, path: &str) -> Vec<String> {
        self.resolve(self.links.get(path))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Bumped on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn resolve(&self, ids: Option<&RoaringTreemap>) -> Vec<String> {
        let Some(ids) = ids else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.path_of(id).map(str::to_owned)).collect()
    }

    fn unlink(&mut self, id: DocumentId) {
        for ids in self.tags.values_mut().chain(self.links.values_mut()) {
            ids.remove(id);
        }
        self.tags.retain(|_, ids| !ids.is_empty());
        self.links.retain(|_, ids| !ids.is_empty());
    }
}

fn file_list<'v>(value: &'v Value, key: &str) -> &'v [Value] {
    value
        .as_object()
        .and_then(|fields| fields.get("file"))
        .and_then(Value::as_object)
        .and_then(|file| file.get(key))
        .and_then(Value::as_array)
        .unwrap_or(&[])
}

fn document_tags(value: &Value) -> Vec<String> {
    file_list(value, "tags").iter().filter_map(Value::as_str).map(str::to_owned).collect()
}

fn document_links(value: &Value) -> Vec<String> {
    file_list(value, "outlinks").iter().filter_map(Value::as_link).map(|l| l.path().to_owned()).collect()
}
