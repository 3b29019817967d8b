use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{StructureId, StructureRecord, SynonymEntry, SystemTag};
use tracing::{debug, info};

use crate::index::{OntologyIndex, SearchHit};

/// Maximum edit distance accepted when falling back to fuzzy matching.
pub const DEFAULT_FUZZY_DISTANCE: usize = 3;

/// Where ontology rows come from at load time. Implemented by the SQLite
/// storage and by in-memory fixtures in tests.
#[async_trait]
pub trait OntologySource: Send + Sync {
    async fn list_structures(&self) -> Result<Vec<StructureRecord>>;
    async fn list_synonyms(&self) -> Result<Vec<SynonymEntry>>;
}

/// Resolves free-text terms to canonical structure identifiers and answers
/// structural queries. `None` from [`resolve`](Self::resolve) is a normal
/// outcome, not an error; callers decide what an unresolved term means.
#[derive(Debug)]
pub struct OntologyResolver {
    index: OntologyIndex,
    fuzzy_distance: usize,
}

impl OntologyResolver {
    pub fn from_index(index: OntologyIndex) -> Self {
        Self {
            index,
            fuzzy_distance: DEFAULT_FUZZY_DISTANCE,
        }
    }

    pub fn with_fuzzy_distance(mut self, fuzzy_distance: usize) -> Self {
        self.fuzzy_distance = fuzzy_distance;
        self
    }

    /// Builds the in-memory index from a persistent source. Structures
    /// arrive parent-before-child from storage, so tree validation happens
    /// inline during insertion.
    pub async fn load(source: &impl OntologySource) -> Result<Self> {
        let mut index = OntologyIndex::new();
        for record in source.list_structures().await? {
            index.insert_structure(record)?;
        }
        for entry in source.list_synonyms().await? {
            index.insert_synonym(entry)?;
        }
        info!(structures = index.len(), "ontology index loaded");
        Ok(Self::from_index(index))
    }

    /// Exact name/alternate-name match, then exact synonym match (priority
    /// breaks ties), then bounded fuzzy match. First stage to hit wins.
    pub fn resolve(&self, term: &str) -> Option<StructureId> {
        if term.trim().is_empty() {
            return None;
        }
        if let Some(record) = self.index.by_name(term) {
            return Some(record.canonical_id.clone());
        }
        if let Some(id) = self.index.by_synonym(term) {
            return Some(id.clone());
        }
        let resolved = self.index.fuzzy(term, self.fuzzy_distance).cloned();
        if let Some(id) = &resolved {
            debug!(%term, %id, "fuzzy-resolved term");
        }
        resolved
    }

    pub fn validate(&self, id: &StructureId) -> bool {
        self.index.contains(id)
    }

    pub fn related_of(&self, id: &StructureId) -> Vec<StructureId> {
        self.index.related_of(id)
    }

    pub fn system_of(&self, id: &StructureId) -> Option<SystemTag> {
        self.index.system_of(id)
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.index.search(query, limit)
    }

    pub fn get(&self, id: &StructureId) -> Option<&StructureRecord> {
        self.index.get(id)
    }
}
