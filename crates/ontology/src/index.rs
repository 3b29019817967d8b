use std::collections::HashMap;

use shared::domain::{StructureId, StructureRecord, SynonymEntry, SystemTag};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OntologyError {
    #[error("structure {id} is already indexed")]
    DuplicateStructure { id: StructureId },
    #[error("structure {child} references unknown parent {parent}")]
    UnknownParent {
        child: StructureId,
        parent: StructureId,
    },
    #[error("synonym '{term}' references unknown structure {canonical_id}")]
    UnknownCanonical {
        term: String,
        canonical_id: StructureId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: StructureRecord,
    pub score: u32,
}

/// In-memory ontology: canonical id -> record, synonym -> canonical id,
/// system -> members. Loaded once per session lifetime; immutable after
/// load, so lookups borrow freely.
///
/// Insertion order is kept so that every tie-break in this module is
/// deterministic across repeated calls.
#[derive(Debug, Default)]
pub struct OntologyIndex {
    records: HashMap<StructureId, StructureRecord>,
    order: Vec<StructureId>,
    synonyms: Vec<SynonymEntry>,
    children: HashMap<StructureId, Vec<StructureId>>,
    systems: HashMap<SystemTag, Vec<StructureId>>,
}

impl OntologyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parents must be inserted before their children, which makes cycles
    /// unrepresentable: a record can only point at an id that already exists.
    pub fn insert_structure(&mut self, record: StructureRecord) -> Result<(), OntologyError> {
        if self.records.contains_key(&record.canonical_id) {
            return Err(OntologyError::DuplicateStructure {
                id: record.canonical_id.clone(),
            });
        }
        if let Some(parent) = &record.parent_id {
            if !self.records.contains_key(parent) {
                return Err(OntologyError::UnknownParent {
                    child: record.canonical_id.clone(),
                    parent: parent.clone(),
                });
            }
            self.children
                .entry(parent.clone())
                .or_default()
                .push(record.canonical_id.clone());
        }
        self.systems
            .entry(record.system)
            .or_default()
            .push(record.canonical_id.clone());
        self.order.push(record.canonical_id.clone());
        self.records.insert(record.canonical_id.clone(), record);
        Ok(())
    }

    pub fn insert_synonym(&mut self, entry: SynonymEntry) -> Result<(), OntologyError> {
        if !self.records.contains_key(&entry.canonical_id) {
            return Err(OntologyError::UnknownCanonical {
                term: entry.term.clone(),
                canonical_id: entry.canonical_id.clone(),
            });
        }
        self.synonyms.push(entry);
        Ok(())
    }

    pub fn get(&self, id: &StructureId) -> Option<&StructureRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &StructureId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-insensitive exact match against structure names and alternate
    /// names, first hit in insertion order.
    pub fn by_name(&self, term: &str) -> Option<&StructureRecord> {
        let needle = normalize(term);
        self.order
            .iter()
            .map(|id| &self.records[id])
            .find(|record| {
                normalize(&record.name) == needle
                    || record
                        .alternate_name
                        .as_deref()
                        .is_some_and(|alt| normalize(alt) == needle)
            })
    }

    /// Case-insensitive exact match against the synonym table. Ties on the
    /// same normalized term go to the highest priority, then insertion order.
    pub fn by_synonym(&self, term: &str) -> Option<&StructureId> {
        let needle = normalize(term);
        // Strictly-greater only, so the earliest entry wins priority ties.
        let mut best: Option<&SynonymEntry> = None;
        for entry in &self.synonyms {
            if normalize(&entry.term) != needle {
                continue;
            }
            if best.map_or(true, |current| entry.priority > current.priority) {
                best = Some(entry);
            }
        }
        best.map(|entry| &entry.canonical_id)
    }

    /// Bounded edit-distance match over synonym terms and structure names.
    /// Lowest distance wins; at equal distance, higher synonym priority,
    /// then insertion order (names rank as priority 0 after the synonym
    /// table). Returns `None` when nothing is within `max_distance`.
    pub fn fuzzy(&self, term: &str, max_distance: usize) -> Option<&StructureId> {
        let needle = normalize(term);
        // Strictly-better only, so earlier candidates win exact ties.
        let mut best: Option<(usize, i32, &StructureId)> = None;

        for entry in &self.synonyms {
            let distance = levenshtein(&needle, &normalize(&entry.term));
            if distance > max_distance {
                continue;
            }
            let candidate = (distance, entry.priority, &entry.canonical_id);
            if is_better(candidate, best) {
                best = Some(candidate);
            }
        }
        for id in &self.order {
            let record = &self.records[id];
            let mut distance = levenshtein(&needle, &normalize(&record.name));
            if let Some(alt) = &record.alternate_name {
                distance = distance.min(levenshtein(&needle, &normalize(alt)));
            }
            if distance > max_distance {
                continue;
            }
            let candidate = (distance, 0, &record.canonical_id);
            if is_better(candidate, best) {
                best = Some(candidate);
            }
        }
        best.map(|(_, _, id)| id)
    }

    pub fn parent_of(&self, id: &StructureId) -> Option<&StructureId> {
        self.records.get(id)?.parent_id.as_ref()
    }

    pub fn children_of(&self, id: &StructureId) -> &[StructureId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Immediate parent plus immediate children, never transitive.
    pub fn related_of(&self, id: &StructureId) -> Vec<StructureId> {
        let mut related = Vec::new();
        if let Some(parent) = self.parent_of(id) {
            related.push(parent.clone());
        }
        related.extend(self.children_of(id).iter().cloned());
        related
    }

    pub fn system_of(&self, id: &StructureId) -> Option<SystemTag> {
        self.records.get(id).map(|record| record.system)
    }

    pub fn members_of_system(&self, system: SystemTag) -> &[StructureId] {
        self.systems.get(&system).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Autocomplete ranking. Fixed scoring table, descending score, stable
    /// by insertion order, truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let needle = normalize(query);
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = Vec::new();
        for id in &self.order {
            let record = &self.records[id];
            let name = normalize(&record.name);
            let alternate = record.alternate_name.as_deref().map(normalize);

            let score = if name.starts_with(&needle) {
                100
            } else if alternate
                .as_deref()
                .is_some_and(|alt| alt.starts_with(&needle))
            {
                80
            } else if name.contains(&needle) {
                60
            } else if alternate.as_deref().is_some_and(|alt| alt.contains(&needle)) {
                40
            } else if self.synonyms.iter().any(|entry| {
                entry.canonical_id == record.canonical_id
                    && normalize(&entry.term).contains(&needle)
            }) {
                20
            } else {
                continue;
            };

            hits.push(SearchHit {
                record: record.clone(),
                score,
            });
        }

        // Stable sort keeps insertion order within equal scores.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        hits
    }
}

fn is_better(
    candidate: (usize, i32, &StructureId),
    best: Option<(usize, i32, &StructureId)>,
) -> bool {
    match best {
        None => true,
        Some((distance, priority, _)) => {
            candidate.0 < distance || (candidate.0 == distance && candidate.1 > priority)
        }
    }
}

fn normalize(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Classic two-row Levenshtein over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
