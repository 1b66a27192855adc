//! In-memory token index manager.
//!
//! `MemoryIndexManager` is a complete [`IndexManager`] backed by process
//! memory. It keeps:
//! - Stored documents: entity ID → [`IndexDocument`]
//! - Inverted index: normalized token → set of entity IDs
//! - Forward index: entity ID → set of indexed tokens (for updates)
//!
//! It serves embedded deployments and tests. Queries use token-based exact
//! match with AND semantics; there is no ranking.

use crate::entity::Entity;
use crate::error::IndexResult;
use crate::manager::{IndexDocument, IndexManager};
use crate::types::{EntityId, EntityType, SiteId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Configuration for the tokenizer.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Minimum token length to index.
    pub min_token_length: usize,
    /// Maximum token length to index.
    pub max_token_length: usize,
    /// Whether to perform case-insensitive matching.
    pub case_insensitive: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_token_length: 1,
            max_token_length: 256,
            case_insensitive: true,
        }
    }
}

impl TokenizerConfig {
    /// Creates a new tokenizer configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets minimum token length.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_token_length = len;
        self
    }

    /// Sets maximum token length.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_token_length = len;
        self
    }

    /// Sets case sensitivity.
    #[must_use]
    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }

    fn normalize(&self, token: &str) -> String {
        if self.case_insensitive {
            token.to_lowercase()
        } else {
            token.to_string()
        }
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|t| {
                let len = t.chars().count();
                len > 0 && len >= self.min_token_length && len <= self.max_token_length
            })
            .map(|t| self.normalize(t))
            .collect()
    }
}

#[derive(Default)]
struct IndexState {
    documents: HashMap<EntityId, IndexDocument>,
    inverted: HashMap<String, BTreeSet<EntityId>>,
    forward: HashMap<EntityId, HashSet<String>>,
    writes: u64,
}

impl IndexState {
    fn remove(&mut self, entity_id: &EntityId) -> bool {
        let existed = self.documents.remove(entity_id).is_some();

        if let Some(tokens) = self.forward.remove(entity_id) {
            for token in &tokens {
                if let Some(entities) = self.inverted.get_mut(token) {
                    entities.remove(entity_id);
                    if entities.is_empty() {
                        self.inverted.remove(token);
                    }
                }
            }
        }

        existed
    }
}

/// Index manager keeping documents and a token index in memory.
pub struct MemoryIndexManager {
    entity_type: EntityType,
    tokenizer: TokenizerConfig,
    state: RwLock<IndexState>,
}

impl MemoryIndexManager {
    /// Creates an empty index for an entity type.
    pub fn new(entity_type: EntityType) -> Self {
        Self::with_tokenizer(entity_type, TokenizerConfig::default())
    }

    /// Creates an empty index with a specific tokenizer.
    pub fn with_tokenizer(entity_type: EntityType, tokenizer: TokenizerConfig) -> Self {
        Self {
            entity_type,
            tokenizer,
            state: RwLock::new(IndexState::default()),
        }
    }

    fn upsert(&self, entity: &Entity) {
        let document = IndexDocument::from_entity(entity);
        let tokens: HashSet<String> = self.tokenizer.tokenize(&document.text).into_iter().collect();

        let mut state = self.state.write();
        state.remove(&entity.id);
        for token in &tokens {
            state
                .inverted
                .entry(token.clone())
                .or_default()
                .insert(entity.id);
        }
        state.forward.insert(entity.id, tokens);
        state.documents.insert(entity.id, document);
        state.writes += 1;
    }

    /// Returns the stored document for an entity.
    pub fn get(&self, entity_id: &EntityId) -> Option<IndexDocument> {
        self.state.read().documents.get(entity_id).cloned()
    }

    /// Returns true if a document is stored for the entity.
    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.state.read().documents.contains_key(entity_id)
    }

    /// Returns the number of stored documents.
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Returns true if no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.state.read().documents.is_empty()
    }

    /// Returns the number of writes applied (inserts, updates and deletes of present documents).
    pub fn writes(&self) -> u64 {
        self.state.read().writes
    }

    /// Returns the IDs of all stored documents, in order.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.state.read().documents.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Searches for documents matching every token of the query.
    pub fn search(&self, query: &str) -> Vec<EntityId> {
        let tokens = self.tokenizer.tokenize(query);
        let Some((first, rest)) = tokens.split_first() else {
            return Vec::new();
        };

        let state = self.state.read();
        let Some(initial) = state.inverted.get(first) else {
            return Vec::new();
        };

        let mut results = initial.clone();
        for token in rest {
            match state.inverted.get(token) {
                Some(entities) => results.retain(|id| entities.contains(id)),
                None => return Vec::new(),
            }
        }
        results.into_iter().collect()
    }

    /// Searches within a single site.
    pub fn search_site(&self, site: SiteId, query: &str) -> Vec<EntityId> {
        let ids = self.search(query);
        let state = self.state.read();
        ids.into_iter()
            .filter(|id| state.documents.get(id).is_some_and(|d| d.site == site))
            .collect()
    }

    /// Returns documents containing any token starting with the prefix.
    pub fn search_prefix(&self, prefix: &str) -> Vec<EntityId> {
        let prefix = self.tokenizer.normalize(prefix);
        let state = self.state.read();
        let mut results = BTreeSet::new();
        for (token, entities) in &state.inverted {
            if token.starts_with(&prefix) {
                results.extend(entities.iter().copied());
            }
        }
        results.into_iter().collect()
    }
}

impl IndexManager for MemoryIndexManager {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn insert(&self, entity: &Entity) -> IndexResult<()> {
        self.upsert(entity);
        Ok(())
    }

    fn update(&self, entity: &Entity) -> IndexResult<()> {
        self.upsert(entity);
        Ok(())
    }

    fn delete(&self, entity_id: &EntityId) -> IndexResult<()> {
        let mut state = self.state.write();
        if state.remove(entity_id) {
            state.writes += 1;
        }
        Ok(())
    }

    fn clear(&self) -> IndexResult<()> {
        let mut state = self.state.write();
        state.documents.clear();
        state.inverted.clear();
        state.forward.clear();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryIndexManager")
            .field("entity_type", &self.entity_type)
            .field("documents", &state.documents.len())
            .field("unique_tokens", &state.inverted.len())
            .finish_non_exhaustive()
    }
}
