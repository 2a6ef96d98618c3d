//! Collection store and index lifecycle.
//!
//! The catalog owns every named [`Collection`] together with its derived
//! [`VectorIndex`] and [`SummaryIndex`]. Each name maps to a slot behind a
//! `tokio::sync::RwLock`:
//!
//! - Queries hold a read guard ([`IndexGuard`]) for their whole duration.
//! - [`Catalog::ingest`] and [`Catalog::rebuild`] do all chunking and
//!   embedding outside the lock, into a fresh physical store collection,
//!   then take the write lock only to swap the slot's contents.
//!
//! A reader therefore sees either the complete old generation or the
//! complete new one. The old generation's vectors are dropped only after
//! the swap, when no reader can still hold it.
//!
//! Writers to one name (ingest, rebuild) are serialized by a per-name
//! mutex held from version assignment through the swap, so versions
//! published under a name are strictly increasing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};

use crate::chunk::chunk_document;
use crate::config::RagConfig;
use crate::error::{Operation, RagError};
use crate::index::{SummaryIndex, VectorIndex};
use crate::models::{Chunk, Collection, CollectionInfo, Document};
use crate::provider::Provider;
use crate::store::VectorStore;

struct Slot {
    vector: Arc<VectorIndex>,
    summary: Arc<SummaryIndex>,
    removed: bool,
}

/// Read access to one collection generation.
///
/// Holding the guard keeps that generation searchable; a concurrent
/// rebuild waits for it before swapping.
pub struct IndexGuard {
    guard: OwnedRwLockReadGuard<Slot>,
}

impl IndexGuard {
    pub fn collection(&self) -> &Arc<Collection> {
        self.guard.vector.collection()
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.guard.vector
    }

    pub fn summary(&self) -> &SummaryIndex {
        &self.guard.summary
    }
}

/// Named collections and their index caches.
pub struct Catalog {
    provider: Arc<dyn Provider>,
    store: Arc<dyn VectorStore>,
    config: RagConfig,
    slots: StdRwLock<HashMap<String, Arc<RwLock<Slot>>>>,
    writers: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    generation: AtomicU64,
}

impl Catalog {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn VectorStore>, config: RagConfig) -> Self {
        Self {
            provider,
            store,
            config,
            slots: StdRwLock::new(HashMap::new()),
            writers: StdMutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Replace (or create) collection `name` with the chunks of `documents`.
    ///
    /// Fails with [`RagError::Ingest`] for an empty document set, an invalid
    /// name, or any empty or undecodable document; in every failure case
    /// the existing collection (if any) is left untouched.
    pub async fn ingest(&self, name: &str, documents: Vec<Document>) -> Result<Arc<Collection>, RagError> {
        validate_name(name)?;
        if documents.is_empty() {
            return Err(RagError::ingest(name, "no documents supplied"));
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        for doc in &documents {
            let text = decode(name, doc)?;
            let doc_chunks = chunk_document(&doc.id, &text, self.config.max_tokens, self.config.overlap_tokens);
            if doc_chunks.is_empty() {
                return Err(RagError::ingest(name, format!("document '{}' is empty", doc.id)));
            }
            chunks.extend(doc_chunks);
        }
        for (position, chunk) in chunks.iter_mut().enumerate() {
            chunk.position = position;
        }

        let _writer = self.writer(name).await?;
        let version = match self.current(name).await {
            Some(c) => c.version + 1,
            None => 1,
        };
        let collection = Collection {
            name: name.to_string(),
            version,
            chunks: Arc::new(chunks),
            created_at: Utc::now(),
            dims: self.provider.dims(),
        };

        tracing::info!(
            collection = name,
            version,
            documents = documents.len(),
            chunks = collection.chunk_count(),
            "ingesting collection"
        );

        let slot = self
            .build_slot(collection)
            .await
            .map_err(|e| e.within(Operation::Ingest))?;
        let installed = slot.vector.collection().clone();
        self.install(name, slot).await?;
        Ok(installed)
    }

    /// Ingest already-decoded `(id, text)` pairs.
    pub async fn ingest_text<I, S, T>(&self, name: &str, texts: I) -> Result<Arc<Collection>, RagError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let documents = texts.into_iter().map(|(id, text)| Document::text(id, text)).collect();
        self.ingest(name, documents).await
    }

    /// Re-embed the current generation of `name` into fresh vector storage.
    pub async fn rebuild(&self, name: &str) -> Result<Arc<Collection>, RagError> {
        let _writer = self.writer(name).await?;
        let current = self.current(name).await.ok_or_else(|| RagError::UnknownCollection {
            op: Operation::Build,
            collection: name.to_string(),
        })?;
        let slot = self.build_slot((*current).clone()).await?;
        let installed = slot.vector.collection().clone();
        self.install(name, slot).await?;
        Ok(installed)
    }

    /// Acquire read access to `name` for the duration of a query.
    pub async fn read(&self, op: Operation, name: &str) -> Result<IndexGuard, RagError> {
        let unknown = || RagError::UnknownCollection {
            op,
            collection: name.to_string(),
        };
        let lock = self.lookup(name).ok_or_else(unknown)?;
        let guard = lock.read_owned().await;
        if guard.removed {
            return Err(unknown());
        }
        Ok(IndexGuard { guard })
    }

    /// Metadata for `name`, if it exists.
    pub async fn get(&self, name: &str) -> Option<CollectionInfo> {
        self.current(name).await.map(|c| c.info())
    }

    /// Metadata for every collection, sorted by name.
    pub async fn list(&self) -> Vec<CollectionInfo> {
        let locks: Vec<Arc<RwLock<Slot>>> = match self.slots.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        let mut infos = Vec::with_capacity(locks.len());
        for lock in locks {
            let slot = lock.read().await;
            if !slot.removed {
                infos.push(slot.vector.collection().info());
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Delete `name` and its vectors. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let lock = match self.slots.write() {
            Ok(mut map) => map.remove(name),
            Err(_) => None,
        };
        let Some(lock) = lock else {
            return false;
        };
        let mut slot = lock.write().await;
        slot.removed = true;
        slot.vector.discard().await;
        tracing::info!(collection = name, "collection removed");
        true
    }

    async fn current(&self, name: &str) -> Option<Arc<Collection>> {
        let lock = self.lookup(name)?;
        let slot = lock.read().await;
        (!slot.removed).then(|| slot.vector.collection().clone())
    }

    /// Exclusive write access to `name` until the guard is dropped.
    async fn writer(&self, name: &str) -> Result<OwnedMutexGuard<()>, RagError> {
        let lock = self
            .writers
            .lock()
            .map_err(|_| RagError::ingest(name, "catalog lock poisoned"))?
            .entry(name.to_string())
            .or_default()
            .clone();
        Ok(lock.lock_owned().await)
    }

    fn lookup(&self, name: &str) -> Option<Arc<RwLock<Slot>>> {
        self.slots.read().ok().and_then(|map| map.get(name).cloned())
    }

    async fn build_slot(&self, collection: Collection) -> Result<Slot, RagError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let physical = format!("{}__g{}", collection.name, generation);
        let vector = VectorIndex::build(
            collection,
            physical,
            self.provider.clone(),
            self.store.clone(),
            &self.config,
        )
        .await?;
        let summary = SummaryIndex::build(vector.collection().clone(), self.provider.clone(), &self.config)?;
        Ok(Slot {
            vector: Arc::new(vector),
            summary: Arc::new(summary),
            removed: false,
        })
    }

    /// Swap `slot` in as the live generation of `name`.
    async fn install(&self, name: &str, slot: Slot) -> Result<(), RagError> {
        let existing = {
            let mut map = self.slots.write().map_err(|_| RagError::ingest(name, "catalog lock poisoned"))?;
            match map.get(name) {
                Some(lock) => Some((lock.clone(), slot)),
                None => {
                    map.insert(name.to_string(), Arc::new(RwLock::new(slot)));
                    None
                }
            }
        };

        let Some((lock, slot)) = existing else {
            tracing::debug!(collection = name, "collection created");
            return Ok(());
        };

        let mut guard = lock.write().await;
        if guard.removed {
            // Removed while we were building; publish as a new entry.
            drop(guard);
            let displaced = {
                let mut map = self.slots.write().map_err(|_| RagError::ingest(name, "catalog lock poisoned"))?;
                map.insert(name.to_string(), Arc::new(RwLock::new(slot)))
            };
            if let Some(displaced) = displaced {
                let mut old = displaced.write().await;
                old.removed = true;
                old.vector.discard().await;
            }
            return Ok(());
        }

        let old = std::mem::replace(&mut *guard, slot);
        drop(guard);
        tracing::debug!(
            collection = name,
            old = old.vector.physical_name(),
            "collection generation swapped"
        );
        old.vector.discard().await;
        Ok(())
    }
}

/// Collection names double as vector-store collection prefixes.
fn validate_name(name: &str) -> Result<(), RagError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if !valid || name.len() > 200 {
        return Err(RagError::ingest(
            name,
            "collection names must start with a letter or underscore and contain only letters, digits, and underscores",
        ));
    }
    Ok(())
}

fn decode(collection: &str, doc: &Document) -> Result<String, RagError> {
    let textual = doc.content_type.is_empty()
        || doc.content_type.starts_with("text/")
        || doc.content_type == "application/json"
        || doc.content_type == "application/xml";
    if !textual {
        return Err(RagError::ingest(
            collection,
            format!(
                "document '{}' has unsupported content type '{}'; extract its text first",
                doc.id, doc.content_type
            ),
        ));
    }
    String::from_utf8(doc.content.clone())
        .map_err(|_| RagError::ingest(collection, format!("document '{}' is not valid UTF-8", doc.id)))
}
