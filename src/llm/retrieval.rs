//! Knowledge-retrieval interfaces and an in-memory reference store.
//!
//! The orchestration core only depends on [`KnowledgeRetriever`]; concrete
//! knowledge bases (hosted vector databases, managed retrieval services)
//! live outside this crate. [`VectorStore`] spells out the storage-side
//! contract those backends implement, and [`InMemoryVectorStore`] is a
//! linear-scan reference implementation suitable for tests and local
//! development, not production search.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ModelMuxError, Result};

/// One passage returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
}

/// Capability the RAG path depends on: top-K passages for a query, scored by
/// relevance. Implementations should use a hybrid keyword-plus-vector mode
/// when their backend offers one.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>>;
}

/// One vector-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, Value>,
}

/// Storage-side contract for vector databases.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str, vector_size: usize) -> Result<()>;

    async fn add_vectors(
        &self,
        collection: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<HashMap<String, Value>>,
        ids: Option<Vec<String>>,
    ) -> Result<()>;

    /// Nearest-neighbor search. Lower scores are closer; hits scoring above
    /// `score_threshold` are dropped. When `metadata_filter` is given, only
    /// vectors whose metadata contains every filter entry are considered.
    async fn search_vectors(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchResult>>;

    /// Case-insensitive substring match over string metadata values,
    /// restricted to entries matching `metadata_filter` when given.
    async fn keyword_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchResult>>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Delete every vector whose metadata contains all filter entries.
    async fn delete_vectors(
        &self,
        collection: &str,
        metadata_filter: &HashMap<String, Value>,
    ) -> Result<()>;
}

struct Collection {
    vector_size: usize,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<HashMap<String, Value>>,
    ids: Vec<String>,
}

/// Linear-scan Euclidean store. Reference/test double only.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn matches_filter(metadata: &HashMap<String, Value>, filter: &HashMap<String, Value>) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, vector_size: usize) -> Result<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        if collections.contains_key(name) {
            return Err(ModelMuxError::Retrieval(format!(
                "collection '{}' already exists",
                name
            )));
        }
        collections.insert(
            name.to_string(),
            Collection {
                vector_size,
                vectors: Vec::new(),
                metadata: Vec::new(),
                ids: Vec::new(),
            },
        );
        Ok(())
    }

    async fn add_vectors(
        &self,
        collection: &str,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<HashMap<String, Value>>,
        ids: Option<Vec<String>>,
    ) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(ModelMuxError::Retrieval(
                "vectors and metadata counts must match".to_string(),
            ));
        }
        if let Some(ids) = &ids {
            if ids.len() != vectors.len() {
                return Err(ModelMuxError::Retrieval(
                    "ids count must match vectors count".to_string(),
                ));
            }
        }

        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let coll = collections.get_mut(collection).ok_or_else(|| {
            ModelMuxError::Retrieval(format!("collection '{}' does not exist", collection))
        })?;

        // All-or-nothing: reject the whole batch before touching the
        // collection so the three parallel lists stay the same length.
        if let Some(bad) = vectors.iter().find(|v| v.len() != coll.vector_size) {
            return Err(ModelMuxError::Retrieval(format!(
                "vector size {} does not match collection size {}",
                bad.len(),
                coll.vector_size
            )));
        }

        for (i, vector) in vectors.into_iter().enumerate() {
            let id = ids
                .as_ref()
                .map(|ids| ids[i].clone())
                .unwrap_or_else(|| format!("{}", coll.ids.len() + 1));
            coll.vectors.push(vector);
            coll.ids.push(id);
        }
        coll.metadata.extend(metadata);
        Ok(())
    }

    async fn search_vectors(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let coll = collections.get(collection).ok_or_else(|| {
            ModelMuxError::Retrieval(format!("collection '{}' does not exist", collection))
        })?;

        if query_vector.len() != coll.vector_size {
            return Err(ModelMuxError::Retrieval(format!(
                "query vector size {} does not match collection size {}",
                query_vector.len(),
                coll.vector_size
            )));
        }

        let mut results: Vec<SearchResult> = coll
            .vectors
            .iter()
            .enumerate()
            .filter_map(|(idx, vector)| {
                if metadata_filter.is_some_and(|f| !matches_filter(&coll.metadata[idx], f)) {
                    return None;
                }
                let score = euclidean(query_vector, vector);
                if score_threshold.is_some_and(|t| score > t) {
                    return None;
                }
                Some(SearchResult {
                    id: coll.ids[idx].clone(),
                    score,
                    metadata: coll.metadata[idx].clone(),
                })
            })
            .collect();

        results.sort_by(|a, b| a.score.total_cmp(&b.score));
        results.truncate(limit);
        Ok(results)
    }

    async fn keyword_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        metadata_filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let coll = collections.get(collection).ok_or_else(|| {
            ModelMuxError::Retrieval(format!("collection '{}' does not exist", collection))
        })?;

        let needle = query.to_lowercase();
        let results: Vec<SearchResult> = coll
            .metadata
            .iter()
            .enumerate()
            .filter(|(_, meta)| metadata_filter.is_none_or(|f| matches_filter(meta, f)))
            .filter(|(_, meta)| {
                meta.values().any(|value| match value {
                    Value::String(s) => s.to_lowercase().contains(&needle),
                    other => other.to_string().to_lowercase().contains(&needle),
                })
            })
            .map(|(idx, meta)| SearchResult {
                id: coll.ids[idx].clone(),
                score: 0.0,
                metadata: meta.clone(),
            })
            .take(limit)
            .collect();

        Ok(results)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections.remove(name).ok_or_else(|| {
            ModelMuxError::Retrieval(format!("collection '{}' does not exist", name))
        })?;
        Ok(())
    }

    async fn delete_vectors(
        &self,
        collection: &str,
        metadata_filter: &HashMap<String, Value>,
    ) -> Result<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let coll = collections.get_mut(collection).ok_or_else(|| {
            ModelMuxError::Retrieval(format!("collection '{}' does not exist", collection))
        })?;

        let keep: Vec<bool> = coll
            .metadata
            .iter()
            .map(|meta| !matches_filter(meta, metadata_filter))
            .collect();

        let mut idx = 0;
        coll.vectors.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        let mut idx = 0;
        coll.ids.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        let mut idx = 0;
        coll.metadata.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        Ok(())
    }
}
