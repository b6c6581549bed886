//! Long-term context store.
//!
//! Contextable utterances are indexed with a timestamp and later retrieved as
//! context snippets for generation. The in-memory store embeds text with a
//! hashed bag-of-words model and ranks by cosine similarity; it can persist
//! itself to a JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::RetrievalError;

#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Up to `k` stored snippets most relevant to `text`, best first.
    async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<String>, RetrievalError>;

    async fn index(&self, text: &str, metadata: Map<String, Value>) -> Result<(), RetrievalError>;
}

/// Hashed bag-of-words embedder. Deterministic and dependency free.
#[derive(Debug, Clone, Copy)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// L2-normalized term-frequency vector; all zeros for text without words.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = djb2(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

/// Cosine similarity of two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// One indexed snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnippet {
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub vector: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    dimensions: usize,
    snippets: Vec<StoredSnippet>,
}

pub struct InMemoryRetrievalStore {
    embedder: LocalEmbedder,
    snippets: Mutex<Vec<StoredSnippet>>,
    persist_path: Option<PathBuf>,
}

impl InMemoryRetrievalStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            embedder: LocalEmbedder::new(dimensions),
            snippets: Mutex::new(Vec::new()),
            persist_path: None,
        }
    }

    /// A store backed by a JSON file: loaded now if it exists, rewritten
    /// after every index. Snippets embedded at another dimensionality are
    /// re-embedded.
    pub fn with_persistence(
        dimensions: usize,
        path: impl Into<PathBuf>,
    ) -> Result<Self, RetrievalError> {
        let path = path.into();
        let mut store = Self::new(dimensions);
        if path.exists() {
            let loaded = load_file(&path)?;
            let snippets = if loaded.dimensions == store.embedder.dimensions() {
                loaded.snippets
            } else {
                loaded
                    .snippets
                    .into_iter()
                    .map(|s| StoredSnippet {
                        vector: store.embedder.embed(&s.text),
                        ..s
                    })
                    .collect()
            };
            info!(path = %path.display(), count = snippets.len(), "Loaded retrieval store");
            store.snippets = Mutex::new(snippets);
        }
        store.persist_path = Some(path);
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.snippets.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snippets(&self) -> Vec<StoredSnippet> {
        self.snippets.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoredSnippet>>, RetrievalError> {
        self.snippets.lock().map_err(|_| RetrievalError::QueryFailed {
            message: "retrieval store lock poisoned".to_string(),
        })
    }
}

fn load_file(path: &Path) -> Result<StoreFile, RetrievalError> {
    let persistence = |message: String| RetrievalError::Persistence { message };
    let json = std::fs::read_to_string(path)
        .map_err(|e| persistence(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&json).map_err(|e| persistence(format!("{}: {e}", path.display())))
}

fn save_file(path: &Path, file: &StoreFile) -> Result<(), RetrievalError> {
    let persistence = |message: String| RetrievalError::Persistence { message };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| persistence(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(file).map_err(|e| persistence(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| persistence(format!("{}: {e}", path.display())))
}

#[async_trait]
impl RetrievalStore for InMemoryRetrievalStore {
    async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        let query = self.embedder.embed(text);
        let snippets = self.lock()?;

        let mut scored: Vec<(f32, &StoredSnippet)> = snippets
            .iter()
            .map(|s| (cosine_similarity(&query, &s.vector), s))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let results: Vec<String> = scored
            .into_iter()
            .take(k)
            .map(|(_, s)| s.text.clone())
            .collect();
        debug!(k, found = results.len(), "Retrieved context");
        Ok(results)
    }

    async fn index(&self, text: &str, metadata: Map<String, Value>) -> Result<(), RetrievalError> {
        let snippet = StoredSnippet {
            text: text.to_string(),
            metadata,
            vector: self.embedder.embed(text),
        };
        let mut snippets = self.lock()?;
        snippets.push(snippet);
        debug!(count = snippets.len(), "Indexed context snippet");

        if let Some(path) = &self.persist_path {
            let file = StoreFile {
                dimensions: self.embedder.dimensions(),
                snippets: snippets.clone(),
            };
            save_file(path, &file)?;
        }
        Ok(())
    }
}

/// A store with scripted behavior, for tests.
#[derive(Default)]
pub struct MockRetrievalStore {
    snippets: Vec<String>,
    fail: bool,
    indexed: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl MockRetrievalStore {
    /// Always returns `snippets` (truncated to `k`).
    pub fn with_snippets(snippets: Vec<String>) -> Self {
        Self {
            snippets,
            ..Default::default()
        }
    }

    /// Fails every retrieve and index call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn indexed(&self) -> Vec<(String, Map<String, Value>)> {
        self.indexed.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RetrievalStore for MockRetrievalStore {
    async fn retrieve(&self, _text: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        if self.fail {
            return Err(RetrievalError::QueryFailed {
                message: "mock store offline".to_string(),
            });
        }
        Ok(self.snippets.iter().take(k).cloned().collect())
    }

    async fn index(&self, text: &str, metadata: Map<String, Value>) -> Result<(), RetrievalError> {
        if self.fail {
            return Err(RetrievalError::IndexFailed {
                message: "mock store offline".to_string(),
            });
        }
        if let Ok(mut indexed) = self.indexed.lock() {
            indexed.push((text.to_string(), metadata));
        }
        Ok(())
    }
}
