//! External provider interfaces
//!
//! The engines never talk to an LLM or embedding model directly; they go
//! through the narrow traits below so the rest of the core stays
//! deterministic and unit-testable with mocked providers. All parsing and
//! validation of free-form provider output lives in this adapter layer.
//!
//! Provider errors propagate to the immediate caller; no retry here,
//! backoff policy belongs to the caller or an outer job layer.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;

/// Text → fixed-dimensionality vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for the given text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension, fixed per deployment
    fn dimension(&self) -> usize;
}

/// Prompt → completion text
///
/// Structured output is requested in the prompt; callers defensively
/// extract a JSON payload from the response with [`extract_json`] and
/// treat parse failure as "no result", never as a crash.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// External collaborator that renders a timeline narrative for an entity
///
/// Timeline building is expensive (it walks the owner's event history),
/// which is exactly why the insight cache computes it lazily.
#[async_trait]
pub trait TimelineBuilder: Send + Sync {
    async fn build_timeline(&self, owner_id: &str, entity_name: &str) -> Result<String>;
}

/// Extract a JSON payload from free-form completion text
///
/// Tries, in order: the whole text, a fenced ```json block, and the first
/// balanced top-level array or object. Returns None when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(block.trim()) {
            return Some(value);
        }
    }

    // Prefer an array over an object: structured batch responses are arrays
    for open in ['[', '{'] {
        if let Some(candidate) = balanced_span(trimmed, open) {
            if let Ok(value) = serde_json::from_str(candidate) {
                return Some(value);
            }
        }
    }

    debug!("no JSON payload found in provider output ({} bytes)", text.len());
    None
}

/// Contents of the first fenced code block, if any
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// First balanced `[...]` or `{...}` span, brace-counted and string-aware
fn balanced_span(text: &str, open: char) -> Option<&str> {
    let close = if open == '[' { ']' } else { '}' };
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deterministic hash-based embedder
///
/// Distributes each token over a handful of dimensions by hashing, then
/// L2-normalizes. Far less semantic than a real model, but fast, offline,
/// and stable. Shared tokens between two texts produce proportional
/// cosine similarity. Used as the test embedder and as a fallback where
/// no model is available.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimension];

        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let hash = hasher.finish();

            // Spread each token across four dimensions so collisions
            // between unrelated tokens stay rare
            for k in 0..4u32 {
                let index = (hash.rotate_left(16 * k) as usize) % self.dimension;
                embedding[index] += 1.0;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json(r#"[{"index": 0}]"#).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn test_extract_json_fenced() {
        let text = "Here are the findings:\n```json\n[{\"index\": 1, \"reason\": \"x\"}]\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value[0]["index"], 1);
    }

    #[test]
    fn test_extract_json_embedded_array() {
        let text = "Sure! The result is [1, 2, 3] as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_extract_json_brackets_inside_strings() {
        let text = r#"noise {"reason": "uses ] and } inside", "index": 0} trailing"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["index"], 0);
    }

    #[test]
    fn test_extract_json_garbage() {
        assert!(extract_json("no structure here at all").is_none());
        assert!(extract_json("").is_none());
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_ordering() {
        let embedder = HashEmbedder::new(256);
        let query = embedder.embed("what is my favorite color").await.unwrap();
        let close = embedder.embed("my favorite color is blue").await.unwrap();
        let far = embedder.embed("the deployment pipeline failed").await.unwrap();

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(128);
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }
}
