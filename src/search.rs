use crate::knowledge::{KbError, KnowledgeBase};
use crate::model::Camera;
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_LIMIT: usize = 10;
const SCORE_FLOOR: f32 = 0.3;
const BRAND_CONCURRENCY: usize = 10;

/// Weighting of the two signals in the final rank.
const BRAND_WEIGHT: f32 = 0.3;
const MODEL_WEIGHT: f32 = 0.7;

#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    pub brand: String,
    pub brand_id: String,
    pub model: String,
    pub score: f32,
}

/// Free-text search over the camera corpus. The first query token is
/// matched against brand ids (cheap, no JSON decode); only surviving
/// brands are loaded and scored per model.
pub struct SearchEngine {
    kb: Arc<KnowledgeBase>,
}

impl SearchEngine {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, KbError> {
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let mut tokens = normalized.split_whitespace().map(str::to_string);
        let brand_token = tokens.next().unwrap_or_default();
        let model_tokens: Vec<String> = tokens.collect();

        let brands = self.kb.list_brands().await?;
        let mut hits: Vec<SearchHit> = stream::iter(brands)
            .map(|brand_id| {
                let kb = Arc::clone(&self.kb);
                let brand_token = brand_token.clone();
                let model_tokens = model_tokens.clone();
                async move {
                    let brand_score = brand_score(&brand_id, &brand_token);
                    if brand_score < SCORE_FLOOR {
                        return Vec::new();
                    }
                    let cam = match kb.load_brand(&brand_id).await {
                        Ok(cam) => cam,
                        Err(err) => {
                            debug!(brand = %brand_id, error = %err, "skipping brand during search");
                            return Vec::new();
                        }
                    };
                    score_camera(&cam, brand_score, &model_tokens)
                }
            })
            .buffer_unordered(BRAND_CONCURRENCY)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Exact-ish model lookup used by the scanner: keep every brand with a
    /// model whose similarity to `name` clears the threshold, ranked by the
    /// best similarity found in any entry.
    pub async fn search_by_model(
        &self,
        name: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Camera>, KbError> {
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
        let query = normalize(name);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut matched = self
            .kb
            .streaming_search(|cam| best_model_similarity(cam, &query) >= threshold)
            .await?;

        for cam in &mut matched {
            cam.match_score = Some(best_model_similarity(cam, &query));
        }
        matched.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matched.truncate(limit);
        Ok(matched)
    }
}

fn score_camera(cam: &Camera, brand_score: f32, model_tokens: &[String]) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for entry in &cam.entries {
        for model in &entry.models {
            let model_norm = normalize(model);
            if model_norm.is_empty() || !seen.insert(model_norm.clone()) {
                continue;
            }

            // A bare brand query ranks the brand's models by brand score
            // alone.
            let model_score = if model_tokens.is_empty() {
                brand_score
            } else {
                model_score(&model_norm, model_tokens)
            };

            let combined = BRAND_WEIGHT * brand_score + MODEL_WEIGHT * model_score;
            if combined < SCORE_FLOOR {
                continue;
            }

            out.push(SearchHit {
                brand: cam.brand.clone(),
                brand_id: cam.brand_id.clone(),
                model: model.clone(),
                score: combined,
            });
        }
    }

    out
}

/// Lowercase, keep `[a-z0-9\s-]`, collapse whitespace.
pub fn normalize(query: &str) -> String {
    let filtered: String = query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First-match ladder from exact down to edit-distance similarity.
pub fn brand_score(brand: &str, token: &str) -> f32 {
    let brand = brand.to_lowercase();
    if brand == token {
        return 1.0;
    }

    let brand_stripped = brand.replace('-', "");
    let token_stripped = token.replace('-', "");
    if brand_stripped == token_stripped {
        return 0.95;
    }
    if brand.starts_with(token) || brand_stripped.starts_with(&token_stripped) {
        return 0.85;
    }
    if brand.contains(token) || brand_stripped.contains(&token_stripped) {
        return 0.75;
    }
    if is_subsequence(token, &brand) {
        return 0.6;
    }
    similarity(token, &brand) * 0.5
}

pub fn model_score(model: &str, tokens: &[String]) -> f32 {
    let joined = tokens.join(" ");
    if joined == model {
        return 1.0;
    }

    let matched = tokens.iter().filter(|t| model.contains(t.as_str())).count();
    if matched == tokens.len() {
        // All tokens present; reward by how much of the model they cover.
        let token_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
        let coverage = (token_chars as f32 / model.chars().count().max(1) as f32).min(1.0);
        return 0.8 + 0.2 * coverage;
    }

    let concatenated = tokens.concat();
    if is_subsequence(&concatenated, model) {
        return 0.6;
    }
    similarity(&joined, model) * 0.5
}

fn best_model_similarity(cam: &Camera, query: &str) -> f32 {
    cam.entries
        .iter()
        .flat_map(|e| e.models.iter())
        .map(|m| model_similarity(query, &normalize(m)))
        .fold(0.0, f32::max)
}

/// Similarity for the scanner's model hint: exact 1.0, containment of one
/// side in the other 0.9 (a hint like "hikvision ds-2cd2032" must still
/// pin the model), otherwise edit-distance similarity.
pub fn model_similarity(query: &str, model: &str) -> f32 {
    if model.is_empty() || query.is_empty() {
        return 0.0;
    }
    if query == model {
        return 1.0;
    }
    if query.contains(model) || model.contains(query) {
        return 0.9;
    }
    similarity(query, model)
}

/// `1 - edit_distance / max(len)`.
pub fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Characters of `needle` appear in `haystack` in order, not necessarily
/// contiguously.
fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|n| chars.any(|h| h == n))
}
