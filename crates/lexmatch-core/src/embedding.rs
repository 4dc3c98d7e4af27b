use std::sync::Arc;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::{EmbedderKind, EmbeddingConfig};
use crate::error::{LexMatchError, Result, classify_http_error};

/// Turns free text into a vector of the configured dimension.
pub trait Embedder: Send + Sync {
    fn provider(&self) -> &'static str;
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic local embedder built on feature hashing.
///
/// Tokens are folded onto a small legal vocabulary and stemmed, then
/// hashed together with character trigrams and token bigrams.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_tokens(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        let tokens = tokenize(text)
            .into_iter()
            .map(|token| canonicalize_legal_token(&token))
            .collect::<Vec<_>>();

        for token in &tokens {
            accumulate_feature(&mut vec, token, 1.0);
            for trigram in char_ngrams(token, 3) {
                accumulate_feature(&mut vec, &format!("tri:{trigram}"), 0.35);
            }
        }
        for pair in tokens.windows(2) {
            accumulate_feature(&mut vec, &format!("bi:{}_{}", pair[0], pair[1]), 0.8);
        }

        normalize_vector(&mut vec);
        vec
    }
}

impl Embedder for HashEmbedder {
    fn provider(&self) -> &'static str {
        "hash"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_tokens(text))
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dim: usize,
    http: Client,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (Some(endpoint), Some(model)) = (config.endpoint.as_ref(), config.model.as_ref())
        else {
            return Err(LexMatchError::Config(
                "http embedder requires an endpoint and a model".to_string(),
            ));
        };

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| LexMatchError::Config(format!("invalid embedder api key: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            endpoint: endpoints_url(endpoint),
            model: model.clone(),
            dim: config.dim,
            http,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn provider(&self) -> &'static str {
        "http"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .map_err(|err| classify_http_error(err, "embedder"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LexMatchError::Unavailable(format!(
                "embedder returned {status}: {body}"
            )));
        }
        let parsed = response.json::<EmbeddingResponse>()?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| LexMatchError::Internal("embedder returned no vectors".to_string()))?;
        if vector.len() != self.dim {
            return Err(LexMatchError::Validation(format!(
                "embedder returned {} dimensions, expected {}",
                vector.len(),
                self.dim
            )));
        }
        Ok(vector)
    }
}

pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.kind {
        EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::new(config.dim))),
        EmbedderKind::Http => Ok(Arc::new(HttpEmbedder::new(config)?)),
    }
}

/// Cosine similarity; zero when either side has no magnitude or lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|x| !x.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn endpoints_url(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.ends_with("/embeddings") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/embeddings")
    }
}

fn accumulate_feature(vec: &mut [f32], feature: &str, weight: f32) {
    let hash = blake3::hash(feature.as_bytes());
    let bytes = hash.as_bytes();
    let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let idx = raw % vec.len();
    vec[idx] += weight;
}

fn normalize_vector(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vec {
            *value /= norm;
        }
    }
}

fn canonicalize_legal_token(token: &str) -> String {
    let canonical = match token.trim() {
        "visa" | "visas" | "green" | "asylum" | "deportation" | "citizenship"
        | "naturalization" | "immigrant" | "immigration" => "immigration",
        "divorce" | "custody" | "alimony" | "adoption" | "family" | "matrimonial" => "family",
        "eviction" | "landlord" | "tenant" | "tenancy" | "lease" | "rent" => "housing",
        "fired" | "dismissal" | "wage" | "wages" | "employer" | "employment" | "workplace" => {
            "employment"
        }
        "arrest" | "arrested" | "charge" | "charged" | "criminal" | "dui" | "bail" => "criminal",
        other => other,
    };
    stem_suffix(canonical)
}

fn stem_suffix(token: &str) -> String {
    if token.len() <= 4 {
        return token.to_string();
    }
    for suffix in ["ing", "ed", "es", "s"] {
        if let Some(stripped) = token.strip_suffix(suffix)
            && stripped.len() >= 3
        {
            return stripped.to_string();
        }
    }
    token.to_string()
}

fn char_ngrams(token: &str, n: usize) -> Vec<String> {
    let chars = token.chars().collect::<Vec<_>>();
    if chars.len() < n {
        return vec![token.to_string()];
    }
    chars.windows(n).map(|window| window.iter().collect()).collect()
}
