use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};

use crate::error::{LexMatchError, Result};
use crate::models::{MatchRequest, MatchResult};
use crate::retrieval::request_deadline;

use super::MatchingCore;

const OP_MATCH: &str = "match.find";

impl MatchingCore {
    /// Ranks professionals for `request`. Index trouble degrades the answer
    /// to the fallback path; only a failing profile store is an error.
    pub fn find_matches(&self, request: &MatchRequest) -> Result<MatchResult> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        let output = (|| -> Result<MatchResult> {
            let deadline = request_deadline(request, self.retriever.config(), started);
            let scorer = self.scorer();
            let retrieval = self.retriever.retrieve(
                request,
                scorer.config().max_matches,
                scorer.reference_year(),
                deadline,
            )?;
            let matches = scorer.rank(&retrieval.candidates, request);
            Ok(MatchResult {
                matches,
                served_from: retrieval.source,
                candidates_considered: retrieval.candidates.len(),
                degraded: retrieval.degraded,
            })
        })();

        match output {
            Ok(result) => {
                let details = json!({
                    "specialisms": request.specialisms,
                    "urgency": request.urgency.as_str(),
                    "served_from": result.served_from.as_str(),
                    "candidates": result.candidates_considered,
                    "matches": result.matches.len(),
                });
                if let Some(note) = &result.degraded {
                    self.log_request_warning(request_id, OP_MATCH, started, note, Some(details));
                } else {
                    self.log_request_status(request_id, OP_MATCH, "ok", started, Some(details));
                }
                info!(
                    served_from = result.served_from.as_str(),
                    candidates = result.candidates_considered,
                    matches = result.matches.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "match request served"
                );
                Ok(result)
            }
            Err(err) => {
                self.log_request_error(
                    request_id,
                    OP_MATCH,
                    started,
                    &err,
                    Some(json!({ "specialisms": request.specialisms })),
                );
                Err(err)
            }
        }
    }

    /// Embeds `text` with the configured embedder and matches with the
    /// resulting vector. An embedder failure falls back to a filter-only
    /// search unless the request requires similarity.
    pub fn find_matches_for_text(&self, text: &str, request: &MatchRequest) -> Result<MatchResult> {
        if text.trim().is_empty() {
            return Err(LexMatchError::Validation("match text is empty".to_string()));
        }
        let mut request = request.clone();
        match self.embedder.embed(text) {
            Ok(vector) => request.embedding = Some(vector),
            Err(err) if request.require_similarity => return Err(err),
            Err(err) => {
                warn!(
                    provider = self.embedder.provider(),
                    error = %err,
                    "query embedding failed; matching without similarity"
                );
                request.embedding = None;
            }
        }
        self.find_matches(&request)
    }
}
