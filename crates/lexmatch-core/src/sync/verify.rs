use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Discrepancy, ProfileFilter, SearchFilter, VerifyReport};
use crate::projection::Project;
use crate::sync_policy::{push_discrepancy, sample_offsets};

use super::IndexSynchronizer;

const MAX_REPORTED_DISCREPANCIES: usize = 50;

impl IndexSynchronizer {
    /// Compares store and index counts and fingerprints of an evenly spaced
    /// sample of profiles. Only reports; repair is left to resync.
    ///
    /// An unreachable index is recorded as a discrepancy rather than an error
    /// so every run leaves a history entry.
    pub fn verify_consistency(&self) -> Result<VerifyReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut discrepancies = Vec::new();

        let store_count = self.store.count(&ProfileFilter::all())?;
        let index_count = match self.index.count(&SearchFilter::default()) {
            Ok(count) => Some(count),
            Err(err) => {
                push_discrepancy(
                    &mut discrepancies,
                    Discrepancy::IndexUnavailable {
                        message: err.to_string(),
                    },
                    MAX_REPORTED_DISCREPANCIES,
                );
                None
            }
        };
        if let Some(index_count) = index_count
            && index_count != store_count
        {
            push_discrepancy(
                &mut discrepancies,
                Discrepancy::CountMismatch {
                    store: store_count,
                    index: index_count,
                },
                MAX_REPORTED_DISCREPANCIES,
            );
        }

        let mut sampled = 0usize;
        if index_count.is_some() {
            for offset in sample_offsets(store_count, self.config.verify_sample_size) {
                let skip = usize::try_from(offset).unwrap_or(usize::MAX);
                let Some(profile) = self.store.find(&ProfileFilter::all(), skip, 1)?.pop() else {
                    break;
                };
                sampled += 1;
                let expected = profile.project(self.embedding_dim).fingerprint();
                match self.index.get(&profile.id) {
                    Ok(Some(indexed)) if indexed.fingerprint == expected => {}
                    Ok(Some(_)) => push_discrepancy(
                        &mut discrepancies,
                        Discrepancy::StaleDocument {
                            profile_id: profile.id,
                        },
                        MAX_REPORTED_DISCREPANCIES,
                    ),
                    Ok(None) => push_discrepancy(
                        &mut discrepancies,
                        Discrepancy::MissingDocument {
                            profile_id: profile.id,
                        },
                        MAX_REPORTED_DISCREPANCIES,
                    ),
                    Err(err) => {
                        push_discrepancy(
                            &mut discrepancies,
                            Discrepancy::IndexUnavailable {
                                message: err.to_string(),
                            },
                            MAX_REPORTED_DISCREPANCIES,
                        );
                        break;
                    }
                }
            }
        }

        let report = VerifyReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            store_count,
            index_count,
            sampled,
            consistent: discrepancies.is_empty(),
            discrepancies,
        };
        self.state.record_verify_run(&report)?;

        if report.consistent {
            info!(run_id = %report.run_id, store_count, sampled, "index consistent");
        } else {
            warn!(
                run_id = %report.run_id,
                store_count,
                index_count = ?report.index_count,
                sampled,
                discrepancies = report.discrepancies.len(),
                "index inconsistent"
            );
        }
        Ok(report)
    }
}
