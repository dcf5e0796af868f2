// Batch Orchestrator
//
// Runs many gemstones through the workflow engine with a bounded worker
// pool. Jobs are split into batches; each batch runs with `concurrency`
// workers via `buffer_unordered`, with a fixed pause between batches for
// external rate limits. One gemstone's failure never stops the others.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::gemstone_workflow::GemstoneWorkflowEngine;
use crate::analysis::types::GemstoneJob;
use crate::config::BatchConfig;

/// Outcome of one batch run
///
/// `analyzed` and `needs_review` are disjoint: both were persisted and
/// marked analyzed, the latter flagged for human follow-up. `failed`
/// gemstones stay unanalyzed; `skipped` ones were never started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub analyzed: Vec<String>,
    pub needs_review: Vec<String>,
    /// `(gemstone_id, error message)`
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.analyzed.len() + self.needs_review.len() + self.failed.len() + self.skipped.len()
    }

    fn sort(&mut self) {
        self.analyzed.sort();
        self.needs_review.sort();
        self.failed.sort();
        self.skipped.sort();
    }
}

enum JobOutcome {
    Analyzed { needs_review: bool },
    Failed(String),
    Skipped,
}

/// Bounded worker pool over the workflow engine
pub struct BatchOrchestrator {
    engine: Arc<GemstoneWorkflowEngine>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<GemstoneWorkflowEngine>, config: BatchConfig) -> Self {
        Self { engine, config }
    }

    /// Analyze all `jobs`
    ///
    /// Once `cancel` fires no new gemstone is started and in-flight service
    /// calls fail as cancelled. What happens to an in-flight gemstone then
    /// follows the image failure policy: under `abort` it is reported as
    /// failed; under `skip_image` it is still fused from the images that
    /// finished and lands in `analyzed` or `needs_review`, or in `failed`
    /// when no image finished.
    pub async fn run(&self, jobs: Vec<GemstoneJob>, cancel: &CancellationToken) -> BatchSummary {
        let mut summary = BatchSummary {
            run_id: Uuid::new_v4(),
            ..BatchSummary::default()
        };

        let total = jobs.len();
        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let pause = gemlab_common::time::millis_to_duration(self.config.inter_batch_pause_ms);
        let completed = Arc::new(AtomicUsize::new(0));
        let run_id = summary.run_id;

        info!(
            run_id = %run_id,
            total,
            batch_size,
            concurrency,
            "Starting batch analysis"
        );

        for (batch_index, batch) in jobs.chunks(batch_size).enumerate() {
            if batch_index > 0 && !cancel.is_cancelled() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            if cancel.is_cancelled() {
                summary
                    .skipped
                    .extend(batch.iter().map(|job| job.gemstone_id.clone()));
                continue;
            }

            let outcomes: Vec<(String, JobOutcome)> = stream::iter(batch.iter().cloned())
                .map(|job| {
                    let engine = self.engine.clone();
                    let cancel = cancel.clone();
                    let completed = completed.clone();

                    async move {
                        if cancel.is_cancelled() {
                            return (job.gemstone_id, JobOutcome::Skipped);
                        }

                        let outcome = match engine.analyze(&job, &cancel).await {
                            Ok(result) => JobOutcome::Analyzed {
                                needs_review: result.needs_review(),
                            },
                            Err(e) => {
                                error!(
                                    run_id = %run_id,
                                    gemstone_id = %job.gemstone_id,
                                    error = %e,
                                    "Gemstone failed, continuing with batch"
                                );
                                JobOutcome::Failed(e.to_string())
                            }
                        };

                        let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                        if current % 10 == 0 || current == total {
                            info!(
                                run_id = %run_id,
                                progress = format!("{}/{}", current, total),
                                "Batch progress update"
                            );
                        }

                        (job.gemstone_id, outcome)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (gemstone_id, outcome) in outcomes {
                match outcome {
                    JobOutcome::Analyzed { needs_review: false } => summary.analyzed.push(gemstone_id),
                    JobOutcome::Analyzed { needs_review: true } => summary.needs_review.push(gemstone_id),
                    JobOutcome::Failed(message) => summary.failed.push((gemstone_id, message)),
                    JobOutcome::Skipped => summary.skipped.push(gemstone_id),
                }
            }
        }

        summary.sort();

        if cancel.is_cancelled() {
            warn!(
                run_id = %run_id,
                skipped = summary.skipped.len(),
                "Batch analysis cancelled"
            );
        }
        info!(
            run_id = %run_id,
            analyzed = summary.analyzed.len(),
            needs_review = summary.needs_review.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Batch analysis completed"
        );

        summary
    }
}
