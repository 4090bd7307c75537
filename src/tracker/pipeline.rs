//! The background run of one analysis
//!
//! Every write to the record goes through a generation check, and the
//! terminal transition is claimed while the record is still `Processing`.
//! Whoever loses that race (a cancel, a restart, or this run) does nothing.

use super::cancel::CancellationToken;
use super::engine::TrackerInner;
use super::events::AnalysisEvent;
use super::types::{AnalysisRequest, AnalysisStatus, SettledOutcome, Stage};
use crate::error::AnalysisError;
use crate::factcheck::{parse_response, ChatRequest, Completion, FactCheckResult};
use crate::notify::Notification;
use crate::stats::{RequestKind, UsageRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(super) struct Job {
    pub(super) id: String,
    pub(super) generation: u64,
    pub(super) kind: RequestKind,
    pub(super) token: CancellationToken,
    pub(super) text: String,
    pub(super) title: String,
}

struct Finished {
    result: FactCheckResult,
    total_tokens: u64,
}

impl TrackerInner {
    pub(super) async fn run(self: Arc<Self>, job: Job) {
        let started = Instant::now();
        match self.execute(&job).await {
            Ok(finished) => self.complete(&job, finished, started.elapsed()),
            Err(err) if err.is_cancellation() || job.token.is_cancelled() => {
                debug!(analysis_id = %job.id, "analysis stopped after cancellation");
            }
            Err(err) => self.fail(&job, err),
        }
    }

    async fn execute(&self, job: &Job) -> Result<Finished, AnalysisError> {
        self.checkpoint(job, Stage::Preparing)?;

        let api_key = self
            .credentials
            .api_key()?
            .ok_or(AnalysisError::CredentialMissing)?;
        self.checkpoint(job, Stage::CredentialsChecked)?;

        let request = ChatRequest::fact_check(&self.config, &job.text);
        self.checkpoint(job, Stage::SendingRequest)?;

        let completion = self.request_completion(job, &api_key, &request).await?;
        self.checkpoint(job, Stage::ProcessingResponse)?;

        let result = parse_response(&completion.content);
        self.checkpoint(job, Stage::Finishing)?;

        Ok(Finished {
            result,
            total_tokens: completion.total_tokens.unwrap_or(0),
        })
    }

    /// The network call, raced against cancellation and the request timeout.
    async fn request_completion(
        &self,
        job: &Job,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<Completion, AnalysisError> {
        let timeout = self.config.request_timeout();
        debug!(analysis_id = %job.id, model = %request.model, "sending fact-check request");

        tokio::select! {
            biased;
            _ = job.token.cancelled() => Err(AnalysisError::Cancelled),
            outcome = tokio::time::timeout(
                timeout,
                self.requester.complete(api_key, request, &job.token),
            ) => match outcome {
                Ok(result) => result.map_err(AnalysisError::from),
                Err(_) => {
                    warn!(
                        analysis_id = %job.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "fact-check request timed out"
                    );
                    Err(AnalysisError::Timeout(timeout))
                }
            },
        }
    }

    /// Advance progress and publish it, if this run still owns the record.
    fn checkpoint(&self, job: &Job, stage: Stage) -> Result<(), AnalysisError> {
        if job.token.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        let Some(mut analysis) = self.active.get_mut(&job.id) else {
            return Err(AnalysisError::Cancelled);
        };
        if analysis.generation != job.generation {
            return Err(AnalysisError::Cancelled);
        }

        let progress = stage.progress().max(analysis.record.progress);
        analysis.record.progress = progress;
        analysis.record.message = stage.message().to_string();
        debug!(analysis_id = %job.id, progress, "{}", stage.message());

        // Published under the entry guard so a concurrent cancel cannot slip
        // between the ownership check and the event.
        self.events.publish(AnalysisEvent::AnalysisProgress {
            analysis_id: job.id.clone(),
            message: stage.message().to_string(),
            progress,
        });
        Ok(())
    }

    /// Move the record out of `Processing`. False when another party got there first.
    fn transition(&self, job: &Job, apply: impl FnOnce(&mut AnalysisRequest)) -> bool {
        if job.token.is_cancelled() {
            return false;
        }
        match self.active.get_mut(&job.id) {
            Some(mut analysis)
                if analysis.generation == job.generation
                    && analysis.record.status == AnalysisStatus::Processing =>
            {
                apply(&mut analysis.record);
                true
            }
            _ => false,
        }
    }

    fn evict(&self, job: &Job) {
        self.active
            .remove_if(&job.id, |_, a| a.generation == job.generation);
    }

    fn complete(&self, job: &Job, finished: Finished, elapsed: Duration) {
        let Finished {
            result,
            total_tokens,
        } = finished;
        let verdict = result.verdict;

        let claimed = self.transition(job, |record| {
            record.status = AnalysisStatus::Completed;
            record.result = Some(result.clone());
        });
        if !claimed {
            debug!(analysis_id = %job.id, "result discarded, analysis no longer active");
            return;
        }

        // History first, so a settled completion can always be replayed from it.
        let now = self.clock.now();
        if let Err(e) = self
            .history
            .append(&job.id, &job.title, &job.text, &result, now)
        {
            warn!(analysis_id = %job.id, error = %e, "failed to save analysis to history");
        }
        self.settle(&job.id, SettledOutcome::Completed { verdict });
        self.record_usage(UsageRecord::Completed {
            kind: job.kind,
            tokens: total_tokens,
            elapsed,
            cross_check_score: Some(result.sources_validation.cross_verification_score),
        });

        info!(
            analysis_id = %job.id,
            verdict = %verdict,
            elapsed_ms = elapsed.as_millis() as u64,
            "analysis completed"
        );
        self.events.publish(AnalysisEvent::AnalysisComplete {
            analysis_id: job.id.clone(),
            result,
        });
        self.notifier
            .notify(&Notification::analysis_complete(&job.id, verdict));

        self.evict(job);
    }

    fn fail(&self, job: &Job, err: AnalysisError) {
        let message = err.user_message();

        let claimed = self.transition(job, |record| {
            record.status = AnalysisStatus::Error;
            record.error = Some(message.clone());
        });
        if !claimed {
            debug!(analysis_id = %job.id, error = %err, "failure discarded, analysis no longer active");
            return;
        }

        warn!(analysis_id = %job.id, error = %err, "analysis failed");
        self.settle(
            &job.id,
            SettledOutcome::Failed {
                error: message.clone(),
            },
        );
        self.record_usage(UsageRecord::Failed { kind: job.kind });
        self.events.publish(AnalysisEvent::AnalysisError {
            analysis_id: job.id.clone(),
            error: message,
        });

        self.evict(job);
    }
}
