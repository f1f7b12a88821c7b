//! Lane consumer.
//!
//! One long-lived task per lane. Each task pops a job, applies it through the
//! engine, and moves on. A failing job is logged, counted, reported to its
//! connection when possible, and dropped; the loop itself only stops on
//! cancellation.

use crate::engine::Engine;
use crate::errors::MatchError;
use crate::observability::{metrics, HealthState};
use crate::queue::{EventQueue, Job, Lane};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed pop before trying the store again.
const POP_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct LaneConsumer {
    lane: Lane,
    queue: EventQueue,
    engine: Arc<Engine>,
    cancel: CancellationToken,
    health: Option<Arc<HealthState>>,
}

impl LaneConsumer {
    pub fn new(
        lane: Lane,
        queue: EventQueue,
        engine: Arc<Engine>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lane,
            queue,
            engine,
            cancel,
            health: None,
        }
    }

    /// Report this lane's liveness and pop failures to readiness.
    #[must_use]
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Drain the lane until cancelled.
    pub async fn run(self) {
        info!(target: "mm.queue", lane = self.lane.as_str(), "Lane consumer started");
        if let Some(health) = &self.health {
            health.lane_started();
        }
        let mut stalled = false;

        loop {
            let popped = tokio::select! {
                () = self.cancel.cancelled() => break,
                popped = self.queue.pop_raw(self.lane) => popped,
            };

            match popped {
                Ok(raw) => {
                    if stalled {
                        stalled = false;
                        if let Some(health) = &self.health {
                            health.lane_recovered();
                        }
                        info!(target: "mm.queue", lane = self.lane.as_str(), "Pop recovered");
                    }
                    self.process(&raw).await;
                }
                Err(e) => {
                    if !stalled {
                        stalled = true;
                        if let Some(health) = &self.health {
                            health.lane_stalled();
                        }
                    }
                    metrics::record_error("pop", e.error_type_label());
                    warn!(
                        target: "mm.queue",
                        lane = self.lane.as_str(),
                        error = %e,
                        "Pop failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(POP_RETRY_DELAY) => {}
                    }
                }
            }
        }

        if let Some(health) = &self.health {
            health.lane_stopped(stalled);
        }
        info!(target: "mm.queue", lane = self.lane.as_str(), "Lane consumer stopped");
    }

    /// Apply one raw payload. Never fails; errors end with the job.
    pub async fn process(&self, raw: &str) {
        let lane = self.lane.as_str();

        let job = match Job::decode(raw) {
            Ok(job) => job,
            Err(e) => {
                metrics::record_job(lane, "unknown", "malformed");
                warn!(target: "mm.queue", lane, error = %e, "Dropping malformed job");
                return;
            }
        };

        if job.lane() != self.lane {
            debug!(target: "mm.queue", lane, kind = job.kind(), "Job found on a foreign lane");
        }

        let started = Instant::now();
        let result = self.engine.handle(&job).await;
        metrics::record_job_duration(job.kind(), started.elapsed());

        match result {
            Ok(()) => metrics::record_job(lane, job.kind(), "success"),
            Err(e) => self.fail(&job, &e).await,
        }
    }

    async fn fail(&self, job: &Job, error: &MatchError) {
        metrics::record_job(self.lane.as_str(), job.kind(), "error");
        metrics::record_error(job.kind(), error.error_type_label());
        warn!(
            target: "mm.queue",
            lane = self.lane.as_str(),
            kind = job.kind(),
            member_id = %job.member_id(),
            error = %error,
            "Job failed, dropping"
        );
        self.engine
            .report_exception(job.connection_id(), error)
            .await;
    }
}
