//! The sweep loop: pull a circle, query it, decide and claim per resource,
//! append the visit, broadcast it, pause.
//!
//! The loop suspends only on the query, the claim and the pacing delays;
//! each of those races the run's cancellation signal. A visit record is
//! appended once every resource in it has been resolved. The one exception
//! is a cancel that lands in the pause after a successful claim: the claim
//! already happened remotely, so the resources resolved up to that point
//! are appended before the run stops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::broadcast::LiveBroadcaster;
use crate::client::{RemoteError, ResourceClient};
use crate::model::{Circle, Identity, VisitRecord};
use crate::policy::decide;

/// Randomized delays between remote calls, in whole seconds (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Pause after every claim attempt.
    pub claim_delay_secs: (u64, u64),
    /// Pause after each recorded circle.
    pub circle_delay_secs: (u64, u64),
}

impl Pacing {
    /// No delays at all.
    pub const fn none() -> Self {
        Self {
            claim_delay_secs: (0, 0),
            circle_delay_secs: (0, 0),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            claim_delay_secs: (1, 3),
            circle_delay_secs: (0, 2),
        }
    }
}

/// Why a run stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunEnd {
    /// The sweep produced its last circle.
    #[default]
    Exhausted,
    /// The cancellation signal fired.
    Cancelled,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub end: RunEnd,
    /// Circles whose visit was recorded.
    pub circles_visited: u64,
    /// Circles skipped because the remote was overloaded.
    pub circles_skipped: u64,
    /// Resources returned across all recorded circles.
    pub resources_seen: u64,
    /// Successful claims.
    pub claimed: u64,
}

/// A failure that aborts the run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Query failed with anything other than an overload.
    #[error("query at ({lat}, {lon}) failed")]
    Query {
        /// Circle latitude.
        lat: f64,
        /// Circle longitude.
        lon: f64,
        /// Remote failure.
        source: RemoteError,
    },
    /// Claim attempt failed. Claims are never retried.
    #[error("claim of resource {resource_id} failed")]
    Claim {
        /// Remote id of the resource.
        resource_id: String,
        /// Remote failure.
        source: RemoteError,
    },
}

impl RunError {
    /// The remote failure behind this error.
    pub fn remote(&self) -> &RemoteError {
        match self {
            RunError::Query { source, .. } | RunError::Claim { source, .. } => source,
        }
    }
}

enum Visit {
    Recorded(VisitRecord),
    // Cancelled after at least one claim went through.
    Interrupted(VisitRecord),
    Skipped,
    Cancelled,
}

/// Drives one sweep against a [`ResourceClient`], recording into the
/// broadcaster's history.
pub struct Orchestrator {
    client: Arc<dyn ResourceClient>,
    identity: Identity,
    broadcaster: LiveBroadcaster,
    pacing: Pacing,
    rng: StdRng,
}

impl Orchestrator {
    /// Orchestrator with default pacing and an entropy-seeded rng.
    pub fn new(client: Arc<dyn ResourceClient>, identity: Identity, broadcaster: LiveBroadcaster) -> Self {
        Self {
            client,
            identity,
            broadcaster,
            pacing: Pacing::default(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replaces the pacing delays.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Replaces the rng used for pacing draws.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Runs `sweep` to exhaustion or until `cancel` turns true.
    ///
    /// Overloaded queries skip their circle. Any other query failure, and any
    /// claim failure, aborts with the records appended so far left intact.
    pub async fn run<S>(&mut self, sweep: S, mut cancel: watch::Receiver<bool>) -> Result<RunReport, RunError>
    where
        S: Iterator<Item = Circle> + Send,
    {
        info!(identity = %self.identity.username, "starting sweep");
        let mut report = RunReport::default();

        for circle in sweep {
            if *cancel.borrow() {
                return Ok(cancelled(report));
            }

            match self.visit(&circle, &mut cancel, &mut report).await? {
                Visit::Cancelled => return Ok(cancelled(report)),
                Visit::Skipped => {}
                Visit::Recorded(record) => self.record(record, &mut report),
                Visit::Interrupted(record) => {
                    self.record(record, &mut report);
                    return Ok(cancelled(report));
                }
            }

            if !self.pause(self.pacing.circle_delay_secs, &mut cancel).await {
                return Ok(cancelled(report));
            }
        }

        info!(
            visited = report.circles_visited,
            skipped = report.circles_skipped,
            claimed = report.claimed,
            "sweep finished"
        );
        Ok(report)
    }

    /// Resolves one circle into a complete record, or reports why there is none.
    async fn visit(
        &mut self,
        circle: &Circle,
        cancel: &mut watch::Receiver<bool>,
        report: &mut RunReport,
    ) -> Result<Visit, RunError> {
        info!(lat = circle.lat, lon = circle.lon, radius_km = circle.radius_km, "querying circle");

        let client = Arc::clone(&self.client);
        let resources = match until_cancelled(cancel, client.query(circle)).await {
            None => return Ok(Visit::Cancelled),
            Some(Ok(resources)) => resources,
            Some(Err(e)) if e.is_overload() => {
                warn!(lat = circle.lat, lon = circle.lon, error = %e, "remote overloaded; skipping circle");
                report.circles_skipped += 1;
                return Ok(Visit::Skipped);
            }
            Some(Err(source)) => {
                return Err(RunError::Query {
                    lat: circle.lat,
                    lon: circle.lon,
                    source,
                })
            }
        };

        let mut record = VisitRecord::for_circle(circle);
        for resource in &resources {
            let decision = decide(resource, &self.identity);
            if !decision.attempt_claim {
                info!(
                    id = %resource.id,
                    claimed_by = resource.claimant().unwrap_or_default(),
                    owned = decision.outcome.owned,
                    "resource already collected"
                );
                record.resources.push(decision.outcome);
                continue;
            }

            let claim = client.claim(&resource.id, &self.identity.user_id, resource.amount);
            match until_cancelled(cancel, claim).await {
                None => return Ok(Visit::Cancelled),
                Some(Err(source)) => {
                    return Err(RunError::Claim {
                        resource_id: resource.id.clone(),
                        source,
                    })
                }
                Some(Ok(())) => {}
            }
            info!(id = %resource.id, amount = resource.amount, "collected resource");
            report.claimed += 1;
            record.resources.push(decision.claimed());

            if !self.pause(self.pacing.claim_delay_secs, cancel).await {
                report.resources_seen += record.resources.len() as u64;
                return Ok(Visit::Interrupted(record));
            }
        }

        report.resources_seen += resources.len() as u64;
        Ok(Visit::Recorded(record))
    }

    fn record(&self, record: VisitRecord, report: &mut RunReport) {
        let stored = self.broadcaster.history().append(record);
        self.broadcaster.publish(&stored);
        report.circles_visited += 1;
        info!(seq = stored.seq, resources = stored.resources.len(), "recorded visit");
    }

    /// Sleeps a random whole number of seconds from `range`. Returns false
    /// if cancelled first.
    async fn pause(&mut self, (lo, hi): (u64, u64), cancel: &mut watch::Receiver<bool>) -> bool {
        let secs = if hi > lo { self.rng.random_range(lo..=hi) } else { lo };
        if secs == 0 {
            return !*cancel.borrow();
        }
        until_cancelled(cancel, tokio::time::sleep(Duration::from_secs(secs)))
            .await
            .is_some()
    }
}

fn cancelled(mut report: RunReport) -> RunReport {
    info!(visited = report.circles_visited, "sweep cancelled");
    report.end = RunEnd::Cancelled;
    report
}

/// Resolves when `cancel` turns true. Never resolves if the sender is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn until_cancelled<F: Future>(cancel: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = wait_cancelled(cancel) => None,
        out = fut => Some(out),
    }
}
