//! Fires a job once per day at a fixed local wall-clock time.
//!
//! Targets are absolute instants derived from the configured time of day, so a slow
//! run never shifts later targets. The wait itself is a monotonic `tokio` sleep,
//! re-checked against the wall clock on wake-up.

use std::sync::Arc;

use time::{Duration, OffsetDateTime, Time, UtcOffset};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Longest single sleep before the wall clock is consulted again.
const MAX_SLEEP: std::time::Duration = std::time::Duration::from_secs(3600);

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock reported in the market's fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

#[async_trait::async_trait]
pub trait DailyJob: Send + Sync {
    async fn fire(&self, fired_at: OffsetDateTime, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed { target: OffsetDateTime },
    Firing { target: OffsetDateTime },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("run started {running_since} is still active at {target}; skipping this run")]
pub struct SchedulingOverrunError {
    pub target: OffsetDateTime,
    pub running_since: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub runs_started: u64,
    pub overruns: u64,
}

/// First instant strictly after `now` whose local time is `at`.
pub fn next_occurrence_after(now: OffsetDateTime, at: Time) -> OffsetDateTime {
    let today = now.replace_time(at);
    if today > now {
        today
    } else {
        today.saturating_add(Duration::days(1))
    }
}

/// Target following `previous`, skipping any occurrences already in the past.
pub fn rearm(previous: OffsetDateTime, now: OffsetDateTime, at: Time) -> OffsetDateTime {
    let next = previous.replace_time(at).saturating_add(Duration::days(1));
    if next > now {
        next
    } else {
        next_occurrence_after(now, at)
    }
}

struct InFlight {
    started: OffsetDateTime,
    handle: JoinHandle<()>,
}

pub struct DailyScheduler<J, C = SystemClock> {
    job: Arc<J>,
    clock: C,
    at: Time,
    state: watch::Sender<SchedulerState>,
}

impl<J, C> DailyScheduler<J, C>
where
    J: DailyJob + 'static,
    C: Clock,
{
    pub fn new(job: Arc<J>, clock: C, at: Time) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            job,
            clock,
            at,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Runs until `cancel` fires, then waits for the in-flight run to wind down.
    pub async fn run(self, cancel: CancellationToken) -> SchedulerSummary {
        let mut summary = SchedulerSummary::default();
        let mut in_flight: Option<InFlight> = None;
        let mut target = next_occurrence_after(self.clock.now(), self.at);

        loop {
            self.state.send_replace(SchedulerState::Armed { target });
            tracing::info!(next_run = %target, "scheduler armed");

            if !self.wait_until(target, &cancel).await {
                break;
            }

            if let Some(run) = in_flight.take() {
                if run.handle.is_finished() {
                    reap(run.handle).await;
                } else {
                    let err = SchedulingOverrunError {
                        target,
                        running_since: run.started,
                    };
                    tracing::warn!(error = %err, "scheduling overrun");
                    metrics::counter!("scheduler_overruns_total").increment(1);
                    summary.overruns += 1;
                    in_flight = Some(run);
                    target = rearm(target, self.clock.now(), self.at);
                    continue;
                }
            }

            self.state.send_replace(SchedulerState::Firing { target });
            let fired_at = self.clock.now();
            tracing::info!(fired_at = %fired_at, "scheduler firing");
            metrics::counter!("scheduler_runs_total").increment(1);
            summary.runs_started += 1;
            in_flight = Some(InFlight {
                started: fired_at,
                handle: spawn_run(self.job.clone(), fired_at, cancel.child_token()),
            });

            target = rearm(target, self.clock.now(), self.at);
        }

        self.state.send_replace(SchedulerState::Idle);
        if let Some(run) = in_flight {
            tracing::info!(started = %run.started, "waiting for in-flight run to stop");
            reap(run.handle).await;
        }
        tracing::info!(
            runs_started = summary.runs_started,
            overruns = summary.overruns,
            "scheduler stopped"
        );
        summary
    }

    /// Returns false if cancelled before `target` was reached.
    async fn wait_until(&self, target: OffsetDateTime, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = self.clock.now();
            if now >= target {
                return true;
            }
            let remaining = std::time::Duration::try_from(target - now)
                .unwrap_or(std::time::Duration::ZERO)
                .min(MAX_SLEEP);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }
}

fn spawn_run<J: DailyJob + 'static>(
    job: Arc<J>,
    fired_at: OffsetDateTime,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match job.fire(fired_at, cancel).await {
            Ok(()) => tracing::info!(fired_at = %fired_at, "run finished"),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), fired_at = %fired_at, "run failed");
                metrics::counter!("scheduler_run_failures_total").increment(1);
            }
        }
    })
}

async fn reap(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "run task aborted");
        metrics::counter!("scheduler_run_failures_total").increment(1);
    }
}
