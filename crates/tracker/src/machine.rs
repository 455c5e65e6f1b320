//! The per-job progress state machine.
//!
//! [`JobMachine`] is pure: [`apply`](JobMachine::apply) folds one
//! [`Signal`] into the state and returns the [`Effect`]s the driver must
//! perform. The push channel and the poller are two producers feeding
//! this single consumer. Every signal passes the terminal guard first,
//! so once `Completed`, `Failed` or `Cancelled` is reached nothing else
//! is emitted.

use std::time::Duration;

use webaudit_core::job::Job;
use webaudit_core::progress::{DisplayProgress, EventOutcome, ProgressEvent};
use webaudit_core::types::AnalysisId;

use crate::api::{ApiError, JobSummary};
use crate::config::CoordinatorConfig;
use crate::error::TrackerError;
use crate::events::{FailureReason, JobEvent, JobState};
use crate::poll::{find_match, PollCycle, PollProgress};
use crate::submitter::SubmitOutcome;
use crate::transport::ChannelSignal;

/// Inputs to the state machine.
#[derive(Debug)]
pub enum Signal {
    /// The caller started the job.
    Start,
    /// The submission request finished.
    Submitted(Result<SubmitOutcome, TrackerError>),
    /// Something arrived on the push channel.
    Channel(ChannelSignal),
    /// The push channel did not open in time.
    ConnectDeadline,
    /// The open push channel stayed silent too long.
    ChannelIdle,
    /// The poll interval elapsed.
    PollDue,
    /// A history poll finished.
    Polled(Result<Vec<JobSummary>, ApiError>),
    /// A result lookup finished.
    Fetched {
        id: AnalysisId,
        result: Result<serde_json::Value, ApiError>,
    },
    /// The caller cancelled the job.
    Cancel,
}

/// Work the driver performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send the submission request; answer with [`Signal::Submitted`].
    Submit,
    /// Open the push channel for this session.
    OpenChannel { session_id: String },
    /// Fire [`Signal::ConnectDeadline`] after this long.
    ArmConnectDeadline(Duration),
    DisarmConnectDeadline,
    /// Fire [`Signal::ChannelIdle`] after this long, replacing any earlier timer.
    ArmChannelIdle(Duration),
    DisarmChannelIdle,
    /// Release the push channel.
    CloseChannel,
    /// Fire [`Signal::PollDue`] after this long.
    SchedulePoll(Duration),
    /// Request history now; answer with [`Signal::Polled`].
    Poll,
    /// Look up a result; answer with [`Signal::Fetched`].
    FetchResult(AnalysisId),
    /// Release the channel and clear every timer.
    Teardown,
    /// Deliver an event to the caller.
    Emit(JobEvent),
}

/// Where an active job's updates come from. Never visible to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Channel,
    Polling(PollCycle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Submitting,
    AwaitingChannel,
    Active(Source),
    Completed,
    Failed,
    Cancelled,
}

/// State machine for one job.
pub struct JobMachine {
    job: Job,
    config: CoordinatorConfig,
    phase: Phase,
    display: DisplayProgress,
}

impl JobMachine {
    pub fn new(job: Job, config: CoordinatorConfig) -> Self {
        Self {
            job,
            config,
            phase: Phase::Idle,
            display: DisplayProgress::new(),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn state(&self) -> JobState {
        match self.phase {
            Phase::Idle => JobState::Idle,
            Phase::Submitting => JobState::Submitting,
            Phase::AwaitingChannel => JobState::AwaitingChannel,
            Phase::Active(_) => JobState::Active,
            Phase::Completed => JobState::Completed,
            Phase::Failed => JobState::Failed,
            Phase::Cancelled => JobState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether updates currently come from polling.
    pub fn is_polling(&self) -> bool {
        matches!(self.phase, Phase::Active(Source::Polling(_)))
    }

    /// Fold one signal into the state.
    pub fn apply(&mut self, signal: Signal) -> Vec<Effect> {
        if self.is_terminal() {
            tracing::trace!(job_id = %self.job.id, ?signal, "Discarding signal after terminal state");
            return Vec::new();
        }

        match signal {
            Signal::Start => self.on_start(),
            Signal::Submitted(result) => self.on_submitted(result),
            Signal::Channel(signal) => self.on_channel(signal),
            Signal::ConnectDeadline => self.on_connect_deadline(),
            Signal::ChannelIdle => self.on_channel_idle(),
            Signal::PollDue => self.on_poll_due(),
            Signal::Polled(result) => self.on_polled(result),
            Signal::Fetched { id, result } => self.on_fetched(id, result),
            Signal::Cancel => {
                tracing::info!(job_id = %self.job.id, "Job cancelled");
                self.finish(Phase::Cancelled, JobEvent::Cancelled)
            }
        }
    }

    // ---- individual signal handlers ----

    fn on_start(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        self.phase = Phase::Submitting;
        vec![Effect::Emit(JobEvent::Submitting), Effect::Submit]
    }

    fn on_submitted(&mut self, result: Result<SubmitOutcome, TrackerError>) -> Vec<Effect> {
        if self.phase != Phase::Submitting {
            return Vec::new();
        }
        match result {
            Ok(SubmitOutcome::Cached(result)) => {
                let analysis_id = result.get("id").and_then(|v| v.as_i64());
                self.finish(
                    Phase::Completed,
                    JobEvent::Completed {
                        result,
                        cached: true,
                        analysis_id,
                    },
                )
            }
            Ok(SubmitOutcome::Pending(session_id)) => {
                self.job.session_id = Some(session_id.clone());
                self.phase = Phase::AwaitingChannel;
                vec![
                    Effect::Emit(JobEvent::AwaitingChannel {
                        session_id: session_id.clone(),
                    }),
                    Effect::OpenChannel { session_id },
                    Effect::ArmConnectDeadline(self.config.connect_timeout),
                ]
            }
            Err(e) => self.fail(FailureReason::from(e)),
        }
    }

    fn on_channel(&mut self, signal: ChannelSignal) -> Vec<Effect> {
        match signal {
            ChannelSignal::Opened => {
                if self.phase != Phase::AwaitingChannel {
                    return Vec::new();
                }
                tracing::info!(job_id = %self.job.id, "Push channel active");
                self.phase = Phase::Active(Source::Channel);
                vec![
                    Effect::DisarmConnectDeadline,
                    Effect::ArmChannelIdle(self.config.channel_idle_timeout),
                    Effect::Emit(JobEvent::Active(self.display.snapshot().clone())),
                ]
            }
            ChannelSignal::Message(event) => self.on_progress(event),
            ChannelSignal::Malformed(detail) => {
                tracing::warn!(job_id = %self.job.id, detail = %detail, "Discarding malformed progress message");
                // Garbage still proves the channel is alive.
                if self.phase == Phase::Active(Source::Channel) {
                    vec![Effect::ArmChannelIdle(self.config.channel_idle_timeout)]
                } else {
                    Vec::new()
                }
            }
            ChannelSignal::Error(e) => {
                tracing::warn!(job_id = %self.job.id, error = %e, "Push channel failed");
                self.fall_back()
            }
            ChannelSignal::Closed { code, reason } => {
                tracing::warn!(job_id = %self.job.id, ?code, reason = %reason, "Push channel closed");
                self.fall_back()
            }
        }
    }

    fn on_progress(&mut self, event: ProgressEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let from_channel = match self.phase {
            // A frame before the open notification still proves the channel works.
            Phase::AwaitingChannel => {
                self.phase = Phase::Active(Source::Channel);
                effects.push(Effect::DisarmConnectDeadline);
                if !matches!(event.outcome, EventOutcome::None) {
                    effects.push(Effect::Emit(JobEvent::Active(self.display.snapshot().clone())));
                }
                true
            }
            Phase::Active(Source::Channel) => true,
            Phase::Active(Source::Polling(_)) => false,
            _ => return effects,
        };

        match event.outcome {
            EventOutcome::None => {
                if from_channel {
                    effects.push(Effect::ArmChannelIdle(self.config.channel_idle_timeout));
                }
                let snapshot = self
                    .display
                    .update(event.stage, event.percent, event.message)
                    .clone();
                tracing::debug!(
                    job_id = %self.job.id,
                    stage = %snapshot.stage,
                    percent = snapshot.percent,
                    "Job progress",
                );
                effects.push(Effect::Emit(JobEvent::Active(snapshot)));
                effects
            }
            EventOutcome::Result(result) => {
                effects.extend(self.complete(result, event.analysis_id));
                effects
            }
            EventOutcome::Failure(reason) => {
                effects.extend(self.fail(FailureReason::Remote(reason)));
                effects
            }
        }
    }

    fn on_connect_deadline(&mut self) -> Vec<Effect> {
        if self.phase != Phase::AwaitingChannel {
            return Vec::new();
        }
        tracing::warn!(
            job_id = %self.job.id,
            timeout_secs = self.config.connect_timeout.as_secs(),
            "Push channel did not open in time",
        );
        self.fall_back()
    }

    fn on_channel_idle(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Active(Source::Channel) {
            return Vec::new();
        }
        tracing::warn!(
            job_id = %self.job.id,
            idle_secs = self.config.channel_idle_timeout.as_secs(),
            "Push channel went silent",
        );
        self.fall_back()
    }

    fn on_poll_due(&mut self) -> Vec<Effect> {
        match &self.phase {
            Phase::Active(Source::Polling(cycle)) if cycle.pending_fetch().is_none() => {
                vec![Effect::Poll]
            }
            _ => Vec::new(),
        }
    }

    fn on_polled(&mut self, result: Result<Vec<JobSummary>, ApiError>) -> Vec<Effect> {
        let job = &self.job;
        let Phase::Active(Source::Polling(cycle)) = &mut self.phase else {
            return Vec::new();
        };

        match result {
            Ok(summaries) => match find_match(&summaries, job, &self.config) {
                Some(summary) => {
                    tracing::info!(
                        job_id = %job.id,
                        analysis_id = summary.id,
                        attempt = cycle.attempt() + 1,
                        "Poll matched a finished analysis",
                    );
                    let id = summary.id;
                    cycle.begin_fetch(id);
                    vec![Effect::FetchResult(id)]
                }
                None => self.poll_miss(),
            },
            Err(e) if e.is_recoverable() => {
                tracing::warn!(job_id = %job.id, error = %e, "Poll failed, will retry");
                self.poll_miss()
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Poll failed permanently");
                self.fail(FailureReason::Transport(e.to_string()))
            }
        }
    }

    fn on_fetched(
        &mut self,
        id: AnalysisId,
        result: Result<serde_json::Value, ApiError>,
    ) -> Vec<Effect> {
        match &self.phase {
            Phase::Active(Source::Polling(cycle)) if cycle.pending_fetch() == Some(id) => {}
            _ => {
                tracing::debug!(job_id = %self.job.id, analysis_id = id, "Ignoring unrequested result");
                return Vec::new();
            }
        }
        match result {
            Ok(payload) => self.complete(payload, Some(id)),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(job_id = %self.job.id, analysis_id = id, error = %e, "Result fetch failed, will retry");
                self.poll_miss()
            }
            Err(e) => {
                tracing::error!(job_id = %self.job.id, analysis_id = id, error = %e, "Result fetch failed permanently");
                self.fail(FailureReason::Transport(e.to_string()))
            }
        }
    }

    // ---- transitions ----

    /// Switch to polling. Entering `Active` this way looks exactly like a
    /// channel open to the caller; leaving a live channel is silent.
    fn fall_back(&mut self) -> Vec<Effect> {
        let mut effects = match self.phase {
            Phase::AwaitingChannel => vec![
                Effect::DisarmConnectDeadline,
                Effect::CloseChannel,
                Effect::Emit(JobEvent::Active(self.display.snapshot().clone())),
            ],
            Phase::Active(Source::Channel) => vec![Effect::DisarmChannelIdle, Effect::CloseChannel],
            _ => return Vec::new(),
        };
        tracing::info!(job_id = %self.job.id, "Falling back to status polling");
        let cycle = PollCycle::new(&self.config);
        effects.push(Effect::SchedulePoll(cycle.interval()));
        self.phase = Phase::Active(Source::Polling(cycle));
        effects
    }

    /// Count an unsuccessful poll, nudge the estimate, and reschedule.
    fn poll_miss(&mut self) -> Vec<Effect> {
        let Phase::Active(Source::Polling(cycle)) = &mut self.phase else {
            return Vec::new();
        };
        match cycle.record_miss() {
            PollProgress::Exhausted => {
                tracing::error!(
                    job_id = %self.job.id,
                    attempts = cycle.attempt(),
                    "Poll budget exhausted",
                );
                self.fail(FailureReason::Timeout)
            }
            PollProgress::Continue => {
                let interval = cycle.interval();
                let before = self.display.snapshot().percent;
                self.display.raise(cycle.estimate_percent());
                let mut effects = Vec::with_capacity(2);
                if self.display.snapshot().percent > before {
                    effects.push(Effect::Emit(JobEvent::Active(
                        self.display.snapshot().clone(),
                    )));
                }
                effects.push(Effect::SchedulePoll(interval));
                effects
            }
        }
    }

    fn complete(
        &mut self,
        result: serde_json::Value,
        analysis_id: Option<AnalysisId>,
    ) -> Vec<Effect> {
        tracing::info!(job_id = %self.job.id, ?analysis_id, "Job completed");
        self.finish(
            Phase::Completed,
            JobEvent::Completed {
                result,
                cached: false,
                analysis_id,
            },
        )
    }

    fn fail(&mut self, reason: FailureReason) -> Vec<Effect> {
        tracing::warn!(job_id = %self.job.id, reason = %reason, "Job failed");
        self.finish(Phase::Failed, JobEvent::Failed { reason })
    }

    /// Enter a terminal phase. The only path that emits a terminal event.
    fn finish(&mut self, phase: Phase, event: JobEvent) -> Vec<Effect> {
        self.phase = phase;
        vec![Effect::Teardown, Effect::Emit(event)]
    }
}
