//! Per-job driver task.
//!
//! [`spawn_job`] validates the target, then spawns a task that owns one
//! [`JobMachine`] and performs its effects: the submission call, the push
//! channel, both timers and the poll requests. All inputs are funnelled
//! through a single `select!` so the machine sees one ordered signal
//! stream. Events reach the caller through the returned [`JobHandle`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use webaudit_core::job::JobOptions;
use webaudit_core::types::JobId;

use crate::api::AuditApi;
use crate::client::WsPushChannel;
use crate::config::{CoordinatorConfig, TrackerConfig};
use crate::error::TrackerError;
use crate::events::{JobEvent, JobState};
use crate::machine::{Effect, JobMachine, Signal};
use crate::submitter::JobSubmitter;
use crate::transport::{ChannelHandle, ChannelSignal, PushChannel, StatusPoller, SubmitEndpoint};

/// The three adapters a job talks to.
#[derive(Clone)]
pub struct Transports {
    pub submit: Arc<dyn SubmitEndpoint>,
    pub channel: Arc<dyn PushChannel>,
    pub status: Arc<dyn StatusPoller>,
}

impl Transports {
    /// Production adapters for one analyzer deployment.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let api = Arc::new(
            AuditApi::new(config.api_url.clone()).with_history_limit(config.history_limit),
        );
        Self {
            submit: api.clone(),
            channel: Arc::new(WsPushChannel::new(config.ws_url.clone())),
            status: api,
        }
    }
}

/// Caller's side of a running job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    target: String,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: CancellationToken,
    task: JoinHandle<JobState>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.job_id
    }

    /// The normalized target being audited.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Request cancellation. Idempotent; a no-op once the job is terminal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` after the terminal event has been taken.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Wait for the driver to exit and return its final state.
    pub async fn join(self) -> Result<JobState, JoinError> {
        self.task.await
    }

    /// Split into the event stream, the cancel token and the task.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<JobEvent>,
        CancellationToken,
        JoinHandle<JobState>,
    ) {
        (self.events, self.cancel, self.task)
    }
}

/// Start tracking a job.
///
/// Fails with [`TrackerError::InvalidInput`] before any request is made
/// when the target does not validate.
pub fn spawn_job(
    transports: Transports,
    config: CoordinatorConfig,
    target: &str,
    options: JobOptions,
) -> Result<JobHandle, TrackerError> {
    spawn_job_with_cancel(transports, config, target, options, CancellationToken::new())
}

/// Like [`spawn_job`], driven by a caller-supplied token (e.g. a child
/// of a registry-wide token).
pub fn spawn_job_with_cancel(
    transports: Transports,
    config: CoordinatorConfig,
    target: &str,
    options: JobOptions,
    cancel: CancellationToken,
) -> Result<JobHandle, TrackerError> {
    let submitter = JobSubmitter::new(Arc::clone(&transports.submit));
    let job = submitter.prepare(target, options)?;
    let job_id = job.id;
    let normalized = job.target.clone();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let driver = Driver {
        machine: JobMachine::new(job, config),
        submitter,
        transports,
        events: events_tx,
        cancel: cancel.clone(),
        channel: None,
        connect_deadline: None,
        channel_idle: None,
        next_poll: None,
        pending: VecDeque::new(),
    };

    let task = tokio::spawn(async move {
        tracing::info!(job_id = %job_id, "Starting job driver");
        let state = driver.run().await;
        tracing::info!(job_id = %job_id, ?state, "Job driver exited");
        state
    });

    Ok(JobHandle {
        job_id,
        target: normalized,
        events: events_rx,
        cancel,
        task,
    })
}

/// Owns the machine and every resource its effects refer to.
struct Driver {
    machine: JobMachine,
    submitter: JobSubmitter,
    transports: Transports,
    events: mpsc::UnboundedSender<JobEvent>,
    cancel: CancellationToken,
    channel: Option<ChannelHandle>,
    connect_deadline: Option<Instant>,
    channel_idle: Option<Instant>,
    next_poll: Option<Instant>,
    /// Results of awaited effects, applied before waiting again.
    pending: VecDeque<Signal>,
}

impl Driver {
    async fn run(mut self) -> JobState {
        self.pending.push_back(Signal::Start);

        while !self.machine.is_terminal() {
            let signal = if self.cancel.is_cancelled() {
                Signal::Cancel
            } else if let Some(signal) = self.pending.pop_front() {
                signal
            } else {
                self.next_signal().await
            };

            for effect in self.machine.apply(signal) {
                self.execute(effect).await;
            }
        }

        self.teardown();
        self.machine.state()
    }

    /// Wait for the next external input. Cancellation wins ties, then
    /// channel traffic, then the timers.
    async fn next_signal(&mut self) -> Signal {
        let connect_deadline = self.connect_deadline;
        let channel_idle = self.channel_idle;
        let next_poll = self.next_poll;

        let signal = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Signal::Cancel,
            signal = recv_channel(&mut self.channel) => Signal::Channel(signal),
            _ = sleep_until(connect_deadline) => Signal::ConnectDeadline,
            _ = sleep_until(channel_idle) => Signal::ChannelIdle,
            _ = sleep_until(next_poll) => Signal::PollDue,
        };

        match &signal {
            Signal::Channel(s) if s.ends_channel() => self.channel = None,
            Signal::ConnectDeadline => self.connect_deadline = None,
            Signal::ChannelIdle => self.channel_idle = None,
            Signal::PollDue => self.next_poll = None,
            _ => {}
        }
        signal
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Submit => {
                let outcome = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    outcome = self.submitter.submit_job(self.machine.job()) => outcome,
                };
                self.pending.push_back(Signal::Submitted(outcome));
            }
            Effect::OpenChannel { session_id } => {
                tracing::debug!(job_id = %self.machine.job().id, session_id = %session_id, "Opening push channel");
                self.channel = Some(self.transports.channel.open(&session_id));
            }
            Effect::ArmConnectDeadline(after) => self.connect_deadline = self.deadline_after(after),
            Effect::DisarmConnectDeadline => self.connect_deadline = None,
            Effect::ArmChannelIdle(after) => self.channel_idle = self.deadline_after(after),
            Effect::DisarmChannelIdle => self.channel_idle = None,
            Effect::CloseChannel => {
                if let Some(channel) = self.channel.take() {
                    channel.close();
                }
            }
            Effect::SchedulePoll(after) => self.next_poll = self.deadline_after(after),
            Effect::Poll => {
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    result = self.transports.status.poll_once() => result,
                };
                self.pending.push_back(Signal::Polled(result));
            }
            Effect::FetchResult(id) => {
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    result = self.transports.status.fetch_result(id) => result,
                };
                self.pending.push_back(Signal::Fetched { id, result });
            }
            Effect::Teardown => self.teardown(),
            Effect::Emit(event) => self.emit(event),
        }
    }

    /// `now + after`, or no timer when that lies past the clock's range.
    fn deadline_after(&self, after: Duration) -> Option<Instant> {
        let deadline = Instant::now().checked_add(after);
        if deadline.is_none() {
            tracing::warn!(
                job_id = %self.machine.job().id,
                after_secs = after.as_secs(),
                "Timer out of range, leaving it unset",
            );
        }
        deadline
    }

    fn emit(&self, event: JobEvent) {
        tracing::debug!(job_id = %self.machine.job().id, state = ?event.state(), "Job event");
        if self.events.send(event).is_err() {
            tracing::debug!(job_id = %self.machine.job().id, "Event receiver dropped");
        }
    }

    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.connect_deadline = None;
        self.channel_idle = None;
        self.next_poll = None;
    }
}

/// Next signal from the channel, or never when there is none.
async fn recv_channel(channel: &mut Option<ChannelHandle>) -> ChannelSignal {
    match channel {
        Some(handle) => handle.recv().await.unwrap_or(ChannelSignal::Closed {
            code: None,
            reason: "push channel dropped".into(),
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use webaudit_core::progress::{ProgressEvent, ProgressSnapshot};
    use webaudit_core::types::AnalysisId;

    use super::*;
    use crate::api::{ApiError, JobSummary, PendingSubmission, SubmitRequest, SubmitResponse};
    use crate::events::FailureReason;
    use crate::transport::{ChannelError, ChannelFeed};

    // ---- fakes ----

    struct FakeSubmit {
        calls: AtomicUsize,
        respond: fn() -> Result<SubmitResponse, ApiError>,
    }

    #[async_trait]
    impl SubmitEndpoint for FakeSubmit {
        async fn submit(&self, _request: &SubmitRequest) -> Result<SubmitResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)()
        }
    }

    /// Replays a fixed script of `(delay, signal)` pairs on every open.
    struct FakeChannel {
        opens: AtomicUsize,
        script: Vec<(Duration, ChannelSignal)>,
        feeds: Mutex<Vec<ChannelFeed>>,
    }

    impl FakeChannel {
        fn feed(&self) -> ChannelFeed {
            self.feeds.lock().unwrap()[0].clone()
        }
    }

    impl PushChannel for FakeChannel {
        fn open(&self, session_id: &str) -> ChannelHandle {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (handle, feed) = ChannelHandle::pair(session_id);
            self.feeds.lock().unwrap().push(feed.clone());
            let script = self.script.clone();
            tokio::spawn(async move {
                for (delay, signal) in script {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if !feed.send(signal).await {
                        return;
                    }
                }
            });
            handle
        }
    }

    /// Answers poll `n` (1-based) with `respond(n)`.
    struct FakePoller {
        polls: AtomicUsize,
        fetches: AtomicUsize,
        respond: fn(usize) -> Result<Vec<JobSummary>, ApiError>,
    }

    #[async_trait]
    impl StatusPoller for FakePoller {
        async fn poll_once(&self) -> Result<Vec<JobSummary>, ApiError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.respond)(n)
        }

        async fn fetch_result(&self, id: AnalysisId) -> Result<serde_json::Value, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"id": id, "overall_score": 88}))
        }
    }

    struct Fixture {
        submit: Arc<FakeSubmit>,
        channel: Arc<FakeChannel>,
        poller: Arc<FakePoller>,
    }

    impl Fixture {
        fn new(
            respond: fn() -> Result<SubmitResponse, ApiError>,
            script: Vec<(Duration, ChannelSignal)>,
            polls: fn(usize) -> Result<Vec<JobSummary>, ApiError>,
        ) -> Self {
            Self {
                submit: Arc::new(FakeSubmit {
                    calls: AtomicUsize::new(0),
                    respond,
                }),
                channel: Arc::new(FakeChannel {
                    opens: AtomicUsize::new(0),
                    script,
                    feeds: Mutex::new(Vec::new()),
                }),
                poller: Arc::new(FakePoller {
                    polls: AtomicUsize::new(0),
                    fetches: AtomicUsize::new(0),
                    respond: polls,
                }),
            }
        }

        fn transports(&self) -> Transports {
            Transports {
                submit: self.submit.clone(),
                channel: self.channel.clone(),
                status: self.poller.clone(),
            }
        }

        fn spawn(&self, target: &str) -> JobHandle {
            self.spawn_with(CoordinatorConfig::default(), target)
        }

        fn spawn_with(&self, config: CoordinatorConfig, target: &str) -> JobHandle {
            spawn_job(self.transports(), config, target, JobOptions::default()).unwrap()
        }
    }

    fn pending() -> Result<SubmitResponse, ApiError> {
        Ok(SubmitResponse::Pending(PendingSubmission {
            session_id: "s1".into(),
            websocket_url: Some("/ws/s1".into()),
            estimated_duration: None,
            message: None,
        }))
    }

    fn never_matches(_: usize) -> Result<Vec<JobSummary>, ApiError> {
        Ok(Vec::new())
    }

    fn recent(id: AnalysisId) -> JobSummary {
        JobSummary {
            id,
            url: "https://example.com/".into(),
            overall_score: Some(88),
            overall_grade: Some("B+".into()),
            analyzed_at: chrono::Utc::now(),
            session_id: None,
        }
    }

    async fn drain(handle: &mut JobHandle) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    fn states(events: &[JobEvent]) -> Vec<JobState> {
        events.iter().map(JobEvent::state).collect()
    }

    fn assert_single_terminal(events: &[JobEvent]) {
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().is_some_and(JobEvent::is_terminal));
    }

    // ---- tests ----

    #[tokio::test(start_paused = true)]
    async fn channel_scenario_completes() {
        let results = serde_json::json!({"overall_score": 91, "overall_grade": "A-"});
        let fixture = Fixture::new(
            pending,
            vec![
                (Duration::ZERO, ChannelSignal::Opened),
                (
                    Duration::from_secs(1),
                    ChannelSignal::Message(ProgressEvent::new("fetching", 10)),
                ),
                (
                    Duration::from_secs(1),
                    ChannelSignal::Message(
                        ProgressEvent::new("done", 100)
                            .with_result(results.clone())
                            .with_analysis_id(7),
                    ),
                ),
            ],
            never_matches,
        );

        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;

        assert_eq!(
            states(&events),
            vec![
                JobState::Submitting,
                JobState::AwaitingChannel,
                JobState::Active,
                JobState::Active,
                JobState::Completed,
            ]
        );
        assert_eq!(
            events[1],
            JobEvent::AwaitingChannel {
                session_id: "s1".into()
            }
        );
        assert_eq!(
            events[3],
            JobEvent::Active(ProgressSnapshot {
                stage: "fetching".into(),
                percent: 10,
                message: None,
            })
        );
        assert_eq!(
            events[4],
            JobEvent::Completed {
                result: results,
                cached: false,
                analysis_id: Some(7),
            }
        );
        assert_eq!(handle.join().await.unwrap(), JobState::Completed);
        assert!(fixture.channel.feed().is_closed());
        assert_eq!(fixture.poller.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_skips_tracking() {
        let fixture = Fixture::new(
            || Ok(SubmitResponse::Cached(serde_json::json!({"id": 9, "overall_score": 70}))),
            Vec::new(),
            never_matches,
        );

        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;

        assert_eq!(states(&events), vec![JobState::Submitting, JobState::Completed]);
        assert_matches!(
            &events[1],
            JobEvent::Completed { cached: true, analysis_id: Some(9), .. }
        );
        assert_eq!(fixture.channel.opens.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.poller.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_target_rejected_before_submit() {
        let fixture = Fixture::new(pending, Vec::new(), never_matches);
        let result = spawn_job(
            fixture.transports(),
            CoordinatorConfig::default(),
            "javascript:alert(1)",
            JobOptions::default(),
        );
        assert_matches!(result, Err(TrackerError::InvalidInput(_)));
        assert_eq!(fixture.submit.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_submission_fails() {
        let fixture = Fixture::new(
            || {
                Err(ApiError::Status {
                    status: 429,
                    body: "Rate limit exceeded".into(),
                })
            },
            Vec::new(),
            never_matches,
        );

        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;
        assert_matches!(
            events.as_slice(),
            [
                JobEvent::Submitting,
                JobEvent::Failed { reason: FailureReason::ServiceUnavailable(_) }
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_channel_times_out_after_poll_budget() {
        let fixture = Fixture::new(
            pending,
            vec![(
                Duration::ZERO,
                ChannelSignal::Error(ChannelError::Connection("refused".into())),
            )],
            never_matches,
        );

        let started = Instant::now();
        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;
        let elapsed = started.elapsed();

        assert_eq!(
            events.last(),
            Some(&JobEvent::Failed {
                reason: FailureReason::Timeout
            })
        );
        assert_single_terminal(&events);
        assert_eq!(fixture.poller.polls.load(Ordering::SeqCst), 60);
        assert!(elapsed >= Duration::from_secs(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(301), "{elapsed:?}");

        // The estimate only ever rises.
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Active(s) => Some(s.percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents.iter().all(|p| *p < 100));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_deadline_falls_back_to_polling() {
        let fixture = Fixture::new(pending, Vec::new(), |n| {
            if n < 2 {
                Ok(Vec::new())
            } else {
                Ok(vec![recent(21)])
            }
        });

        let started = Instant::now();
        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;

        assert_eq!(
            states(&events),
            vec![
                JobState::Submitting,
                JobState::AwaitingChannel,
                JobState::Active,
                JobState::Active,
                JobState::Completed,
            ]
        );
        assert_matches!(
            events.last(),
            Some(JobEvent::Completed { cached: false, analysis_id: Some(21), result })
                if result["overall_score"] == 88
        );
        // 10s deadline plus two poll intervals.
        assert_eq!(started.elapsed().as_secs(), 20);
        assert_eq!(fixture.poller.fetches.load(Ordering::SeqCst), 1);
        assert!(fixture.channel.feed().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_channel_resumes_silently_via_polling() {
        let fixture = Fixture::new(
            pending,
            vec![
                (Duration::ZERO, ChannelSignal::Opened),
                (
                    Duration::from_secs(1),
                    ChannelSignal::Message(ProgressEvent::new("seo", 40)),
                ),
                (
                    Duration::from_secs(1),
                    ChannelSignal::Closed {
                        code: Some(1006),
                        reason: "abnormal closure".into(),
                    },
                ),
            ],
            |_| Ok(vec![recent(5)]),
        );

        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;

        assert_eq!(
            states(&events),
            vec![
                JobState::Submitting,
                JobState::AwaitingChannel,
                JobState::Active,
                JobState::Active,
                JobState::Completed,
            ]
        );
        assert_matches!(events.last(), Some(JobEvent::Completed { analysis_id: Some(5), .. }));
        assert_eq!(fixture.poller.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_channel_falls_back_to_polling() {
        let fixture = Fixture::new(
            pending,
            vec![(Duration::ZERO, ChannelSignal::Opened)],
            |_| Ok(vec![recent(8)]),
        );

        let started = Instant::now();
        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;

        assert_eq!(
            states(&events),
            vec![
                JobState::Submitting,
                JobState::AwaitingChannel,
                JobState::Active,
                JobState::Completed,
            ]
        );
        assert_matches!(events.last(), Some(JobEvent::Completed { analysis_id: Some(8), .. }));
        // 60s of silence plus one poll interval.
        assert_eq!(started.elapsed().as_secs(), 65);
        assert_eq!(fixture.poller.polls.load(Ordering::SeqCst), 1);
        assert!(fixture.channel.feed().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn steady_frames_keep_channel_sourced() {
        let step = Duration::from_secs(50);
        let fixture = Fixture::new(
            pending,
            vec![
                (Duration::ZERO, ChannelSignal::Opened),
                (step, ChannelSignal::Message(ProgressEvent::new("seo", 30))),
                (step, ChannelSignal::Malformed("truncated".into())),
                (
                    step,
                    ChannelSignal::Message(
                        ProgressEvent::new("done", 100).with_result(serde_json::json!({})),
                    ),
                ),
            ],
            never_matches,
        );

        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;

        assert_single_terminal(&events);
        assert_matches!(events.last(), Some(JobEvent::Completed { cached: false, .. }));
        assert_eq!(fixture.poller.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_timers_are_left_unset() {
        let config = CoordinatorConfig {
            connect_timeout: Duration::MAX,
            channel_idle_timeout: Duration::MAX,
            ..Default::default()
        };
        let fixture = Fixture::new(
            pending,
            vec![
                (Duration::from_secs(1), ChannelSignal::Opened),
                (
                    Duration::from_secs(1),
                    ChannelSignal::Message(
                        ProgressEvent::new("done", 100).with_result(serde_json::json!({})),
                    ),
                ),
            ],
            never_matches,
        );

        let mut handle = fixture.spawn_with(config, "example.com");
        let events = drain(&mut handle).await;

        assert_single_terminal(&events);
        assert_eq!(handle.join().await.unwrap(), JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_reports_normalized_target() {
        let fixture = Fixture::new(pending, Vec::new(), never_matches);
        let handle = fixture.spawn("  Example.com ");
        assert_eq!(handle.target(), "https://example.com/");
        handle.cancel();
        assert_eq!(handle.join().await.unwrap(), JobState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_active_suppresses_later_messages() {
        let fixture = Fixture::new(
            pending,
            vec![
                (Duration::ZERO, ChannelSignal::Opened),
                (
                    Duration::from_secs(1),
                    ChannelSignal::Message(ProgressEvent::new("security", 30)),
                ),
                (
                    Duration::from_secs(30),
                    ChannelSignal::Message(
                        ProgressEvent::new("done", 100).with_result(serde_json::json!({})),
                    ),
                ),
            ],
            never_matches,
        );

        let mut handle = fixture.spawn("example.com");
        loop {
            match handle.next_event().await {
                Some(JobEvent::Active(s)) if s.percent == 30 => break,
                Some(_) => {}
                None => panic!("stream ended before progress"),
            }
        }

        handle.cancel();
        let rest = drain(&mut handle).await;
        assert_eq!(rest, vec![JobEvent::Cancelled]);
        assert_eq!(handle.join().await.unwrap(), JobState::Cancelled);
        assert!(fixture.channel.feed().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_terminal_is_noop() {
        let fixture = Fixture::new(
            || Ok(SubmitResponse::Cached(serde_json::json!({"id": 1}))),
            Vec::new(),
            never_matches,
        );

        let mut handle = fixture.spawn("example.com");
        let events = drain(&mut handle).await;
        handle.cancel();
        assert_single_terminal(&events);
        assert_eq!(handle.join().await.unwrap(), JobState::Completed);
    }
}
