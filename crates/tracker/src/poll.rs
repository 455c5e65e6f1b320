//! Polling fallback bookkeeping.
//!
//! History entries carry no session identifier unless the analyzer is new
//! enough to report one. Without it a poll identifies "our" result by
//! target plus a recency window around the job's start time, and two
//! concurrent jobs for the same target can be cross-matched.

use std::time::Duration;

use webaudit_core::job::Job;
use webaudit_core::target::targets_match;
use webaudit_core::types::{AnalysisId, Timestamp};

use crate::api::JobSummary;
use crate::config::CoordinatorConfig;

/// Highest percent the elapsed-time estimate reports. Only a real result
/// takes the display to 100.
pub const ESTIMATE_CEILING_PERCENT: u8 = 95;

/// Transient state of the polling path for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCycle {
    attempt: u32,
    max_attempts: u32,
    interval: Duration,
    /// Matched summary whose full result is being fetched.
    pending_fetch: Option<AnalysisId>,
}

/// What to do after an unsuccessful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollProgress {
    /// Budget left; schedule the next poll.
    Continue,
    /// Budget spent.
    Exhausted,
}

impl PollCycle {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_poll_attempts,
            interval: config.poll_interval,
            pending_fetch: None,
        }
    }

    /// Completed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Simulated time spent polling: one interval per attempt.
    pub fn elapsed(&self) -> Duration {
        self.interval.saturating_mul(self.attempt)
    }

    pub fn pending_fetch(&self) -> Option<AnalysisId> {
        self.pending_fetch
    }

    pub fn begin_fetch(&mut self, id: AnalysisId) {
        self.pending_fetch = Some(id);
    }

    /// Count one attempt that produced no result.
    pub fn record_miss(&mut self) -> PollProgress {
        self.pending_fetch = None;
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= self.max_attempts {
            PollProgress::Exhausted
        } else {
            PollProgress::Continue
        }
    }

    /// Display estimate for the current attempt count.
    pub fn estimate_percent(&self) -> u8 {
        estimate_percent(self.elapsed(), self.interval.saturating_mul(self.max_attempts))
    }
}

/// Pick the summary that belongs to `job`.
///
/// A summary tagged with the job's session id matches outright, and one
/// tagged with another session never does. Untagged summaries match when
/// the URL equals the job's target (ignoring a trailing slash) and
/// `analyzed_at` lies within `[started_at - skew, started_at + ceiling + skew]`;
/// the newest wins.
pub fn find_match<'a>(
    summaries: &'a [JobSummary],
    job: &Job,
    config: &CoordinatorConfig,
) -> Option<&'a JobSummary> {
    if let Some(session_id) = job.session_id.as_deref() {
        if let Some(exact) = summaries
            .iter()
            .find(|s| s.session_id.as_deref() == Some(session_id))
        {
            return Some(exact);
        }
    }

    // Windows too large for chrono are open-ended rather than a panic.
    let skew = chrono::Duration::from_std(config.match_skew).ok();
    let ceiling = chrono::Duration::from_std(config.poll_ceiling()).ok();
    let earliest = skew
        .and_then(|skew| job.started_at.checked_sub_signed(skew))
        .unwrap_or(Timestamp::MIN_UTC);
    let latest = ceiling
        .zip(skew)
        .and_then(|(ceiling, skew)| ceiling.checked_add(&skew))
        .and_then(|span| job.started_at.checked_add_signed(span))
        .unwrap_or(Timestamp::MAX_UTC);

    summaries
        .iter()
        .filter(|s| s.session_id.is_none())
        .filter(|s| targets_match(&s.url, &job.target))
        .filter(|s| s.analyzed_at >= earliest && s.analyzed_at <= latest)
        .max_by_key(|s| s.analyzed_at)
}

/// Monotonic, saturating progress estimate from elapsed time.
///
/// Rises linearly from 0 to [`ESTIMATE_CEILING_PERCENT`] across `ceiling`.
/// It is a placeholder for the caller's progress bar, not a real signal.
pub fn estimate_percent(elapsed: Duration, ceiling: Duration) -> u8 {
    if ceiling.is_zero() {
        return ESTIMATE_CEILING_PERCENT;
    }
    let fraction = (elapsed.as_secs_f64() / ceiling.as_secs_f64()).min(1.0);
    (fraction * f64::from(ESTIMATE_CEILING_PERCENT)) as u8
}

#[cfg(test)]
mod tests {
    use webaudit_core::job::JobOptions;

    use super::*;

    fn summary(id: AnalysisId, url: &str, offset_secs: i64, job: &Job) -> JobSummary {
        JobSummary {
            id,
            url: url.into(),
            overall_score: Some(80),
            overall_grade: Some("B".into()),
            analyzed_at: job.started_at + chrono::Duration::seconds(offset_secs),
            session_id: None,
        }
    }

    #[test]
    fn budget_exhausts_after_max_attempts() {
        let config = CoordinatorConfig {
            max_poll_attempts: 3,
            ..Default::default()
        };
        let mut cycle = PollCycle::new(&config);
        assert_eq!(cycle.record_miss(), PollProgress::Continue);
        assert_eq!(cycle.record_miss(), PollProgress::Continue);
        assert_eq!(cycle.record_miss(), PollProgress::Exhausted);
        assert_eq!(cycle.attempt(), 3);
    }

    #[test]
    fn miss_clears_pending_fetch() {
        let mut cycle = PollCycle::new(&CoordinatorConfig::default());
        cycle.begin_fetch(4);
        assert_eq!(cycle.pending_fetch(), Some(4));
        cycle.record_miss();
        assert_eq!(cycle.pending_fetch(), None);
    }

    #[test]
    fn estimate_is_monotonic_and_capped() {
        let ceiling = Duration::from_secs(300);
        let mut last = 0;
        for secs in (0..=400).step_by(5) {
            let p = estimate_percent(Duration::from_secs(secs), ceiling);
            assert!(p >= last);
            assert!(p <= ESTIMATE_CEILING_PERCENT);
            last = p;
        }
        assert_eq!(last, ESTIMATE_CEILING_PERCENT);
    }

    #[test]
    fn huge_intervals_saturate() {
        let config = CoordinatorConfig {
            poll_interval: Duration::MAX,
            max_poll_attempts: u32::MAX,
            match_skew: Duration::MAX,
            ..Default::default()
        };
        let mut cycle = PollCycle::new(&config);
        cycle.record_miss();
        cycle.record_miss();
        assert_eq!(cycle.elapsed(), Duration::MAX);
        assert_eq!(cycle.estimate_percent(), ESTIMATE_CEILING_PERCENT);

        let job = Job::new("example.com", JobOptions::default()).unwrap();
        let entries = vec![summary(1, "https://example.com/", -3600, &job)];
        assert_eq!(find_match(&entries, &job, &config).map(|s| s.id), Some(1));
    }

    #[test]
    fn match_requires_same_target() {
        let job = Job::new("example.com", JobOptions::default()).unwrap();
        let config = CoordinatorConfig::default();
        let entries = vec![summary(1, "https://other.com", 20, &job)];
        assert!(find_match(&entries, &job, &config).is_none());

        let entries = vec![summary(2, "https://example.com", 20, &job)];
        assert_eq!(find_match(&entries, &job, &config).map(|s| s.id), Some(2));
    }

    #[test]
    fn match_requires_recency() {
        let job = Job::new("example.com", JobOptions::default()).unwrap();
        let config = CoordinatorConfig::default();
        // An hour old: a previous run, not this job.
        let entries = vec![summary(1, "https://example.com/", -3600, &job)];
        assert!(find_match(&entries, &job, &config).is_none());

        // Slightly before start is tolerated as clock skew.
        let entries = vec![summary(2, "https://example.com/", -10, &job)];
        assert_eq!(find_match(&entries, &job, &config).map(|s| s.id), Some(2));
    }

    #[test]
    fn session_id_overrides_heuristic() {
        let job = Job::new("example.com", JobOptions::default())
            .unwrap()
            .with_session("s1");
        let config = CoordinatorConfig::default();

        let mut ours = summary(1, "https://example.com/", -3600, &job);
        ours.session_id = Some("s1".into());
        let mut theirs = summary(2, "https://example.com/", 40, &job);
        theirs.session_id = Some("s2".into());

        let entries = vec![theirs.clone(), ours];
        assert_eq!(find_match(&entries, &job, &config).map(|s| s.id), Some(1));

        // Another session's analysis never matches, however recent.
        let entries = vec![theirs];
        assert!(find_match(&entries, &job, &config).is_none());
    }

    #[test]
    fn newest_match_wins() {
        let job = Job::new("example.com", JobOptions::default()).unwrap();
        let config = CoordinatorConfig::default();
        let entries = vec![
            summary(1, "https://example.com/", 5, &job),
            summary(2, "https://example.com/", 40, &job),
        ];
        assert_eq!(find_match(&entries, &job, &config).map(|s| s.id), Some(2));
    }
}
