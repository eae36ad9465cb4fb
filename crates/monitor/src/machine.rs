use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use studioflow_proto::{OperationResult, OperationStatus, ProjectState};

use crate::baseline::OperationBaseline;

/// Timing knobs for the monitor. Defaults match production behavior; tests and
/// the driver may shrink them.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub fast_poll_interval: Duration,
    pub fast_phase_window: Duration,
    pub medium_poll_interval: Duration,
    pub medium_phase_window: Duration,
    pub fallback_poll_interval: Duration,
    pub overall_ceiling: Duration,
    pub not_found_fallback_window: Duration,
    pub unconfirmed_pending_window: Duration,
    pub decode_retry_window: Duration,
    pub network_retry_window: Duration,
    pub backoff_cap: Duration,
    pub early_probe_failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fast_poll_interval: Duration::from_millis(500),
            fast_phase_window: Duration::from_secs(30),
            medium_poll_interval: Duration::from_secs(2),
            medium_phase_window: Duration::from_secs(120),
            fallback_poll_interval: Duration::from_secs(15),
            overall_ceiling: Duration::from_secs(20 * 60),
            not_found_fallback_window: Duration::from_secs(30),
            unconfirmed_pending_window: Duration::from_secs(60),
            decode_retry_window: Duration::from_secs(120),
            network_retry_window: Duration::from_secs(300),
            backoff_cap: Duration::from_secs(30),
            early_probe_failure_threshold: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Submitted,
    FastPoll,
    MediumPoll,
    DatabaseFallback,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::FastPoll => "fast_poll",
            Self::MediumPoll => "medium_poll",
            Self::DatabaseFallback => "database_fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MonitorOutcome {
    /// The operation finished and carries a user-visible result.
    Resolved(OperationResult),
    /// The monitoring ceiling was reached; the pseudo-result tells the user to
    /// check back instead of blocking indefinitely.
    TimedOut(OperationResult),
    /// The workflow reported a genuine job failure.
    Failed(String),
}

/// One scheduled action. Each decision emits exactly one of these, so the
/// control flow is testable without real timers.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    PollStatus { after: Duration },
    ProbeDatabase { after: Duration },
    Finish(MonitorOutcome),
}

/// Decoded status-endpoint body.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub status: OperationStatus,
    pub result: Option<OperationResult>,
    pub error: Option<String>,
}

/// Classified outcome of one status poll.
#[derive(Clone, Debug)]
pub enum PollObservation {
    Status(StatusSnapshot),
    NotFound,
    /// 408/502/503/524-class responses and upstream timeouts. Never proof of
    /// job failure.
    GatewayUnavailable,
    DecodeFailure,
    NetworkFailure,
}

/// Classified outcome of one database probe. `State(None)` is the normal
/// row-not-yet-created condition.
#[derive(Clone, Debug)]
pub enum DatabaseObservation {
    State(Option<ProjectState>),
    Unavailable,
}

/// The monitor's decision core: `Submitted -> FastPoll -> MediumPoll ->
/// DatabaseFallback -> {Resolved | TimedOut | Failed}`.
///
/// Pure with respect to time; every entry point takes `now` so transitions can
/// be exercised without timers. The async driver in [`crate::monitor`] feeds it
/// observations and sleeps according to the returned directives.
pub struct MonitorMachine {
    config: MonitorConfig,
    baseline: OperationBaseline,
    project_id: String,
    started_at: DateTime<Utc>,
    phase: Phase,
    fallback_forced: bool,
    fallback_entered: bool,
    probing_early: bool,
    early_probe_used: bool,
    not_found_since: Option<DateTime<Utc>>,
    pending_since: Option<DateTime<Utc>>,
    gateway_failures: u32,
    consecutive_gateway_failures: u32,
    decode_failures_since: Option<DateTime<Utc>>,
    network_failures_since: Option<DateTime<Utc>>,
    error_streak: u32,
}

impl MonitorMachine {
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        project_id: impl Into<String>,
        baseline: OperationBaseline,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            baseline,
            project_id: project_id.into(),
            started_at,
            phase: Phase::Submitted,
            fallback_forced: false,
            fallback_entered: false,
            probing_early: false,
            early_probe_used: false,
            not_found_since: None,
            pending_since: None,
            gateway_failures: 0,
            consecutive_gateway_failures: 0,
            decode_failures_since: None,
            network_failures_since: None,
            error_streak: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// First action after the gateway accepted the submission.
    pub fn initial_directive(&mut self) -> Directive {
        self.phase = Phase::FastPoll;
        Directive::PollStatus {
            after: Duration::ZERO,
        }
    }

    pub fn on_status(&mut self, now: DateTime<Utc>, observation: PollObservation) -> Directive {
        if let Some(outcome) = self.ceiling_outcome(now) {
            return Directive::Finish(outcome);
        }
        match observation {
            PollObservation::Status(snapshot) => {
                self.error_streak = 0;
                self.decode_failures_since = None;
                self.network_failures_since = None;
                self.not_found_since = None;
                self.consecutive_gateway_failures = 0;
                match snapshot.status {
                    OperationStatus::Completed => {
                        let result = snapshot
                            .result
                            .unwrap_or_else(|| self.synthesized_success());
                        return Directive::Finish(MonitorOutcome::Resolved(result));
                    }
                    OperationStatus::Error => {
                        let error = snapshot
                            .error
                            .unwrap_or_else(|| "operation failed".to_string());
                        return Directive::Finish(MonitorOutcome::Failed(error));
                    }
                    OperationStatus::Pending => {
                        if self.pending_since.is_none() {
                            self.pending_since = Some(now);
                        }
                    }
                }
            }
            PollObservation::NotFound => {
                // The registry may never have seen the id or already evicted
                // it; either way the job can have raced ahead of the registry.
                self.pending_since = None;
                self.consecutive_gateway_failures = 0;
                let since = *self.not_found_since.get_or_insert(now);
                if now - since >= capped_delta(self.config.not_found_fallback_window) {
                    self.force_fallback();
                }
            }
            PollObservation::GatewayUnavailable => {
                self.gateway_failures += 1;
                self.consecutive_gateway_failures += 1;
                if self.phase == Phase::FastPoll
                    && !self.early_probe_used
                    && self.consecutive_gateway_failures
                        >= self.config.early_probe_failure_threshold
                {
                    self.early_probe_used = true;
                    self.probing_early = true;
                    return Directive::ProbeDatabase {
                        after: Duration::ZERO,
                    };
                }
            }
            PollObservation::DecodeFailure => {
                self.error_streak += 1;
                let since = *self.decode_failures_since.get_or_insert(now);
                if now - since >= capped_delta(self.config.decode_retry_window) {
                    self.force_fallback();
                }
            }
            PollObservation::NetworkFailure => {
                self.error_streak += 1;
                let since = *self.network_failures_since.get_or_insert(now);
                if now - since >= capped_delta(self.config.network_retry_window) {
                    self.force_fallback();
                }
            }
        }
        if let Some(pending_since) = self.pending_since {
            if self.gateway_failures >= self.config.early_probe_failure_threshold
                && now - pending_since >= capped_delta(self.config.unconfirmed_pending_window)
            {
                self.force_fallback();
            }
        }
        self.next_directive(now)
    }

    pub fn on_database(&mut self, now: DateTime<Utc>, observation: DatabaseObservation) -> Directive {
        if let Some(outcome) = self.ceiling_outcome(now) {
            return Directive::Finish(outcome);
        }
        let resuming_early_probe = self.probing_early;
        self.probing_early = false;
        if let DatabaseObservation::State(Some(state)) = observation {
            if self.baseline.detects_change(&state) {
                if let Some(message) = state.latest_assistant_message() {
                    let response_to_user = message.content.clone();
                    return Directive::Finish(MonitorOutcome::Resolved(OperationResult {
                        response_to_user,
                        updated_state: state,
                    }));
                }
                // Something changed but no assistant reply landed yet; a false
                // resolution here would lose the real answer.
            }
        }
        if resuming_early_probe {
            self.consecutive_gateway_failures = 0;
        }
        self.next_directive(now)
    }

    fn force_fallback(&mut self) {
        self.fallback_forced = true;
    }

    fn ceiling_outcome(&self, now: DateTime<Utc>) -> Option<MonitorOutcome> {
        if now - self.started_at >= capped_delta(self.config.overall_ceiling) {
            Some(MonitorOutcome::TimedOut(self.timed_out_result()))
        } else {
            None
        }
    }

    fn next_directive(&mut self, now: DateTime<Utc>) -> Directive {
        self.update_phase(now);
        if self.phase == Phase::DatabaseFallback {
            let after = if self.fallback_entered {
                self.config.fallback_poll_interval
            } else {
                Duration::ZERO
            };
            self.fallback_entered = true;
            return Directive::ProbeDatabase { after };
        }
        Directive::PollStatus {
            after: self.poll_delay(),
        }
    }

    fn update_phase(&mut self, now: DateTime<Utc>) {
        let elapsed = now - self.started_at;
        self.phase = if self.fallback_forced || elapsed >= capped_delta(self.config.medium_phase_window)
        {
            Phase::DatabaseFallback
        } else if elapsed >= capped_delta(self.config.fast_phase_window) {
            Phase::MediumPoll
        } else {
            Phase::FastPoll
        };
    }

    fn poll_delay(&self) -> Duration {
        let base = match self.phase {
            Phase::MediumPoll => self.config.medium_poll_interval,
            _ => self.config.fast_poll_interval,
        };
        if self.error_streak == 0 {
            return base;
        }
        let factor = 2u32.saturating_pow(self.error_streak.min(8));
        (base * factor).min(self.config.backoff_cap).max(base)
    }

    fn synthesized_success(&self) -> OperationResult {
        OperationResult {
            response_to_user: "Your request completed successfully.".to_string(),
            updated_state: ProjectState::new(self.project_id.clone()),
        }
    }

    fn timed_out_result(&self) -> OperationResult {
        OperationResult {
            response_to_user:
                "This operation is still processing. Check back shortly for the finished result."
                    .to_string(),
            updated_state: ProjectState::new(self.project_id.clone()),
        }
    }
}

fn capped_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
