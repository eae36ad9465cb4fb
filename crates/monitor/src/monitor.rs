use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    baseline::OperationBaseline,
    machine::{
        DatabaseObservation, Directive, MonitorConfig, MonitorMachine, MonitorOutcome,
        PollObservation,
    },
};

/// Source of status polls, usually [`crate::client::StatusClient`].
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn poll(&self, operation_id: &str) -> PollObservation;
}

/// Source of database fallback reads, usually a state-store client.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn fetch(&self, project_id: &str) -> DatabaseObservation;
}

/// Wall clock, injected so the decision core can be driven with fabricated
/// times in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Async driver around [`MonitorMachine`]. Polls strictly sequentially; the
/// next wait is scheduled only after the previous observation settles.
pub struct OperationMonitor<S, D, C = SystemClock> {
    status: S,
    database: D,
    clock: C,
    config: MonitorConfig,
}

impl<S, D> OperationMonitor<S, D, SystemClock>
where
    S: StatusSource,
    D: StateSource,
{
    pub fn new(status: S, database: D) -> Self {
        Self::with_clock(status, database, SystemClock)
    }
}

impl<S, D, C> OperationMonitor<S, D, C>
where
    S: StatusSource,
    D: StateSource,
    C: Clock,
{
    pub fn with_clock(status: S, database: D, clock: C) -> Self {
        Self {
            status,
            database,
            clock,
            config: MonitorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the monitor to a terminal outcome. The baseline must be captured
    /// before the operation was submitted.
    pub async fn run(
        &self,
        operation_id: &str,
        project_id: &str,
        baseline: OperationBaseline,
    ) -> MonitorOutcome {
        let started_at = self.clock.now();
        let mut machine =
            MonitorMachine::new(self.config.clone(), project_id, baseline, started_at);
        let mut directive = machine.initial_directive();
        let mut phase = machine.phase();
        loop {
            match directive {
                Directive::PollStatus { after } => {
                    tokio::time::sleep(after).await;
                    let observation = self.status.poll(operation_id).await;
                    directive = machine.on_status(self.clock.now(), observation);
                }
                Directive::ProbeDatabase { after } => {
                    tokio::time::sleep(after).await;
                    let observation = self.database.fetch(project_id).await;
                    directive = machine.on_database(self.clock.now(), observation);
                }
                Directive::Finish(outcome) => {
                    log_outcome(operation_id, &outcome);
                    return outcome;
                }
            }
            if machine.phase() != phase {
                tracing::info!(
                    operation_id = %operation_id,
                    from = phase.as_str(),
                    to = machine.phase().as_str(),
                    "monitor phase transition"
                );
                phase = machine.phase();
            }
        }
    }
}

fn log_outcome(operation_id: &str, outcome: &MonitorOutcome) {
    match outcome {
        MonitorOutcome::Resolved(_) => {
            tracing::info!(operation_id = %operation_id, "operation resolved");
        }
        MonitorOutcome::TimedOut(_) => {
            tracing::warn!(operation_id = %operation_id, "monitoring ceiling reached");
        }
        MonitorOutcome::Failed(error) => {
            tracing::warn!(operation_id = %operation_id, %error, "operation failed");
        }
    }
}

#[async_trait]
impl StateSource for studioflow_state_store::StateStoreClient {
    async fn fetch(&self, project_id: &str) -> DatabaseObservation {
        match self.fetch_project_state(project_id).await {
            Ok(row) => DatabaseObservation::State(row.map(|persisted| persisted.state)),
            Err(error) => {
                tracing::debug!(project_id = %project_id, %error, "state store read failed");
                DatabaseObservation::Unavailable
            }
        }
    }
}

/// A state source for sessions without database credentials; always reports
/// the row as absent so the fallback loop runs on the ceiling alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStateSource;

#[async_trait]
impl StateSource for NoStateSource {
    async fn fetch(&self, _project_id: &str) -> DatabaseObservation {
        DatabaseObservation::State(None)
    }
}
