// Scheduled "does this query return rows" evaluation
use crate::error::{BridgeError, Result, TriggerTickError};
use crate::models::{ConnectionDescriptor, FetchMode, MultiQueryOutput, QueryRequest};
use crate::services::render::Renderer;
use crate::services::statement_runner::StatementRunner;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Last evaluation of a trigger. Not a record of what was already emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCheckpoint {
    pub last_evaluation: Option<DateTime<Utc>>,
    pub last_fired: Option<DateTime<Utc>>,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub trigger_id: String,
    pub fired_at: DateTime<Utc>,
    pub row_count: u64,
    pub outputs: MultiQueryOutput,
}

#[derive(Debug)]
pub enum TickOutcome {
    Fired(TriggerEvent),
    /// The query returned no rows
    Idle,
    Failed(TriggerTickError),
}

pub struct PollingTrigger {
    id: String,
    descriptor: ConnectionDescriptor,
    request: QueryRequest,
    runner: Arc<StatementRunner>,
    renderer: Arc<dyn Renderer>,
    checkpoint: Mutex<TriggerCheckpoint>,
}

impl PollingTrigger {
    pub fn new(
        id: impl Into<String>,
        descriptor: ConnectionDescriptor,
        request: QueryRequest,
        runner: Arc<StatementRunner>,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        let id = id.into();
        if request.fetch_mode == FetchMode::None {
            return Err(BridgeError::Config(format!(
                "Trigger '{}' needs a fetch mode that returns rows, not NONE",
                id
            )));
        }
        Ok(Self {
            id,
            descriptor,
            request,
            runner,
            renderer,
            checkpoint: Mutex::new(TriggerCheckpoint {
                last_evaluation: None,
                last_fired: None,
                interval: DEFAULT_INTERVAL,
            }),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.checkpoint.get_mut().interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn checkpoint(&self) -> TriggerCheckpoint {
        self.checkpoint.lock().await.clone()
    }

    /// When the host should tick next; now when never evaluated
    pub async fn next_evaluation(&self) -> DateTime<Utc> {
        let checkpoint = self.checkpoint.lock().await;
        match checkpoint.last_evaluation {
            Some(last) => chrono::Duration::from_std(checkpoint.interval)
                .ok()
                .and_then(|interval| last.checked_add_signed(interval))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => Utc::now(),
        }
    }

    pub async fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_evaluation().await <= now
    }

    /// Runs the query once. Ticks on one trigger are serialised; failures are
    /// returned as an outcome and never propagate.
    pub async fn tick(&self) -> TickOutcome {
        let mut checkpoint = self.checkpoint.lock().await;
        let started = Utc::now();
        tracing::debug!("Trigger '{}' querying", self.id);

        let result = self
            .runner
            .run(&self.descriptor, self.renderer.as_ref(), &self.request)
            .await;
        checkpoint.last_evaluation = Some(started);

        match result {
            Ok(outcome) if outcome.total_rows() > 0 => {
                let fired_at = Utc::now();
                checkpoint.last_fired = Some(fired_at);
                tracing::info!(
                    "Trigger '{}' fired with {} row(s)",
                    self.id,
                    outcome.total_rows()
                );
                TickOutcome::Fired(TriggerEvent {
                    trigger_id: self.id.clone(),
                    fired_at,
                    row_count: outcome.total_rows(),
                    outputs: outcome.multi_output(),
                })
            }
            Ok(_) => {
                tracing::debug!("Trigger '{}' found no rows", self.id);
                TickOutcome::Idle
            }
            Err(source) => {
                let error = TriggerTickError {
                    trigger_id: self.id.clone(),
                    source,
                };
                tracing::error!("{}", error);
                TickOutcome::Failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::render::PlainRenderer;
    use crate::storage::LocalStaging;
    use tempfile::TempDir;

    struct Fixture {
        runner: Arc<StatementRunner>,
        descriptor: ConnectionDescriptor,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(StatementRunner::new(
            Arc::new(LocalStaging::new(dir.path().join("staged"))),
            dir.path().join("tmp"),
        ));
        let descriptor = ConnectionDescriptor::new(format!("sqlite:{}", dir.path().join("jobs.db").display()));
        runner
            .run(
                &descriptor,
                &PlainRenderer,
                &QueryRequest::new("CREATE TABLE jobs (id INTEGER, status TEXT)"),
            )
            .await
            .unwrap();
        Fixture {
            runner,
            descriptor,
            _dir: dir,
        }
    }

    fn trigger(fx: &Fixture, sql: &str) -> PollingTrigger {
        PollingTrigger::new(
            "pending-jobs",
            fx.descriptor.clone(),
            QueryRequest::new(sql).with_fetch_mode(FetchMode::Fetch),
            fx.runner.clone(),
            Arc::new(PlainRenderer),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_rows_never_fires() {
        let fx = fixture().await;
        let trigger = trigger(&fx, "SELECT id FROM jobs WHERE status = 'pending'");
        assert!(matches!(trigger.tick().await, TickOutcome::Idle));
        assert!(matches!(trigger.tick().await, TickOutcome::Idle));
        assert!(trigger.checkpoint().await.last_evaluation.is_some());
        assert!(trigger.checkpoint().await.last_fired.is_none());
    }

    #[tokio::test]
    async fn test_fires_once_per_tick_with_rows() {
        let fx = fixture().await;
        fx.runner
            .run(
                &fx.descriptor,
                &PlainRenderer,
                &QueryRequest::new("INSERT INTO jobs VALUES (1, 'pending'), (2, 'pending')"),
            )
            .await
            .unwrap();
        let trigger = trigger(&fx, "SELECT id FROM jobs WHERE status = 'pending' ORDER BY id");

        match trigger.tick().await {
            TickOutcome::Fired(event) => {
                assert_eq!(event.trigger_id, "pending-jobs");
                assert_eq!(event.row_count, 2);
                assert_eq!(
                    serde_json::to_value(&event.outputs).unwrap(),
                    serde_json::json!([{"rows": [{"id": 1}, {"id": 2}]}])
                );
            }
            other => panic!("expected the trigger to fire, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_is_an_outcome() {
        let fx = fixture().await;
        let trigger = trigger(&fx, "SELECT * FROM missing_table");
        match trigger.tick().await {
            TickOutcome::Failed(error) => {
                assert_eq!(error.trigger_id, "pending-jobs");
                assert_eq!(error.source.code(), "EXECUTION_ERROR");
            }
            other => panic!("expected a failed tick, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_none_mode_is_rejected() {
        let fx = fixture().await;
        let result = PollingTrigger::new(
            "t",
            fx.descriptor.clone(),
            QueryRequest::new("SELECT 1"),
            fx.runner.clone(),
            Arc::new(PlainRenderer),
        );
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_next_evaluation_follows_interval() {
        let fx = fixture().await;
        let trigger = trigger(&fx, "SELECT 1 WHERE 0").with_interval(Duration::from_secs(300));
        let before = Utc::now();
        assert!(trigger.is_due(before + chrono::Duration::seconds(1)).await);

        trigger.tick().await;
        let next = trigger.next_evaluation().await;
        assert!(next >= before + chrono::Duration::seconds(300));
        assert!(!trigger.is_due(Utc::now()).await);
    }
}
