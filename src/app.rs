//! Service wiring shared by the HTTP server and the CLI.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::warn;

use crate::events::EventEnvelope;
use crate::expiration::{ExpirationSupervisor, ExpirationTarget};
use crate::listeners::{self, MessageListener, MessageThreadListener};
use crate::messages::MessageService;
use crate::router::{DispatchReport, Dispatcher};
use crate::scheduler::TaskScheduler;
use crate::store::{
    DeadLetterStore, SqliteMessageRepository, SqliteMessageThreadRepository, StoreError,
};
use crate::threads::MessageThreadService;

/// The assembled event pipeline.
#[derive(Debug)]
pub struct App {
    /// Message state machine.
    pub messages: Arc<MessageService>,
    /// Thread aggregator.
    pub threads: Arc<MessageThreadService>,
    /// Expiration supervisor.
    pub supervisor: Arc<ExpirationSupervisor>,
    /// Both listener groups.
    pub dispatcher: Dispatcher,
    /// Undecodable events.
    pub dead_letters: DeadLetterStore,
}

impl App {
    /// Wire services, listeners and the dispatcher over a migrated pool.
    pub fn new(
        pool: SqlitePool,
        scheduler: Arc<dyn TaskScheduler>,
        target: ExpirationTarget,
    ) -> Self {
        let message_repo = Arc::new(SqliteMessageRepository::new(pool.clone()));
        let thread_repo = Arc::new(SqliteMessageThreadRepository::new(pool.clone()));

        let messages = Arc::new(MessageService::new(message_repo.clone()));
        let threads = Arc::new(MessageThreadService::new(thread_repo, message_repo));
        let supervisor = Arc::new(ExpirationSupervisor::new(
            Arc::clone(&messages),
            Arc::clone(&threads),
            scheduler,
            target,
        ));

        let message_listener = Arc::new(MessageListener::new(
            Arc::clone(&messages),
            Arc::clone(&supervisor),
        ));
        let thread_listener = Arc::new(MessageThreadListener::new(Arc::clone(&threads)));

        Self {
            messages,
            threads,
            supervisor,
            dispatcher: listeners::dispatcher(&message_listener, &thread_listener),
            dead_letters: DeadLetterStore::new(pool),
        }
    }

    /// Dispatch one envelope to every listener group, dead-lettering it if
    /// its payload cannot be decoded.
    ///
    /// # Errors
    ///
    /// Returns an error only if the dead-letter write fails; handler failures
    /// are reported in the [`DispatchReport`].
    pub async fn ingest(&self, envelope: &EventEnvelope) -> Result<DispatchReport, StoreError> {
        let report = self.dispatcher.dispatch(envelope).await;
        if let Some(decode) = report.decode_error() {
            if !self.dead_letters.record(envelope, decode).await? {
                warn!(event_id = %envelope.id, "undecodable event redelivered");
            }
        }
        Ok(report)
    }
}
