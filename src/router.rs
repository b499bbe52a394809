//! Event routing.
//!
//! An [`EventRouter`] is one listener group: a static table from
//! [`EventType`] to the handler that owns it, built once at start-up. The
//! [`Dispatcher`] hands every envelope to every group; groups never see each
//! other's failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::ServiceError;
use crate::events::{DecodeError, EventEnvelope, EventType};

/// Errors a handler can return.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload does not match the handler's expected shape.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The service rejected or failed the operation.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Handles one or more event types.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process `envelope`, already known to be of `event_type`.
    async fn handle(
        &self,
        event_type: EventType,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError>;
}

/// Result of a successful dispatch to one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// A handler processed the event.
    Handled,
    /// The group has no handler for this event type.
    Ignored,
}

/// A dispatch to one group failed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The payload could not be decoded. Redelivery cannot help.
    #[error("router [{group}]: {source}")]
    Decode {
        /// Listener group.
        group: String,
        /// Decoder failure with the raw payload and target type.
        #[source]
        source: DecodeError,
    },

    /// The handler failed; the event may be redelivered.
    #[error("router [{group}] failed to handle event [{event_id}] of type [{event_type}]: {source}")]
    Handler {
        /// Listener group.
        group: String,
        /// Envelope ID.
        event_id: String,
        /// Envelope type string.
        event_type: String,
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
}

impl DispatchError {
    /// Returns `true` when redelivering the same event cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// The decoder failure, for dead-lettering.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            Self::Decode { source, .. } => Some(source),
            Self::Handler { .. } => None,
        }
    }
}

/// One listener group's route table.
pub struct EventRouter {
    name: String,
    routes: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<&str> = self.routes.keys().map(EventType::as_str).collect();
        routes.sort_unstable();
        f.debug_struct("EventRouter")
            .field("name", &self.name)
            .field("routes", &routes)
            .finish()
    }
}

impl EventRouter {
    /// Create an empty router for the group `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: HashMap::new(),
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route `event_type` to `handler`, replacing any previous handler.
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> &mut Self {
        if self.routes.insert(event_type, handler).is_some() {
            warn!(
                router = %self.name,
                event_type = event_type.as_str(),
                "handler replaced"
            );
        }
        self
    }

    /// Returns `true` if the group handles `event_type`.
    pub fn handles(&self, event_type: EventType) -> bool {
        self.routes.contains_key(&event_type)
    }

    /// Event types routed by this group.
    pub fn event_types(&self) -> Vec<EventType> {
        EventType::ALL
            .into_iter()
            .filter(|kind| self.handles(*kind))
            .collect()
    }

    /// Hand `envelope` to the handler registered for its type.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the payload cannot be decoded or the
    /// handler fails.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<Dispatch, DispatchError> {
        let Some(event_type) = envelope.kind() else {
            debug!(
                router = %self.name,
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "unknown event type ignored"
            );
            return Ok(Dispatch::Ignored);
        };
        let Some(handler) = self.routes.get(&event_type) else {
            return Ok(Dispatch::Ignored);
        };

        debug!(
            router = %self.name,
            event_id = %envelope.id,
            event_type = event_type.as_str(),
            "dispatching event"
        );

        match handler.handle(event_type, envelope).await {
            Ok(()) => Ok(Dispatch::Handled),
            Err(HandlerError::Decode(source)) => {
                error!(
                    router = %self.name,
                    event_id = %envelope.id,
                    event_type = event_type.as_str(),
                    target = source.target,
                    raw = %source.raw,
                    error = %source.source,
                    "cannot decode event payload"
                );
                Err(DispatchError::Decode {
                    group: self.name.clone(),
                    source,
                })
            }
            Err(HandlerError::Service(source)) => {
                error!(
                    router = %self.name,
                    event_id = %envelope.id,
                    event_type = event_type.as_str(),
                    error = %source,
                    "event handler failed"
                );
                Err(DispatchError::Handler {
                    group: self.name.clone(),
                    event_id: envelope.id.clone(),
                    event_type: envelope.event_type.clone(),
                    source,
                })
            }
        }
    }
}

/// Outcome of dispatching one envelope to one group.
#[derive(Debug)]
pub struct GroupOutcome {
    /// Listener group.
    pub group: String,
    /// What the group did with the event.
    pub result: Result<Dispatch, DispatchError>,
}

/// Outcome of dispatching one envelope to every group.
#[derive(Debug)]
pub struct DispatchReport {
    /// Envelope ID.
    pub event_id: String,
    /// Envelope type string.
    pub event_type: String,
    /// Per-group outcomes, in registration order.
    pub outcomes: Vec<GroupOutcome>,
}

/// Serializable view of a [`DispatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// Envelope ID.
    pub event_id: String,
    /// Envelope type string.
    pub event_type: String,
    /// Per-group outcome.
    pub groups: Vec<GroupSummary>,
}

/// Serializable view of a [`GroupOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    /// Listener group.
    pub group: String,
    /// `handled`, `ignored` or `failed`.
    pub outcome: &'static str,
    /// Error text for failed groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchReport {
    /// Returns `true` if no group failed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Returns `true` if at least one group handled the event.
    pub fn was_handled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o.result, Ok(Dispatch::Handled)))
    }

    /// First decode failure, if any group hit one.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        self.outcomes
            .iter()
            .find_map(|o| o.result.as_ref().err().and_then(DispatchError::decode_error))
    }

    /// Returns `true` if a group failed in a way redelivery may fix.
    pub fn has_retryable_failure(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(&o.result, Err(e) if !e.is_permanent()))
    }

    /// Serializable summary.
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            groups: self
                .outcomes
                .iter()
                .map(|o| match &o.result {
                    Ok(Dispatch::Handled) => GroupSummary {
                        group: o.group.clone(),
                        outcome: "handled",
                        error: None,
                    },
                    Ok(Dispatch::Ignored) => GroupSummary {
                        group: o.group.clone(),
                        outcome: "ignored",
                        error: None,
                    },
                    Err(e) => GroupSummary {
                        group: o.group.clone(),
                        outcome: "failed",
                        error: Some(e.to_string()),
                    },
                })
                .collect(),
        }
    }
}

/// Fans each envelope out to every listener group.
#[derive(Debug, Default)]
pub struct Dispatcher {
    routers: Vec<EventRouter>,
}

impl Dispatcher {
    /// Create a dispatcher over `routers`.
    pub fn new(routers: Vec<EventRouter>) -> Self {
        Self { routers }
    }

    /// Add a listener group.
    pub fn push(&mut self, router: EventRouter) -> &mut Self {
        self.routers.push(router);
        self
    }

    /// Listener groups in dispatch order.
    pub fn routers(&self) -> &[EventRouter] {
        &self.routers
    }

    /// Dispatch `envelope` to every group. A failing group does not stop the
    /// others.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        let mut outcomes = Vec::with_capacity(self.routers.len());
        for router in &self.routers {
            outcomes.push(GroupOutcome {
                group: router.name().to_owned(),
                result: router.dispatch(envelope).await,
            });
        }

        let report = DispatchReport {
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            outcomes,
        };
        if !report.was_handled() && report.is_success() {
            debug!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "no listener group handles this event"
            );
        }
        report
    }
}
