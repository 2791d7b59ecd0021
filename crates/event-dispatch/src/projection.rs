//! Read-model handlers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::{HandlerError, HandlerRegistry, RegistryError};
use event_store::EventRecord;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

/// A read-model handler for published events.
///
/// Projections sit outside the consistency boundary: they see events only
/// after they are committed and cannot refuse them.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn handle(&self, record: &EventRecord) -> Result<(), HandlerError>;
}

type ProjectionFn =
    dyn Fn(EventRecord) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync;

/// Adapts an async closure into a [`Projection`].
struct FnProjection {
    name: String,
    handler: Box<ProjectionFn>,
}

#[async_trait]
impl Projection for FnProjection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, record: &EventRecord) -> Result<(), HandlerError> {
        (self.handler)(record.clone()).await
    }
}

/// Event type → at most one projection.
pub struct ProjectionRegistry {
    handlers: HandlerRegistry<Arc<dyn Projection>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HandlerRegistry::new("event"),
        }
    }

    pub fn register(&mut self, event_type: impl Into<String>, projection: Arc<dyn Projection>) {
        self.handlers.register(event_type, projection);
    }

    /// Registers an async closure as the projection for `event_type`.
    pub fn on<F, Fut>(&mut self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let event_type = event_type.into();
        let projection = FnProjection {
            name: format!("{event_type} handler"),
            handler: Box::new(move |record: EventRecord| handler(record).boxed()),
        };
        self.register(event_type, Arc::new(projection));
    }

    /// The projection for `event_type`, if any. Errors only when more than
    /// one is registered.
    pub fn find(&self, event_type: &str) -> Result<Option<&Arc<dyn Projection>>, RegistryError> {
        self.handlers.find(event_type)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        self.handlers.validate()
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.message_types()
    }
}

impl Default for ProjectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProjectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.event_types().collect();
        types.sort_unstable();
        f.debug_struct("ProjectionRegistry")
            .field("event_types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use common::AggregateId;
    use event_store::{Event, Version};

    use super::*;

    fn record(event_type: &str) -> EventRecord {
        let event = Event::new(
            event_type,
            AggregateId::new(),
            Version::first(),
            serde_json::json!({}),
        );
        EventRecord::new("Account", Version::first(), event)
    }

    #[tokio::test]
    async fn closure_projection_is_found_and_invoked() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut registry = ProjectionRegistry::new();
        registry.on("Deposited", move |record: EventRecord| {
            let tx = tx.clone();
            async move {
                tx.send(record.event_type).map_err(HandlerError::other)?;
                Ok::<_, HandlerError>(())
            }
        });

        let projection = registry.find("Deposited").unwrap().unwrap();
        projection.handle(&record("Deposited")).await.unwrap();

        assert_eq!(projection.name(), "Deposited handler");
        assert_eq!(rx.recv().await.unwrap(), "Deposited");
    }

    #[test]
    fn missing_projection_is_not_an_error() {
        let registry = ProjectionRegistry::new();

        assert!(registry.find("Deposited").unwrap().is_none());
    }

    #[test]
    fn two_projections_for_one_event_are_ambiguous() {
        let mut registry = ProjectionRegistry::new();
        registry.on("Deposited", |_| async { Ok(()) });
        registry.on("Deposited", |_| async { Ok(()) });

        assert!(registry.validate().is_err());
        assert!(matches!(
            registry.find("Deposited"),
            Err(RegistryError::AmbiguousHandler { .. })
        ));
    }
}
