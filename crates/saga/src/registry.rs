//! Saga handler tables.
//!
//! Three independent tables keyed by event type: start, step and end. An
//! event type may appear in more than one table; routing consults start,
//! then end, then step, and uses the first match.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use common::{HandlerError, HandlerRegistry, RegistryError};
use event_store::EventRecord;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::context::SagaContext;

/// Boxed future returned by a saga handler.
pub type SagaFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// Type-erased saga handler.
pub type SagaHandlerFn = Arc<dyn Fn(SagaContext, EventRecord) -> SagaFuture + Send + Sync>;

/// Which table a handler was registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStage {
    Start,
    Step,
    End,
}

impl SagaStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Step => "step",
            Self::End => "end",
        }
    }
}

impl fmt::Display for SagaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered handler plus the event property it correlates on.
#[derive(Clone)]
pub struct SagaRoute {
    association: String,
    handler: SagaHandlerFn,
}

impl SagaRoute {
    pub fn association(&self) -> &str {
        &self.association
    }

    pub fn handler(&self) -> &SagaHandlerFn {
        &self.handler
    }
}

impl fmt::Debug for SagaRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaRoute")
            .field("association", &self.association)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct SagaHandlerRegistry {
    start: HandlerRegistry<SagaRoute>,
    step: HandlerRegistry<SagaRoute>,
    end: HandlerRegistry<SagaRoute>,
}

impl SagaHandlerRegistry {
    pub fn new() -> Self {
        Self {
            start: HandlerRegistry::new("saga start"),
            step: HandlerRegistry::new("saga step"),
            end: HandlerRegistry::new("saga end"),
        }
    }

    /// Registers `handler` in the `stage` table for `event_type`.
    ///
    /// `association` names the event property holding the saga id; see
    /// [`resolve_saga_id`](crate::resolve_saga_id) for how it is read.
    pub fn register<F, Fut>(
        &mut self,
        stage: SagaStage,
        event_type: impl Into<String>,
        association: impl Into<String>,
        handler: F,
    ) where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let route = SagaRoute {
            association: association.into(),
            handler: Arc::new(move |context: SagaContext, record: EventRecord| {
                handler(context, record).boxed()
            }),
        };
        self.table_mut(stage).register(event_type, route);
    }

    pub fn start<F, Fut>(
        &mut self,
        event_type: impl Into<String>,
        association: impl Into<String>,
        handler: F,
    ) where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(SagaStage::Start, event_type, association, handler);
    }

    pub fn step<F, Fut>(
        &mut self,
        event_type: impl Into<String>,
        association: impl Into<String>,
        handler: F,
    ) where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(SagaStage::Step, event_type, association, handler);
    }

    pub fn end<F, Fut>(
        &mut self,
        event_type: impl Into<String>,
        association: impl Into<String>,
        handler: F,
    ) where
        F: Fn(SagaContext, EventRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(SagaStage::End, event_type, association, handler);
    }

    /// Finds the handler for `event_type`: start table first, then end,
    /// then step. `None` means the event takes part in no saga.
    pub fn resolve(
        &self,
        event_type: &str,
    ) -> Result<Option<(SagaStage, &SagaRoute)>, RegistryError> {
        for stage in [SagaStage::Start, SagaStage::End, SagaStage::Step] {
            if let Some(route) = self.table(stage).find(event_type)? {
                return Ok(Some((stage, route)));
            }
        }
        Ok(None)
    }

    /// Fails if any table holds more than one handler for an event type.
    pub fn validate(&self) -> Result<(), RegistryError> {
        self.start.validate()?;
        self.end.validate()?;
        self.step.validate()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.step.is_empty() && self.end.is_empty()
    }

    fn table(&self, stage: SagaStage) -> &HandlerRegistry<SagaRoute> {
        match stage {
            SagaStage::Start => &self.start,
            SagaStage::Step => &self.step,
            SagaStage::End => &self.end,
        }
    }

    fn table_mut(&mut self, stage: SagaStage) -> &mut HandlerRegistry<SagaRoute> {
        match stage {
            SagaStage::Start => &mut self.start,
            SagaStage::Step => &mut self.step,
            SagaStage::End => &mut self.end,
        }
    }
}

impl Default for SagaHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(
        _: SagaContext,
        _: EventRecord,
    ) -> futures_util::future::Ready<Result<(), HandlerError>> {
        futures_util::future::ready(Ok(()))
    }

    #[test]
    fn start_table_wins_over_end_and_step() {
        let mut registry = SagaHandlerRegistry::new();
        registry.step("TransferSettled", "transferId", noop);
        registry.end("TransferSettled", "transferId", noop);
        registry.start("TransferSettled", "transferId", noop);

        let (stage, _) = registry.resolve("TransferSettled").unwrap().unwrap();

        assert_eq!(stage, SagaStage::Start);
    }

    #[test]
    fn end_table_wins_over_step() {
        let mut registry = SagaHandlerRegistry::new();
        registry.step("TransferSettled", "transferId", noop);
        registry.end("TransferSettled", "transferId", noop);

        let (stage, route) = registry.resolve("TransferSettled").unwrap().unwrap();

        assert_eq!(stage, SagaStage::End);
        assert_eq!(route.association(), "transferId");
    }

    #[test]
    fn unknown_event_is_not_routed() {
        let registry = SagaHandlerRegistry::new();

        assert!(registry.resolve("AccountOpened").unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_in_one_table_is_ambiguous() {
        let mut registry = SagaHandlerRegistry::new();
        registry.step("Debited", "transferId", noop);
        registry.step("Debited", "transferId", noop);

        assert!(matches!(
            registry.validate(),
            Err(RegistryError::AmbiguousHandler { count: 2, .. })
        ));
        assert!(registry.resolve("Debited").is_err());
    }
}
