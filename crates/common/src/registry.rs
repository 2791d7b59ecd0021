//! Type-keyed handler table.

use std::collections::HashMap;

use crate::error::RegistryError;

/// Maps message type names to the handlers registered for them.
///
/// Populated during startup through `&mut self`, then shared read-only
/// (usually behind an `Arc`) for the rest of the process lifetime.
#[derive(Debug)]
pub struct HandlerRegistry<H> {
    category: &'static str,
    routes: HashMap<String, Vec<H>>,
}

impl<H> HandlerRegistry<H> {
    /// Creates an empty registry. `category` names it in error messages.
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            routes: HashMap::new(),
        }
    }

    pub fn category(&self) -> &'static str {
        self.category
    }

    /// Adds a handler for `message_type`. Duplicates are kept and reported
    /// by [`lookup`](Self::lookup) and [`validate`](Self::validate).
    pub fn register(&mut self, message_type: impl Into<String>, handler: H) {
        self.routes
            .entry(message_type.into())
            .or_default()
            .push(handler);
    }

    /// Returns the single handler for `message_type`.
    pub fn lookup(&self, message_type: &str) -> Result<&H, RegistryError> {
        self.find(message_type)?
            .ok_or_else(|| RegistryError::NoHandler {
                category: self.category,
                message_type: message_type.to_string(),
            })
    }

    /// Returns the handler for `message_type` if there is one.
    pub fn find(&self, message_type: &str) -> Result<Option<&H>, RegistryError> {
        match self.routes.get(message_type).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([handler]) => Ok(Some(handler)),
            Some(handlers) => Err(RegistryError::AmbiguousHandler {
                category: self.category,
                message_type: message_type.to_string(),
                count: handlers.len(),
            }),
        }
    }

    /// Fails on the first message type with more than one handler.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut types: Vec<&String> = self.routes.keys().collect();
        types.sort();
        for message_type in types {
            self.find(message_type)?;
        }
        Ok(())
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.routes
            .get(message_type)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    pub fn message_types(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
