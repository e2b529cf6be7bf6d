//! Type Registry
//!
//! Maps type tags to the strategy used to rebuild and activate objects of
//! that type. Tags are validated when registered, so a bad registration
//! fails at startup rather than during a rebind.

use std::collections::HashMap;
use std::sync::Arc;

use super::graph::{LiveGraph, LiveObject};
use crate::error::{Error, Result};
use crate::persistence::ObjectMemento;

/// How objects of one type are reconstructed
pub trait ReconstructionStrategy: Send + Sync {
    /// Check a memento before it is populated into the graph
    fn instantiate(&self, _memento: &ObjectMemento) -> Result<()> {
        Ok(())
    }

    /// Activation hook, run once the object and its dependencies are wired
    fn activate(&self, _object: &LiveObject, _graph: &LiveGraph) -> Result<()> {
        Ok(())
    }
}

/// Strategy that accepts any memento and activates trivially
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveStrategy;

impl ReconstructionStrategy for PassiveStrategy {}

/// Strategy backed by an activation closure
pub struct ActivationFn<F>(pub F);

impl<F> ReconstructionStrategy for ActivationFn<F>
where
    F: Fn(&LiveObject, &LiveGraph) -> Result<()> + Send + Sync,
{
    fn activate(&self, object: &LiveObject, graph: &LiveGraph) -> Result<()> {
        (self.0)(object, graph)
    }
}

/// Type tag to strategy map
#[derive(Default, Clone)]
pub struct TypeRegistry {
    strategies: HashMap<String, Arc<dyn ReconstructionStrategy>>,
    fallback: Option<Arc<dyn ReconstructionStrategy>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that rebuilds any type passively
    pub fn permissive() -> Self {
        Self::new().with_fallback(Arc::new(PassiveStrategy))
    }

    /// Strategy used for tags with no explicit registration
    pub fn with_fallback(mut self, fallback: Arc<dyn ReconstructionStrategy>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Register a strategy for a type tag
    pub fn register(
        &mut self,
        type_tag: impl Into<String>,
        strategy: Arc<dyn ReconstructionStrategy>,
    ) -> Result<()> {
        let type_tag = type_tag.into();
        if type_tag.is_empty() || type_tag.chars().any(char::is_whitespace) {
            return Err(Error::Registry(format!("invalid type tag {:?}", type_tag)));
        }
        if self.strategies.contains_key(&type_tag) {
            return Err(Error::Registry(format!(
                "type tag {} registered twice",
                type_tag
            )));
        }
        self.strategies.insert(type_tag, strategy);
        Ok(())
    }

    /// Register an activation closure for a type tag
    pub fn register_fn<F>(&mut self, type_tag: impl Into<String>, activate: F) -> Result<()>
    where
        F: Fn(&LiveObject, &LiveGraph) -> Result<()> + Send + Sync + 'static,
    {
        self.register(type_tag, Arc::new(ActivationFn(activate)))
    }

    pub fn resolve(&self, type_tag: &str) -> Option<Arc<dyn ReconstructionStrategy>> {
        self.strategies
            .get(type_tag)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
