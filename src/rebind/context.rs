//! Id to handle table built while rebinding. Each id is registered once.

use std::collections::HashMap;

use super::graph::Handle;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct RebindContext {
    handles: HashMap<String, Handle>,
}

impl RebindContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handle for an id; registering an id twice is an error
    pub fn register(&mut self, id: &str, handle: Handle) -> Result<()> {
        if self.handles.contains_key(id) {
            return Err(Error::InvalidState(format!(
                "id {} already registered in rebind context",
                id
            )));
        }
        self.handles.insert(id.to_string(), handle);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<Handle> {
        self.handles.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) fn into_handles(self) -> HashMap<String, Handle> {
        self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ObjectKind;
    use crate::rebind::graph::{LiveGraph, LiveObject};

    #[test]
    fn test_write_once() {
        let mut graph = LiveGraph::new();
        let handle = graph.push(LiveObject::skeleton(
            "e1".into(),
            ObjectKind::Entity,
            "x.Y".into(),
            "1.0.0".into(),
        ));

        let mut context = RebindContext::new();
        context.register("e1", handle).unwrap();
        assert!(context.register("e1", handle).is_err());
        assert_eq!(context.lookup("e1"), Some(handle));
        assert_eq!(context.lookup("e2"), None);
    }
}
