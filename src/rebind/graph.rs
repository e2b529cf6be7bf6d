//! Live Object Graph
//!
//! Objects live in an arena and point at each other through [`Handle`]s,
//! so references can be filled in after every object has a slot.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::persistence::{ConfigValue, ObjectKind, ObjectMemento, ObjectRef};

/// Index of an object in a [`LiveGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A config value with references resolved to handles
#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ref(Handle),
    List(Vec<LiveValue>),
    Map(BTreeMap<String, LiveValue>),
}

impl LiveValue {
    /// Every handle referenced from this value
    pub fn handles(&self) -> Vec<Handle> {
        let mut out = Vec::new();
        self.collect_handles(&mut out);
        out
    }

    fn collect_handles(&self, out: &mut Vec<Handle>) {
        match self {
            LiveValue::Ref(handle) => out.push(*handle),
            LiveValue::List(items) => items.iter().for_each(|item| item.collect_handles(out)),
            LiveValue::Map(entries) => entries.values().for_each(|v| v.collect_handles(out)),
            _ => {}
        }
    }

    fn to_config(&self, graph: &LiveGraph) -> ConfigValue {
        match self {
            LiveValue::Null => ConfigValue::Null,
            LiveValue::Bool(v) => ConfigValue::Bool(*v),
            LiveValue::Int(v) => ConfigValue::Int(*v),
            LiveValue::Float(v) => ConfigValue::Float(*v),
            LiveValue::String(v) => ConfigValue::String(v.clone()),
            LiveValue::Ref(handle) => {
                let target = graph.get(*handle);
                ConfigValue::Ref(ObjectRef::new(target.kind, target.id.clone()))
            }
            LiveValue::List(items) => {
                ConfigValue::List(items.iter().map(|item| item.to_config(graph)).collect())
            }
            LiveValue::Map(entries) => ConfigValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_config(graph)))
                    .collect(),
            ),
        }
    }
}

/// Lifecycle of an object during and after rebind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationState {
    /// Slot allocated, fields not yet set
    Skeleton,
    /// Fields set, awaiting activation
    Populated,
    /// Activation hook ran successfully
    Active,
    /// Could not be loaded, resolved, wired or activated
    Failed,
    /// Skipped because something it depends on is not active
    Inactive,
}

/// A managed object in the live graph
#[derive(Debug, Clone)]
pub struct LiveObject {
    pub id: String,
    pub kind: ObjectKind,
    pub type_tag: String,
    pub platform_version: String,
    pub display_name: String,
    pub config: BTreeMap<String, LiveValue>,
    pub custom_fields: BTreeMap<String, LiveValue>,
    pub parent: Option<Handle>,
    pub children: Vec<Handle>,
    pub state: ActivationState,
    /// Whether fields were populated from a memento
    pub loaded: bool,
}

impl LiveObject {
    pub(crate) fn skeleton(
        id: String,
        kind: ObjectKind,
        type_tag: String,
        platform_version: String,
    ) -> Self {
        Self {
            display_name: id.clone(),
            id,
            kind,
            type_tag,
            platform_version,
            config: BTreeMap::new(),
            custom_fields: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
            state: ActivationState::Skeleton,
            loaded: false,
        }
    }

    /// Every handle referenced from config and custom fields
    pub fn referenced_handles(&self) -> Vec<Handle> {
        self.config
            .values()
            .chain(self.custom_fields.values())
            .flat_map(LiveValue::handles)
            .collect()
    }
}

/// Arena of live objects indexed by id
#[derive(Debug, Default)]
pub struct LiveGraph {
    objects: Vec<LiveObject>,
    index: HashMap<String, Handle>,
}

impl LiveGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, object: LiveObject) -> Handle {
        let handle = Handle(self.objects.len());
        self.objects.push(object);
        handle
    }

    pub(crate) fn set_index(&mut self, index: HashMap<String, Handle>) {
        self.index = index;
    }

    pub fn get(&self, handle: Handle) -> &LiveObject {
        &self.objects[handle.0]
    }

    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut LiveObject {
        &mut self.objects[handle.0]
    }

    pub fn handle_of(&self, id: &str) -> Option<Handle> {
        self.index.get(id).copied()
    }

    pub fn by_id(&self, id: &str) -> Option<&LiveObject> {
        self.handle_of(id).map(|h| self.get(h))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &LiveObject)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, object)| (Handle(i), object))
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> {
        (0..self.objects.len()).map(Handle)
    }

    /// Objects without a parent
    pub fn roots(&self) -> Vec<Handle> {
        self.iter()
            .filter(|(_, object)| object.parent.is_none())
            .map(|(h, _)| h)
            .collect()
    }

    /// Ids of objects in a given state, sorted
    pub fn ids_in_state(&self, state: ActivationState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .objects
            .iter()
            .filter(|object| object.state == state)
            .map(|object| object.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Verify the parent/child relation is a forest: every child is listed
    /// exactly once by its parent, every listed child points back, and no
    /// object is its own ancestor.
    pub fn check_forest(&self) -> Result<()> {
        for (handle, object) in self.iter() {
            if let Some(parent) = object.parent {
                let listed = self
                    .get(parent)
                    .children
                    .iter()
                    .filter(|c| **c == handle)
                    .count();
                if listed != 1 {
                    return Err(Error::InvalidState(format!(
                        "{} is listed {} times by its parent {}",
                        object.id,
                        listed,
                        self.get(parent).id
                    )));
                }
            }

            for child in &object.children {
                if self.get(*child).parent != Some(handle) {
                    return Err(Error::InvalidState(format!(
                        "{} lists child {} which does not point back",
                        object.id,
                        self.get(*child).id
                    )));
                }
            }

            let mut seen = HashSet::new();
            let mut current = object.parent;
            while let Some(ancestor) = current {
                if ancestor == handle || !seen.insert(ancestor) {
                    return Err(Error::InvalidState(format!(
                        "{} is its own ancestor",
                        object.id
                    )));
                }
                current = self.get(ancestor).parent;
            }
        }
        Ok(())
    }

    /// Serialize every loaded object back into mementos, sorted by id
    pub fn to_mementos(&self) -> Vec<ObjectMemento> {
        let mut mementos: Vec<ObjectMemento> = self
            .objects
            .iter()
            .filter(|object| object.loaded)
            .map(|object| ObjectMemento {
                id: object.id.clone(),
                kind: object.kind,
                type_tag: object.type_tag.clone(),
                platform_version: object.platform_version.clone(),
                display_name: object.display_name.clone(),
                config: object
                    .config
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_config(self)))
                    .collect(),
                parent_id: object.parent.map(|p| self.get(p).id.clone()),
                children_ids: object
                    .children
                    .iter()
                    .map(|c| self.get(*c).id.clone())
                    .collect(),
                custom_fields: object
                    .custom_fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_config(self)))
                    .collect(),
            })
            .collect();
        mementos.sort_by(|a, b| a.id.cmp(&b.id));
        mementos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(id: &str) -> LiveObject {
        LiveObject::skeleton(id.into(), ObjectKind::Entity, "x.Y".into(), "1.0.0".into())
    }

    #[test]
    fn test_forest_check_detects_mismatch() {
        let mut graph = LiveGraph::new();
        let parent = graph.push(object("p"));
        let child = graph.push(object("c"));
        graph.get_mut(child).parent = Some(parent);
        assert!(graph.check_forest().is_err());

        graph.get_mut(parent).children.push(child);
        graph.check_forest().unwrap();

        graph.get_mut(parent).children.push(child);
        assert!(graph.check_forest().is_err());
    }

    #[test]
    fn test_forest_check_detects_cycle() {
        let mut graph = LiveGraph::new();
        let a = graph.push(object("a"));
        let b = graph.push(object("b"));
        graph.get_mut(a).parent = Some(b);
        graph.get_mut(b).parent = Some(a);
        graph.get_mut(a).children.push(b);
        graph.get_mut(b).children.push(a);
        assert!(graph.check_forest().is_err());
    }

    #[test]
    fn test_to_mementos_resolves_handles() {
        let mut graph = LiveGraph::new();
        let loc = graph.push(LiveObject::skeleton(
            "loc".into(),
            ObjectKind::Location,
            "x.Loc".into(),
            "1.0.0".into(),
        ));
        let app = graph.push(object("app"));
        graph.get_mut(app).config.insert("where".into(), LiveValue::Ref(loc));
        graph.get_mut(app).loaded = true;
        let mut index = HashMap::new();
        index.insert("loc".to_string(), loc);
        index.insert("app".to_string(), app);
        graph.set_index(index);

        let mementos = graph.to_mementos();
        assert_eq!(mementos.len(), 1);
        assert_eq!(
            mementos[0].config["where"],
            ConfigValue::Ref(ObjectRef::new(ObjectKind::Location, "loc"))
        );
        assert_eq!(graph.by_id("loc").unwrap().kind, ObjectKind::Location);
    }
}
