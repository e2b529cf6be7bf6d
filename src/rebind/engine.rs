//! Rebind Engine
//!
//! Reconstructs a live graph from persisted mementos in four ordered
//! phases:
//!
//! 1. Manifest scan: pick a strategy for every id by type tag.
//! 2. Skeletons: give every id a slot before any field is populated, so
//!    references between objects never depend on load order.
//! 3. Population: copy fields and resolve references to handles.
//! 4. Tree wiring and activation: link parents and children, then activate
//!    locations before the objects that use them and parents before
//!    children.
//!
//! Problems are collected per object; only strict mode, an incompatible
//! platform version or `fail_on_activation_error` abort the whole rebind.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use super::context::RebindContext;
use super::graph::{ActivationState, Handle, LiveGraph, LiveObject, LiveValue};
use super::registry::{ReconstructionStrategy, TypeRegistry};
use super::report::{IssueKind, RebindIssue, RebindReport};
use crate::config::RebindConfig;
use crate::error::{Error, Result};
use crate::persistence::store::{LoadFailure, LoadedSnapshot};
use crate::persistence::version::check_compatible;
use crate::persistence::{ConfigValue, Manifest, MementoStore, ObjectKind, ObjectMemento};

/// How strictly a rebind treats per-object problems
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebindOptions {
    /// Fail on the first unresolved reference
    pub strict: bool,
    /// Fail if any activation hook fails
    pub fail_on_activation_error: bool,
}

impl From<&RebindConfig> for RebindOptions {
    fn from(config: &RebindConfig) -> Self {
        Self {
            strict: config.strict,
            fail_on_activation_error: config.fail_on_activation_error,
        }
    }
}

/// A reconstructed graph and what went wrong building it
#[derive(Debug)]
pub struct RebindOutcome {
    pub graph: LiveGraph,
    pub report: RebindReport,
}

/// Rebuilds live graphs from mementos
pub struct RebindEngine {
    registry: Arc<TypeRegistry>,
    options: RebindOptions,
}

/// Working state of one rebind
struct Rebind<'a> {
    engine: &'a RebindEngine,
    graph: LiveGraph,
    context: RebindContext,
    report: RebindReport,
    strategies: HashMap<Handle, Arc<dyn ReconstructionStrategy>>,
    mementos: BTreeMap<Handle, ObjectMemento>,
}

impl RebindEngine {
    pub fn new(registry: Arc<TypeRegistry>, options: RebindOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> RebindOptions {
        self.options
    }

    /// Load the latest state from `store` and reconstruct it
    pub async fn rebind(&self, store: &MementoStore) -> Result<RebindOutcome> {
        let snapshot = store.load_snapshot().await?;
        tracing::info!(
            "Rebinding {} objects from {}",
            snapshot.manifest.len(),
            store.store().summary_name()
        );
        self.rebind_snapshot(&snapshot)
    }

    /// Reconstruct an already loaded snapshot, including its load failures
    pub fn rebind_snapshot(&self, snapshot: &LoadedSnapshot) -> Result<RebindOutcome> {
        self.reconstruct_with_failures(
            &snapshot.manifest,
            snapshot.mementos.clone(),
            &snapshot.failures,
        )
    }

    /// Reconstruct a graph from a manifest and the mementos it lists
    pub fn reconstruct(
        &self,
        manifest: &Manifest,
        mementos: Vec<ObjectMemento>,
    ) -> Result<RebindOutcome> {
        self.reconstruct_with_failures(manifest, mementos, &[])
    }

    fn reconstruct_with_failures(
        &self,
        manifest: &Manifest,
        mementos: Vec<ObjectMemento>,
        failures: &[LoadFailure],
    ) -> Result<RebindOutcome> {
        for (id, entry) in &manifest.entries {
            check_compatible(id, &entry.platform_version)?;
        }

        let mut rebind = Rebind {
            engine: self,
            graph: LiveGraph::new(),
            context: RebindContext::new(),
            report: RebindReport::default(),
            strategies: HashMap::new(),
            mementos: BTreeMap::new(),
        };
        rebind.report.counts = manifest.count_by_kind();

        rebind.instantiate_skeletons(manifest)?;
        rebind.record_load_failures(failures);
        rebind.resolve_strategies(manifest);
        rebind.attach_mementos(mementos);
        rebind.populate()?;
        rebind.wire_tree();
        rebind.activate()?;

        let Rebind {
            mut graph,
            context,
            mut report,
            ..
        } = rebind;
        graph.set_index(context.into_handles());
        report.finish(&graph);

        if report.is_clean() {
            tracing::info!("Rebind complete: {}", report.summary());
        } else {
            tracing::warn!("Rebind partially complete: {}", report.summary());
        }

        Ok(RebindOutcome { graph, report })
    }
}

impl Rebind<'_> {
    fn fail(&mut self, handle: Handle, issue: RebindIssue) {
        self.graph.get_mut(handle).state = ActivationState::Failed;
        self.report.push(issue);
    }

    fn is_failed(&self, handle: Handle) -> bool {
        self.graph.get(handle).state == ActivationState::Failed
    }

    /// Phase 2: a slot for every manifest id
    fn instantiate_skeletons(&mut self, manifest: &Manifest) -> Result<()> {
        for (id, entry) in &manifest.entries {
            let handle = self.graph.push(LiveObject::skeleton(
                id.clone(),
                entry.kind,
                entry.type_tag.clone(),
                entry.platform_version.clone(),
            ));
            self.context.register(id, handle)?;
        }
        Ok(())
    }

    fn record_load_failures(&mut self, failures: &[LoadFailure]) {
        for failure in failures {
            let object_id = failure.id.clone().unwrap_or_else(|| failure.key.clone());
            let issue = RebindIssue::new(
                IssueKind::Load,
                object_id.clone(),
                format!("unreadable record {}: {}", failure.key, failure.reason),
            );
            match self.context.lookup(&object_id) {
                Some(handle) => self.fail(handle, issue),
                None => self.report.push(issue),
            }
        }
    }

    /// Phase 1: choose a strategy per id
    fn resolve_strategies(&mut self, manifest: &Manifest) {
        for (id, entry) in &manifest.entries {
            let Some(handle) = self.context.lookup(id) else {
                continue;
            };
            match self.engine.registry.resolve(&entry.type_tag) {
                Some(strategy) => {
                    self.strategies.insert(handle, strategy);
                }
                None => self.fail(
                    handle,
                    RebindIssue::new(
                        IssueKind::Create,
                        id.clone(),
                        format!("no reconstruction strategy for type {}", entry.type_tag),
                    ),
                ),
            }
        }
    }

    fn attach_mementos(&mut self, mementos: Vec<ObjectMemento>) {
        for memento in mementos {
            let Some(handle) = self.context.lookup(&memento.id) else {
                self.report.push(RebindIssue::new(
                    IssueKind::Load,
                    memento.id.clone(),
                    "memento is not listed in the manifest",
                ));
                continue;
            };

            let slot = self.graph.get(handle);
            if slot.kind != memento.kind || slot.type_tag != memento.type_tag {
                let message = format!(
                    "memento is {} {} but manifest lists {} {}",
                    memento.kind, memento.type_tag, slot.kind, slot.type_tag
                );
                self.fail(
                    handle,
                    RebindIssue::new(IssueKind::Load, memento.id.clone(), message),
                );
                continue;
            }

            if self.mementos.insert(handle, memento).is_some() {
                tracing::debug!("Duplicate memento for {}", self.graph.get(handle).id);
            }
        }

        // Listed but never supplied
        let missing: Vec<Handle> = self
            .graph
            .handles()
            .filter(|h| !self.mementos.contains_key(h) && !self.is_failed(*h))
            .collect();
        for handle in missing {
            let id = self.graph.get(handle).id.clone();
            self.fail(
                handle,
                RebindIssue::new(IssueKind::Load, id, "no memento found for manifest entry"),
            );
        }
    }

    /// Phase 3: populate fields and resolve references
    fn populate(&mut self) -> Result<()> {
        let handles: Vec<Handle> = self.mementos.keys().copied().collect();
        for handle in handles {
            if self.is_failed(handle) {
                continue;
            }
            let memento = &self.mementos[&handle];

            if let Some(strategy) = self.strategies.get(&handle) {
                if let Err(e) = strategy.instantiate(memento) {
                    let issue = RebindIssue::new(IssueKind::Create, memento.id.clone(), e.to_string());
                    self.fail(handle, issue);
                    continue;
                }
            }

            let mut unresolved = Vec::new();
            let config = self.resolve_map(&memento.config, &mut unresolved);
            let custom_fields = self.resolve_map(&memento.custom_fields, &mut unresolved);
            let display_name = memento.display_name.clone();
            let object_id = memento.id.clone();

            let object = self.graph.get_mut(handle);
            object.display_name = display_name;

            if unresolved.is_empty() {
                object.config = config;
                object.custom_fields = custom_fields;
                object.loaded = true;
                object.state = ActivationState::Populated;
                continue;
            }

            for (missing_id, message) in unresolved {
                if self.engine.options.strict {
                    return Err(Error::ReferenceResolution {
                        object_id,
                        missing_id,
                    });
                }
                let issue = RebindIssue::new(IssueKind::Reference, object_id.clone(), message)
                    .with_related(missing_id);
                self.fail(handle, issue);
            }
        }
        Ok(())
    }

    fn resolve_map(
        &self,
        values: &BTreeMap<String, ConfigValue>,
        unresolved: &mut Vec<(String, String)>,
    ) -> BTreeMap<String, LiveValue> {
        values
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve_value(value, unresolved)))
            .collect()
    }

    fn resolve_value(
        &self,
        value: &ConfigValue,
        unresolved: &mut Vec<(String, String)>,
    ) -> LiveValue {
        match value {
            ConfigValue::Null => LiveValue::Null,
            ConfigValue::Bool(v) => LiveValue::Bool(*v),
            ConfigValue::Int(v) => LiveValue::Int(*v),
            ConfigValue::Float(v) => LiveValue::Float(*v),
            ConfigValue::String(v) => LiveValue::String(v.clone()),
            ConfigValue::Ref(reference) => match self.context.lookup(&reference.id) {
                Some(handle) if self.graph.get(handle).kind == reference.kind => {
                    LiveValue::Ref(handle)
                }
                Some(handle) => {
                    unresolved.push((
                        reference.id.clone(),
                        format!(
                            "reference to {} {} resolves to a {}",
                            reference.kind,
                            reference.id,
                            self.graph.get(handle).kind
                        ),
                    ));
                    LiveValue::Null
                }
                None => {
                    unresolved.push((
                        reference.id.clone(),
                        format!("reference to unknown {} {}", reference.kind, reference.id),
                    ));
                    LiveValue::Null
                }
            },
            ConfigValue::List(items) => LiveValue::List(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, unresolved))
                    .collect(),
            ),
            ConfigValue::Map(entries) => LiveValue::Map(self.resolve_map(entries, unresolved)),
        }
    }

    /// Phase 4a: link parents and children.
    ///
    /// A child's `parent_id` decides its parent. Children listed by a parent
    /// that point elsewhere are ignored; parent cycles are broken by failing
    /// every object on the cycle.
    fn wire_tree(&mut self) {
        let mut parents: HashMap<Handle, Handle> = HashMap::new();

        let entries: Vec<(Handle, Option<String>)> = self
            .mementos
            .iter()
            .map(|(handle, memento)| (*handle, memento.parent_id.clone()))
            .collect();

        for (handle, parent_id) in entries {
            let Some(parent_id) = parent_id else {
                continue;
            };
            let id = self.graph.get(handle).id.clone();
            match self.context.lookup(&parent_id) {
                None => self.fail(
                    handle,
                    RebindIssue::new(
                        IssueKind::Tree,
                        id,
                        format!("parent {} does not exist", parent_id),
                    )
                    .with_related(parent_id),
                ),
                Some(parent) if parent == handle => self.fail(
                    handle,
                    RebindIssue::new(IssueKind::Tree, id, "object is its own parent"),
                ),
                Some(parent) => {
                    let listed = self
                        .mementos
                        .get(&parent)
                        .map(|p| p.children_ids.contains(&id));
                    if listed == Some(false) {
                        tracing::warn!(
                            "Rebind: {} names parent {} which does not list it; wiring anyway",
                            id,
                            parent_id
                        );
                    }
                    parents.insert(handle, parent);
                }
            }
        }

        for handle in find_parent_cycles(&parents) {
            parents.remove(&handle);
            let id = self.graph.get(handle).id.clone();
            self.fail(
                handle,
                RebindIssue::new(IssueKind::Tree, id, "parent chain forms a cycle"),
            );
        }

        for (handle, memento) in &self.mementos {
            for child_id in &memento.children_ids {
                let pointed_back = self
                    .context
                    .lookup(child_id)
                    .map(|child| parents.get(&child) == Some(handle));
                if pointed_back != Some(true) {
                    tracing::warn!(
                        "Rebind: {} lists child {} which does not name it as parent; ignoring",
                        memento.id,
                        child_id
                    );
                }
            }
        }

        // Children in the parent's declared order, then any it did not list
        let mut children: BTreeMap<Handle, Vec<Handle>> = BTreeMap::new();
        for (parent, memento) in &self.mementos {
            let mut seen = HashSet::new();
            for child_id in &memento.children_ids {
                if let Some(child) = self.context.lookup(child_id) {
                    if parents.get(&child) == Some(parent) && seen.insert(child) {
                        children.entry(*parent).or_default().push(child);
                    }
                }
            }
        }
        let mut unlisted: Vec<(Handle, Handle)> = parents
            .iter()
            .map(|(child, parent)| (*parent, *child))
            .filter(|(parent, child)| {
                !children
                    .get(parent)
                    .map(|list| list.contains(child))
                    .unwrap_or(false)
            })
            .collect();
        unlisted.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| self.graph.get(a.1).id.cmp(&self.graph.get(b.1).id))
        });
        for (parent, child) in unlisted {
            children.entry(parent).or_default().push(child);
        }

        for (child, parent) in &parents {
            self.graph.get_mut(*child).parent = Some(*parent);
        }
        for (parent, list) in children {
            self.graph.get_mut(parent).children = list;
        }
    }

    /// Phase 4b: activate in dependency order.
    ///
    /// An object depends on its parent and on every location it references.
    /// Objects whose dependencies are not active are left inactive.
    fn activate(&mut self) -> Result<()> {
        let count = self.graph.len();
        let mut dependencies: Vec<BTreeSet<Handle>> = vec![BTreeSet::new(); count];

        for handle in self.graph.handles() {
            let object = self.graph.get(handle);
            if let Some(parent) = object.parent {
                dependencies[handle.index()].insert(parent);
            }
            for target in object.referenced_handles() {
                if target != handle && self.graph.get(target).kind == ObjectKind::Location {
                    dependencies[handle.index()].insert(target);
                }
            }
        }

        let mut dependents: Vec<Vec<Handle>> = vec![Vec::new(); count];
        let mut waiting: Vec<usize> = vec![0; count];
        for handle in self.graph.handles() {
            if self.graph.get(handle).state != ActivationState::Populated {
                continue;
            }
            for dep in &dependencies[handle.index()] {
                if self.graph.get(*dep).state == ActivationState::Populated {
                    dependents[dep.index()].push(handle);
                    waiting[handle.index()] += 1;
                }
            }
        }

        // Ready set ordered by (kind rank, id) for deterministic activation
        let mut ready = BinaryHeap::new();
        for handle in self.graph.handles() {
            if self.graph.get(handle).state == ActivationState::Populated
                && waiting[handle.index()] == 0
            {
                ready.push(Reverse(self.activation_key(handle)));
            }
        }

        while let Some(Reverse((_, _, handle))) = ready.pop() {
            self.activate_one(handle, &dependencies[handle.index()])?;

            for dependent in std::mem::take(&mut dependents[handle.index()]) {
                waiting[dependent.index()] -= 1;
                if waiting[dependent.index()] == 0 {
                    ready.push(Reverse(self.activation_key(dependent)));
                }
            }
        }

        // Anything still populated sits on a dependency cycle
        let stuck: Vec<Handle> = self
            .graph
            .handles()
            .filter(|h| self.graph.get(*h).state == ActivationState::Populated)
            .collect();
        for handle in stuck {
            let id = self.graph.get(handle).id.clone();
            self.fail(
                handle,
                RebindIssue::new(IssueKind::Activation, id, "activation dependency cycle"),
            );
        }
        Ok(())
    }

    fn activation_key(&self, handle: Handle) -> (u8, String, Handle) {
        let object = self.graph.get(handle);
        (object.kind.activation_rank(), object.id.clone(), handle)
    }

    fn activate_one(&mut self, handle: Handle, dependencies: &BTreeSet<Handle>) -> Result<()> {
        let blocked = dependencies
            .iter()
            .find(|dep| self.graph.get(**dep).state != ActivationState::Active);
        if let Some(dep) = blocked {
            tracing::debug!(
                "Not activating {}: dependency {} is {:?}",
                self.graph.get(handle).id,
                self.graph.get(*dep).id,
                self.graph.get(*dep).state
            );
            self.graph.get_mut(handle).state = ActivationState::Inactive;
            return Ok(());
        }

        let result = match self.strategies.get(&handle) {
            Some(strategy) => strategy.activate(self.graph.get(handle), &self.graph),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.graph.get_mut(handle).state = ActivationState::Active;
                Ok(())
            }
            Err(e) => {
                let id = self.graph.get(handle).id.clone();
                if self.engine.options.fail_on_activation_error {
                    return Err(Error::Activation {
                        object_id: id,
                        reason: e.to_string(),
                    });
                }
                self.fail(
                    handle,
                    RebindIssue::new(IssueKind::Activation, id, e.to_string()),
                );
                Ok(())
            }
        }
    }
}

/// Every handle that lies on a cycle of the parent relation
fn find_parent_cycles(parents: &HashMap<Handle, Handle>) -> Vec<Handle> {
    let mut on_cycle = BTreeSet::new();
    let mut settled: HashSet<Handle> = HashSet::new();

    let mut starts: Vec<Handle> = parents.keys().copied().collect();
    starts.sort();

    for start in starts {
        let mut path: Vec<Handle> = Vec::new();
        let mut position: HashMap<Handle, usize> = HashMap::new();
        let mut current = Some(start);

        while let Some(handle) = current {
            if settled.contains(&handle) {
                break;
            }
            if let Some(&index) = position.get(&handle) {
                on_cycle.extend(path[index..].iter().copied());
                break;
            }
            position.insert(handle, path.len());
            path.push(handle);
            current = parents.get(&handle).copied();
        }

        settled.extend(path);
    }

    on_cycle.into_iter().collect()
}
