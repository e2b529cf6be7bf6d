//! Persist a graph, rebind it on a fresh engine and check what comes back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use wolfcontrol::config::PersistenceConfig;
use wolfcontrol::persistence::{ConfigValue, MementoStore, ObjectKind, ObjectMemento, ObjectRef};
use wolfcontrol::rebind::{
    ActivationState, IssueKind, LiveValue, RebindEngine, RebindOptions, TypeRegistry,
};
use wolfcontrol::store::{FileObjectStore, InMemoryObjectStore, ObjectStore, SqliteObjectStore};
use wolfcontrol::Error;

fn memento_store(store: Arc<dyn ObjectStore>) -> MementoStore {
    MementoStore::new(store, &PersistenceConfig::default(), Duration::from_secs(5))
}

fn permissive() -> RebindEngine {
    RebindEngine::new(Arc::new(TypeRegistry::permissive()), RebindOptions::default())
}

fn entity(id: &str) -> ObjectMemento {
    ObjectMemento::new(ObjectKind::Entity, id, "org.example.Service")
}

#[tokio::test]
async fn partial_rebind_wires_everything_resolvable() {
    let mementos = memento_store(Arc::new(InMemoryObjectStore::new()));

    let mut objects: Vec<ObjectMemento> = (1..=10)
        .map(|n| {
            let next = if n == 10 { 11 } else { n + 1 };
            entity(&format!("e{}", n))
                .with_config("next", ObjectRef::new(ObjectKind::Entity, format!("e{}", next)))
        })
        .collect();
    objects.reverse();
    mementos.checkpoint(&objects).await.unwrap();

    let outcome = permissive().rebind(&mementos).await.unwrap();
    let report = outcome.report;

    assert_eq!(report.counts.get(&ObjectKind::Entity), Some(&10));
    assert_eq!(report.active.len(), 9);
    assert_eq!(report.failed, vec!["e10".to_string()]);

    let issues = report.issues_of(IssueKind::Reference);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].object_id, "e10");
    assert_eq!(issues[0].related_id.as_deref(), Some("e11"));
    assert!(matches!(
        report.escalate(),
        Err(Error::ReferenceResolution { ref missing_id, .. }) if missing_id == "e11"
    ));

    let graph = outcome.graph;
    let e1 = graph.by_id("e1").unwrap();
    let e2 = graph.handle_of("e2").unwrap();
    assert_eq!(e1.config["next"], LiveValue::Ref(e2));
    assert!(!graph.by_id("e10").unwrap().loaded);
}

#[tokio::test]
async fn strict_rebind_fails_on_dangling_reference() {
    let mementos = memento_store(Arc::new(InMemoryObjectStore::new()));
    mementos
        .checkpoint(&[entity("e1").with_config("db", ObjectRef::new(ObjectKind::Entity, "gone"))])
        .await
        .unwrap();

    let engine = RebindEngine::new(
        Arc::new(TypeRegistry::permissive()),
        RebindOptions {
            strict: true,
            fail_on_activation_error: false,
        },
    );
    assert!(matches!(
        engine.rebind(&mementos).await,
        Err(Error::ReferenceResolution { .. })
    ));
}

#[tokio::test]
async fn round_trip_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileObjectStore::new(dir.path().to_path_buf(), true).unwrap());
    let mementos = memento_store(store);

    let mut nested = std::collections::BTreeMap::new();
    nested.insert("primary".to_string(), ConfigValue::from(ObjectRef::new(ObjectKind::Location, "dc1")));
    nested.insert("weight".to_string(), ConfigValue::Float(0.75));

    let mut objects = vec![
        ObjectMemento::new(ObjectKind::Location, "dc1", "org.example.Datacenter")
            .with_display_name("Datacenter 1")
            .with_config("region", "eu-west"),
        ObjectMemento::new(ObjectKind::Entity, "app", "org.example.Application")
            .with_child("web")
            .with_child("db")
            .with_config("where", ObjectRef::new(ObjectKind::Location, "dc1"))
            .with_config("placement", ConfigValue::Map(nested))
            .with_custom_field("owner", "ops"),
        ObjectMemento::new(ObjectKind::Entity, "web", "org.example.WebServer")
            .with_parent("app")
            .with_config("port", 8080i64)
            .with_config(
                "backends",
                ConfigValue::List(vec![
                    ObjectRef::new(ObjectKind::Entity, "db").into(),
                    ConfigValue::Null,
                ]),
            ),
        ObjectMemento::new(ObjectKind::Entity, "db", "org.example.Database")
            .with_parent("app")
            .with_config("replicated", true),
        ObjectMemento::new(ObjectKind::Policy, "autoscale", "org.example.AutoScaler")
            .with_config("target", ObjectRef::new(ObjectKind::Entity, "web")),
        ObjectMemento::new(ObjectKind::Enricher, "latency", "org.example.LatencyEnricher")
            .with_config("source", ObjectRef::new(ObjectKind::Entity, "web")),
    ];
    mementos.checkpoint(&objects).await.unwrap();

    let outcome = permissive().rebind(&mementos).await.unwrap();
    assert!(outcome.report.is_clean(), "{}", outcome.report.summary());
    outcome.graph.check_forest().unwrap();

    let app = outcome.graph.handle_of("app").unwrap();
    let children: Vec<&str> = outcome
        .graph
        .get(app)
        .children
        .iter()
        .map(|c| outcome.graph.get(*c).id.as_str())
        .collect();
    assert_eq!(children, vec!["web", "db"]);

    objects.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(outcome.graph.to_mementos(), objects);
}

#[tokio::test]
async fn activation_follows_locations_then_parents() {
    let store = Arc::new(SqliteObjectStore::open_in_memory().unwrap());
    let mementos = memento_store(store);

    mementos
        .checkpoint(&[
            entity("a-child").with_parent("m-parent"),
            entity("m-parent")
                .with_child("a-child")
                .with_config("where", ObjectRef::new(ObjectKind::Location, "z-loc")),
            ObjectMemento::new(ObjectKind::Location, "z-loc", "org.example.Localhost"),
            ObjectMemento::new(ObjectKind::Policy, "b-policy", "org.example.Restarter")
                .with_config("target", ObjectRef::new(ObjectKind::Entity, "m-parent")),
        ])
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let registry = TypeRegistry::new().with_fallback(Arc::new(wolfcontrol::rebind::ActivationFn(
        move |object: &wolfcontrol::rebind::LiveObject,
              _: &wolfcontrol::rebind::LiveGraph|
              -> wolfcontrol::Result<()> {
            seen.lock().unwrap().push(object.id.clone());
            Ok(())
        },
    )));
    let engine = RebindEngine::new(Arc::new(registry), RebindOptions::default());

    let outcome = engine.rebind(&mementos).await.unwrap();
    assert!(outcome.report.is_clean());
    assert_eq!(
        *order.lock().unwrap(),
        vec!["z-loc", "m-parent", "a-child", "b-policy"]
    );
}

#[tokio::test]
async fn failed_activation_leaves_subtree_inactive() {
    let mementos = memento_store(Arc::new(InMemoryObjectStore::new()));
    mementos
        .checkpoint(&[
            ObjectMemento::new(ObjectKind::Entity, "cluster", "org.example.Cluster")
                .with_child("member-1")
                .with_child("member-2"),
            entity("member-1").with_parent("cluster"),
            entity("member-2").with_parent("cluster"),
            entity("standalone"),
        ])
        .await
        .unwrap();

    let mut registry = TypeRegistry::permissive();
    registry
        .register_fn("org.example.Cluster", |_, _| {
            Err(Error::Internal("quorum not reachable".into()))
        })
        .unwrap();
    let engine = RebindEngine::new(Arc::new(registry), RebindOptions::default());

    let mut outcome = engine.rebind(&mementos).await.unwrap();
    assert_eq!(outcome.report.failed, vec!["cluster".to_string()]);
    assert_eq!(
        outcome.report.inactive,
        vec!["member-1".to_string(), "member-2".to_string()]
    );
    assert_eq!(outcome.report.active, vec!["standalone".to_string()]);
    assert_eq!(outcome.report.issues_of(IssueKind::Activation).len(), 1);
    assert_eq!(
        outcome.graph.by_id("member-1").unwrap().state,
        ActivationState::Inactive
    );

    outcome.report.acknowledge();
    assert!(outcome.report.is_acknowledged());
}

#[tokio::test]
async fn corrupt_record_is_reported_not_fatal() {
    let store = Arc::new(InMemoryObjectStore::new());
    let mementos = memento_store(store.clone());
    mementos.checkpoint(&[entity("good")]).await.unwrap();
    store
        .put(
            &ObjectKind::Entity.key("broken"),
            bytes::Bytes::from_static(b"not a memento"),
        )
        .await
        .unwrap();

    let outcome = permissive().rebind(&mementos).await.unwrap();
    assert_eq!(outcome.report.active, vec!["good".to_string()]);
    let load = outcome.report.issues_of(IssueKind::Load);
    assert_eq!(load.len(), 1);
    assert_eq!(load[0].object_id, "broken");

    assert!(matches!(
        mementos.load_all().await,
        Err(Error::Corrupted { .. })
    ));
}
