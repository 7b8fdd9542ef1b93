use std::{collections::BTreeMap, sync::Mutex};

use pretty_assertions::assert_eq;

use crate::*;

/// An in-memory platform that hosts buckets.
#[derive(Default)]
struct FakeCloud {
    next_id: Mutex<u32>,
    buckets: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCloud {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn bucket_name(&self, id: &str) -> Option<String> {
        self.buckets.lock().unwrap().get(id).cloned()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct LocalBucket {
    name: String,
    /// Buckets cannot move, so changing this replaces the bucket.
    region: String,
}

fn bucket(name: &str) -> LocalBucket {
    LocalBucket {
        name: name.to_owned(),
        region: "us-east-1".to_owned(),
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct RemoteBucket {
    id: String,
    name: String,
}

impl Resource for LocalBucket {
    type Provider = FakeCloud;
    type Error = String;
    type Output = RemoteBucket;

    async fn create(&self, cloud: &FakeCloud) -> Result<RemoteBucket, String> {
        cloud.record(format!("create {}", self.name));
        if self.name == "boom" {
            return Err("the platform refused the bucket".to_owned());
        }
        let id = {
            let mut next_id = cloud.next_id.lock().unwrap();
            *next_id += 1;
            format!("b-{next_id}")
        };
        cloud
            .buckets
            .lock()
            .unwrap()
            .insert(id.clone(), self.name.clone());
        Ok(RemoteBucket {
            id,
            name: self.name.clone(),
        })
    }

    async fn read(
        &self,
        cloud: &FakeCloud,
        previous_remote: &RemoteBucket,
    ) -> Result<Option<RemoteBucket>, String> {
        cloud.record(format!("read {}", previous_remote.id));
        Ok(cloud
            .bucket_name(&previous_remote.id)
            .map(|name| RemoteBucket {
                id: previous_remote.id.clone(),
                name,
            }))
    }

    async fn update(
        &self,
        cloud: &FakeCloud,
        _previous_local: &Self,
        previous_remote: &RemoteBucket,
    ) -> Result<RemoteBucket, String> {
        cloud.record(format!("update {}", previous_remote.id));
        cloud
            .buckets
            .lock()
            .unwrap()
            .insert(previous_remote.id.clone(), self.name.clone());
        Ok(RemoteBucket {
            id: previous_remote.id.clone(),
            name: self.name.clone(),
        })
    }

    async fn delete(&self, cloud: &FakeCloud, previous_remote: &RemoteBucket) -> Result<(), String> {
        cloud.record(format!("delete {}", previous_remote.id));
        cloud.buckets.lock().unwrap().remove(&previous_remote.id);
        Ok(())
    }

    fn requires_replacement(&self, previous_local: &Self) -> bool {
        self.region != previous_local.region
    }

    fn in_sync(&self, remote: &RemoteBucket) -> bool {
        self.name == remote.name
    }
}

impl Import for LocalBucket {
    async fn import(&self, cloud: &FakeCloud, bucket_id: &str) -> Result<Option<RemoteBucket>, String> {
        cloud.record(format!("import {bucket_id}"));
        Ok(cloud.bucket_name(bucket_id).map(|name| RemoteBucket {
            id: bucket_id.to_owned(),
            name,
        }))
    }
}

impl FakeCloud {
    /// Adds a bucket behind the store's back.
    fn adopt(&self, id: &str, name: &str) {
        self.buckets
            .lock()
            .unwrap()
            .insert(id.to_owned(), name.to_owned());
    }
}

fn stored_remote(dir: &std::path::Path, id: &str) -> serde_json::Value {
    let contents = std::fs::read_to_string(dir.join(format!("{id}.json"))).unwrap();
    let stored: serde_json::Value = serde_json::from_str(&contents).unwrap();
    stored["remote"].clone()
}

/// Runs one plan/apply cycle, declaring the given buckets.
async fn converge(
    dir: &std::path::Path,
    cloud: FakeCloud,
    buckets: &[(&str, LocalBucket)],
) -> (FakeCloud, Vec<Action>) {
    let mut store = Store::new(dir, cloud);
    let mut actions = vec![];
    for (id, local) in buckets {
        actions.push(store.resource(id, local.clone()).unwrap());
    }
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();
    let Store { provider, .. } = store;
    (provider, actions)
}

#[tokio::test]
async fn lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();

    let (cloud, actions) = converge(path, FakeCloud::default(), &[("assets", bucket("assets"))]).await;
    assert_eq!(vec![Action::Create], actions);
    assert_eq!(
        serde_json::json!({"id": "b-1", "name": "assets"}),
        stored_remote(path, "assets")
    );

    let (cloud, actions) = converge(path, cloud, &[("assets", bucket("assets"))]).await;
    assert_eq!(vec![Action::Read], actions);

    let (cloud, actions) = converge(path, cloud, &[("assets", bucket("static-assets"))]).await;
    assert_eq!(vec![Action::Update], actions);
    assert_eq!(Some("static-assets".to_owned()), cloud.bucket_name("b-1"));

    let moved = LocalBucket {
        region: "eu-west-1".to_owned(),
        ..bucket("static-assets")
    };
    let (cloud, actions) = converge(path, cloud, &[("assets", moved)]).await;
    assert_eq!(vec![Action::Replace], actions);
    assert_eq!(
        serde_json::json!({"id": "b-2", "name": "static-assets"}),
        stored_remote(path, "assets")
    );

    let mut store = Store::new(path, cloud);
    let local: LocalBucket = store.destroy("assets").unwrap();
    assert_eq!("eu-west-1", local.region);
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();
    assert!(!path.join("assets.json").exists());

    assert_eq!(
        vec![
            "create assets",
            "read b-1",
            "update b-1",
            "delete b-1",
            "create static-assets",
            "delete b-2",
        ],
        store.provider().calls()
    );
    assert!(store.provider().buckets.lock().unwrap().is_empty());
}

#[tokio::test]
async fn drift_is_corrected_by_the_next_apply() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();

    let (cloud, _) = converge(dir.path(), FakeCloud::default(), &[("logs", bucket("logs"))]).await;
    cloud.adopt("b-1", "renamed-by-hand");

    let (cloud, actions) = converge(dir.path(), cloud, &[("logs", bucket("logs"))]).await;
    assert_eq!(vec![Action::Read], actions);
    assert_eq!(Some("logs".to_owned()), cloud.bucket_name("b-1"));
    assert_eq!(
        serde_json::json!({"id": "b-1", "name": "logs"}),
        stored_remote(dir.path(), "logs")
    );

    // Converged, so the next run only reads.
    let (cloud, actions) = converge(dir.path(), cloud, &[("logs", bucket("logs"))]).await;
    assert_eq!(vec![Action::Read], actions);
    assert_eq!(
        vec!["create logs", "read b-1", "update b-1", "read b-1"],
        cloud.calls()
    );
}

#[tokio::test]
async fn import_adopts_an_existing_resource() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let cloud = FakeCloud::default();
    cloud.adopt("b-7", "legacy");

    let mut store = Store::new(dir.path(), cloud);
    let action = store.import("legacy", bucket("legacy"), "b-7").unwrap();
    assert_eq!(Action::Import, action);
    let plan = store.plan().unwrap();
    assert!(plan.has_changes());
    store.apply(plan).await.unwrap();
    assert_eq!(
        serde_json::json!({"id": "b-7", "name": "legacy"}),
        stored_remote(dir.path(), "legacy")
    );

    // Stored now, so importing again is just a declaration.
    let action = store.import("legacy", bucket("legacy"), "b-7").unwrap();
    assert_eq!(Action::Read, action);
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();
    assert_eq!(vec!["import b-7", "read b-7"], store.provider().calls());
}

#[tokio::test]
async fn import_restores_the_declared_state() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let cloud = FakeCloud::default();
    cloud.adopt("b-7", "legacy");

    let mut store = Store::new(dir.path(), cloud);
    store.import("assets", bucket("assets"), "b-7").unwrap();
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();
    assert_eq!(Some("assets".to_owned()), store.provider().bucket_name("b-7"));
    assert_eq!(vec!["import b-7", "update b-7"], store.provider().calls());
}

#[tokio::test]
async fn importing_nothing_fails() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();

    let mut store = Store::new(dir.path(), FakeCloud::default());
    store.import("ghost", bucket("ghost"), "b-404").unwrap();
    let plan = store.plan().unwrap();
    let err = store.apply(plan).await.unwrap_err();
    assert!(
        matches!(&err, Error::ImportMissing { remote_id, .. } if remote_id == "b-404"),
        "{err}"
    );
    assert!(!dir.path().join("ghost.json").exists());
}

#[tokio::test]
async fn vanished_resource_is_created_again() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();

    let (cloud, _) = converge(dir.path(), FakeCloud::default(), &[("logs", bucket("logs"))]).await;
    cloud.buckets.lock().unwrap().clear();

    let (cloud, actions) = converge(dir.path(), cloud, &[("logs", bucket("logs"))]).await;
    assert_eq!(vec![Action::Read], actions);
    assert!(!dir.path().join("logs.json").exists());

    let (cloud, actions) = converge(dir.path(), cloud, &[("logs", bucket("logs"))]).await;
    assert_eq!(vec![Action::Create], actions);
    assert_eq!(Some("logs".to_owned()), cloud.bucket_name("b-2"));
}

#[tokio::test]
async fn orphans_are_destroyed_first() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();

    let (cloud, _) = converge(
        path,
        FakeCloud::default(),
        &[("bucket-a", bucket("alpha")), ("bucket-b", bucket("beta"))],
    )
    .await;

    // bucket-b is no longer declared. LocalBucket is registered by the
    // declaration of bucket-c.
    let mut store = Store::new(path, cloud);
    store.resource("bucket-c", bucket("gamma")).unwrap();
    store.resource("bucket-a", bucket("alpha")).unwrap();
    let plan = store.plan().unwrap();
    assert!(plan.warnings.is_empty(), "{:#?}", plan.warnings);
    assert_eq!(
        vec![
            ("bucket-b", Action::Destroy, true),
            ("bucket-c", Action::Create, false),
            ("bucket-a", Action::Read, false),
        ],
        plan.actions
            .iter()
            .map(|a| (a.id.as_str(), a.action, a.is_orphan))
            .collect::<Vec<_>>()
    );
    store.apply(plan).await.unwrap();

    assert!(!path.join("bucket-b.json").exists());
    assert!(path.join("bucket-a.json").exists());
    assert!(path.join("bucket-c.json").exists());
    assert_eq!(
        vec!["delete b-2", "create gamma", "read b-1"],
        store.provider().calls()[2..].to_vec()
    );
}

#[tokio::test]
async fn destroy_everything_with_registered_types() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();

    let (cloud, _) = converge(
        dir.path(),
        FakeCloud::default(),
        &[("bucket-a", bucket("alpha")), ("bucket-b", bucket("beta"))],
    )
    .await;

    let mut store = Store::new(dir.path(), cloud);
    store.register::<LocalBucket>();
    let plan = store.plan().unwrap();
    assert_eq!(2, plan.actions.len());
    assert!(plan
        .actions
        .iter()
        .all(|a| a.action == Action::Destroy && a.is_orphan));
    store.apply(plan).await.unwrap();
    assert!(store.provider().buckets.lock().unwrap().is_empty());
    assert!(!dir.path().join("bucket-a.json").exists());
}

#[tokio::test]
async fn unknown_orphan_warning() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();

    let (cloud, _) = converge(dir.path(), FakeCloud::default(), &[("lonely", bucket("lonely"))]).await;

    let mut store = Store::new(dir.path(), cloud);
    let plan = store.plan().unwrap();
    assert!(plan.actions.is_empty());
    assert_eq!(1, plan.warnings.len());
    assert!(plan.warnings[0].contains("lonely"), "{}", plan.warnings[0]);
    assert!(plan.warnings[0].contains("register"), "{}", plan.warnings[0]);
    assert!(plan.to_string().contains("WARNING: Orphaned resource 'lonely'"));

    store.apply(plan).await.unwrap();
    assert!(dir.path().join("lonely.json").exists());
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::new(dir.path(), FakeCloud::default());
    store.resource("assets", bucket("assets")).unwrap();
    let err = store.resource("assets", bucket("other")).unwrap_err();
    assert!(
        matches!(&err, Error::DuplicateResource { id } if id == "assets"),
        "{err}"
    );
}

#[tokio::test]
async fn destroying_an_unknown_resource_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::new(dir.path(), FakeCloud::default());
    let err = store.destroy::<LocalBucket>("ghost").unwrap_err();
    assert!(matches!(&err, Error::MissingStoreFile { .. }), "{err}");
}

#[tokio::test]
async fn apply_stops_at_first_failure() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();

    let mut store = Store::new(dir.path(), FakeCloud::default());
    store.resource("first", bucket("first")).unwrap();
    store.resource("second", bucket("boom")).unwrap();
    store.resource("third", bucket("third")).unwrap();
    let plan = store.plan().unwrap();
    let err = store.apply(plan).await.unwrap_err();
    assert!(matches!(&err, Error::Create { name, .. } if name == "second"), "{err}");
    assert!(err.to_string().contains("the platform refused the bucket"));

    assert!(dir.path().join("first.json").exists());
    assert!(!dir.path().join("second.json").exists());
    assert!(!dir.path().join("third.json").exists());
    assert_eq!(vec!["create first", "create boom"], store.provider().calls());
}

#[tokio::test]
async fn plan_display() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = Store::new(dir.path(), FakeCloud::default());
    let plan = store.plan().unwrap();
    assert!(!plan.has_changes());
    assert_eq!("No changes.\n", plan.to_string());

    store.resource("assets", bucket("assets")).unwrap();
    let plan = store.plan().unwrap();
    assert!(plan.has_changes());
    let shown = plan.to_string();
    assert!(shown.starts_with("  create 'assets' ["), "{shown}");
    assert!(shown.ends_with("LocalBucket]\n"), "{shown}");
}
