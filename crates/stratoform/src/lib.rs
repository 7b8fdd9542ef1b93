//! # Stratoform
//!
//! Stratoform reconciles declaratively configured AWS resources with the
//! platform. Each supported resource type (WAF IP sets, API Gateway usage
//! plans, IAM virtual MFA devices, OpenSearch domain policies, SageMaker apps
//! and Transfer Family users) is a plain Rust struct implementing
//! [`Resource`], which maps the struct onto the platform's create, read,
//! update and delete calls.
//!
//! ## State
//!
//! Every resource has two states. The declared one is the struct itself,
//! written in code or in a stack file (see [`config`]). The observed one is
//! its [`Resource::Output`], what the platform last reported.
//!
//! A [`Store`] keeps both in one JSON file per resource id. Declaring a
//! resource compares it with its file to pick an [`Action`]: create it,
//! refresh it, update it in place or replace it. Resources that already exist
//! can be adopted with [`Store::import`]. A refresh that finds the platform
//! out of sync with the declaration (see [`Resource::in_sync`]) updates it
//! back. [`Store::plan`] gathers the actions, adding deletions for stored
//! resources nothing declares anymore, and [`Store::apply`] runs them.
//!
//! ## Batching
//!
//! Some platform APIs cap the number of mutations per call. The [`batch`]
//! module diffs two sets of records into bounded batches of insert and delete
//! operations, and [`token`] retries calls against APIs guarded by change
//! tokens.
//!
//! ## Errors
//!
//! Store, configuration and lifecycle failures are all variants of
//! [`Error`]. Resource implementations report their own error type, which
//! is carried inside the lifecycle variants.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
};

use snafu::prelude::*;

pub mod aws;
pub mod batch;
pub mod config;
pub mod tags;
#[cfg(test)]
mod test;
pub mod token;
pub mod utils;

/// Errors returned by resource implementations.
pub trait UserError: core::fmt::Display + core::fmt::Debug + 'static {}
impl<T: core::fmt::Display + core::fmt::Debug + 'static> UserError for T {}

#[derive(snafu::Snafu, Debug)]
pub enum Error {
    #[snafu(display("{source}:\n{}",
                source.chain()
                    .map(|e| format!("{e}"))
                    .collect::<Vec<_>>()
                    .join("\n -> ")))]
    Provider { source: anyhow::Error },

    #[snafu(display("Reading {path:?} failed: {source}"))]
    StoreFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Removing {path:?} failed: {source}"))]
    StoreFileDelete {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("'{name}' does not serialize to JSON: {source}"))]
    Serialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Stored '{name}' does not match its type: {source}"))]
    Deserialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Creating {path:?} failed: {source}"))]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Writing {path:?} failed: {source}"))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Batch size must be a positive integer, saw {size}"))]
    InvalidBatchSize { size: i64 },

    #[snafu(display("Batch size {size} is above the limit of {limit} updates per call"))]
    BatchSizeTooLarge { size: usize, limit: usize },

    #[snafu(display("Invalid retry policy: {reason}"))]
    InvalidRetryPolicy { reason: String },

    #[snafu(display("Reading config {path:?} failed: {source}"))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Config is not valid TOML for a stack: {source}"))]
    ConfigParse { source: toml::de::Error },

    #[snafu(display("Invalid resource '{id}': {reason}"))]
    InvalidResource { id: String, reason: String },

    #[snafu(display("Resource '{id}' is declared more than once"))]
    DuplicateResource { id: String },

    #[snafu(display("Creating '{name}' failed: {error}"))]
    Create {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Refreshing '{name}' failed: {error}"))]
    Read {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Importing '{name}' failed: {error}"))]
    Import {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Nothing to import for '{name}', '{remote_id}' does not exist"))]
    ImportMissing { name: String, remote_id: String },

    #[snafu(display("Updating '{name}' failed: {error}"))]
    Update {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Destroying '{name}' failed: {error}"))]
    Destroy {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("No stored state for '{name}'"))]
    Load { name: String },

    #[snafu(display("'{id}' has no store file"))]
    MissingStoreFile { id: String },

    #[snafu(display("Listing store directory {path:?} failed: {source}"))]
    ScanStoreDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Error::Provider { source }
    }
}

type Result<T, E = Error> = core::result::Result<T, E>;

/// A resource managed on a platform.
///
/// `Self` is the declared state and [`Resource::Output`] what the platform
/// reports about it.
pub trait Resource:
    core::fmt::Debug + Clone + PartialEq + serde::Serialize + serde::de::DeserializeOwned + 'static
{
    /// Handle to the platform, like [`aws::Aws`].
    type Provider;

    type Error: UserError;

    type Output: core::fmt::Debug
        + Clone
        + PartialEq
        + serde::Serialize
        + serde::de::DeserializeOwned
        + 'static;

    fn create(
        &self,
        provider: &Self::Provider,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>>;

    /// Resolves to `None` when the resource no longer exists, in which case
    /// it is dropped from the store and created again on the next run.
    fn read(
        &self,
        provider: &Self::Provider,
        previous_remote: &Self::Output,
    ) -> impl Future<Output = Result<Option<Self::Output>, Self::Error>>;

    /// Changes the resource in place, from `previous_local` and the last
    /// known `previous_remote` to `self`.
    fn update(
        &self,
        provider: &Self::Provider,
        previous_local: &Self,
        previous_remote: &Self::Output,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>>;

    /// Deleting a resource that is already gone is not an error.
    fn delete(
        &self,
        provider: &Self::Provider,
        previous_remote: &Self::Output,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn requires_replacement(&self, _previous_local: &Self) -> bool {
        false
    }

    /// Whether the platform still matches this declaration.
    ///
    /// A refresh that finds the resource out of sync calls
    /// [`Resource::update`] with the refreshed output, which must bring the
    /// platform back to `self`. Resources whose updates only diff declared
    /// states keep the default and have drift recorded, not corrected.
    fn in_sync(&self, _remote: &Self::Output) -> bool {
        true
    }
}

/// Resources that can be adopted from the platform by their platform id.
pub trait Import: Resource {
    /// Resolves to `None` if nothing on the platform has `remote_id`.
    fn import(
        &self,
        provider: &Self::Provider,
        remote_id: &str,
    ) -> impl Future<Output = Result<Option<Self::Output>, Self::Error>>;
}

/// What applying a plan does to one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Action {
    Create,
    Read,
    Import,
    Update,
    Replace,
    Destroy,
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Import => "import",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Destroy => "destroy",
        })
    }
}

/// One resource as kept on disk, at `<store dir>/<id>.json`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct StoreFile {
    name: String,
    local: serde_json::Value,
    remote: serde_json::Value,
    /// `std::any::type_name` of the resource. Finds the deleter for orphans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    type_name: Option<String>,
}

fn store_file_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

impl StoreFile {
    fn new<T: Resource>(id: &str, local: &T, remote: &T::Output) -> Result<Self> {
        Ok(Self {
            name: id.to_owned(),
            local: serde_json::to_value(local).context(SerializeSnafu { name: id })?,
            remote: serde_json::to_value(remote).context(SerializeSnafu {
                name: format!("{id} remote"),
            })?,
            type_name: Some(std::any::type_name::<T>().to_owned()),
        })
    }

    fn read(dir: &Path, id: &str) -> Result<Self> {
        let path = store_file_path(dir, id);
        ensure!(path.exists(), MissingStoreFileSnafu { id });
        log::debug!("loading '{id}' from {path:?}");
        let contents = std::fs::read_to_string(&path).context(StoreFileReadSnafu { path: &path })?;
        log::trace!("{path:?}:\n{}", indent(&contents));
        serde_json::from_str(&contents).context(DeserializeSnafu { name: id })
    }

    fn decode<T: Resource>(self) -> Result<(T, T::Output)> {
        log::trace!("decoding '{}' as {}", self.name, std::any::type_name::<T>());
        let local = serde_json::from_value(self.local).context(DeserializeSnafu {
            name: self.name.as_str(),
        })?;
        let remote = serde_json::from_value(self.remote).context(DeserializeSnafu {
            name: format!("{} remote", self.name),
        })?;
        Ok((local, remote))
    }

    async fn write(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .context(CreateFileSnafu { path: dir })?;
        let path = store_file_path(dir, &self.name);
        let contents = serde_json::to_string_pretty(self).context(SerializeSnafu {
            name: self.name.as_str(),
        })?;
        log::info!("  saving '{}' to {path:?}", self.name);
        tokio::fs::write(&path, contents)
            .await
            .context(WriteFileSnafu { path })
    }
}

async fn remove_store_file(dir: &Path, id: &str) -> Result<()> {
    let path = store_file_path(dir, id);
    log::info!("  forgetting '{id}', removing {path:?}");
    tokio::fs::remove_file(&path)
        .await
        .context(StoreFileDeleteSnafu { path })
}

fn indent(s: &str) -> String {
    s.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a>>;
type StepFn<P> = Box<dyn for<'a> FnOnce(&'a P) -> StepFuture<'a>>;

fn step<P, F>(f: F) -> StepFn<P>
where
    F: for<'a> FnOnce(&'a P) -> StepFuture<'a> + 'static,
{
    Box::new(f)
}

/// A scheduled lifecycle call for one resource.
struct Step<P> {
    id: String,
    run: StepFn<P>,
}

/// Lifecycle calls for one declared resource, each ending in the store.
struct Run<'a, T: Resource> {
    provider: &'a T::Provider,
    dir: PathBuf,
    id: String,
    local: T,
}

impl<T: Resource> Run<'_, T> {
    async fn save(&self, remote: &T::Output) -> Result<()> {
        StoreFile::new(&self.id, &self.local, remote)?
            .write(&self.dir)
            .await
    }

    fn changes(&self, previous_local: &T) -> String {
        let cmp = pretty_assertions::Comparison::new(previous_local, &self.local);
        indent(&cmp.to_string())
    }

    async fn create(&self) -> Result<()> {
        let remote = self
            .local
            .create(self.provider)
            .await
            .map_err(|error| Error::Create {
                name: self.id.clone(),
                error: Box::new(error),
            })?;
        self.save(&remote).await
    }

    /// Stores a freshly observed `remote`, first updating the platform if it
    /// no longer matches the declaration.
    async fn reconcile(&self, previous_remote: Option<&T::Output>, remote: T::Output) -> Result<()> {
        if let Some(previous) = previous_remote.filter(|previous| **previous != remote) {
            let cmp = pretty_assertions::Comparison::new(previous, &remote);
            log::warn!(
                "'{}' changed on the platform:\n{}",
                self.id,
                indent(&cmp.to_string())
            );
        }
        if self.local.in_sync(&remote) {
            return self.save(&remote).await;
        }
        log::warn!("  '{}' is out of sync, restoring the declared state", self.id);
        let remote = self
            .local
            .update(self.provider, &self.local, &remote)
            .await
            .map_err(|error| Error::Update {
                name: self.id.clone(),
                error: Box::new(error),
            })?;
        self.save(&remote).await
    }

    async fn refresh(&self, previous_remote: &T::Output) -> Result<()> {
        let remote = self
            .local
            .read(self.provider, previous_remote)
            .await
            .map_err(|error| Error::Read {
                name: self.id.clone(),
                error: Box::new(error),
            })?;
        match remote {
            Some(remote) => self.reconcile(Some(previous_remote), remote).await,
            None => {
                log::warn!(
                    "'{}' is gone from the platform, it will be created on the next apply",
                    self.id
                );
                remove_store_file(&self.dir, &self.id).await
            }
        }
    }

    async fn import(&self, remote_id: &str) -> Result<()>
    where
        T: Import,
    {
        let remote = self
            .local
            .import(self.provider, remote_id)
            .await
            .map_err(|error| Error::Import {
                name: self.id.clone(),
                error: Box::new(error),
            })?
            .context(ImportMissingSnafu {
                name: self.id.as_str(),
                remote_id,
            })?;
        log::info!("  adopted '{remote_id}'");
        self.reconcile(None, remote).await?;
        log::info!("  done");
        Ok(())
    }

    async fn update(&self, previous_local: &T, previous_remote: &T::Output) -> Result<()> {
        log::info!("  changes:\n{}", self.changes(previous_local));
        let remote = self
            .local
            .update(self.provider, previous_local, previous_remote)
            .await
            .map_err(|error| Error::Update {
                name: self.id.clone(),
                error: Box::new(error),
            })?;
        self.save(&remote).await
    }

    async fn destroy(&self, victim: &T, previous_remote: &T::Output) -> Result<()> {
        victim
            .delete(self.provider, previous_remote)
            .await
            .map_err(|error| Error::Destroy {
                name: self.id.clone(),
                error: Box::new(error),
            })?;
        log::info!("  '{}' is deleted from the platform", self.id);
        remove_store_file(&self.dir, &self.id).await
    }

    async fn replace(&self, previous_local: &T, previous_remote: &T::Output) -> Result<()> {
        log::info!("  changes forcing replacement:\n{}", self.changes(previous_local));
        // Dropping the store file before creating means a failed create
        // leaves nothing pointing at the deleted resource.
        self.destroy(previous_local, previous_remote).await?;
        self.create().await
    }

    async fn perform(self, action: Action, stored: Option<(T, T::Output)>) -> Result<()> {
        log::info!("{action} '{}':", self.id);
        match (action, stored) {
            (Action::Create, _) => self.create().await?,
            (Action::Read, Some((_, remote))) => self.refresh(&remote).await?,
            (Action::Update, Some((local, remote))) => self.update(&local, &remote).await?,
            (Action::Replace, Some((local, remote))) => self.replace(&local, &remote).await?,
            (Action::Destroy, Some((local, remote))) => self.destroy(&local, &remote).await?,
            (Action::Import, _) | (_, None) => {
                return LoadSnafu {
                    name: self.id.as_str(),
                }
                .fail()
            }
        }
        log::info!("  done");
        Ok(())
    }
}

/// Builds the deletion step of an orphan of one resource type.
///
/// Registered by [`Store::resource`], [`Store::import`], [`Store::destroy`]
/// and [`Store::register`].
struct OrphanDeleter<P> {
    make_step: Box<dyn Fn(PathBuf, String) -> StepFn<P>>,
}

/// A single planned action for a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedAction {
    pub id: String,
    pub action: Action,
    /// `std::any::type_name` of the resource, if known.
    pub type_name: Option<String>,
    /// Stored but no longer declared.
    pub is_orphan: bool,
}

/// The outcome of [`Store::plan`], to be run by [`Store::apply`].
pub struct Plan<Provider> {
    /// In the order they will be applied.
    pub actions: Vec<PlannedAction>,
    /// Orphans that will be left alone, because their type is unknown.
    pub warnings: Vec<String>,
    steps: Vec<Step<Provider>>,
}

impl<Provider> Plan<Provider> {
    /// Whether applying this plan is expected to change the platform.
    ///
    /// Reads only touch the platform to undo drift, so a plan of reads has
    /// no changes.
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action != Action::Read)
    }
}

impl<Provider> core::fmt::Display for Plan<Provider> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            f.write_str("No changes.\n")?;
        }
        for action in &self.actions {
            let ty = action.type_name.as_deref().unwrap_or("unknown");
            let orphan = if action.is_orphan { " (orphan)" } else { "" };
            writeln!(f, "  {} '{}' [{ty}]{orphan}", action.action, action.id)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  WARNING: {warning}")?;
        }
        Ok(())
    }
}

/// Declared resources and their stored states, in one directory.
pub struct Store<P> {
    path: PathBuf,
    provider: P,
    declared_ids: HashSet<String>,
    steps: Vec<Step<P>>,
    actions: Vec<PlannedAction>,
    deleters: HashMap<String, OrphanDeleter<P>>,
}

impl<P: 'static> Store<P> {
    pub fn new(path: impl AsRef<Path>, provider: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            provider,
            declared_ids: Default::default(),
            steps: Default::default(),
            actions: Default::default(),
            deleters: Default::default(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Makes orphans of type `T` deletable.
    ///
    /// Types used through [`Store::resource`], [`Store::import`] or
    /// [`Store::destroy`] are registered already. This is for types whose
    /// resources may all have been removed from the declaration.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Resource<Provider = P>,
    {
        let type_name = std::any::type_name::<T>();
        if !self.deleters.contains_key(type_name) {
            log::trace!("registering {type_name}");
            let make_step = |dir: PathBuf, id: String| {
                step::<P, _>(move |provider| {
                    Box::pin(async move {
                        let (local, remote) = StoreFile::read(&dir, &id)?.decode::<T>()?;
                        log::info!("destroy orphan '{id}':");
                        let run = Run {
                            provider,
                            dir,
                            id,
                            local,
                        };
                        run.destroy(&run.local, &remote).await
                    })
                })
            };
            self.deleters.insert(
                type_name.to_owned(),
                OrphanDeleter {
                    make_step: Box::new(make_step),
                },
            );
        }
        self
    }

    fn declare(&mut self, id: &str) -> Result<()> {
        ensure!(
            self.declared_ids.insert(id.to_owned()),
            DuplicateResourceSnafu { id }
        );
        Ok(())
    }

    fn push_step<T: Resource>(&mut self, id: &str, action: Action, run: StepFn<P>) {
        log::debug!("scheduling {action} '{id}'");
        self.steps.push(Step {
            id: id.to_owned(),
            run,
        });
        self.actions.push(PlannedAction {
            id: id.to_owned(),
            action,
            type_name: Some(std::any::type_name::<T>().to_owned()),
            is_orphan: false,
        });
    }

    fn schedule<T>(&mut self, id: &str, action: Action, local: T, stored: Option<(T, T::Output)>)
    where
        T: Resource<Provider = P>,
    {
        let dir = self.path.clone();
        let resource_id = id.to_owned();
        let run = step::<P, _>(move |provider| {
            let run = Run {
                provider,
                dir,
                id: resource_id,
                local,
            };
            Box::pin(run.perform(action, stored))
        });
        self.push_step::<T>(id, action, run);
    }

    /// Compares the declaration with the store file, if there is one.
    fn determine_action<T>(&self, local: &T, id: &str) -> Result<(Action, Option<(T, T::Output)>)>
    where
        T: Resource<Provider = P>,
    {
        let stored = match StoreFile::read(&self.path, id) {
            Ok(file) => file.decode::<T>()?,
            Err(Error::MissingStoreFile { .. }) => {
                log::debug!("  '{id}' is not stored yet");
                return Ok((Action::Create, None));
            }
            Err(e) => {
                log::error!("cannot load '{id}': {e}");
                return Err(e);
            }
        };
        let (stored_local, _) = &stored;
        let action = if local == stored_local {
            Action::Read
        } else if local.requires_replacement(stored_local) {
            log::debug!("  '{id}' changed a field that cannot be updated in place");
            Action::Replace
        } else {
            log::debug!("  '{id}' changed");
            Action::Update
        };
        Ok((action, Some(stored)))
    }

    /// Declares a resource and schedules what brings the platform to it:
    /// a create when nothing is stored, a refresh when the declaration is
    /// unchanged, otherwise an update or a replacement.
    ///
    /// Returns the action that was scheduled.
    pub fn resource<T>(&mut self, id: impl AsRef<str>, local_definition: T) -> Result<Action>
    where
        T: Resource<Provider = P>,
    {
        let id = id.as_ref();
        self.register::<T>();
        let (action, stored) = self.determine_action(&local_definition, id)?;
        self.declare(id)?;
        self.schedule(id, action, local_definition, stored);
        Ok(action)
    }

    /// Declares a resource that already exists on the platform as
    /// `remote_id`, adopting it into the store on apply.
    ///
    /// Once stored, the resource is handled exactly like one declared with
    /// [`Store::resource`] and `remote_id` is ignored.
    pub fn import<T>(
        &mut self,
        id: impl AsRef<str>,
        local_definition: T,
        remote_id: impl Into<String>,
    ) -> Result<Action>
    where
        T: Import<Provider = P>,
    {
        let id = id.as_ref();
        if store_file_path(&self.path, id).exists() {
            log::debug!("'{id}' is already stored, the import id is not used");
            return self.resource(id, local_definition);
        }
        self.register::<T>();
        self.declare(id)?;
        let dir = self.path.clone();
        let resource_id = id.to_owned();
        let remote_id = remote_id.into();
        let run = step::<P, _>(move |provider| {
            Box::pin(async move {
                log::info!("import '{resource_id}' from '{remote_id}':");
                let run = Run {
                    provider,
                    dir,
                    id: resource_id,
                    local: local_definition,
                };
                run.import(&remote_id).await
            })
        });
        self.push_step::<T>(id, Action::Import, run);
        Ok(Action::Import)
    }

    /// Schedules the deletion of a stored resource.
    ///
    /// Returns its stored declaration.
    pub fn destroy<T>(&mut self, id: impl AsRef<str>) -> Result<T>
    where
        T: Resource<Provider = P>,
    {
        self.register::<T>();
        let id = id.as_ref();
        let (local, remote) = StoreFile::read(&self.path, id)?.decode::<T>()?;
        self.declare(id)?;
        self.schedule(id, Action::Destroy, local.clone(), Some((local.clone(), remote)));
        Ok(local)
    }

    /// Store files that nothing declared in this run, sorted by id.
    fn undeclared(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let mut ids = vec![];
        let entries = std::fs::read_dir(&self.path).context(ScanStoreDirSnafu { path: &self.path })?;
        for entry in entries {
            let path = entry.context(ScanStoreDirSnafu { path: &self.path })?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                if !self.declared_ids.contains(id) {
                    ids.push(id.to_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Collects the scheduled actions into a [`Plan`].
    ///
    /// Store files that were not declared are orphans. Orphans of a
    /// registered type are deleted first, the others only produce a
    /// warning. Declaring starts over after this.
    pub fn plan(&mut self) -> Result<Plan<P>> {
        let mut actions = vec![];
        let mut steps = vec![];
        let mut warnings = vec![];

        for id in self.undeclared()? {
            let type_name = StoreFile::read(&self.path, &id)?.type_name;
            match type_name.as_ref().and_then(|ty| self.deleters.get(ty)) {
                Some(deleter) => {
                    log::info!("'{id}' is no longer declared, it will be deleted");
                    steps.push(Step {
                        id: id.clone(),
                        run: (deleter.make_step)(self.path.clone(), id.clone()),
                    });
                    actions.push(PlannedAction {
                        id,
                        action: Action::Destroy,
                        type_name,
                        is_orphan: true,
                    });
                }
                None => {
                    let msg = match type_name {
                        Some(ty) => format!(
                            "Orphaned resource '{id}' of unknown type {ty} is left in place, \
                            register it with `store.register::<{ty}>()` to delete it."
                        ),
                        None => format!(
                            "Orphaned resource '{id}' is left in place, its store file does \
                            not name a type."
                        ),
                    };
                    log::warn!("{msg}");
                    warnings.push(msg);
                }
            }
        }

        actions.append(&mut self.actions);
        steps.append(&mut self.steps);
        self.declared_ids.clear();
        Ok(Plan {
            actions,
            warnings,
            steps,
        })
    }

    /// Runs a plan from [`Store::plan`], one action at a time.
    ///
    /// Stops at the first failure. Actions before it stay applied.
    pub async fn apply(&mut self, plan: Plan<P>) -> Result<()> {
        let total = plan.steps.len();
        for (i, step) in plan.steps.into_iter().enumerate() {
            log::debug!("step {}/{total}: '{}'", i + 1, step.id);
            if let Err(e) = (step.run)(&self.provider).await {
                log::error!("'{}' failed after {i} of {total} actions", step.id);
                return Err(e);
            }
        }
        log::info!("applied {total} actions");
        Ok(())
    }
}
