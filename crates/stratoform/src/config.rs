//! Stack files.
//!
//! A stack file is TOML. It holds a `[provider]` table of
//! [`ProviderSettings`] and any number of `[[resource]]` tables, each with a
//! unique `id`, a `type` and the fields of that resource type:
//!
//! ```toml
//! [provider]
//! region = "us-east-1"
//! default_tags = { team = "net" }
//!
//! [[resource]]
//! id = "office-ips"
//! type = "waf_ip_set"
//! name = "office"
//! descriptors = [{ type = "IPV4", value = "10.0.0.0/8" }]
//!
//! [[resource]]
//! id = "partner-plan"
//! type = "api_gateway_usage_plan"
//! import = "a1b2c3"
//! name = "partner"
//! ```
//!
//! A resource with an `import` id that has no stored state yet is adopted
//! from the platform instead of being created.
use std::collections::HashSet;

use snafu::prelude::*;

use crate::{
    aws::{
        apigateway::UsagePlan,
        iam::VirtualMfaDevice,
        opensearch::DomainPolicy,
        sagemaker::App,
        transfer::User,
        waf::{IpSet, IP_SET_UPDATES_LIMIT},
        Aws, ProviderSettings,
    },
    Action, BatchSizeTooLargeSnafu, ConfigParseSnafu, ConfigReadSnafu, DuplicateResourceSnafu,
    Error, Import, InvalidResourceSnafu, Resource, Store,
};

/// One of the supported resource types, tagged by `type`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceConfig {
    WafIpSet(IpSet),
    ApiGatewayUsagePlan(UsagePlan),
    IamVirtualMfaDevice(VirtualMfaDevice),
    OpensearchDomainPolicy(DomainPolicy),
    SagemakerApp(App),
    TransferUser(User),
}

impl ResourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceConfig::WafIpSet(_) => "waf_ip_set",
            ResourceConfig::ApiGatewayUsagePlan(_) => "api_gateway_usage_plan",
            ResourceConfig::IamVirtualMfaDevice(_) => "iam_virtual_mfa_device",
            ResourceConfig::OpensearchDomainPolicy(_) => "opensearch_domain_policy",
            ResourceConfig::SagemakerApp(_) => "sagemaker_app",
            ResourceConfig::TransferUser(_) => "transfer_user",
        }
    }

    /// The platform id an existing resource of this type is imported by,
    /// if the type can be imported at all.
    pub fn import_id_kind(&self) -> Option<&'static str> {
        match self {
            ResourceConfig::WafIpSet(_) => Some("IP set id"),
            ResourceConfig::ApiGatewayUsagePlan(_) => Some("usage plan id"),
            ResourceConfig::IamVirtualMfaDevice(_) => Some("device ARN"),
            ResourceConfig::OpensearchDomainPolicy(_) => None,
            ResourceConfig::SagemakerApp(_) => Some("app ARN"),
            ResourceConfig::TransferUser(_) => Some("SERVER_ID/USER_NAME"),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ResourceConfig::WafIpSet(r) => r.validate(),
            ResourceConfig::ApiGatewayUsagePlan(r) => r.validate(),
            ResourceConfig::IamVirtualMfaDevice(r) => r.validate(),
            ResourceConfig::OpensearchDomainPolicy(r) => r.validate(),
            ResourceConfig::SagemakerApp(r) => r.validate(),
            ResourceConfig::TransferUser(r) => r.validate(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceEntry {
    /// Names the resource's store file, so it must be a valid file stem.
    pub id: String,
    /// Platform id of an existing resource to adopt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<String>,
    #[serde(flatten)]
    pub config: ResourceConfig,
}

impl ResourceEntry {
    fn validate(&self) -> Result<(), String> {
        validate_id(&self.id)?;
        if let Some(import) = &self.import {
            if self.config.import_id_kind().is_none() {
                return Err(format!("{} cannot be imported", self.config.type_name()));
            }
            if import.is_empty() {
                return Err("import id must not be empty".into());
            }
        }
        self.config.validate()
    }
}

fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("id must not be empty".into());
    }
    if id.starts_with('.') {
        return Err("id must not start with '.'".into());
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "-_.".contains(*c)))
    {
        return Err(format!("id may not contain '{c}'"));
    }
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub resource: Vec<ResourceEntry>,
}

impl StackConfig {
    /// Reads, parses and validates a stack file.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        log::debug!("reading stack file {path:?}");
        let contents = std::fs::read_to_string(path).context(ConfigReadSnafu { path })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a stack file's contents.
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        let config: StackConfig = toml::from_str(contents).context(ConfigParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.provider.retry.validate()?;
        let size = self.provider.waf_batch_size.get();
        ensure!(
            size <= IP_SET_UPDATES_LIMIT,
            BatchSizeTooLargeSnafu {
                size,
                limit: IP_SET_UPDATES_LIMIT,
            }
        );
        let mut seen = HashSet::new();
        for entry in &self.resource {
            ensure!(
                seen.insert(entry.id.as_str()),
                DuplicateResourceSnafu { id: &entry.id }
            );
            if let Err(reason) = entry.validate() {
                return InvalidResourceSnafu {
                    id: &entry.id,
                    reason,
                }
                .fail();
            }
        }
        Ok(())
    }

    /// Declares every configured resource in the store, in file order.
    ///
    /// Returns the action scheduled for each resource.
    pub fn declare(&self, store: &mut Store<Aws>) -> Result<Vec<(String, Action)>, Error> {
        let mut actions = vec![];
        for entry in &self.resource {
            let id = entry.id.as_str();
            let import = entry.import.as_deref();
            let action = match &entry.config {
                ResourceConfig::WafIpSet(r) => declare_importable(store, id, r, import)?,
                ResourceConfig::ApiGatewayUsagePlan(r) => declare_importable(store, id, r, import)?,
                ResourceConfig::IamVirtualMfaDevice(r) => declare_importable(store, id, r, import)?,
                ResourceConfig::OpensearchDomainPolicy(r) => declare_resource(store, id, r, import)?,
                ResourceConfig::SagemakerApp(r) => declare_importable(store, id, r, import)?,
                ResourceConfig::TransferUser(r) => declare_importable(store, id, r, import)?,
            };
            log::debug!("{} '{id}': {action}", entry.config.type_name());
            actions.push((entry.id.clone(), action));
        }
        Ok(actions)
    }
}

fn declare_importable<T: Import<Provider = Aws>>(
    store: &mut Store<Aws>,
    id: &str,
    resource: &T,
    import: Option<&str>,
) -> Result<Action, Error> {
    match import {
        Some(remote_id) => store.import(id, resource.clone(), remote_id),
        None => store.resource(id, resource.clone()),
    }
}

fn declare_resource<T: Resource<Provider = Aws>>(
    store: &mut Store<Aws>,
    id: &str,
    resource: &T,
    import: Option<&str>,
) -> Result<Action, Error> {
    ensure!(
        import.is_none(),
        InvalidResourceSnafu {
            id,
            reason: format!("{} cannot be imported", std::any::type_name::<T>()),
        }
    );
    store.resource(id, resource.clone())
}
