//! WAF Classic IP sets.
//!
//! Every WAF Classic mutation carries a change token and at most
//! [`IP_SET_UPDATES_LIMIT`] updates, so descriptor changes are diffed into
//! bounded batches and each batch goes through the provider's
//! [`TokenRetryer`].
use std::{collections::HashSet, future::Future};

use anyhow::Context;
use aws_sdk_waf::error::ProvideErrorMetadata;
use snafu::Snafu;

use super::Aws;
use crate::{
    batch::{BatchPlan, BatchSize, Operation},
    token::{ChangeTokenSource, StaleToken, TokenRetryer},
    Import, Resource,
};

/// Maximum number of updates WAF accepts in one `UpdateIPSet` call.
pub const IP_SET_UPDATES_LIMIT: usize = 1000;

pub(crate) fn ip_set_updates_limit() -> BatchSize {
    BatchSize::new(IP_SET_UPDATES_LIMIT).unwrap_or(BatchSize::MIN)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DescriptorType {
    #[serde(rename = "IPV4")]
    Ipv4,
    #[serde(rename = "IPV6")]
    Ipv6,
}

impl DescriptorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorType::Ipv4 => "IPV4",
            DescriptorType::Ipv6 => "IPV6",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IPV4" => Some(DescriptorType::Ipv4),
            "IPV6" => Some(DescriptorType::Ipv6),
            _ => None,
        }
    }
}

/// One IP range in an IP set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IpSetDescriptor {
    #[serde(rename = "type")]
    pub kind: DescriptorType,
    /// A CIDR block, like `192.0.2.0/24`.
    pub value: String,
}

impl IpSetDescriptor {
    pub fn ipv4(value: impl Into<String>) -> Self {
        Self {
            kind: DescriptorType::Ipv4,
            value: value.into(),
        }
    }

    pub fn ipv6(value: impl Into<String>) -> Self {
        Self {
            kind: DescriptorType::Ipv6,
            value: value.into(),
        }
    }

    /// Checks that `value` is a CIDR block of the descriptor's type.
    pub fn validate(&self) -> Result<(), String> {
        let (addr, prefix) = self
            .value
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in CIDR notation", self.value))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("'{}' has an invalid prefix length", self.value))?;
        let max_prefix = match self.kind {
            DescriptorType::Ipv4 => addr
                .parse::<std::net::Ipv4Addr>()
                .map(|_| 32)
                .map_err(|_| format!("'{}' is not an IPV4 CIDR block", self.value))?,
            DescriptorType::Ipv6 => addr
                .parse::<std::net::Ipv6Addr>()
                .map(|_| 128)
                .map_err(|_| format!("'{}' is not an IPV6 CIDR block", self.value))?,
        };
        if prefix > max_prefix {
            return Err(format!(
                "'{}' has a prefix length greater than {max_prefix}",
                self.value
            ));
        }
        Ok(())
    }
}

/// AWS WAF Classic IP set resource.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IpSet {
    pub name: String,
    #[serde(default)]
    pub descriptors: Vec<IpSetDescriptor>,
}

impl IpSet {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.name.len() > 128 {
            return Err("name must be between 1 and 128 characters".into());
        }
        let mut seen = HashSet::new();
        for descriptor in &self.descriptors {
            descriptor.validate()?;
            if !seen.insert(descriptor) {
                return Err(format!(
                    "{} {} is listed more than once",
                    descriptor.kind.as_str(),
                    descriptor.value
                ));
            }
        }
        Ok(())
    }
}

/// An IP set as WAF reports it.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteIpSet {
    pub id: String,
    pub name: String,
    pub descriptors: Vec<IpSetDescriptor>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IpSetOutput {
    pub id: String,
    pub arn: String,
    pub descriptors: Vec<IpSetDescriptor>,
}

#[derive(Debug, Snafu)]
pub enum WafError {
    #[snafu(display("WAF change token is stale: {message}"))]
    StaleData { message: String },

    #[snafu(display("WAF IP set '{id}' does not exist"))]
    NonexistentItem { id: String },

    #[snafu(display("WAF {operation} returned no {field}"))]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[snafu(display("WAF reported IP set descriptor type '{kind}', expected IPV4 or IPV6"))]
    UnknownDescriptorType { kind: String },

    #[snafu(display("Could not build WAF {what}: {source}"))]
    Build {
        what: &'static str,
        source: aws_sdk_waf::error::BuildError,
    },

    #[snafu(display("WAF {operation} failed: {source}"))]
    Sdk {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StaleToken for WafError {
    fn is_stale_token(&self) -> bool {
        matches!(self, WafError::StaleData { .. })
    }
}

fn sdk_error<E>(operation: &'static str, id: &str, err: E) -> WafError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_owned);
    match code.as_deref() {
        Some("WAFStaleDataException") => WafError::StaleData {
            message: err.message().unwrap_or_default().to_owned(),
        },
        Some("WAFNonexistentItemException") => WafError::NonexistentItem { id: id.to_owned() },
        _ => WafError::Sdk {
            operation,
            source: Box::new(err),
        },
    }
}

/// The subset of the WAF API that IP sets need.
pub trait WafApi: ChangeTokenSource<Error = WafError> {
    /// Creates an empty IP set, returning its id.
    fn create_ip_set(
        &self,
        change_token: &str,
        name: &str,
    ) -> impl Future<Output = Result<String, WafError>>;

    /// Resolves to `None` if there is no IP set with this id.
    fn get_ip_set(&self, id: &str) -> impl Future<Output = Result<Option<RemoteIpSet>, WafError>>;

    fn update_ip_set(
        &self,
        change_token: &str,
        id: &str,
        updates: &[Operation<IpSetDescriptor>],
    ) -> impl Future<Output = Result<(), WafError>>;

    fn delete_ip_set(
        &self,
        change_token: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), WafError>>;
}

/// [`WafApi`] over the AWS SDK.
pub struct WafClient {
    client: aws_sdk_waf::Client,
}

impl WafClient {
    pub fn new(cfg: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_waf::Client::new(cfg),
        }
    }
}

impl ChangeTokenSource for WafClient {
    type Error = WafError;

    async fn change_token(&self) -> Result<String, WafError> {
        let out = self
            .client
            .get_change_token()
            .send()
            .await
            .map_err(|e| sdk_error("GetChangeToken", "", e))?;
        out.change_token()
            .map(str::to_owned)
            .ok_or(WafError::MissingField {
                operation: "GetChangeToken",
                field: "change token",
            })
    }
}

fn to_sdk_update(
    op: &Operation<IpSetDescriptor>,
) -> Result<aws_sdk_waf::types::IpSetUpdate, WafError> {
    use aws_sdk_waf::types::{ChangeAction, IpSetDescriptorType};

    let descriptor = op.record();
    let sdk_descriptor = aws_sdk_waf::types::IpSetDescriptor::builder()
        .r#type(IpSetDescriptorType::from(descriptor.kind.as_str()))
        .value(&descriptor.value)
        .build()
        .map_err(|source| WafError::Build {
            what: "IP set descriptor",
            source,
        })?;
    aws_sdk_waf::types::IpSetUpdate::builder()
        .action(match op {
            Operation::Delete(_) => ChangeAction::Delete,
            Operation::Insert(_) => ChangeAction::Insert,
        })
        .ip_set_descriptor(sdk_descriptor)
        .build()
        .map_err(|source| WafError::Build {
            what: "IP set update",
            source,
        })
}

fn from_sdk_ip_set(ip_set: &aws_sdk_waf::types::IpSet) -> Result<RemoteIpSet, WafError> {
    let descriptors = ip_set
        .ip_set_descriptors()
        .iter()
        .map(|d| -> Result<IpSetDescriptor, WafError> {
            let kind = d.r#type().as_str();
            Ok(IpSetDescriptor {
                kind: DescriptorType::parse(kind).ok_or_else(|| WafError::UnknownDescriptorType {
                    kind: kind.to_owned(),
                })?,
                value: d.value().to_owned(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RemoteIpSet {
        id: ip_set.ip_set_id().to_owned(),
        name: ip_set.name().unwrap_or_default().to_owned(),
        descriptors,
    })
}

impl WafApi for WafClient {
    async fn create_ip_set(&self, change_token: &str, name: &str) -> Result<String, WafError> {
        let out = self
            .client
            .create_ip_set()
            .name(name)
            .change_token(change_token)
            .send()
            .await
            .map_err(|e| sdk_error("CreateIPSet", name, e))?;
        let ip_set = out.ip_set().ok_or(WafError::MissingField {
            operation: "CreateIPSet",
            field: "IP set",
        })?;
        Ok(ip_set.ip_set_id().to_owned())
    }

    async fn get_ip_set(&self, id: &str) -> Result<Option<RemoteIpSet>, WafError> {
        match self.client.get_ip_set().ip_set_id(id).send().await {
            Ok(out) => out.ip_set().map(from_sdk_ip_set).transpose(),
            Err(e) => match sdk_error("GetIPSet", id, e) {
                WafError::NonexistentItem { .. } => Ok(None),
                err => Err(err),
            },
        }
    }

    async fn update_ip_set(
        &self,
        change_token: &str,
        id: &str,
        updates: &[Operation<IpSetDescriptor>],
    ) -> Result<(), WafError> {
        let updates = updates
            .iter()
            .map(to_sdk_update)
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .update_ip_set()
            .ip_set_id(id)
            .change_token(change_token)
            .set_updates(Some(updates))
            .send()
            .await
            .map_err(|e| sdk_error("UpdateIPSet", id, e))?;
        Ok(())
    }

    async fn delete_ip_set(&self, change_token: &str, id: &str) -> Result<(), WafError> {
        self.client
            .delete_ip_set()
            .ip_set_id(id)
            .change_token(change_token)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteIPSet", id, e))?;
        Ok(())
    }
}

/// Applies the descriptor changes from `old` to `new`, one batch per call.
///
/// Batches already applied when a later one fails stay applied.
pub async fn update_descriptors<A: WafApi>(
    api: &A,
    retryer: &TokenRetryer,
    batch_size: BatchSize,
    id: &str,
    old: &[IpSetDescriptor],
    new: &[IpSetDescriptor],
) -> anyhow::Result<()> {
    let plan = BatchPlan::diff(old.iter().cloned(), new.iter().cloned(), batch_size);
    if plan.is_empty() {
        log::debug!("  IP set {id} descriptors are unchanged");
        return Ok(());
    }
    log::info!(
        "  updating IP set {id}: {} updates in {} batches",
        plan.operation_count(),
        plan.len()
    );
    plan.apply(|index, batch| async move {
        log::debug!("  IP set {id} batch {}: {} updates", index + 1, batch.len());
        retryer
            .retry_with_token(api, move |token| async move {
                api.update_ip_set(&token, id, batch).await
            })
            .await
    })
    .await
    .with_context(|| format!("could not update descriptors of IP set {id}"))?;
    Ok(())
}

/// Creates the IP set and fills in its descriptors, returning its id.
pub async fn create_ip_set<A: WafApi>(
    api: &A,
    retryer: &TokenRetryer,
    batch_size: BatchSize,
    ip_set: &IpSet,
) -> anyhow::Result<String> {
    let name = ip_set.name.as_str();
    let id = retryer
        .retry_with_token(api, |token| async move { api.create_ip_set(&token, name).await })
        .await
        .with_context(|| format!("could not create IP set '{name}'"))?;
    log::info!("  created IP set '{name}' with id {id}");
    update_descriptors(api, retryer, batch_size, &id, &[], &ip_set.descriptors).await?;
    Ok(id)
}

/// Empties the IP set, then deletes it. An IP set that is already gone is
/// not an error.
pub async fn delete_ip_set<A: WafApi>(
    api: &A,
    retryer: &TokenRetryer,
    batch_size: BatchSize,
    id: &str,
) -> anyhow::Result<()> {
    let Some(remote) = api.get_ip_set(id).await? else {
        log::warn!("  IP set {id} is already gone");
        return Ok(());
    };
    update_descriptors(api, retryer, batch_size, id, &remote.descriptors, &[]).await?;
    let deleted = retryer
        .retry_with_token(api, |token| async move { api.delete_ip_set(&token, id).await })
        .await;
    match deleted {
        Ok(()) => Ok(()),
        Err(err) if matches!(err.inner(), WafError::NonexistentItem { .. }) => Ok(()),
        Err(err) => Err(err).with_context(|| format!("could not delete IP set {id}")),
    }
}

impl Resource for IpSet {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = IpSetOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<IpSetOutput> {
        let api = WafClient::new(aws.as_ref());
        let id = create_ip_set(&api, aws.waf_retryer(), aws.waf_batch_size(), self).await?;
        Ok(IpSetOutput {
            arn: aws.arn("waf", false, &format!("ipset/{id}")),
            id,
            descriptors: self.descriptors.clone(),
        })
    }

    async fn read(
        &self,
        aws: &Aws,
        previous_remote: &IpSetOutput,
    ) -> anyhow::Result<Option<IpSetOutput>> {
        let api = WafClient::new(aws.as_ref());
        let remote = api.get_ip_set(&previous_remote.id).await?;
        Ok(remote.map(|remote| IpSetOutput {
            id: remote.id,
            arn: previous_remote.arn.clone(),
            descriptors: remote.descriptors,
        }))
    }

    async fn update(
        &self,
        aws: &Aws,
        _previous_local: &Self,
        previous_remote: &IpSetOutput,
    ) -> anyhow::Result<IpSetOutput> {
        let api = WafClient::new(aws.as_ref());
        update_descriptors(
            &api,
            aws.waf_retryer(),
            aws.waf_batch_size(),
            &previous_remote.id,
            &previous_remote.descriptors,
            &self.descriptors,
        )
        .await?;
        Ok(IpSetOutput {
            descriptors: self.descriptors.clone(),
            ..previous_remote.clone()
        })
    }

    async fn delete(&self, aws: &Aws, previous_remote: &IpSetOutput) -> anyhow::Result<()> {
        let api = WafClient::new(aws.as_ref());
        delete_ip_set(
            &api,
            aws.waf_retryer(),
            aws.waf_batch_size(),
            &previous_remote.id,
        )
        .await
    }

    fn requires_replacement(&self, previous_local: &Self) -> bool {
        self.name != previous_local.name
    }

    /// Descriptors form a set, so order does not matter.
    fn in_sync(&self, remote: &IpSetOutput) -> bool {
        self.descriptors.iter().collect::<HashSet<_>>()
            == remote.descriptors.iter().collect::<HashSet<_>>()
    }
}

impl Import for IpSet {
    async fn import(&self, aws: &Aws, ip_set_id: &str) -> anyhow::Result<Option<IpSetOutput>> {
        let api = WafClient::new(aws.as_ref());
        let Some(remote) = api.get_ip_set(ip_set_id).await? else {
            return Ok(None);
        };
        if remote.name != self.name {
            log::warn!(
                "  IP set {ip_set_id} is named '{}', not '{}'",
                remote.name,
                self.name
            );
        }
        Ok(Some(IpSetOutput {
            arn: aws.arn("waf", false, &format!("ipset/{}", remote.id)),
            id: remote.id,
            descriptors: remote.descriptors,
        }))
    }
}
