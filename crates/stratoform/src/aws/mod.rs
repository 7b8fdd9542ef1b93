//! Stratoform for AWS.
use anyhow::Context;
use aws_sdk_sts::error::ProvideErrorMetadata;

pub use aws_config::SdkConfig;

use crate::{
    batch::BatchSize,
    tags::{self, Tags},
    token::{RetryPolicy, TokenRetryer},
    utils::WaitSettings,
    Store,
};

pub mod apigateway;
pub mod iam;
pub mod opensearch;
pub mod sagemaker;
pub mod transfer;
pub mod waf;

/// Provider settings, as found in the `[provider]` table of a stack file.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProviderSettings {
    /// Region to operate in. Falls back to the environment when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    #[serde(default)]
    pub profile: Option<String>,
    /// Tags applied to every taggable resource, below its own tags.
    #[serde(default)]
    pub default_tags: Tags,
    /// Retry policy for change-token calls.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Polling for resources that take a while to settle.
    #[serde(default)]
    pub wait: WaitSettings,
    /// Maximum number of updates sent in one WAF IP set update call.
    #[serde(default = "default_waf_batch_size")]
    pub waf_batch_size: BatchSize,
}

fn default_waf_batch_size() -> BatchSize {
    waf::ip_set_updates_limit()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            default_tags: Tags::default(),
            retry: RetryPolicy::default(),
            wait: WaitSettings::default(),
            waf_batch_size: default_waf_batch_size(),
        }
    }
}

/// The AWS provider.
///
/// Passed into every resource lifecycle call. Holds the SDK configuration
/// along with everything resources need to know about the account they run
/// in.
pub struct Aws {
    config: SdkConfig,
    region: String,
    partition: String,
    account_id: String,
    default_tags: Tags,
    wait: WaitSettings,
    waf_batch_size: BatchSize,
    waf_retryer: TokenRetryer,
}

impl AsRef<SdkConfig> for Aws {
    fn as_ref(&self) -> &SdkConfig {
        &self.config
    }
}

impl Aws {
    /// Loads credentials and region from the environment, then looks up the
    /// caller's account and partition with STS.
    pub async fn load(settings: &ProviderSettings) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .context("no AWS region configured")?;

        let identity = aws_sdk_sts::Client::new(&config)
            .get_caller_identity()
            .send()
            .await
            .context("could not get AWS caller identity, check credentials")?;
        let account_id = identity
            .account()
            .context("no account ID returned from STS GetCallerIdentity")?
            .to_owned();
        let partition = identity
            .arn()
            .and_then(partition_from_arn)
            .unwrap_or("aws")
            .to_owned();
        log::info!("using AWS account {account_id} in {partition}/{region}");

        Ok(Self::new(config, region, partition, account_id, settings))
    }

    pub fn new(
        config: SdkConfig,
        region: impl Into<String>,
        partition: impl Into<String>,
        account_id: impl Into<String>,
        settings: &ProviderSettings,
    ) -> Self {
        Self {
            config,
            region: region.into(),
            partition: partition.into(),
            account_id: account_id.into(),
            default_tags: settings.default_tags.clone(),
            wait: settings.wait,
            waf_batch_size: settings.waf_batch_size,
            waf_retryer: TokenRetryer::new(settings.retry),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn wait_settings(&self) -> WaitSettings {
        self.wait
    }

    pub fn waf_batch_size(&self) -> BatchSize {
        self.waf_batch_size
    }

    /// The retryer that all WAF mutations in this process go through.
    pub fn waf_retryer(&self) -> &TokenRetryer {
        &self.waf_retryer
    }

    /// A resource's tags layered over the provider's default tags.
    pub fn tags_for(&self, tags: &Tags) -> Tags {
        tags::merge(&self.default_tags, tags)
    }

    /// Builds an ARN in this provider's partition and account.
    ///
    /// Global services pass `regional = false` to leave the region empty.
    pub fn arn(&self, service: &str, regional: bool, resource: &str) -> String {
        arn(
            &self.partition,
            service,
            if regional { &self.region } else { "" },
            &self.account_id,
            resource,
        )
    }
}

pub fn arn(partition: &str, service: &str, region: &str, account: &str, resource: &str) -> String {
    format!("arn:{partition}:{service}:{region}:{account}:{resource}")
}

fn partition_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(1).filter(|p| !p.is_empty())
}

/// Whether an SDK error carries one of the given service error codes.
pub(crate) fn has_code<E: ProvideErrorMetadata>(err: &E, codes: &[&str]) -> bool {
    err.code().is_some_and(|code| codes.contains(&code))
}

/// Whether an SDK error carries the given code and its message contains
/// `needle`.
pub(crate) fn has_code_and_message<E: ProvideErrorMetadata>(
    err: &E,
    code: &str,
    needle: &str,
) -> bool {
    err.code() == Some(code) && err.message().is_some_and(|m| m.contains(needle))
}

/// Registers every AWS resource type for orphan auto-deletion.
pub fn register_all(store: &mut Store<Aws>) {
    store
        .register::<waf::IpSet>()
        .register::<apigateway::UsagePlan>()
        .register::<iam::VirtualMfaDevice>()
        .register::<opensearch::DomainPolicy>()
        .register::<sagemaker::App>()
        .register::<transfer::User>();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arns() {
        assert_eq!(
            "arn:aws:waf::123456789012:ipset/abc",
            arn("aws", "waf", "", "123456789012", "ipset/abc")
        );
        assert_eq!(
            Some("aws-us-gov"),
            partition_from_arn("arn:aws-us-gov:sts::123456789012:assumed-role/dev/me")
        );
        assert_eq!(None, partition_from_arn("nonsense"));
    }

    #[test]
    fn provider_settings_defaults() {
        let settings: ProviderSettings = toml::from_str("region = \"eu-west-1\"").unwrap();
        assert_eq!(Some("eu-west-1".to_owned()), settings.region);
        assert_eq!(1000, settings.waf_batch_size.get());
        assert_eq!(RetryPolicy::default(), settings.retry);
    }
}
