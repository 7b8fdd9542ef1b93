//! OpenSearch domain access policies.
use anyhow::Context;

use super::{has_code, Aws};
use crate::{utils::JsonDocument, Resource};

/// The access policy of an existing OpenSearch domain.
///
/// The domain itself is not managed here. Deleting the resource resets the
/// domain's policy to empty.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DomainPolicy {
    /// Changing the domain replaces the resource.
    pub domain_name: String,
    pub access_policies: JsonDocument,
}

impl DomainPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.domain_name.len() < 3 || self.domain_name.len() > 28 {
            return Err("domain_name must be between 3 and 28 characters".into());
        }
        if !self.domain_name.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err("domain_name must start with a lowercase letter".into());
        }
        if !self
            .domain_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err("domain_name may only contain lowercase letters, digits and hyphens".into());
        }
        if !self.access_policies.0.is_object() {
            return Err("access_policies must be a JSON object".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DomainPolicyOutput {
    /// ARN of the domain.
    pub domain_arn: String,
    pub access_policies: JsonDocument,
}

struct DomainState {
    arn: String,
    policy: Option<String>,
    processing: bool,
}

async fn describe(aws: &Aws, domain_name: &str) -> anyhow::Result<Option<DomainState>> {
    let result = aws_sdk_opensearch::Client::new(aws.as_ref())
        .describe_domain()
        .domain_name(domain_name)
        .send()
        .await;
    let out = match result {
        Ok(out) => out,
        Err(err) if has_code(&err, &["ResourceNotFoundException"]) => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("could not describe domain {domain_name}"))
        }
    };
    let status = out
        .domain_status()
        .with_context(|| format!("no status for domain {domain_name}"))?;
    Ok(Some(DomainState {
        arn: status.arn().to_owned(),
        policy: status
            .access_policies()
            .filter(|p| !p.is_empty())
            .map(str::to_owned),
        processing: status.processing().unwrap_or_default(),
    }))
}

async fn settled(aws: &Aws, domain_name: &str) -> anyhow::Result<bool> {
    Ok(describe(aws, domain_name)
        .await?
        .map_or(true, |state| !state.processing))
}

/// Sets the domain's policy and waits for the domain to finish processing.
async fn upsert(aws: &Aws, domain_name: &str, policy: String) -> anyhow::Result<()> {
    aws_sdk_opensearch::Client::new(aws.as_ref())
        .update_domain_config()
        .domain_name(domain_name)
        .access_policies(policy)
        .send()
        .await
        .with_context(|| format!("could not update access policies of domain {domain_name}"))?;
    crate::utils::wait_until(
        &format!("domain {domain_name} config update"),
        aws.wait_settings(),
        || settled(aws, domain_name),
    )
    .await
}

async fn put_policy(aws: &Aws, policy: &DomainPolicy) -> anyhow::Result<DomainPolicyOutput> {
    upsert(aws, &policy.domain_name, policy.access_policies.to_json_string()).await?;
    let state = describe(aws, &policy.domain_name)
        .await?
        .with_context(|| format!("domain {} does not exist", policy.domain_name))?;
    Ok(DomainPolicyOutput {
        domain_arn: state.arn,
        access_policies: policy.access_policies.clone(),
    })
}

impl Resource for DomainPolicy {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = DomainPolicyOutput;

    fn requires_replacement(&self, previous_local: &Self) -> bool {
        self.domain_name != previous_local.domain_name
    }

    fn in_sync(&self, remote: &DomainPolicyOutput) -> bool {
        self.access_policies == remote.access_policies
    }

    async fn create(&self, aws: &Aws) -> anyhow::Result<DomainPolicyOutput> {
        put_policy(aws, self).await
    }

    async fn read(
        &self,
        aws: &Aws,
        _previous_remote: &DomainPolicyOutput,
    ) -> anyhow::Result<Option<DomainPolicyOutput>> {
        let Some(state) = describe(aws, &self.domain_name).await? else {
            return Ok(None);
        };
        let Some(policy) = state.policy else {
            return Ok(None);
        };
        let access_policies = JsonDocument::parse(&policy).with_context(|| {
            format!("domain {} has an unparsable access policy", self.domain_name)
        })?;
        Ok(Some(DomainPolicyOutput {
            domain_arn: state.arn,
            access_policies,
        }))
    }

    async fn update(
        &self,
        aws: &Aws,
        _previous_local: &Self,
        _previous_remote: &DomainPolicyOutput,
    ) -> anyhow::Result<DomainPolicyOutput> {
        put_policy(aws, self).await
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &DomainPolicyOutput) -> anyhow::Result<()> {
        if describe(aws, &self.domain_name).await?.is_none() {
            log::warn!("  domain {} is already gone", self.domain_name);
            return Ok(());
        }
        upsert(aws, &self.domain_name, String::new()).await
    }
}
