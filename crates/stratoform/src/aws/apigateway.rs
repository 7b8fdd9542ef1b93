//! API Gateway usage plans, and lookup of existing REST APIs.
use anyhow::Context;
use aws_sdk_apigateway::types as sdk;

use super::{has_code, Aws};
use crate::{
    tags::{self, Tags},
    Import, Resource,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuotaPeriod {
    Day,
    Week,
    Month,
}

impl QuotaPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaPeriod::Day => "DAY",
            QuotaPeriod::Week => "WEEK",
            QuotaPeriod::Month => "MONTH",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "DAY" => Some(QuotaPeriod::Day),
            "WEEK" => Some(QuotaPeriod::Week),
            "MONTH" => Some(QuotaPeriod::Month),
            _ => None,
        }
    }
}

/// The number of requests a client may make in a period.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuotaSettings {
    pub limit: i32,
    /// Requests subtracted from `limit` in the initial period.
    #[serde(default)]
    pub offset: i32,
    pub period: QuotaPeriod,
}

impl QuotaSettings {
    fn validate(&self) -> Result<(), String> {
        if self.limit < 0 {
            return Err("quota limit must not be negative".into());
        }
        match self.period {
            QuotaPeriod::Day if self.offset != 0 => {
                Err("quota offset must be zero in the DAY period".into())
            }
            QuotaPeriod::Week if !(0..=6).contains(&self.offset) => {
                Err("quota offset must be between 0 and 6 inclusive in the WEEK period".into())
            }
            QuotaPeriod::Month if !(0..=27).contains(&self.offset) => {
                Err("quota offset must be between 0 and 27 inclusive in the MONTH period".into())
            }
            _ => Ok(()),
        }
    }

    fn to_sdk(&self) -> sdk::QuotaSettings {
        sdk::QuotaSettings::builder()
            .limit(self.limit)
            .offset(self.offset)
            .period(sdk::QuotaPeriodType::from(self.period.as_str()))
            .build()
    }

    fn from_sdk(quota: &sdk::QuotaSettings) -> Option<Self> {
        Some(Self {
            limit: quota.limit(),
            offset: quota.offset(),
            period: QuotaPeriod::parse(quota.period()?.as_str())?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThrottleSettings {
    #[serde(default)]
    pub burst_limit: i32,
    #[serde(default)]
    pub rate_limit: f64,
}

impl ThrottleSettings {
    fn validate(&self) -> Result<(), String> {
        if self.burst_limit < 0 || self.rate_limit < 0.0 {
            return Err("throttle limits must not be negative".into());
        }
        Ok(())
    }

    fn to_sdk(&self) -> sdk::ThrottleSettings {
        sdk::ThrottleSettings::builder()
            .burst_limit(self.burst_limit)
            .rate_limit(self.rate_limit)
            .build()
    }

    fn from_sdk(throttle: &sdk::ThrottleSettings) -> Self {
        Self {
            burst_limit: throttle.burst_limit(),
            rate_limit: throttle.rate_limit(),
        }
    }
}

/// Throttling of one method of a stage, like `/pets/GET`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageThrottle {
    pub path: String,
    #[serde(default)]
    pub burst_limit: i32,
    #[serde(default)]
    pub rate_limit: f64,
}

/// A deployed API stage the plan applies to.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApiStage {
    pub api_id: String,
    pub stage: String,
    #[serde(default)]
    pub throttle: Vec<StageThrottle>,
}

impl ApiStage {
    /// How stages are addressed in patch paths.
    fn key(&self) -> String {
        format!("{}:{}", self.api_id, self.stage)
    }

    fn to_sdk(&self) -> sdk::ApiStage {
        let throttle = self
            .throttle
            .iter()
            .map(|t| {
                (
                    t.path.clone(),
                    ThrottleSettings {
                        burst_limit: t.burst_limit,
                        rate_limit: t.rate_limit,
                    }
                    .to_sdk(),
                )
            })
            .collect::<std::collections::HashMap<_, _>>();
        sdk::ApiStage::builder()
            .api_id(&self.api_id)
            .stage(&self.stage)
            .set_throttle((!throttle.is_empty()).then_some(throttle))
            .build()
    }

    fn from_sdk(stage: &sdk::ApiStage) -> Self {
        let mut throttle = stage
            .throttle()
            .map(|paths| {
                paths
                    .iter()
                    .map(|(path, t)| StageThrottle {
                        path: path.clone(),
                        burst_limit: t.burst_limit(),
                        rate_limit: t.rate_limit(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        throttle.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            api_id: stage.api_id().unwrap_or_default().to_owned(),
            stage: stage.stage().unwrap_or_default().to_owned(),
            throttle,
        }
    }
}

/// AWS API Gateway usage plan resource.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UsagePlan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub api_stages: Vec<ApiStage>,
    #[serde(default)]
    pub quota: Option<QuotaSettings>,
    #[serde(default)]
    pub throttle: Option<ThrottleSettings>,
    /// AWS Marketplace product identifier.
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

impl UsagePlan {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".into());
        }
        for stage in &self.api_stages {
            if stage.api_id.is_empty() || stage.stage.is_empty() {
                return Err("api stages need both an api_id and a stage".into());
            }
            if stage.throttle.iter().any(|t| t.path.is_empty()) {
                return Err(format!("stage {} has a throttle without a path", stage.key()));
            }
        }
        if let Some(quota) = &self.quota {
            quota.validate()?;
        }
        if let Some(throttle) = &self.throttle {
            throttle.validate()?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UsagePlanOutput {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub description: Option<String>,
    pub api_stages: Vec<ApiStage>,
    pub quota: Option<QuotaSettings>,
    pub throttle: Option<ThrottleSettings>,
    pub product_code: Option<String>,
    pub tags: Tags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One JSON-patch style operation of an `UpdateUsagePlan` call.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    pub value: Option<String>,
}

impl Patch {
    fn add(path: impl Into<String>, value: impl ToString) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value.to_string()),
        }
    }

    fn replace(path: impl Into<String>, value: impl ToString) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value.to_string()),
        }
    }

    fn remove(path: impl Into<String>, value: Option<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value,
        }
    }

    fn to_sdk(&self) -> sdk::PatchOperation {
        sdk::PatchOperation::builder()
            .op(match self.op {
                PatchOp::Add => sdk::Op::Add,
                PatchOp::Remove => sdk::Op::Remove,
                PatchOp::Replace => sdk::Op::Replace,
            })
            .path(&self.path)
            .set_value(self.value.clone())
            .build()
    }
}

fn throttle_patches(
    prefix: &str,
    previous: &Option<ThrottleSettings>,
    next: &Option<ThrottleSettings>,
) -> Vec<Patch> {
    match (previous, next) {
        (_, None) => vec![Patch::remove(prefix, None)],
        (Some(_), Some(t)) => vec![
            Patch::replace(format!("{prefix}/rateLimit"), t.rate_limit),
            Patch::replace(format!("{prefix}/burstLimit"), t.burst_limit),
        ],
        (None, Some(t)) => vec![
            Patch::add(format!("{prefix}/rateLimit"), t.rate_limit),
            Patch::add(format!("{prefix}/burstLimit"), t.burst_limit),
        ],
    }
}

fn quota_patches(previous: &Option<QuotaSettings>, next: &Option<QuotaSettings>) -> Vec<Patch> {
    match (previous, next) {
        (_, None) => vec![Patch::remove("/quota", None)],
        (Some(_), Some(q)) => vec![
            Patch::replace("/quota/limit", q.limit),
            Patch::replace("/quota/offset", q.offset),
            Patch::replace("/quota/period", q.period.as_str()),
        ],
        (None, Some(q)) => vec![
            Patch::add("/quota/limit", q.limit),
            Patch::add("/quota/offset", q.offset),
            Patch::add("/quota/period", q.period.as_str()),
        ],
    }
}

/// The patch operations that move a usage plan from `previous` to `next`.
///
/// Tags are not part of the patch, they have their own calls.
pub fn patch_operations(previous: &UsagePlan, next: &UsagePlan) -> Vec<Patch> {
    let mut ops = vec![];

    if previous.name != next.name {
        ops.push(Patch::replace("/name", &next.name));
    }
    if previous.description != next.description {
        ops.push(Patch::replace(
            "/description",
            next.description.as_deref().unwrap_or_default(),
        ));
    }
    if previous.product_code != next.product_code {
        ops.push(match &next.product_code {
            Some(code) => Patch::replace("/productCode", code),
            None => Patch::remove("/productCode", None),
        });
    }
    if previous.api_stages != next.api_stages {
        for stage in &previous.api_stages {
            ops.push(Patch::remove("/apiStages", Some(stage.key())));
        }
        for stage in &next.api_stages {
            let key = stage.key();
            ops.push(Patch::add("/apiStages", &key));
            for t in &stage.throttle {
                let prefix = format!("/apiStages/{key}/throttle/{}", t.path);
                ops.push(Patch::replace(format!("{prefix}/rateLimit"), t.rate_limit));
                ops.push(Patch::replace(format!("{prefix}/burstLimit"), t.burst_limit));
            }
        }
    }
    if previous.throttle != next.throttle {
        ops.extend(throttle_patches("/throttle", &previous.throttle, &next.throttle));
    }
    if previous.quota != next.quota {
        ops.extend(quota_patches(&previous.quota, &next.quota));
    }

    ops
}

/// API Gateway ARNs carry no account.
fn usage_plan_arn(aws: &Aws, id: &str) -> String {
    super::arn(
        aws.partition(),
        "apigateway",
        aws.region(),
        "",
        &format!("/usageplans/{id}"),
    )
}

async fn read_usage_plan(aws: &Aws, id: &str) -> anyhow::Result<Option<UsagePlanOutput>> {
    let client = aws_sdk_apigateway::Client::new(aws.as_ref());
    let out = match client.get_usage_plan().usage_plan_id(id).send().await {
        Ok(out) => out,
        Err(err) if has_code(&err, &["NotFoundException"]) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("could not read usage plan {id}")),
    };
    Ok(Some(UsagePlanOutput {
        id: id.to_owned(),
        arn: usage_plan_arn(aws, id),
        name: out.name().unwrap_or_default().to_owned(),
        description: out.description().map(str::to_owned),
        api_stages: out.api_stages().iter().map(ApiStage::from_sdk).collect(),
        quota: out.quota().and_then(QuotaSettings::from_sdk),
        throttle: out.throttle().map(ThrottleSettings::from_sdk),
        product_code: out.product_code().map(str::to_owned),
        tags: tags::without_system_tags(out.tags().cloned().unwrap_or_default()),
    }))
}

async fn apply_patch(aws: &Aws, id: &str, ops: &[Patch]) -> anyhow::Result<()> {
    if ops.is_empty() {
        return Ok(());
    }
    log::debug!("  patching usage plan {id}: {ops:#?}");
    aws_sdk_apigateway::Client::new(aws.as_ref())
        .update_usage_plan()
        .usage_plan_id(id)
        .set_patch_operations(Some(ops.iter().map(Patch::to_sdk).collect()))
        .send()
        .await
        .with_context(|| format!("could not update usage plan {id}"))?;
    Ok(())
}

async fn update_tags(aws: &Aws, arn: &str, old: &Tags, new: &Tags) -> anyhow::Result<()> {
    let changes = tags::diff(old, new);
    if changes.is_empty() {
        return Ok(());
    }
    let client = aws_sdk_apigateway::Client::new(aws.as_ref());
    if !changes.removed.is_empty() {
        client
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(changes.removed))
            .send()
            .await
            .context("could not untag usage plan")?;
    }
    if !changes.upserted.is_empty() {
        client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(changes.upserted.into_iter().collect()))
            .send()
            .await
            .context("could not tag usage plan")?;
    }
    Ok(())
}

impl Resource for UsagePlan {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = UsagePlanOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<UsagePlanOutput> {
        let client = aws_sdk_apigateway::Client::new(aws.as_ref());
        let tags = aws.tags_for(&self.tags);
        let out = client
            .create_usage_plan()
            .name(&self.name)
            .set_description(self.description.clone())
            .set_api_stages(Some(self.api_stages.iter().map(ApiStage::to_sdk).collect()))
            .set_quota(self.quota.as_ref().map(QuotaSettings::to_sdk))
            .set_throttle(self.throttle.as_ref().map(ThrottleSettings::to_sdk))
            .set_tags((!tags.is_empty()).then(|| tags.into_iter().collect()))
            .send()
            .await
            .with_context(|| format!("could not create usage plan '{}'", self.name))?;
        let id = out.id().context("missing usage plan id")?.to_owned();
        log::info!("  created usage plan {id}");

        if let Some(code) = &self.product_code {
            apply_patch(aws, &id, &[Patch::add("/productCode", code)]).await?;
        }

        read_usage_plan(aws, &id)
            .await?
            .context("usage plan is missing right after creation")
    }

    async fn read(
        &self,
        aws: &Aws,
        previous_remote: &UsagePlanOutput,
    ) -> anyhow::Result<Option<UsagePlanOutput>> {
        read_usage_plan(aws, &previous_remote.id).await
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &UsagePlanOutput,
    ) -> anyhow::Result<UsagePlanOutput> {
        let id = &previous_remote.id;
        apply_patch(aws, id, &patch_operations(previous_local, self)).await?;
        update_tags(
            aws,
            &previous_remote.arn,
            &previous_remote.tags,
            &aws.tags_for(&self.tags),
        )
        .await?;
        read_usage_plan(aws, id)
            .await?
            .with_context(|| format!("usage plan {id} disappeared during update"))
    }

    async fn delete(&self, aws: &Aws, previous_remote: &UsagePlanOutput) -> anyhow::Result<()> {
        let id = &previous_remote.id;
        let detach = previous_remote
            .api_stages
            .iter()
            .map(|stage| Patch::remove("/apiStages", Some(stage.key())))
            .collect::<Vec<_>>();
        apply_patch(aws, id, &detach).await?;

        let result = aws_sdk_apigateway::Client::new(aws.as_ref())
            .delete_usage_plan()
            .usage_plan_id(id)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if has_code(&err, &["NotFoundException"]) => {
                log::warn!("  usage plan {id} is already gone");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("could not delete usage plan {id}")),
        }
    }
}

impl Import for UsagePlan {
    async fn import(&self, aws: &Aws, usage_plan_id: &str) -> anyhow::Result<Option<UsagePlanOutput>> {
        read_usage_plan(aws, usage_plan_id).await
    }
}

/// A REST API that already exists, found by [`rest_api_by_name`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RestApi {
    pub id: String,
    pub name: String,
    pub arn: String,
    /// Prefix of the ARNs used to grant invoke permissions.
    pub execution_arn: String,
    /// Id of the `/` resource.
    pub root_resource_id: Option<String>,
    pub description: Option<String>,
    pub policy: Option<String>,
    pub api_key_source: Option<String>,
    /// `None` when compression is disabled.
    pub minimum_compression_size: Option<i32>,
    pub binary_media_types: Vec<String>,
    pub endpoint_types: Vec<String>,
    pub vpc_endpoint_ids: Vec<String>,
    pub tags: Tags,
}

/// Picks the one candidate named `name`. Names are not unique in API
/// Gateway, so several matches are an error just like none.
fn single_named<T>(name: &str, candidates: impl IntoIterator<Item = (String, T)>) -> anyhow::Result<T> {
    let mut matches = candidates
        .into_iter()
        .filter(|(candidate, _)| candidate == name)
        .map(|(_, item)| item);
    let found = matches
        .next()
        .with_context(|| format!("no REST API named '{name}' in this region"))?;
    anyhow::ensure!(
        matches.next().is_none(),
        "more than one REST API is named '{name}' in this region"
    );
    Ok(found)
}

fn root_resource_id(resources: &[sdk::Resource]) -> Option<String> {
    resources
        .iter()
        .find(|resource| resource.path() == Some("/"))
        .and_then(|resource| resource.id())
        .map(str::to_owned)
}

async fn find_root_resource(
    client: &aws_sdk_apigateway::Client,
    api_id: &str,
) -> anyhow::Result<Option<String>> {
    let mut position = None;
    loop {
        let page = client
            .get_resources()
            .rest_api_id(api_id)
            .set_position(position)
            .send()
            .await
            .with_context(|| format!("could not list resources of REST API {api_id}"))?;
        if let Some(id) = root_resource_id(page.items()) {
            return Ok(Some(id));
        }
        position = page.position().map(str::to_owned);
        if position.is_none() {
            return Ok(None);
        }
    }
}

/// Looks up the REST API named `name` in the provider's region.
pub async fn rest_api_by_name(aws: &Aws, name: &str) -> anyhow::Result<RestApi> {
    let client = aws_sdk_apigateway::Client::new(aws.as_ref());
    let mut apis = vec![];
    let mut position = None;
    loop {
        let page = client
            .get_rest_apis()
            .set_position(position)
            .send()
            .await
            .context("could not list REST APIs")?;
        apis.extend(
            page.items()
                .iter()
                .map(|api| (api.name().unwrap_or_default().to_owned(), api.clone())),
        );
        position = page.position().map(str::to_owned);
        if position.is_none() {
            break;
        }
    }
    let api = single_named(name, apis)?;
    let id = api.id().context("REST API without an id")?.to_owned();
    log::debug!("REST API '{name}' is {id}");

    let endpoint = api.endpoint_configuration();
    Ok(RestApi {
        arn: super::arn(
            aws.partition(),
            "apigateway",
            aws.region(),
            "",
            &format!("/restapis/{id}"),
        ),
        execution_arn: aws.arn("execute-api", true, &id),
        root_resource_id: find_root_resource(&client, &id).await?,
        name: name.to_owned(),
        description: api.description().map(str::to_owned),
        policy: api.policy().map(str::to_owned),
        api_key_source: api.api_key_source().map(|s| s.as_str().to_owned()),
        minimum_compression_size: api.minimum_compression_size(),
        binary_media_types: api.binary_media_types().to_vec(),
        endpoint_types: endpoint
            .map(|e| e.types().iter().map(|t| t.as_str().to_owned()).collect())
            .unwrap_or_default(),
        vpc_endpoint_ids: endpoint
            .map(|e| e.vpc_endpoint_ids().to_vec())
            .unwrap_or_default(),
        tags: tags::without_system_tags(api.tags().cloned().unwrap_or_default()),
        id,
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn plan() -> UsagePlan {
        UsagePlan {
            name: "basic".to_owned(),
            description: None,
            api_stages: vec![],
            quota: None,
            throttle: None,
            product_code: None,
            tags: Tags::default(),
        }
    }

    fn paths(ops: &[Patch]) -> Vec<(PatchOp, &str, Option<&str>)> {
        ops.iter()
            .map(|p| (p.op, p.path.as_str(), p.value.as_deref()))
            .collect()
    }

    #[test]
    fn unchanged_plan_has_no_patches() {
        assert!(patch_operations(&plan(), &plan()).is_empty());
    }

    #[test]
    fn scalar_fields_are_replaced() {
        let next = UsagePlan {
            name: "premium".to_owned(),
            description: Some("for paying customers".to_owned()),
            product_code: Some("prod-1".to_owned()),
            ..plan()
        };
        assert_eq!(
            vec![
                (PatchOp::Replace, "/name", Some("premium")),
                (PatchOp::Replace, "/description", Some("for paying customers")),
                (PatchOp::Replace, "/productCode", Some("prod-1")),
            ],
            paths(&patch_operations(&plan(), &next))
        );

        assert_eq!(
            vec![
                (PatchOp::Replace, "/description", Some("")),
                (PatchOp::Remove, "/productCode", None),
            ],
            paths(&patch_operations(
                &UsagePlan {
                    name: "basic".to_owned(),
                    ..next
                },
                &plan()
            ))
        );
    }

    #[test]
    fn stages_are_swapped_wholesale() {
        let previous = UsagePlan {
            api_stages: vec![ApiStage {
                api_id: "abc".to_owned(),
                stage: "dev".to_owned(),
                throttle: vec![],
            }],
            ..plan()
        };
        let next = UsagePlan {
            api_stages: vec![ApiStage {
                api_id: "abc".to_owned(),
                stage: "prod".to_owned(),
                throttle: vec![StageThrottle {
                    path: "/pets/GET".to_owned(),
                    burst_limit: 10,
                    rate_limit: 2.5,
                }],
            }],
            ..plan()
        };
        assert_eq!(
            vec![
                (PatchOp::Remove, "/apiStages", Some("abc:dev")),
                (PatchOp::Add, "/apiStages", Some("abc:prod")),
                (
                    PatchOp::Replace,
                    "/apiStages/abc:prod/throttle//pets/GET/rateLimit",
                    Some("2.5")
                ),
                (
                    PatchOp::Replace,
                    "/apiStages/abc:prod/throttle//pets/GET/burstLimit",
                    Some("10")
                ),
            ],
            paths(&patch_operations(&previous, &next))
        );
    }

    #[test]
    fn throttle_and_quota_are_added_replaced_and_removed() {
        let limited = UsagePlan {
            throttle: Some(ThrottleSettings {
                burst_limit: 5,
                rate_limit: 10.0,
            }),
            quota: Some(QuotaSettings {
                limit: 100,
                offset: 2,
                period: QuotaPeriod::Week,
            }),
            ..plan()
        };
        assert_eq!(
            vec![
                (PatchOp::Add, "/throttle/rateLimit", Some("10")),
                (PatchOp::Add, "/throttle/burstLimit", Some("5")),
                (PatchOp::Add, "/quota/limit", Some("100")),
                (PatchOp::Add, "/quota/offset", Some("2")),
                (PatchOp::Add, "/quota/period", Some("WEEK")),
            ],
            paths(&patch_operations(&plan(), &limited))
        );

        let relaxed = UsagePlan {
            throttle: Some(ThrottleSettings {
                burst_limit: 50,
                rate_limit: 100.0,
            }),
            ..limited.clone()
        };
        assert_eq!(
            vec![
                (PatchOp::Replace, "/throttle/rateLimit", Some("100")),
                (PatchOp::Replace, "/throttle/burstLimit", Some("50")),
            ],
            paths(&patch_operations(&limited, &relaxed))
        );

        assert_eq!(
            vec![
                (PatchOp::Remove, "/throttle", None),
                (PatchOp::Remove, "/quota", None),
            ],
            paths(&patch_operations(&limited, &plan()))
        );
    }

    #[test]
    fn quota_offsets_depend_on_the_period() {
        let quota = |period, offset| UsagePlan {
            quota: Some(QuotaSettings {
                limit: 10,
                offset,
                period,
            }),
            ..plan()
        };
        assert!(quota(QuotaPeriod::Day, 0).validate().is_ok());
        assert!(quota(QuotaPeriod::Day, 1).validate().is_err());
        assert!(quota(QuotaPeriod::Week, 6).validate().is_ok());
        assert!(quota(QuotaPeriod::Week, 7).validate().is_err());
        assert!(quota(QuotaPeriod::Month, 27).validate().is_ok());
        assert!(quota(QuotaPeriod::Month, 28).validate().is_err());
        assert!(quota(QuotaPeriod::Month, -1).validate().is_err());
    }

    #[test]
    fn rest_apis_are_found_by_unique_name() {
        let apis = || {
            vec![
                ("orders".to_owned(), "a1"),
                ("billing".to_owned(), "a2"),
                ("billing".to_owned(), "a3"),
            ]
        };
        assert_eq!("a1", single_named("orders", apis()).unwrap());
        let err = single_named("billing", apis()).unwrap_err();
        assert!(err.to_string().contains("more than one"), "{err}");
        let err = single_named("shipping", apis()).unwrap_err();
        assert!(err.to_string().contains("no REST API named 'shipping'"), "{err}");
    }

    #[test]
    fn root_resource_is_the_slash_path() {
        let resource = |id: &str, path: &str| sdk::Resource::builder().id(id).path(path).build();
        assert_eq!(
            Some("r0".to_owned()),
            root_resource_id(&[resource("r1", "/pets"), resource("r0", "/")])
        );
        assert_eq!(None, root_resource_id(&[resource("r1", "/pets")]));
    }
}
