//! SageMaker apps.
use anyhow::Context;
use aws_sdk_sagemaker::{operation::describe_app::DescribeAppOutput, types as sdk};

use super::{has_code, has_code_and_message, Aws};
use crate::{
    tags::{self, Tags},
    Import, Resource,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AppType {
    JupyterServer,
    KernelGateway,
    DetailedProfiler,
    TensorBoard,
    CodeEditor,
    JupyterLab,
    RStudioServerPro,
    RSessionGateway,
    Canvas,
}

impl AppType {
    const ALL: [AppType; 9] = [
        AppType::JupyterServer,
        AppType::KernelGateway,
        AppType::DetailedProfiler,
        AppType::TensorBoard,
        AppType::CodeEditor,
        AppType::JupyterLab,
        AppType::RStudioServerPro,
        AppType::RSessionGateway,
        AppType::Canvas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::JupyterServer => "JupyterServer",
            AppType::KernelGateway => "KernelGateway",
            AppType::DetailedProfiler => "DetailedProfiler",
            AppType::TensorBoard => "TensorBoard",
            AppType::CodeEditor => "CodeEditor",
            AppType::JupyterLab => "JupyterLab",
            AppType::RStudioServerPro => "RStudioServerPro",
            AppType::RSessionGateway => "RSessionGateway",
            AppType::Canvas => "Canvas",
        }
    }

    /// Parses an app type in any casing, as found in app ARNs.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
    }

    fn to_sdk(self) -> sdk::AppType {
        sdk::AppType::from(self.as_str())
    }
}

impl std::fmt::Display for AppType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance type and image the app runs on.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub lifecycle_config_arn: Option<String>,
    #[serde(default)]
    pub sagemaker_image_arn: Option<String>,
    #[serde(default)]
    pub sagemaker_image_version_arn: Option<String>,
}

impl ResourceSpec {
    fn to_sdk(&self) -> sdk::ResourceSpec {
        sdk::ResourceSpec::builder()
            .set_instance_type(
                self.instance_type
                    .as_deref()
                    .map(sdk::AppInstanceType::from),
            )
            .set_lifecycle_config_arn(self.lifecycle_config_arn.clone())
            .set_sage_maker_image_arn(self.sagemaker_image_arn.clone())
            .set_sage_maker_image_version_arn(self.sagemaker_image_version_arn.clone())
            .build()
    }

    fn from_sdk(spec: &sdk::ResourceSpec) -> Self {
        Self {
            instance_type: spec.instance_type().map(|ty| ty.as_str().to_owned()),
            lifecycle_config_arn: spec.lifecycle_config_arn().map(str::to_owned),
            sagemaker_image_arn: spec.sage_maker_image_arn().map(str::to_owned),
            sagemaker_image_version_arn: spec.sage_maker_image_version_arn().map(str::to_owned),
        }
    }
}

/// AWS SageMaker app resource.
///
/// Belongs to exactly one of a user profile or a space. Every field but the
/// tags forces replacement.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct App {
    pub domain_id: String,
    #[serde(default)]
    pub user_profile_name: Option<String>,
    #[serde(default)]
    pub space_name: Option<String>,
    pub app_type: AppType,
    pub app_name: String,
    #[serde(default)]
    pub resource_spec: Option<ResourceSpec>,
    #[serde(default)]
    pub tags: Tags,
}

impl App {
    pub fn validate(&self) -> Result<(), String> {
        if self.domain_id.is_empty() {
            return Err("domain_id must not be empty".into());
        }
        match (&self.user_profile_name, &self.space_name) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => return Err("exactly one of user_profile_name and space_name must be set".into()),
        }
        let name = &self.app_name;
        if name.is_empty() || name.len() > 63 {
            return Err("app_name must be between 1 and 63 characters".into());
        }
        if name.starts_with('-')
            || name.ends_with('-')
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(
                "app_name may only contain alphanumerics and hyphens, and may not start or end \
                 with a hyphen"
                    .into(),
            );
        }
        Ok(())
    }

    fn without_tags(&self) -> Self {
        Self {
            tags: Tags::default(),
            ..self.clone()
        }
    }
}

/// The parts of an app ARN that identify the app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppId {
    pub domain_id: String,
    /// User profile or space name.
    pub owner: String,
    pub app_type: AppType,
    pub app_name: String,
}

/// Decodes an ARN like
/// `arn:aws:sagemaker:us-east-1:123456789012:app/d-xxx/owner/jupyterserver/default`.
pub fn decode_app_id(arn: &str) -> anyhow::Result<AppId> {
    let resource = arn
        .splitn(6, ':')
        .nth(5)
        .with_context(|| format!("'{arn}' is not an ARN"))?;
    let parts = resource.split('/').collect::<Vec<_>>();
    let [kind, domain_id, owner, app_type, app_name] = parts.as_slice() else {
        anyhow::bail!("'{arn}' is not a SageMaker app ARN");
    };
    anyhow::ensure!(*kind == "app", "'{arn}' is not a SageMaker app ARN");
    let app_type = AppType::parse(app_type)
        .with_context(|| format!("unknown app type '{app_type}' in '{arn}'"))?;
    Ok(AppId {
        domain_id: domain_id.to_string(),
        owner: owner.to_string(),
        app_type,
        app_name: app_name.to_string(),
    })
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AppOutput {
    pub arn: String,
    pub resource_spec: Option<ResourceSpec>,
    pub tags: Tags,
}

/// Which app to address, and whose it is.
struct Target {
    domain_id: String,
    user_profile_name: Option<String>,
    space_name: Option<String>,
    app_type: AppType,
    app_name: String,
}

impl Target {
    fn from_local(app: &App) -> Self {
        Self {
            domain_id: app.domain_id.clone(),
            user_profile_name: app.user_profile_name.clone(),
            space_name: app.space_name.clone(),
            app_type: app.app_type,
            app_name: app.app_name.clone(),
        }
    }

    /// The app recorded in `arn`, owned the way `app` says.
    fn from_arn(app: &App, arn: &str) -> anyhow::Result<Self> {
        let id = decode_app_id(arn)?;
        let (user_profile_name, space_name) = if app.space_name.is_some() {
            (None, Some(id.owner))
        } else {
            (Some(id.owner), None)
        };
        Ok(Self {
            domain_id: id.domain_id,
            user_profile_name,
            space_name,
            app_type: id.app_type,
            app_name: id.app_name,
        })
    }
}

/// Describes the app, resolving to `None` once it is gone or deleted.
async fn describe(aws: &Aws, target: &Target) -> anyhow::Result<Option<DescribeAppOutput>> {
    let result = aws_sdk_sagemaker::Client::new(aws.as_ref())
        .describe_app()
        .domain_id(&target.domain_id)
        .set_user_profile_name(target.user_profile_name.clone())
        .set_space_name(target.space_name.clone())
        .app_type(target.app_type.to_sdk())
        .app_name(&target.app_name)
        .send()
        .await;
    match result {
        Ok(out) if out.status().map(|s| s.as_str()) == Some("Deleted") => Ok(None),
        Ok(out) => Ok(Some(out)),
        Err(err) if has_code(&err, &["ResourceNotFound"]) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("could not describe app {}", target.app_name)),
    }
}

async fn app_tags(aws: &Aws, arn: &str) -> anyhow::Result<Tags> {
    let client = aws_sdk_sagemaker::Client::new(aws.as_ref());
    let mut found = vec![];
    let mut next_token = None;
    loop {
        let resp = client
            .list_tags()
            .resource_arn(arn)
            .set_next_token(next_token)
            .send()
            .await
            .with_context(|| format!("could not list tags of {arn}"))?;
        found.extend(
            resp.tags().iter().map(|tag| {
                (
                    tag.key().unwrap_or_default().to_owned(),
                    tag.value().unwrap_or_default().to_owned(),
                )
            }),
        );
        next_token = resp.next_token().map(str::to_owned);
        if next_token.is_none() {
            return Ok(tags::without_system_tags(found));
        }
    }
}

fn sdk_tags(tags: &Tags) -> anyhow::Result<Vec<sdk::Tag>> {
    tags.iter()
        .map(|(k, v)| {
            Ok(sdk::Tag::builder().key(k).value(v).build())
        })
        .collect()
}

async fn read_app(aws: &Aws, target: &Target) -> anyhow::Result<Option<AppOutput>> {
    let Some(out) = describe(aws, target).await? else {
        return Ok(None);
    };
    let arn = out
        .app_arn()
        .context("missing app ARN in description")?
        .to_owned();
    Ok(Some(AppOutput {
        resource_spec: out.resource_spec().map(ResourceSpec::from_sdk),
        tags: app_tags(aws, &arn).await?,
        arn,
    }))
}

async fn in_service(aws: &Aws, target: &Target) -> anyhow::Result<bool> {
    let Some(out) = describe(aws, target).await? else {
        return Ok(false);
    };
    match out.status().map(|s| s.as_str()) {
        Some("InService") => Ok(true),
        Some("Failed") => anyhow::bail!(
            "app {} failed: {}",
            target.app_name,
            out.failure_reason().unwrap_or("no reason given")
        ),
        _ => Ok(false),
    }
}

async fn is_gone(aws: &Aws, target: &Target) -> anyhow::Result<bool> {
    Ok(describe(aws, target).await?.is_none())
}

/// Whether a delete error means the app is already on its way out.
fn already_deleted<E: aws_sdk_sagemaker::error::ProvideErrorMetadata>(err: &E) -> bool {
    has_code(err, &["ResourceNotFound"])
        || has_code_and_message(err, "ValidationException", "has already been deleted")
        || has_code_and_message(
            err,
            "ValidationException",
            "previously failed and was automatically deleted",
        )
}

impl Resource for App {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = AppOutput;

    fn requires_replacement(&self, previous_local: &Self) -> bool {
        self.without_tags() != previous_local.without_tags()
    }

    async fn create(&self, aws: &Aws) -> anyhow::Result<AppOutput> {
        let tags = sdk_tags(&aws.tags_for(&self.tags))?;
        let out = aws_sdk_sagemaker::Client::new(aws.as_ref())
            .create_app()
            .domain_id(&self.domain_id)
            .set_user_profile_name(self.user_profile_name.clone())
            .set_space_name(self.space_name.clone())
            .app_type(self.app_type.to_sdk())
            .app_name(&self.app_name)
            .set_resource_spec(self.resource_spec.as_ref().map(ResourceSpec::to_sdk))
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .with_context(|| format!("could not create app {}", self.app_name))?;
        let arn = out.app_arn().context("missing app ARN")?.to_owned();
        log::info!("  created app {arn}");

        let target = Target::from_local(self);
        crate::utils::wait_until(
            &format!("app {} in service", self.app_name),
            aws.wait_settings(),
            || in_service(aws, &target),
        )
        .await?;

        read_app(aws, &target)
            .await?
            .with_context(|| format!("app {arn} is missing right after creation"))
    }

    async fn read(&self, aws: &Aws, previous_remote: &AppOutput) -> anyhow::Result<Option<AppOutput>> {
        let target = Target::from_arn(self, &previous_remote.arn)?;
        read_app(aws, &target).await
    }

    async fn update(
        &self,
        aws: &Aws,
        _previous_local: &Self,
        previous_remote: &AppOutput,
    ) -> anyhow::Result<AppOutput> {
        let client = aws_sdk_sagemaker::Client::new(aws.as_ref());
        let arn = &previous_remote.arn;
        let tags = aws.tags_for(&self.tags);
        let changes = tags::diff(&previous_remote.tags, &tags);
        if !changes.removed.is_empty() {
            client
                .delete_tags()
                .resource_arn(arn)
                .set_tag_keys(Some(changes.removed))
                .send()
                .await
                .with_context(|| format!("could not untag app {arn}"))?;
        }
        if !changes.upserted.is_empty() {
            client
                .add_tags()
                .resource_arn(arn)
                .set_tags(Some(sdk_tags(&changes.upserted)?))
                .send()
                .await
                .with_context(|| format!("could not tag app {arn}"))?;
        }
        Ok(AppOutput {
            tags,
            ..previous_remote.clone()
        })
    }

    async fn delete(&self, aws: &Aws, previous_remote: &AppOutput) -> anyhow::Result<()> {
        let target = Target::from_arn(self, &previous_remote.arn)?;
        let result = aws_sdk_sagemaker::Client::new(aws.as_ref())
            .delete_app()
            .domain_id(&target.domain_id)
            .set_user_profile_name(target.user_profile_name.clone())
            .set_space_name(target.space_name.clone())
            .app_type(target.app_type.to_sdk())
            .app_name(&target.app_name)
            .send()
            .await;
        match result {
            Ok(_) => {}
            Err(err) if already_deleted(&err) => {
                log::warn!("  app {} is already gone", previous_remote.arn);
                return Ok(());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("could not delete app {}", previous_remote.arn))
            }
        }
        crate::utils::wait_until(
            &format!("app {} deletion", target.app_name),
            aws.wait_settings(),
            || is_gone(aws, &target),
        )
        .await
    }
}

impl Import for App {
    async fn import(&self, aws: &Aws, arn: &str) -> anyhow::Result<Option<AppOutput>> {
        let target = Target::from_arn(self, arn)?;
        if target.app_name != self.app_name || target.app_type != self.app_type {
            log::warn!(
                "  {arn} is not the {} app '{}'",
                self.app_type,
                self.app_name
            );
        }
        read_app(aws, &target).await
    }
}
