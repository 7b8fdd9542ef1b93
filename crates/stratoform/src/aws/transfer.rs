//! Transfer Family users.
use anyhow::Context;
use aws_sdk_transfer::types as sdk;

use super::{has_code, Aws};
use crate::{
    tags::{self, Tags},
    utils::JsonDocument,
    Import, Resource,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HomeDirectoryType {
    #[default]
    Path,
    Logical,
}

impl HomeDirectoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HomeDirectoryType::Path => "PATH",
            HomeDirectoryType::Logical => "LOGICAL",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "PATH" => Some(HomeDirectoryType::Path),
            "LOGICAL" => Some(HomeDirectoryType::Logical),
            _ => None,
        }
    }
}

/// Maps a path the user sees to a path on the server's storage.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HomeDirectoryMapping {
    pub entry: String,
    pub target: String,
}

/// POSIX identity used on EFS backed servers.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PosixProfile {
    pub uid: i64,
    pub gid: i64,
    #[serde(default)]
    pub secondary_gids: Vec<i64>,
}

impl PosixProfile {
    fn to_sdk(&self) -> anyhow::Result<sdk::PosixProfile> {
        sdk::PosixProfile::builder()
            .uid(self.uid)
            .gid(self.gid)
            .set_secondary_gids(
                (!self.secondary_gids.is_empty()).then(|| self.secondary_gids.clone()),
            )
            .build()
            .context("could not build POSIX profile")
    }
}

/// AWS Transfer Family user resource.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct User {
    /// Changing the server replaces the user.
    pub server_id: String,
    /// Changing the name replaces the user.
    pub user_name: String,
    /// ARN of the IAM role the user assumes to reach storage.
    pub role: String,
    #[serde(default)]
    pub home_directory: Option<String>,
    #[serde(default)]
    pub home_directory_mappings: Vec<HomeDirectoryMapping>,
    #[serde(default)]
    pub home_directory_type: HomeDirectoryType,
    /// Session policy scoping down the role.
    #[serde(default)]
    pub policy: Option<JsonDocument>,
    #[serde(default)]
    pub posix_profile: Option<PosixProfile>,
    #[serde(default)]
    pub tags: Tags,
}

fn is_server_id(id: &str) -> bool {
    id.strip_prefix("s-").is_some_and(|hex| {
        hex.len() == 17
            && hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

fn is_user_name(name: &str) -> bool {
    let mut chars = name.chars();
    (3..=100).contains(&name.len())
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || "_.@-".contains(c))
}

impl User {
    pub fn validate(&self) -> Result<(), String> {
        if !is_server_id(&self.server_id) {
            return Err(format!(
                "'{}' is not a server id, expected 's-' and 17 hex digits",
                self.server_id
            ));
        }
        if !is_user_name(&self.user_name) {
            return Err(format!(
                "'{}' is not a valid user name, use 3 to 100 of a-z, A-Z, 0-9, _ . @ - and do \
                 not start with . @ or -",
                self.user_name
            ));
        }
        if !self.role.starts_with("arn:") {
            return Err("role must be an IAM role ARN".into());
        }
        if let Some(dir) = &self.home_directory {
            if dir.len() > 1024 {
                return Err("home_directory must be at most 1024 characters".into());
            }
            if !dir.is_empty() && !dir.starts_with('/') {
                return Err("home_directory must be an absolute path".into());
            }
        }
        if self
            .home_directory_mappings
            .iter()
            .any(|m| !m.entry.starts_with('/') || !m.target.starts_with('/'))
        {
            return Err("home_directory_mappings entries and targets must start with '/'".into());
        }
        if self.policy.as_ref().is_some_and(|p| !p.0.is_object()) {
            return Err("policy must be a JSON object".into());
        }
        Ok(())
    }

    /// The id of the user, `SERVER_ID/USER_NAME`.
    pub fn id(&self) -> String {
        user_id(&self.server_id, &self.user_name)
    }

    fn sdk_mappings(&self) -> anyhow::Result<Option<Vec<sdk::HomeDirectoryMapEntry>>> {
        if self.home_directory_mappings.is_empty() {
            return Ok(None);
        }
        let entries = self
            .home_directory_mappings
            .iter()
            .map(|m| {
                sdk::HomeDirectoryMapEntry::builder()
                    .entry(&m.entry)
                    .target(&m.target)
                    .build()
                    .context("could not build home directory mapping")
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Some(entries))
    }
}

pub fn user_id(server_id: &str, user_name: &str) -> String {
    format!("{server_id}/{user_name}")
}

/// Splits a user id into its server id and user name.
pub fn parse_user_id(id: &str) -> anyhow::Result<(&str, &str)> {
    match id.split_once('/') {
        Some((server_id, user_name))
            if !server_id.is_empty() && !user_name.is_empty() && !user_name.contains('/') =>
        {
            Ok((server_id, user_name))
        }
        _ => anyhow::bail!("'{id}' is not a user id, expected SERVER_ID/USER_NAME"),
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserOutput {
    /// `SERVER_ID/USER_NAME`.
    pub id: String,
    pub arn: String,
    pub role: Option<String>,
    pub home_directory: Option<String>,
    pub home_directory_type: Option<HomeDirectoryType>,
    pub policy: Option<JsonDocument>,
    pub tags: Tags,
}

async fn describe(aws: &Aws, id: &str) -> anyhow::Result<Option<UserOutput>> {
    let (server_id, user_name) = parse_user_id(id)?;
    let result = aws_sdk_transfer::Client::new(aws.as_ref())
        .describe_user()
        .server_id(server_id)
        .user_name(user_name)
        .send()
        .await;
    let out = match result {
        Ok(out) => out,
        Err(err) if has_code(&err, &["ResourceNotFoundException"]) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("could not describe user {id}")),
    };
    let user = out
        .user()
        .with_context(|| format!("no description of user {id}"))?;
    let policy = match user.policy().filter(|p| !p.is_empty()) {
        Some(p) => Some(
            JsonDocument::parse(p).with_context(|| format!("user {id} has an unparsable policy"))?,
        ),
        None => None,
    };
    Ok(Some(UserOutput {
        id: id.to_owned(),
        arn: user.arn().to_owned(),
        role: user.role().map(str::to_owned),
        home_directory: user.home_directory().map(str::to_owned),
        home_directory_type: user
            .home_directory_type()
            .and_then(|ty| HomeDirectoryType::parse(ty.as_str())),
        policy,
        tags: tags::without_system_tags(
            user.tags()
                .iter()
                .map(|tag| (tag.key().to_owned(), tag.value().to_owned())),
        ),
    }))
}

async fn is_gone(aws: &Aws, id: &str) -> anyhow::Result<bool> {
    Ok(describe(aws, id).await?.is_none())
}

fn sdk_tags(tags: &Tags) -> anyhow::Result<Vec<sdk::Tag>> {
    tags.iter()
        .map(|(k, v)| {
            sdk::Tag::builder()
                .key(k)
                .value(v)
                .build()
                .context("could not build Transfer tag")
        })
        .collect()
}

impl Resource for User {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = UserOutput;

    /// The Transfer API cannot clear a POSIX profile or home directory
    /// mappings, so dropping either replaces the user.
    fn requires_replacement(&self, previous_local: &Self) -> bool {
        self.server_id != previous_local.server_id
            || self.user_name != previous_local.user_name
            || (self.posix_profile.is_none() && previous_local.posix_profile.is_some())
            || (self.home_directory_mappings.is_empty()
                && !previous_local.home_directory_mappings.is_empty())
    }

    async fn create(&self, aws: &Aws) -> anyhow::Result<UserOutput> {
        let tags = sdk_tags(&aws.tags_for(&self.tags))?;
        aws_sdk_transfer::Client::new(aws.as_ref())
            .create_user()
            .server_id(&self.server_id)
            .user_name(&self.user_name)
            .role(&self.role)
            .set_home_directory(self.home_directory.clone())
            .home_directory_type(sdk::HomeDirectoryType::from(
                self.home_directory_type.as_str(),
            ))
            .set_home_directory_mappings(self.sdk_mappings()?)
            .set_policy(self.policy.as_ref().map(JsonDocument::to_json_string))
            .set_posix_profile(
                self.posix_profile
                    .as_ref()
                    .map(PosixProfile::to_sdk)
                    .transpose()?,
            )
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .with_context(|| format!("could not create user {}", self.id()))?;
        log::info!("  created user {}", self.id());

        describe(aws, &self.id())
            .await?
            .with_context(|| format!("user {} is missing right after creation", self.id()))
    }

    async fn read(&self, aws: &Aws, previous_remote: &UserOutput) -> anyhow::Result<Option<UserOutput>> {
        describe(aws, &previous_remote.id).await
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &UserOutput,
    ) -> anyhow::Result<UserOutput> {
        let client = aws_sdk_transfer::Client::new(aws.as_ref());
        let id = &previous_remote.id;
        let (server_id, user_name) = parse_user_id(id)?;

        let mut request = client.update_user().server_id(server_id).user_name(user_name);
        let mut changed = false;
        if self.role != previous_local.role {
            request = request.role(&self.role);
            changed = true;
        }
        if self.home_directory != previous_local.home_directory {
            request = request.home_directory(self.home_directory.clone().unwrap_or_default());
            changed = true;
        }
        if self.home_directory_type != previous_local.home_directory_type {
            request = request.home_directory_type(sdk::HomeDirectoryType::from(
                self.home_directory_type.as_str(),
            ));
            changed = true;
        }
        if self.home_directory_mappings != previous_local.home_directory_mappings {
            request = request.set_home_directory_mappings(self.sdk_mappings()?);
            changed = true;
        }
        if self.policy != previous_local.policy {
            request = request.policy(
                self.policy
                    .as_ref()
                    .map(JsonDocument::to_json_string)
                    .unwrap_or_default(),
            );
            changed = true;
        }
        if self.posix_profile != previous_local.posix_profile {
            let posix_profile = self
                .posix_profile
                .as_ref()
                .map(PosixProfile::to_sdk)
                .transpose()?;
            request = request.set_posix_profile(posix_profile);
            changed = true;
        }
        if changed {
            request
                .send()
                .await
                .with_context(|| format!("could not update user {id}"))?;
        }

        let tags = aws.tags_for(&self.tags);
        let changes = tags::diff(&previous_remote.tags, &tags);
        let arn = &previous_remote.arn;
        if !changes.removed.is_empty() {
            client
                .untag_resource()
                .arn(arn)
                .set_tag_keys(Some(changes.removed))
                .send()
                .await
                .with_context(|| format!("could not untag user {id}"))?;
        }
        if !changes.upserted.is_empty() {
            client
                .tag_resource()
                .arn(arn)
                .set_tags(Some(sdk_tags(&changes.upserted)?))
                .send()
                .await
                .with_context(|| format!("could not tag user {id}"))?;
        }

        describe(aws, id)
            .await?
            .with_context(|| format!("user {id} disappeared during update"))
    }

    async fn delete(&self, aws: &Aws, previous_remote: &UserOutput) -> anyhow::Result<()> {
        let id = &previous_remote.id;
        let (server_id, user_name) = parse_user_id(id)?;
        let result = aws_sdk_transfer::Client::new(aws.as_ref())
            .delete_user()
            .server_id(server_id)
            .user_name(user_name)
            .send()
            .await;
        match result {
            Ok(_) => {}
            Err(err) if has_code(&err, &["ResourceNotFoundException"]) => {
                log::warn!("  user {id} is already gone");
                return Ok(());
            }
            Err(err) => return Err(err).with_context(|| format!("could not delete user {id}")),
        }
        crate::utils::wait_until(
            &format!("user {id} deletion"),
            aws.wait_settings(),
            || is_gone(aws, id),
        )
        .await
    }
}

impl Import for User {
    /// `user_id` is `SERVER_ID/USER_NAME`.
    async fn import(&self, aws: &Aws, user_id: &str) -> anyhow::Result<Option<UserOutput>> {
        parse_user_id(user_id)?;
        if user_id != self.id() {
            log::warn!("  importing {user_id} as {}", self.id());
        }
        describe(aws, user_id).await
    }
}
