//! IAM virtual MFA devices.
use anyhow::Context;
use aws_sdk_iam::types::{AssignmentStatusType, Tag, VirtualMfaDevice as SdkDevice};

use super::{has_code, Aws};
use crate::{
    tags::{self, Tags},
    Import, Resource,
};

fn default_path() -> String {
    "/".to_owned()
}

/// AWS IAM virtual MFA device resource.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VirtualMfaDevice {
    /// Name of the device. Changing it replaces the device.
    pub name: String,
    /// IAM path, like `/` or `/division/`. Changing it replaces the device.
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub tags: Tags,
}

impl VirtualMfaDevice {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.name.len() > 226 {
            return Err("name must be between 1 and 226 characters".into());
        }
        if let Some(c) = self
            .name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || "_+=,.@-".contains(*c)))
        {
            return Err(format!("name may not contain '{c}'"));
        }
        if self.path.is_empty() || self.path.len() > 512 {
            return Err("path must be between 1 and 512 characters".into());
        }
        if !self.path.starts_with('/') || !self.path.ends_with('/') {
            return Err("path must begin and end with '/'".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VirtualMfaDeviceOutput {
    /// The device's serial number, which is its ARN.
    pub arn: String,
    /// Base32 seed, only ever returned on creation.
    pub base_32_string_seed: Option<String>,
    /// Base64 encoded QR code PNG, only ever returned on creation.
    pub qr_code_png: Option<String>,
    /// The user the device is enabled for, if any.
    pub user_name: Option<String>,
    pub tags: Tags,
}

fn sdk_tags(tags: &Tags) -> anyhow::Result<Vec<Tag>> {
    tags.iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .context("could not build IAM tag")
        })
        .collect()
}

async fn find_device(client: &aws_sdk_iam::Client, arn: &str) -> anyhow::Result<Option<SdkDevice>> {
    let mut marker = None;
    loop {
        let resp = client
            .list_virtual_mfa_devices()
            .assignment_status(AssignmentStatusType::Any)
            .set_marker(marker)
            .send()
            .await
            .context("could not list virtual MFA devices")?;
        if let Some(device) = resp
            .virtual_mfa_devices()
            .iter()
            .find(|device| device.serial_number() == arn)
        {
            return Ok(Some(device.clone()));
        }
        if !resp.is_truncated() {
            return Ok(None);
        }
        marker = resp.marker().map(str::to_owned);
        if marker.is_none() {
            return Ok(None);
        }
    }
}

async fn device_tags(client: &aws_sdk_iam::Client, arn: &str) -> anyhow::Result<Tags> {
    let resp = client
        .list_mfa_device_tags()
        .serial_number(arn)
        .send()
        .await
        .with_context(|| format!("could not list tags of MFA device {arn}"))?;
    Ok(tags::without_system_tags(
        resp.tags()
            .iter()
            .map(|tag| (tag.key().to_owned(), tag.value().to_owned())),
    ))
}

impl Resource for VirtualMfaDevice {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = VirtualMfaDeviceOutput;

    fn requires_replacement(&self, previous_local: &Self) -> bool {
        self.name != previous_local.name || self.path != previous_local.path
    }

    async fn create(&self, aws: &Aws) -> anyhow::Result<VirtualMfaDeviceOutput> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let tags = aws.tags_for(&self.tags);
        let sdk_tags = sdk_tags(&tags)?;
        let resp = client
            .create_virtual_mfa_device()
            .virtual_mfa_device_name(&self.name)
            .path(&self.path)
            .set_tags((!sdk_tags.is_empty()).then_some(sdk_tags))
            .send()
            .await
            .with_context(|| format!("could not create virtual MFA device '{}'", self.name))?;
        let device = resp
            .virtual_mfa_device()
            .context("no virtual MFA device in response")?;
        let arn = device.serial_number().to_owned();
        log::info!("  created virtual MFA device {arn}");

        Ok(VirtualMfaDeviceOutput {
            base_32_string_seed: device
                .base32_string_seed()
                .map(|seed| String::from_utf8_lossy(seed.as_ref()).into_owned()),
            qr_code_png: device
                .qr_code_png()
                .map(|png| data_encoding::BASE64.encode(png.as_ref())),
            user_name: None,
            tags,
            arn,
        })
    }

    async fn read(
        &self,
        aws: &Aws,
        previous_remote: &VirtualMfaDeviceOutput,
    ) -> anyhow::Result<Option<VirtualMfaDeviceOutput>> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let arn = &previous_remote.arn;
        let device = match find_device(&client, arn).await? {
            Some(device) => device,
            None => return Ok(None),
        };
        Ok(Some(VirtualMfaDeviceOutput {
            user_name: device.user().map(|user| user.user_name().to_owned()),
            tags: device_tags(&client, arn).await?,
            ..previous_remote.clone()
        }))
    }

    async fn update(
        &self,
        aws: &Aws,
        _previous_local: &Self,
        previous_remote: &VirtualMfaDeviceOutput,
    ) -> anyhow::Result<VirtualMfaDeviceOutput> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let arn = &previous_remote.arn;
        let tags = aws.tags_for(&self.tags);
        let changes = tags::diff(&previous_remote.tags, &tags);
        if !changes.removed.is_empty() {
            client
                .untag_mfa_device()
                .serial_number(arn)
                .set_tag_keys(Some(changes.removed))
                .send()
                .await
                .with_context(|| format!("could not untag MFA device {arn}"))?;
        }
        if !changes.upserted.is_empty() {
            client
                .tag_mfa_device()
                .serial_number(arn)
                .set_tags(Some(sdk_tags(&changes.upserted)?))
                .send()
                .await
                .with_context(|| format!("could not tag MFA device {arn}"))?;
        }
        Ok(VirtualMfaDeviceOutput {
            tags,
            ..previous_remote.clone()
        })
    }

    async fn delete(
        &self,
        aws: &Aws,
        previous_remote: &VirtualMfaDeviceOutput,
    ) -> anyhow::Result<()> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let arn = &previous_remote.arn;

        if let Some(user_name) = &previous_remote.user_name {
            log::info!("  deactivating MFA device {arn} of user {user_name}");
            match client
                .deactivate_mfa_device()
                .user_name(user_name)
                .serial_number(arn)
                .send()
                .await
            {
                Ok(_) => {}
                Err(err) if has_code(&err, &["NoSuchEntity"]) => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("could not deactivate MFA device {arn}"))
                }
            }
        }

        match client
            .delete_virtual_mfa_device()
            .serial_number(arn)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if has_code(&err, &["NoSuchEntity"]) => {
                log::warn!("  virtual MFA device {arn} is already gone");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("could not delete MFA device {arn}")),
        }
    }
}

/// Adopts a device by its ARN, which IAM also calls its serial number.
///
/// The seed and QR code are only returned on creation, so an imported
/// device has neither.
impl Import for VirtualMfaDevice {
    async fn import(&self, aws: &Aws, arn: &str) -> anyhow::Result<Option<VirtualMfaDeviceOutput>> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let Some(device) = find_device(&client, arn).await? else {
            return Ok(None);
        };
        if !arn.ends_with(&format!("{}{}", self.path, self.name)) {
            log::warn!("  {arn} is not at {}{}", self.path, self.name);
        }
        Ok(Some(VirtualMfaDeviceOutput {
            arn: arn.to_owned(),
            base_32_string_seed: None,
            qr_code_png: None,
            user_name: device.user().map(|user| user.user_name().to_owned()),
            tags: device_tags(&client, arn).await?,
        }))
    }
}
