//! Utilities for working with `stratoform`.
use std::{future::Future, time::Duration};

/// A JSON document, such as an IAM-style access policy.
///
/// Deserializes from either a JSON string or an inline structure, and
/// compares semantically, so key order and whitespace never cause a diff.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct JsonDocument(pub serde_json::Value);

impl JsonDocument {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    /// The compact serialization sent over the wire.
    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }
}

impl<'de> serde::Deserialize<'de> for JsonDocument {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Document(serde_json::Value),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Self::parse(&text).map_err(serde::de::Error::custom),
            Repr::Document(value) => Ok(Self(value)),
        }
    }
}

/// How often and for how long to poll a resource that is settling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 60 * 60,
        }
    }
}

/// Polls `check` until it returns `true`, sleeping between polls.
///
/// Errs when `check` errs, or once `settings.timeout_secs` have elapsed.
pub async fn wait_until<F, Fut>(
    what: &str,
    settings: WaitSettings,
    mut check: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    log::info!("  awaiting {what}");
    let start = std::time::Instant::now();
    while !check().await? {
        if start.elapsed().as_secs() >= settings.timeout_secs {
            anyhow::bail!(
                "{what} timed out after {} seconds",
                settings.timeout_secs
            );
        }
        tokio::time::sleep(Duration::from_secs(settings.interval_secs)).await;
    }
    log::info!("  ...{what} done");
    Ok(())
}
