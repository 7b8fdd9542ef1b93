//! Retrying calls against change-token APIs.
//!
//! APIs like AWS WAF Classic require every mutation to carry a change token.
//! A token goes stale as soon as any other mutation lands, in which case the
//! call fails and must be retried with a fresh token. [`TokenRetryer`]
//! serializes those calls within the process and retries the stale ones
//! according to a [`RetryPolicy`].
use std::{future::Future, time::Duration};

use snafu::prelude::*;

use crate::{Error, InvalidRetryPolicySnafu};

/// Something that hands out change tokens.
pub trait ChangeTokenSource {
    type Error: StaleToken + std::error::Error + 'static;

    /// Fetches a fresh change token.
    fn change_token(&self) -> impl Future<Output = Result<String, Self::Error>>;
}

/// Errors that can tell whether they were caused by a stale change token.
pub trait StaleToken {
    fn is_stale_token(&self) -> bool;
}

/// How many times, and how far apart, to retry a stale token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, Error> {
        let policy = Self {
            max_attempts,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), Error> {
        ensure!(
            self.max_attempts > 0,
            InvalidRetryPolicySnafu {
                reason: "max_attempts must be at least 1"
            }
        );
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Snafu)]
pub enum TokenRetryError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("Could not acquire a change token: {source}"))]
    Acquire { source: E },

    #[snafu(display("Change token was still stale after {attempts} attempts: {source}"))]
    Exhausted { attempts: u32, source: E },

    #[snafu(display("{source}"))]
    Call { source: E },
}

impl<E: std::error::Error + 'static> TokenRetryError<E> {
    /// The underlying error from the token source or the call.
    pub fn inner(&self) -> &E {
        match self {
            TokenRetryError::Acquire { source }
            | TokenRetryError::Exhausted { source, .. }
            | TokenRetryError::Call { source } => source,
        }
    }
}

/// Runs change-token calls one at a time, retrying stale tokens.
#[derive(Debug)]
pub struct TokenRetryer {
    policy: RetryPolicy,
    lock: tokio::sync::Mutex<()>,
}

impl Default for TokenRetryer {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl TokenRetryer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Calls `call` with a fresh token from `tokens` until it succeeds, fails
    /// with an error that is not a stale token, or the policy runs out of
    /// attempts.
    ///
    /// Holds the retryer's lock for the whole exchange, so concurrent
    /// callers never race each other for tokens.
    pub async fn retry_with_token<S, T, F, Fut>(
        &self,
        tokens: &S,
        mut call: F,
    ) -> Result<T, TokenRetryError<S::Error>>
    where
        S: ChangeTokenSource,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, S::Error>>,
    {
        let _guard = self.lock.lock().await;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = tokens
                .change_token()
                .await
                .map_err(|source| TokenRetryError::Acquire { source })?;
            log::trace!("attempt {attempt}/{max_attempts} with change token {token}");
            match call(token).await {
                Ok(value) => return Ok(value),
                Err(source) if source.is_stale_token() => {
                    if attempt >= max_attempts {
                        return Err(TokenRetryError::Exhausted {
                            attempts: attempt,
                            source,
                        });
                    }
                    log::warn!(
                        "stale change token on attempt {attempt}/{max_attempts}, \
                        retrying in {:?}: {source}",
                        self.policy.delay()
                    );
                    tokio::time::sleep(self.policy.delay()).await;
                }
                Err(source) => return Err(TokenRetryError::Call { source }),
            }
        }
    }
}

#[cfg(test)]
mod test;
