use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use super::*;

#[derive(Debug, Snafu, PartialEq)]
enum FakeError {
    #[snafu(display("token {token} is stale"))]
    Stale { token: String },

    #[snafu(display("no tokens left"))]
    Drained,

    #[snafu(display("access denied"))]
    Denied,
}

impl StaleToken for FakeError {
    fn is_stale_token(&self) -> bool {
        matches!(self, FakeError::Stale { .. })
    }
}

#[derive(Default)]
struct Tokens {
    issued: AtomicU32,
    drained: bool,
}

impl ChangeTokenSource for Tokens {
    type Error = FakeError;

    async fn change_token(&self) -> Result<String, FakeError> {
        ensure!(!self.drained, DrainedSnafu);
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(format!("token-{n}"))
    }
}

fn quick(max_attempts: u32) -> TokenRetryer {
    TokenRetryer::new(RetryPolicy::new(max_attempts, Duration::ZERO).unwrap())
}

#[tokio::test]
async fn retries_stale_tokens_with_fresh_ones() {
    let _ = env_logger::builder().is_test(true).try_init();

    let tokens = Tokens::default();
    let mut seen = vec![];
    let value = quick(5)
        .retry_with_token(&tokens, |token| {
            seen.push(token.clone());
            let stale = seen.len() < 3;
            async move {
                if stale {
                    StaleSnafu { token }.fail()
                } else {
                    Ok(token)
                }
            }
        })
        .await
        .unwrap();
    assert_eq!("token-2", value);
    assert_eq!(vec!["token-0", "token-1", "token-2"], seen);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let tokens = Tokens::default();
    let mut calls = 0;
    let err = quick(3)
        .retry_with_token(&tokens, |token| {
            calls += 1;
            async move { StaleSnafu { token }.fail::<()>() }
        })
        .await
        .unwrap_err();
    assert_eq!(3, calls);
    assert!(matches!(err, TokenRetryError::Exhausted { attempts: 3, .. }));
    assert_eq!(
        &FakeError::Stale {
            token: "token-2".to_owned()
        },
        err.inner()
    );
}

#[tokio::test]
async fn other_errors_are_not_retried() {
    let tokens = Tokens::default();
    let mut calls = 0;
    let err = quick(10)
        .retry_with_token(&tokens, |_| {
            calls += 1;
            async { DeniedSnafu.fail::<()>() }
        })
        .await
        .unwrap_err();
    assert_eq!(1, calls);
    assert!(matches!(err, TokenRetryError::Call { source: FakeError::Denied }));
}

#[tokio::test]
async fn token_failure_is_reported() {
    let tokens = Tokens {
        drained: true,
        ..Default::default()
    };
    let err = quick(10)
        .retry_with_token(&tokens, |_| async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, TokenRetryError::Acquire { source: FakeError::Drained }));
    assert_eq!("Could not acquire a change token: no tokens left", err.to_string());
}

#[tokio::test]
async fn concurrent_calls_do_not_interleave() {
    let retryer = Arc::new(quick(1));
    let tokens = Arc::new(Tokens::default());
    let in_flight = Arc::new(AtomicU32::new(0));

    let mut handles = vec![];
    for _ in 0..8 {
        let retryer = retryer.clone();
        let tokens = tokens.clone();
        let in_flight = in_flight.clone();
        handles.push(tokio::spawn(async move {
            retryer
                .retry_with_token(tokens.as_ref(), |_| {
                    let in_flight = in_flight.clone();
                    async move {
                        let overlapping = in_flight.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, FakeError>(overlapping)
                    }
                })
                .await
        }));
    }
    for handle in handles {
        assert_eq!(0, handle.await.unwrap().unwrap());
    }
    assert_eq!(8, tokens.issued.load(Ordering::SeqCst));
}

#[test]
fn zero_attempts_is_rejected() {
    assert!(matches!(
        RetryPolicy::new(0, Duration::from_secs(1)),
        Err(crate::Error::InvalidRetryPolicy { .. })
    ));
    let policy: RetryPolicy = toml::from_str("max_attempts = 4").unwrap();
    assert_eq!(4, policy.max_attempts);
    assert_eq!(Duration::from_secs(1), policy.delay());
}
