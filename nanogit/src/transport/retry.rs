use crate::error::{GitError, GitErrorExt, GitGenericError, GitResult, GitResultExt};
use reqwest::Method;
use std::time::Duration;

/// Pluggable backoff strategy driving the transport's retry loop.
///
/// The policy only answers "is this worth another attempt and how long do I
/// wait"; whether an error is *safe* to replay at all is decided by the
/// transport's temporariness filter ([`retry_eligible`]), which is layered
/// on top and cannot be overridden.
#[async_trait::async_trait]
pub trait RetryPolicy: Send + Sync {
    fn max_attempts(&self) -> u32;

    /// `attempt` counts completed tries, starting at zero.
    fn should_retry(&self, err: &GitGenericError, attempt: u32) -> bool;

    async fn wait(&self, attempt: u32) -> GitResult<()>;
}

/// Exponential backoff with a delay cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(200), max_delay: Duration::from_secs(5), attempts: 3 }
    }
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max_delay)
    }
}

#[async_trait::async_trait]
impl RetryPolicy for Backoff {
    fn max_attempts(&self) -> u32 {
        self.attempts
    }

    fn should_retry(&self, err: &GitGenericError, attempt: u32) -> bool {
        attempt + 1 < self.attempts && err.is_transient_err()
    }

    async fn wait(&self, attempt: u32) -> GitResult<()> {
        tokio::time::sleep(self.delay(attempt)).await;
        Ok(())
    }
}

/// A policy that never retries.
pub struct NoRetry;

#[async_trait::async_trait]
impl RetryPolicy for NoRetry {
    fn max_attempts(&self) -> u32 {
        1
    }

    fn should_retry(&self, _err: &GitGenericError, _attempt: u32) -> bool {
        false
    }

    async fn wait(&self, _attempt: u32) -> GitResult<()> {
        Ok(())
    }
}

/// The transport's temporariness filter.
///
/// An error may be replayed only when (i) it is a network error that timed
/// out, or (ii) the server said it was unavailable *and* the http method is
/// safe to resend. A POST body has already been consumed by the time a 5xx
/// status is known, so POSTs are only replayed on 429 (rate limiting does
/// not consume the request server-side). Cancellation and deadline expiry
/// are never retried.
pub(crate) fn retry_eligible(method: &Method, err: &GitGenericError) -> bool {
    let kind = match err.git_kind() {
        Some(kind) => kind,
        None => return false,
    };
    match kind {
        GitError::Cancelled | GitError::DeadlineExceeded => false,
        GitError::Network { timeout, .. } => *timeout,
        GitError::ServerUnavailable(status) => {
            if *method == Method::GET || *method == Method::DELETE {
                true
            } else if *method == Method::POST {
                *status == 429
            } else {
                // method unknown: conservatively no
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable(status: u16) -> GitGenericError {
        anyhow::Error::new(GitError::ServerUnavailable(status)).context("POST git-receive-pack")
    }

    #[test]
    fn post_on_5xx_is_never_replayed() {
        assert!(!retry_eligible(&Method::POST, &unavailable(500)));
        assert!(!retry_eligible(&Method::POST, &unavailable(503)));
    }

    #[test]
    fn post_on_429_is_replayed() {
        assert!(retry_eligible(&Method::POST, &unavailable(429)));
    }

    #[test]
    fn get_on_5xx_is_replayed() {
        assert!(retry_eligible(&Method::GET, &unavailable(503)));
        assert!(retry_eligible(&Method::GET, &unavailable(500)));
        assert!(retry_eligible(&Method::DELETE, &unavailable(502)));
    }

    #[test]
    fn timeouts_are_replayed_for_any_method() {
        let err = anyhow::Error::new(GitError::Network {
            detail: "connect timed out".into(),
            timeout: true,
        });
        assert!(retry_eligible(&Method::GET, &err));
        assert!(retry_eligible(&Method::POST, &err));
    }

    #[test]
    fn non_timeout_network_errors_are_terminal() {
        let err = anyhow::Error::new(GitError::Network {
            detail: "connection reset".into(),
            timeout: false,
        });
        assert!(!retry_eligible(&Method::GET, &err));
    }

    #[test]
    fn cancellation_is_never_replayed() {
        assert!(!retry_eligible(&Method::GET, &anyhow::Error::new(GitError::Cancelled)));
        assert!(!retry_eligible(&Method::POST, &anyhow::Error::new(GitError::DeadlineExceeded)));
    }

    #[test]
    fn unknown_methods_are_conservative() {
        assert!(!retry_eligible(&Method::PUT, &unavailable(503)));
    }

    #[test]
    fn terminal_kinds_are_not_eligible() {
        for kind in [
            GitError::Unauthorized,
            GitError::PermissionDenied,
            GitError::RepositoryNotFound,
            GitError::ClientError(400),
        ] {
            assert!(!retry_eligible(&Method::GET, &anyhow::Error::new(kind)));
        }
    }

    #[test]
    fn backoff_respects_attempt_budget() {
        let policy = Backoff { attempts: 3, ..Default::default() };
        let err = unavailable(503);
        assert!(policy.should_retry(&err, 0));
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
    }

    #[test]
    fn backoff_delay_is_capped() {
        let policy = Backoff::default();
        assert!(policy.delay(30) <= policy.max_delay);
        assert!(policy.delay(0) >= policy.base);
    }

    #[test]
    fn no_retry_policy_never_retries() {
        assert!(!NoRetry.should_retry(&unavailable(503), 0));
        assert_eq!(NoRetry.max_attempts(), 1);
    }
}
