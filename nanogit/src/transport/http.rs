use super::retry::{retry_eligible, RetryPolicy};
use super::{ByteStream, Endpoint, Service, SmartTransport};
use crate::error::{GitError, GitGenericError, GitResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{header, Method, StatusCode};
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use url::Url;

pub(crate) const DEFAULT_USER_AGENT: &str = "nanogit/0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    /// written into the `Authorization` header verbatim, so callers can
    /// supply `token <x>`, `Bearer <y>`, ...
    Token(String),
}

/// The smart-http wire. Holds only immutable configuration; every call
/// keeps its state in locals, so one transport may serve concurrent
/// operations.
pub struct HttpTransport {
    base: String,
    client: reqwest::Client,
    auth: Auth,
    user_agent: String,
    retry: Arc<dyn RetryPolicy>,
}

impl HttpTransport {
    pub fn new(
        url: &str,
        client: reqwest::Client,
        auth: Auth,
        user_agent: Option<String>,
        retry: Arc<dyn RetryPolicy>,
    ) -> GitResult<Self> {
        let base = validate_base_url(url)?;
        Ok(Self {
            base,
            client,
            auth,
            user_agent: user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn request(
        &self,
        method: Method,
        endpoint: Endpoint,
        query: Option<(&str, &str)>,
        content_type: Option<&str>,
        body: Option<Bytes>,
    ) -> GitResult<ByteStream> {
        let mut attempt = 0;
        loop {
            match self.send_once(&method, endpoint, query, content_type, body.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    if !(retry_eligible(&method, &err) && self.retry.should_retry(&err, attempt)) {
                        return Err(err);
                    }
                    warn!(
                        "retrying {} {} after transient error (attempt {}): {:#}",
                        method, endpoint, attempt, err
                    );
                    self.retry.wait(attempt).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        endpoint: Endpoint,
        query: Option<(&str, &str)>,
        content_type: Option<&str>,
        body: Option<Bytes>,
    ) -> GitResult<ByteStream> {
        let url = format!("{}/{}", self.base, endpoint_path(endpoint));
        trace!("HttpTransport::send_once: {} {}", method, url);

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("Git-Protocol", "version=2")
            .header(header::USER_AGENT, &self.user_agent);
        if let Some(value) = auth_header(&self.auth) {
            req = req.header(header::AUTHORIZATION, value);
        }
        if let Some((key, value)) = query {
            req = req.query(&[(key, value)]);
        }
        if let Some(content_type) = content_type {
            req = req.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let resp = req.send().await.map_err(|err| network_err(method, endpoint, err))?;
        let status = resp.status();
        if let Some(kind) = classify_status(status) {
            debug!("{} {} -> {}", method, endpoint, status);
            return Err(anyhow::Error::new(kind)
                .context(format!("{} {}: http status {}", method, endpoint, status)));
        }

        trace!("{} {} -> {}", method, endpoint, status);
        let stream = resp
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        Ok(Box::new(StreamReader::new(Box::pin(stream))) as ByteStream)
    }
}

#[async_trait::async_trait]
impl SmartTransport for HttpTransport {
    async fn smart_info(&self, service: Service) -> GitResult<ByteStream> {
        self.request(
            Method::GET,
            Endpoint::InfoRefs,
            Some(("service", service.as_str())),
            None,
            None,
        )
        .await
    }

    async fn upload_pack(&self, body: Bytes) -> GitResult<ByteStream> {
        self.request(
            Method::POST,
            Endpoint::UploadPack,
            None,
            Some("application/x-git-upload-pack-request"),
            Some(body),
        )
        .await
    }

    async fn receive_pack(&self, body: Bytes) -> GitResult<ByteStream> {
        self.request(
            Method::POST,
            Endpoint::ReceivePack,
            None,
            Some("application/x-git-receive-pack-request"),
            Some(body),
        )
        .await
    }
}

fn endpoint_path(endpoint: Endpoint) -> &'static str {
    match endpoint {
        Endpoint::InfoRefs => "info/refs",
        Endpoint::UploadPack => "git-upload-pack",
        Endpoint::ReceivePack => "git-receive-pack",
    }
}

/// Only http(s) urls are accepted; the trailing slash is stripped once at
/// construction so endpoint paths join cleanly.
pub(crate) fn validate_base_url(url: &str) -> GitResult<String> {
    let parsed = Url::parse(url)
        .map_err(|err| anyhow!(GitError::InvalidUrl(format!("`{}`: {}", url, err))))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => bail!(GitError::InvalidUrl(format!(
            "`{}`: unsupported scheme `{}`",
            url, scheme
        ))),
    }
    ensure!(
        parsed.host_str().is_some(),
        GitError::InvalidUrl(format!("`{}`: missing host", url))
    );
    Ok(url.trim_end_matches('/').to_owned())
}

pub(crate) fn auth_header(auth: &Auth) -> Option<String> {
    match auth {
        Auth::None => None,
        Auth::Basic { username, password } => {
            Some(format!("Basic {}", BASE64.encode(format!("{}:{}", username, password))))
        }
        Auth::Token(token) => Some(token.clone()),
    }
}

/// Map an http status to the error taxonomy; `None` is success.
pub(crate) fn classify_status(status: StatusCode) -> Option<GitError> {
    let code = status.as_u16();
    match code {
        200..=299 => None,
        401 => Some(GitError::Unauthorized),
        403 => Some(GitError::PermissionDenied),
        404 => Some(GitError::RepositoryNotFound),
        429 => Some(GitError::ServerUnavailable(code)),
        500..=599 => Some(GitError::ServerUnavailable(code)),
        _ => Some(GitError::ClientError(code)),
    }
}

fn network_err(method: &Method, endpoint: Endpoint, err: reqwest::Error) -> GitGenericError {
    let timeout = err.is_timeout();
    anyhow::Error::new(GitError::Network { detail: err.to_string(), timeout })
        .context(format!("{} {}: request failed", method, endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GitErrorExt;

    #[test]
    fn base_url_strips_trailing_slash() -> GitResult<()> {
        assert_eq!(validate_base_url("https://example.com/owner/repo/")?, "https://example.com/owner/repo");
        assert_eq!(validate_base_url("http://example.com/r")?, "http://example.com/r");
        Ok(())
    }

    #[test]
    fn base_url_rejects_non_http_schemes() {
        for url in ["ssh://example.com/r.git", "git://example.com/r", "file:///tmp/repo", "not a url"] {
            let err = validate_base_url(url).unwrap_err();
            assert!(
                matches!(err.git_kind(), Some(GitError::InvalidUrl(..))),
                "`{}` should be an invalid url",
                url
            );
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), None);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), Some(GitError::Unauthorized));
        assert_eq!(classify_status(StatusCode::FORBIDDEN), Some(GitError::PermissionDenied));
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Some(GitError::RepositoryNotFound));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(GitError::ServerUnavailable(429))
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(GitError::ServerUnavailable(500))
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(GitError::ServerUnavailable(503))
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Some(GitError::ClientError(400)));
        assert_eq!(classify_status(StatusCode::GONE), Some(GitError::ClientError(410)));
    }

    #[test]
    fn basic_auth_header_is_base64() {
        let auth = Auth::Basic { username: "user".into(), password: "pass".into() };
        // base64("user:pass")
        assert_eq!(auth_header(&auth).unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn token_auth_header_is_verbatim() {
        assert_eq!(auth_header(&Auth::Token("Bearer xyz".into())).unwrap(), "Bearer xyz");
        assert_eq!(auth_header(&Auth::Token("token abc".into())).unwrap(), "token abc");
        assert_eq!(auth_header(&Auth::None), None);
    }
}
