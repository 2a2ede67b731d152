mod http;
mod retry;

pub use http::{Auth, HttpTransport};
pub use retry::{Backoff, NoRetry, RetryPolicy};

use crate::error::GitResult;
use bytes::Bytes;
use std::fmt::{self, Display, Formatter};
use tokio::io::AsyncBufRead;

/// A streamed response body. The transport never buffers bodies whole; the
/// caller drives the stream and drops it to abandon the remainder.
pub type ByteStream = Box<dyn AsyncBufRead + Send + Unpin>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Endpoint tag attached to transport errors.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Endpoint {
    InfoRefs,
    UploadPack,
    ReceivePack,
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Endpoint::InfoRefs => "info/refs",
            Endpoint::UploadPack => "git-upload-pack",
            Endpoint::ReceivePack => "git-receive-pack",
        };
        write!(f, "{}", s)
    }
}

/// The three smart-http operations, abstracted so protocol code (and tests)
/// are indifferent to the wire.
#[async_trait::async_trait]
pub trait SmartTransport: Send + Sync {
    /// `GET <base>/info/refs?service=<service>`
    async fn smart_info(&self, service: Service) -> GitResult<ByteStream>;

    /// `POST <base>/git-upload-pack`
    async fn upload_pack(&self, body: Bytes) -> GitResult<ByteStream>;

    /// `POST <base>/git-receive-pack`
    async fn receive_pack(&self, body: Bytes) -> GitResult<ByteStream>;
}
