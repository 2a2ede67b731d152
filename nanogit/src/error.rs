use crate::hash::Oid;
use crate::obj::GitObjType;
use thiserror::Error;

pub type GitResult<T> = Result<T, GitGenericError>;
pub type GitGenericError = anyhow::Error;

/// The matchable error kinds of the crate.
///
/// Most code passes `anyhow` errors around; this enum exists so callers (and
/// the transport retry filter) have a "rust" representation they can test or
/// match against. Errors are wrapped with context as they cross layer
/// boundaries, so matching goes through [`GitErrorExt`]/[`GitResultExt`]
/// which downcast to the original kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GitError {
    // transport
    #[error("authentication required")]
    Unauthorized,
    #[error("permission denied")]
    PermissionDenied,
    #[error("repository not found")]
    RepositoryNotFound,
    #[error("server unavailable (http status {0})")]
    ServerUnavailable(u16),
    #[error("network error: {detail}")]
    Network { detail: String, timeout: bool },
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("client error (http status {0})")]
    ClientError(u16),

    // protocol
    #[error("malformed pkt-line: {0}")]
    MalformedPktLine(String),
    #[error("unexpected server message: `{0}`")]
    UnexpectedServerMessage(String),
    #[error("remote error: {0}")]
    ServerReported(String),

    // packfile
    #[error("bad pack header")]
    BadPackHeader,
    #[error("unsupported pack version `{0}`")]
    UnsupportedPackVersion(u32),
    #[error("truncated pack")]
    TruncatedPack,
    #[error("pack trailer mismatch (expected `{expected}`, found `{actual}`)")]
    BadPackTrailer { expected: Oid, actual: Oid },
    #[error("delta base `{0}` missing")]
    DeltaBaseMissing(Oid),
    #[error("delta reconstruction failed: {0}")]
    DeltaReconstructionFailed(String),

    // objects
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("expected a {expected}, found a {actual}")]
    UnexpectedObjectType { expected: GitObjType, actual: GitObjType },
    #[error("bad object format: {0}")]
    BadObjectFormat(String),

    // references & writer
    #[error("ref `{0}` not found")]
    RefNotFound(String),
    #[error("ref `{0}` already exists")]
    RefAlreadyExists(String),
    #[error("ref `{0}` is stale, fetch first")]
    RefStale(String),
    #[error("update of ref `{refname}` rejected: {reason}")]
    RefUpdateRejected { refname: String, reason: String },
    #[error("server failed to unpack: {0}")]
    PackUnpack(String),
    #[error("path `{0}` not found")]
    PathNotFound(String),
    #[error("path `{0}` already exists")]
    PathAlreadyExists(String),
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("nothing to push")]
    NothingToPush,

    // configuration
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

pub trait GitErrorExt {
    fn git_kind(&self) -> Option<&GitError>;
    fn try_into_git_error(self) -> GitResult<GitError>;
    fn try_into_ref_rejection(self) -> GitResult<(String, String)>;
}

impl GitErrorExt for GitGenericError {
    /// The original kind, looked through however many layers of context
    /// were added on the way up.
    fn git_kind(&self) -> Option<&GitError> {
        self.downcast_ref::<GitError>()
    }

    /// Converts a generic error into its kind, handing the error back
    /// unchanged when it carries no kind.
    fn try_into_git_error(self) -> GitResult<GitError> {
        self.downcast::<GitError>()
    }

    fn try_into_ref_rejection(self) -> GitResult<(String, String)> {
        match self.try_into_git_error()? {
            GitError::RefUpdateRejected { refname, reason } => Ok((refname, reason)),
            err => Err(anyhow!(err)),
        }
    }
}

pub trait GitResultExt {
    fn is_not_found_err(&self) -> bool;
    fn is_transient_err(&self) -> bool;
    fn is_auth_err(&self) -> bool;
}

macro_rules! error_ext_is_method {
    ($method:ident) => {
        fn $method(&self) -> bool {
            match self {
                Ok(..) => false,
                Err(err) => err.$method(),
            }
        }
    };
}

impl<T> GitResultExt for GitResult<T> {
    error_ext_is_method!(is_not_found_err);

    error_ext_is_method!(is_transient_err);

    error_ext_is_method!(is_auth_err);
}

impl GitResultExt for GitGenericError {
    fn is_not_found_err(&self) -> bool {
        matches!(
            self.git_kind(),
            Some(
                GitError::ObjectNotFound(..)
                    | GitError::RefNotFound(..)
                    | GitError::PathNotFound(..)
                    | GitError::RepositoryNotFound
            )
        )
    }

    /// Whether the error is, on its own, worth retrying. The transport
    /// additionally applies the http-method safety filter on top of this.
    fn is_transient_err(&self) -> bool {
        match self.git_kind() {
            Some(GitError::ServerUnavailable(..)) => true,
            Some(GitError::Network { timeout, .. }) => *timeout,
            _ => false,
        }
    }

    fn is_auth_err(&self) -> bool {
        matches!(self.git_kind(), Some(GitError::Unauthorized | GitError::PermissionDenied))
    }
}
