use crate::error::{GitError, GitResult};
use crate::hash::Oid;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::{self, Display, Formatter};

pub const REFS_HEADS_PREFIX: &str = "refs/heads/";
pub const REFS_TAGS_PREFIX: &str = "refs/tags/";
pub const HEAD: &str = "HEAD";

lazy_static! {
    /// defines what is an invalid reference name (anything else is valid)
    // a reference name is invalid if any of the following conditions are true
    // - any path component begins with `.` (i.e. `^.`, or `/.`)
    // - contains `..`
    // - contains any of the following `*` `:` `?` `[` `\` `^` `~` <space> <tab>
    // - ends with `/` or `.lock`
    // - contains `@{`
    static ref INVALID_REF_REGEX: Regex = Regex::new(r#"^\.|/\.|\.\.|\*|:|\?|\[|\\|\^|~| |\t|/$|\.lock$|@\{"#).unwrap();
}

pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && !INVALID_REF_REGEX.is_match(s)
}

/// A server-side reference as advertised by `ls-refs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub name: String,
    pub oid: Oid,
    /// target ref name when this ref is symbolic (`HEAD -> refs/heads/main`)
    pub symref_target: Option<String>,
    /// the commit a tag points at once peeled
    pub peeled: Option<Oid>,
}

impl RemoteRef {
    pub fn new(name: impl Into<String>, oid: Oid) -> Self {
        Self { name: name.into(), oid, symref_target: None, peeled: None }
    }

    /// Parse one ls-refs response line:
    /// `<oid> <refname>[ symref-target:<target>][ peeled:<oid>]`
    pub(crate) fn parse(line: &str) -> GitResult<Self> {
        let mut parts = line.split(' ');
        let oid = parts
            .next()
            .ok_or_else(|| GitError::UnexpectedServerMessage(line.to_owned()))?
            .parse::<Oid>()
            .map_err(|_| GitError::UnexpectedServerMessage(line.to_owned()))?;
        let name = parts
            .next()
            .ok_or_else(|| GitError::UnexpectedServerMessage(line.to_owned()))?
            .to_owned();

        let mut this = Self { name, oid, symref_target: None, peeled: None };
        for attr in parts {
            if let Some(target) = attr.strip_prefix("symref-target:") {
                this.symref_target = Some(target.to_owned());
            } else if let Some(peeled) = attr.strip_prefix("peeled:") {
                this.peeled = Some(
                    peeled
                        .parse()
                        .map_err(|_| GitError::UnexpectedServerMessage(line.to_owned()))?,
                );
            }
            // unknown attributes are ignored for forward compatibility
        }
        Ok(this)
    }

    pub fn is_branch(&self) -> bool {
        self.name.starts_with(REFS_HEADS_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.name.starts_with(REFS_TAGS_PREFIX)
    }
}

impl Display for RemoteRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.oid, self.name)
    }
}

/// One receive-pack command. Creation and deletion use the zero id for the
/// absent side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub old: Oid,
    pub new: Oid,
}

impl RefUpdate {
    pub fn create(name: impl Into<String>, new: Oid) -> Self {
        Self { name: name.into(), old: Oid::ZERO, new }
    }

    /// compare-and-swap: `old` is the expected current value, which the
    /// server enforces
    pub fn update(name: impl Into<String>, old: Oid, new: Oid) -> Self {
        Self { name: name.into(), old, new }
    }

    pub fn delete(name: impl Into<String>, old: Oid) -> Self {
        Self { name: name.into(), old, new: Oid::ZERO }
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }
}

/// Interpret a receive-pack `ng` reason for one ref.
///
/// Servers phrase rejections loosely; the well-known spellings for "the ref
/// moved under you" and "the ref is already there" get their own kinds so
/// callers can react, everything else surfaces verbatim.
pub(crate) fn rejection_kind(refname: &str, reason: &str) -> GitError {
    let lowered = reason.to_ascii_lowercase();
    if lowered.contains("already exists") {
        GitError::RefAlreadyExists(refname.to_owned())
    } else if lowered.contains("fetch first")
        || lowered.contains("non-fast-forward")
        || lowered.contains("stale")
        || lowered.contains("lock")
    {
        GitError::RefStale(refname.to_owned())
    } else {
        GitError::RefUpdateRejected { refname: refname.to_owned(), reason: reason.to_owned() }
    }
}
