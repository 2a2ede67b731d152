mod commit;
mod tag;
mod tree;

pub use commit::*;
pub use tag::*;
pub use tree::*;

use crate::error::{GitError, GitGenericError, GitResult};
use crate::hash::{hash_object, Oid};
use crate::serialize::{DeserializeSized, Serialize};
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum GitObjType {
    Commit = 1,
    Tree   = 2,
    Blob   = 3,
    Tag    = 4,
}

impl GitObjType {
    pub fn as_str(self) -> &'static str {
        match self {
            GitObjType::Commit => "commit",
            GitObjType::Tree => "tree",
            GitObjType::Blob => "blob",
            GitObjType::Tag => "tag",
        }
    }
}

impl Display for GitObjType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GitObjType {
    type Err = GitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(GitObjType::Commit),
            "tree" => Ok(GitObjType::Tree),
            "blob" => Ok(GitObjType::Blob),
            "tag" => Ok(GitObjType::Tag),
            _ => bail!("unknown git object type `{}`", s),
        }
    }
}

#[derive(Copy, PartialEq, Eq, Hash, Clone, TryFromPrimitive, PartialOrd, Ord)]
#[repr(u32)]
// the ordering of variants is significant here as it implements `Ord`
// we want `TREE` to be ordered after the "file" variants
pub enum FileMode {
    REG     = 0o100644,
    EXEC    = 0o100755,
    LINK    = 0o120000,
    TREE    = 0o40000,
    GITLINK = 0o160000,
}

impl Display for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let n = self.as_u32();
        if f.alternate() { write!(f, "{:o}", n) } else { write!(f, "{:06o}", n) }
    }
}

impl Debug for FileMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FileMode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_link(self) -> bool {
        matches!(self, FileMode::LINK)
    }

    pub fn is_file(self) -> bool {
        matches!(self, FileMode::EXEC | FileMode::REG)
    }

    pub fn is_blob(self) -> bool {
        matches!(self, FileMode::EXEC | FileMode::REG | FileMode::LINK)
    }

    pub fn is_tree(self) -> bool {
        matches!(self, FileMode::TREE)
    }

    pub fn from_u32(u: u32) -> GitResult<Self> {
        Self::try_from(u).map_err(|_| anyhow!(GitError::BadObjectFormat(format!(
            "invalid filemode `{:06o}`",
            u
        ))))
    }

    pub fn infer_obj_type(self) -> GitObjType {
        match self {
            Self::TREE => GitObjType::Tree,
            // a submodule entry names a commit in the submodule's repository
            Self::GITLINK => GitObjType::Commit,
            Self::EXEC | Self::REG | Self::LINK => GitObjType::Blob,
        }
    }
}

impl FromStr for FileMode {
    type Err = GitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_u32(u32::from_str_radix(s, 8)?)
    }
}

/// A parsed git object together with its id and canonical payload bytes.
///
/// The id is a pure function of kind and payload; the payload is kept
/// verbatim so the object can serve as a delta base and so that
/// reserialization is byte-exact even for objects carrying headers we do
/// not model (gpg signatures and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    oid: Oid,
    data: Vec<u8>,
    kind: ObjectKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// blob payloads are opaque; the bytes live in [`GitObject::data`]
    Blob,
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl GitObject {
    /// Parse an object from its canonical payload (no `<kind> <len>\0` header).
    pub fn parse(obj_type: GitObjType, data: Vec<u8>) -> GitResult<Self> {
        let kind = match obj_type {
            GitObjType::Blob => ObjectKind::Blob,
            GitObjType::Tree => ObjectKind::Tree(Tree::deserialize_from_slice(&data)?),
            GitObjType::Commit => ObjectKind::Commit(Commit::deserialize_from_slice(&data)?),
            GitObjType::Tag => ObjectKind::Tag(Tag::deserialize_from_slice(&data)?),
        };
        let oid = hash_object(obj_type.as_str(), &data);
        Ok(Self { oid, data, kind })
    }

    pub fn blob(bytes: Vec<u8>) -> Self {
        let oid = hash_object(GitObjType::Blob.as_str(), &bytes);
        Self { oid, data: bytes, kind: ObjectKind::Blob }
    }

    pub fn tree(tree: Tree) -> GitResult<Self> {
        let data = tree.to_bytes()?;
        let oid = hash_object(GitObjType::Tree.as_str(), &data);
        Ok(Self { oid, data, kind: ObjectKind::Tree(tree) })
    }

    pub fn commit(commit: Commit) -> GitResult<Self> {
        let data = commit.to_bytes()?;
        let oid = hash_object(GitObjType::Commit.as_str(), &data);
        Ok(Self { oid, data, kind: ObjectKind::Commit(commit) })
    }

    #[inline]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn obj_type(&self) -> GitObjType {
        match self.kind {
            ObjectKind::Blob => GitObjType::Blob,
            ObjectKind::Tree(..) => GitObjType::Tree,
            ObjectKind::Commit(..) => GitObjType::Commit,
            ObjectKind::Tag(..) => GitObjType::Tag,
        }
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn is_commit(&self) -> bool {
        matches!(self.kind, ObjectKind::Commit(..))
    }

    pub fn is_tree(&self) -> bool {
        matches!(self.kind, ObjectKind::Tree(..))
    }

    fn type_mismatch(&self, expected: GitObjType) -> GitGenericError {
        anyhow!(GitError::UnexpectedObjectType { expected, actual: self.obj_type() })
            .context(format!("object `{}`", self.oid))
    }

    pub fn as_blob(&self) -> GitResult<&[u8]> {
        match self.kind {
            ObjectKind::Blob => Ok(&self.data),
            _ => Err(self.type_mismatch(GitObjType::Blob)),
        }
    }

    pub fn as_tree(&self) -> GitResult<&Tree> {
        match &self.kind {
            ObjectKind::Tree(tree) => Ok(tree),
            _ => Err(self.type_mismatch(GitObjType::Tree)),
        }
    }

    pub fn as_commit(&self) -> GitResult<&Commit> {
        match &self.kind {
            ObjectKind::Commit(commit) => Ok(commit),
            _ => Err(self.type_mismatch(GitObjType::Commit)),
        }
    }

    pub fn as_tag(&self) -> GitResult<&Tag> {
        match &self.kind {
            ObjectKind::Tag(tag) => Ok(tag),
            _ => Err(self.type_mismatch(GitObjType::Tag)),
        }
    }
}

#[cfg(test)]
mod tests;
