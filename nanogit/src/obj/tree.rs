use super::FileMode;
use crate::error::{GitError, GitResult};
use crate::hash::Oid;
use crate::io::BufReadExt;
use crate::serialize::{DeserializeSized, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;

#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree from entries in any order; they are sorted into git's
    /// tree order before hashing, so the id is invariant under the caller's
    /// presentation order.
    pub fn new(mut entries: Vec<TreeEntry>) -> GitResult<Self> {
        for entry in &entries {
            entry.validate()?;
        }
        entries.sort_unstable();
        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                bail!(GitError::BadObjectFormat(format!(
                    "duplicate tree entry `{}`",
                    window[0].name
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl Serialize for Tree {
    fn serialize(&self, writer: &mut dyn Write) -> GitResult<()> {
        for entry in &self.entries {
            entry.serialize(writer)?;
        }
        Ok(())
    }
}

impl DeserializeSized for Tree {
    fn deserialize_sized(r: &mut impl BufRead, size: u64) -> GitResult<Self>
    where
        Self: Sized,
    {
        let r = &mut r.take(size);
        let mut entries = vec![];
        while !r.is_at_eof()? {
            entries.push(TreeEntry::deserialize(r)?);
        }
        // trees on the wire are already in sort order; don't resort so that
        // reserialization stays byte-exact
        debug_assert!(entries.windows(2).all(|w| w[0] <= w[1]));
        Ok(Self { entries })
    }
}

#[derive(PartialEq, Debug, Clone, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<String>, oid: Oid) -> Self {
        Self { mode, name: name.into(), oid }
    }

    fn validate(&self) -> GitResult<()> {
        if self.name.is_empty() || self.name.contains('/') || self.name.contains('\0') {
            bail!(GitError::BadObjectFormat(format!("invalid tree entry name `{}`", self.name)));
        }
        Ok(())
    }

    // files must sort before their directory siblings with the same prefix
    // i.e. index.rs < index/
    // the trailing slash is not stored in the entry so we append one when comparing
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode.is_tree() {
            key.push(b'/');
        }
        key
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Display for TreeEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\t{}", self.mode, self.mode.infer_obj_type(), self.oid, self.name)
    }
}

impl TreeEntry {
    fn deserialize(r: &mut impl BufRead) -> GitResult<Self> {
        let mut buf = vec![];
        let i = r.read_until(0x20, &mut buf)?;
        ensure!(i > 1, GitError::BadObjectFormat("truncated tree entry mode".into()));
        let mode = std::str::from_utf8(&buf[..i - 1])?.parse::<FileMode>()?;

        let j = r.read_until(0x00, &mut buf)?;
        ensure!(j > 1, GitError::BadObjectFormat("truncated tree entry name".into()));
        let name = std::str::from_utf8(&buf[i..i + j - 1])
            .map_err(|_| GitError::BadObjectFormat("non-utf8 tree entry name".into()))?
            .to_owned();

        let mut hash_bytes = [0; 20];
        r.read_exact(&mut hash_bytes)?;
        Ok(Self { mode, name, oid: Oid::new(hash_bytes) })
    }

    fn serialize(&self, writer: &mut dyn Write) -> GitResult<()> {
        // use alternate display impl to not pad an extra 0
        write!(writer, "{:#}", self.mode)?;
        writer.write_all(b" ")?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b"\0")?;
        writer.write_all(self.oid.as_ref())?;
        Ok(())
    }
}
