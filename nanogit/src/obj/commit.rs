use crate::error::{GitError, GitResult};
use crate::hash::Oid;
use crate::serialize::{DeserializeSized, Serialize};
use crate::signature::Signature;
use std::fmt::{self, Display, Formatter};
use std::io::prelude::*;

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Commit {
    pub tree: Oid,
    /// empty for a root commit
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn new(
        tree: Oid,
        parents: Vec<Oid>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        Self { tree, parents, author, committer, message: message.into() }
    }

    /// first parent, if any
    pub fn parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut buf = vec![];
        self.serialize(&mut buf).map_err(|_| fmt::Error)?;
        write!(f, "{}", String::from_utf8_lossy(&buf))
    }
}

impl Serialize for Commit {
    fn serialize(&self, writer: &mut dyn Write) -> GitResult<()> {
        writeln!(writer, "tree {}", self.tree)?;
        for parent in &self.parents {
            writeln!(writer, "parent {}", parent)?;
        }
        writeln!(writer, "author {}", self.author)?;
        writeln!(writer, "committer {}", self.committer)?;
        writeln!(writer)?;
        write!(writer, "{}", self.message)?;
        Ok(())
    }
}

impl DeserializeSized for Commit {
    fn deserialize_sized(r: &mut impl BufRead, size: u64) -> GitResult<Self> {
        let mut bytes = Vec::with_capacity(size as usize);
        r.take(size).read_to_end(&mut bytes)?;

        // headers run up to the first blank line, the message is everything after
        let (headers, message) = match find_blank_line(&bytes) {
            Some(i) => (&bytes[..i], &bytes[i + 2..]),
            None => (&bytes[..], &[][..]),
        };
        let headers = std::str::from_utf8(headers)
            .map_err(|_| GitError::BadObjectFormat("non-utf8 commit headers".into()))?;

        let mut tree = None;
        let mut parents = vec![];
        let mut author = None;
        let mut committer = None;

        for (key, value) in header_fields(headers) {
            match key {
                "tree" => tree = Some(value.parse()?),
                "parent" => parents.push(value.parse()?),
                "author" => author = Some(value.parse()?),
                "committer" => committer = Some(value.parse()?),
                // gpgsig, mergetag, encoding etc. are preserved via the raw
                // object payload, not remodelled here
                _ => continue,
            }
        }

        let missing =
            |field: &str| anyhow!(GitError::BadObjectFormat(format!("commit missing `{}`", field)));
        Ok(Self {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            message: String::from_utf8(message.to_vec())
                .map_err(|_| GitError::BadObjectFormat("non-utf8 commit message".into()))?,
        })
    }
}

fn find_blank_line(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\n\n")
}

/// Iterate `key value` header lines, folding continuation lines (leading
/// space) into the previous value.
fn header_fields(headers: &str) -> Vec<(&str, String)> {
    let mut fields: Vec<(&str, String)> = vec![];
    for line in headers.lines() {
        if let Some(continuation) = line.strip_prefix(' ') {
            if let Some((_, value)) = fields.last_mut() {
                value.push('\n');
                value.push_str(continuation);
            }
            continue;
        }
        match line.split_once(' ') {
            Some((key, value)) => fields.push((key, value.to_owned())),
            None => fields.push((line, String::new())),
        }
    }
    fields
}
