use super::GitObjType;
use crate::error::{GitError, GitResult};
use crate::hash::Oid;
use crate::serialize::{DeserializeSized, Serialize};
use crate::signature::Signature;
use std::io::prelude::*;

/// An annotated tag. The client only ever parses these (they show up in
/// fetched packs); it never mints them.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Tag {
    pub object: Oid,
    pub obj_type: GitObjType,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
}

impl Serialize for Tag {
    fn serialize(&self, writer: &mut dyn Write) -> GitResult<()> {
        writeln!(writer, "object {}", self.object)?;
        writeln!(writer, "type {}", self.obj_type)?;
        writeln!(writer, "tag {}", self.name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(writer, "tagger {}", tagger)?;
        }
        writeln!(writer)?;
        write!(writer, "{}", self.message)?;
        Ok(())
    }
}

impl DeserializeSized for Tag {
    fn deserialize_sized(r: &mut impl BufRead, size: u64) -> GitResult<Self> {
        let mut bytes = Vec::with_capacity(size as usize);
        r.take(size).read_to_end(&mut bytes)?;

        let text = std::str::from_utf8(&bytes)
            .map_err(|_| GitError::BadObjectFormat("non-utf8 tag object".into()))?;
        let (headers, message) = text.split_once("\n\n").unwrap_or((text, ""));

        let mut object = None;
        let mut obj_type = None;
        let mut name = None;
        let mut tagger = None;

        for line in headers.lines() {
            match line.split_once(' ') {
                Some(("object", value)) => object = Some(value.parse()?),
                Some(("type", value)) => obj_type = Some(value.parse()?),
                Some(("tag", value)) => name = Some(value.to_owned()),
                Some(("tagger", value)) => tagger = Some(value.parse()?),
                _ => continue,
            }
        }

        let missing =
            |field: &str| anyhow!(GitError::BadObjectFormat(format!("tag missing `{}`", field)));
        Ok(Self {
            object: object.ok_or_else(|| missing("object"))?,
            obj_type: obj_type.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger,
            message: message.to_owned(),
        })
    }
}
