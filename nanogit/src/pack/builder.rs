use crate::error::GitResult;
use crate::io::{deflate, HashWriter, WriteExt};
use crate::obj::{GitObject, GitObjType};
use std::io::prelude::*;

/// Emits a version-2 packfile containing full (undeltified) objects.
///
/// Deltification is an optimisation the sender is free to skip; pushes from
/// this client are small sets of freshly minted objects, so every record is
/// written whole.
#[derive(Default)]
pub struct PackBuilder {
    objects: Vec<(GitObjType, Vec<u8>)>,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_object(&mut self, obj: &GitObject) -> &mut Self {
        self.push_raw(obj.obj_type(), obj.data().to_vec())
    }

    pub fn push_raw(&mut self, obj_type: GitObjType, bytes: Vec<u8>) -> &mut Self {
        self.objects.push((obj_type, bytes));
        self
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// magic + version + count, one record per object, then the trailing
    /// hash over everything before it
    pub fn build(self) -> GitResult<Vec<u8>> {
        let mut buf = vec![];
        let mut writer = HashWriter::new_sha1(&mut buf);
        writer.write_all(super::PACK_SIGNATURE)?;
        writer.write_u32(super::PACK_VERSION)?;
        writer.write_u32(self.objects.len() as u32)?;

        for (obj_type, bytes) in &self.objects {
            // low 3 bits of the leading nibble carry the type, the size
            // rides in a little-endian 7-bit varint around it
            writer.write_le_varint_with_shift(*obj_type as u8, bytes.len() as u64, 3)?;
            writer.write_all(&deflate(bytes)?)?;
        }

        let hash = writer.write_hash()?;
        trace!("PackBuilder::build: {} objects, pack hash {}", self.objects.len(), hash);
        Ok(buf)
    }

    /// a pack carrying no objects; ref-only updates still attach one
    pub fn empty() -> GitResult<Vec<u8>> {
        Self::new().build()
    }
}
