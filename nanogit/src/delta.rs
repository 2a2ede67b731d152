use crate::error::{GitError, GitResult};
use crate::io::ReadExt;
use std::io::{BufRead, Read};

/// A parsed delta program: two size varints followed by copy/insert
/// instructions against some base object.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Delta {
    source_size: u64,
    target_size: u64,
    ops: Vec<DeltaOp>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaOp {
    /// copy (offset, size) out of the base
    Copy(u64, u64),
    Insert(Vec<u8>),
}

impl Delta {
    pub fn deserialize(bytes: &[u8]) -> GitResult<Self> {
        let mut r = bytes;
        let source_size = r.read_size()?;
        let target_size = r.read_size()?;
        trace!(
            "Delta::deserialize (source_size: {}; target_size: {}; payload: {} bytes)",
            source_size,
            target_size,
            bytes.len()
        );

        let mut ops = vec![];
        while !r.is_empty() {
            ops.push(DeltaOp::deserialize(&mut r)?);
        }
        Ok(Self { source_size, target_size, ops })
    }

    pub fn expand(&self, base: impl AsRef<[u8]>) -> GitResult<Vec<u8>> {
        let base = base.as_ref();
        if self.source_size as usize != base.len() {
            bail!(GitError::DeltaReconstructionFailed(format!(
                "expected base of size `{}`, but given base with size `{}`",
                self.source_size,
                base.len()
            )));
        }

        let mut expanded = Vec::with_capacity(self.target_size as usize);
        for op in &self.ops {
            let slice = match op {
                &DeltaOp::Copy(offset, size) => {
                    let (offset, size) = (offset as usize, size as usize);
                    let end = offset.checked_add(size).filter(|&end| end <= base.len()).ok_or(
                        GitError::DeltaReconstructionFailed(format!(
                            "copy of {}..{} out of bounds of base with size {}",
                            offset,
                            offset + size,
                            base.len()
                        )),
                    )?;
                    &base[offset..end]
                }
                DeltaOp::Insert(slice) => slice.as_slice(),
            };
            expanded.extend_from_slice(slice)
        }

        if self.target_size as usize != expanded.len() {
            bail!(GitError::DeltaReconstructionFailed(format!(
                "expected result of size `{}`, but reconstructed `{}` bytes",
                self.target_size,
                expanded.len()
            )));
        }

        Ok(expanded)
    }
}

impl DeltaOp {
    fn deserialize(reader: &mut impl BufRead) -> GitResult<Self> {
        // the MSB of the first byte tells us whether it is a
        // `Copy` or `Insert` instruction; zero is reserved
        let byte = reader.read_u8()?;
        if byte & 0x80 != 0 {
            let n = reader.read_le_packed(byte)?;
            debug_assert_eq!(n & 0xFF << 56, 0);
            let (offset, mut size) = (n & 0xFFFF_FFFF, n >> 32);
            // an absent size means 0x10000
            if size == 0 {
                size = 0x10000;
            }
            Ok(Self::Copy(offset, size))
        } else if byte == 0 {
            bail!(GitError::DeltaReconstructionFailed("zero delta instruction byte".into()))
        } else {
            let len = byte as usize & 0x7f;
            let mut data = vec![0; len];
            reader.read_exact(&mut data).map_err(|_| {
                GitError::DeltaReconstructionFailed("truncated delta insert payload".into())
            })?;
            Ok(Self::Insert(data))
        }
    }
}

#[cfg(test)]
mod tests;
