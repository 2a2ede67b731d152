mod builder;

pub use builder::PackBuilder;

use crate::delta::Delta;
use crate::error::{GitError, GitResult};
use crate::hash::{hash_object, Oid, Sha1Hash};
use crate::obj::GitObjType;
use crate::store::ObjectStore;
use flate2::{Decompress, FlushDecompress};
use num_enum::TryFromPrimitive;
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};
use smallvec::{smallvec, SmallVec};
use std::collections::VecDeque;
use std::convert::TryFrom;
use std::fmt::{self, Debug, Formatter};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;

/// A fully inflated, delta-resolved object payload as it came out of a pack.
#[derive(PartialEq, Eq, Clone)]
pub struct PackObjRaw {
    pub obj_type: GitObjType,
    pub bytes: Vec<u8>,
}

impl Debug for PackObjRaw {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PackObjRaw({:?}, {} bytes)", self.obj_type, self.bytes.len())
    }
}

impl PackObjRaw {
    fn expand_with_delta_bytes(&self, delta_bytes: &[u8]) -> GitResult<Self> {
        trace!("PackObjRaw::expand_with_delta_bytes(..)");
        let delta = Delta::deserialize(delta_bytes)?;
        // the expanded base of a delta always shares its type
        Ok(Self { obj_type: self.obj_type, bytes: delta.expand(&self.bytes)? })
    }
}

/// An object emitted by [`PackReader`], with its id computed over the
/// resolved payload.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PackedObject {
    pub oid: Oid,
    pub raw: PackObjRaw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive)]
#[repr(u8)]
enum PackObjType {
    Commit   = 1,
    Tree     = 2,
    Blob     = 3,
    Tag      = 4,
    OfsDelta = 6,
    RefDelta = 7,
}

impl PackObjType {
    fn try_from_u8(ty: u8) -> GitResult<Self> {
        PackObjType::try_from(ty)
            .map_err(|_| anyhow!(GitError::BadObjectFormat(format!("invalid pack object type `{}`", ty))))
    }
}

impl From<PackObjType> for GitObjType {
    fn from(obj_type: PackObjType) -> GitObjType {
        match obj_type {
            PackObjType::Commit => GitObjType::Commit,
            PackObjType::Tree => GitObjType::Tree,
            PackObjType::Blob => GitObjType::Blob,
            PackObjType::Tag => GitObjType::Tag,
            PackObjType::OfsDelta | PackObjType::RefDelta =>
                unreachable!("delta pack types carry no object type"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct PackObjHeader {
    obj_type: PackObjType,
    size: u64,
}

/// A buffered reader that hashes what it consumes, so the running digest is
/// available when the pack trailer comes around, and counts consumed bytes
/// so ofs-delta bases can be located.
struct HashBufReader<R> {
    reader: R,
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    consumed: u64,
    hasher: Sha1,
}

const BUF_SIZE: usize = 8 * 1024;

impl<R: AsyncRead + Unpin> HashBufReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0; BUF_SIZE].into_boxed_slice(),
            pos: 0,
            cap: 0,
            consumed: 0,
            hasher: Sha1::new(),
        }
    }

    async fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.cap {
            self.cap = self.reader.read(&mut self.buf).await?;
            self.pos = 0;
        }
        Ok(&self.buf[self.pos..self.cap])
    }

    fn consume(&mut self, amt: usize) {
        debug_assert!(self.pos + amt <= self.cap);
        self.hasher.update(&self.buf[self.pos..self.pos + amt]);
        self.pos += amt;
        self.consumed += amt as u64;
    }

    /// consume without feeding the digest; only the trailer itself is read
    /// this way
    fn consume_unhashed(&mut self, amt: usize) {
        debug_assert!(self.pos + amt <= self.cap);
        self.pos += amt;
        self.consumed += amt as u64;
    }

    async fn read_exact(&mut self, out: &mut [u8], hashed: bool) -> GitResult<()> {
        let mut filled = 0;
        while filled < out.len() {
            let input = self.fill_buf().await?;
            if input.is_empty() {
                bail!(GitError::TruncatedPack);
            }
            let n = input.len().min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&input[..n]);
            if hashed { self.consume(n) } else { self.consume_unhashed(n) }
            filled += n;
        }
        Ok(())
    }

    async fn read_u8(&mut self) -> GitResult<u8> {
        let mut byte = 0u8;
        self.read_exact(std::slice::from_mut(&mut byte), true).await?;
        Ok(byte)
    }

    async fn read_u32(&mut self) -> GitResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf, true).await?;
        Ok(u32::from_be_bytes(buf))
    }

    fn digest_so_far(&self) -> Sha1Hash {
        Sha1Hash::from(self.hasher.clone().finalize())
    }
}

/// Streaming packfile decoder.
///
/// Objects are emitted as soon as they are reconstructable. Ref-deltas whose
/// base has not yet been seen (in this pack or in the caller's store) are
/// parked and emitted when the base arrives; bases still unresolved once the
/// object count is exhausted are reported through [`PackReader::missing_bases`].
pub struct PackReader<R> {
    reader: HashBufReader<R>,
    objectc: u32,
    records_read: u32,
    by_offset: FxHashMap<u64, usize>,
    by_oid: FxHashMap<Oid, usize>,
    raws: Vec<PackObjRaw>,
    pending: FxHashMap<Oid, Vec<PendingRefDelta>>,
    ready: VecDeque<PackedObject>,
    trailer: Option<Sha1Hash>,
}

struct PendingRefDelta {
    offset: u64,
    delta_bytes: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PackReader<R> {
    pub async fn new(reader: R) -> GitResult<Self> {
        let mut reader = HashBufReader::new(reader);
        let mut sig = [0u8; 4];
        reader.read_exact(&mut sig, true).await.map_err(|_| GitError::BadPackHeader)?;
        if &sig != PACK_SIGNATURE {
            bail!(GitError::BadPackHeader);
        }
        let version = reader.read_u32().await.map_err(|_| GitError::BadPackHeader)?;
        if version != PACK_VERSION {
            bail!(GitError::UnsupportedPackVersion(version));
        }
        let objectc = reader.read_u32().await.map_err(|_| GitError::BadPackHeader)?;
        debug!("PackReader::new: pack announces {} objects", objectc);
        Ok(Self {
            reader,
            objectc,
            records_read: 0,
            by_offset: Default::default(),
            by_oid: Default::default(),
            raws: Default::default(),
            pending: Default::default(),
            ready: Default::default(),
            trailer: None,
        })
    }

    /// the object count announced by the pack header; authoritative
    pub fn object_count(&self) -> u32 {
        self.objectc
    }

    /// The next resolved object, in emission order, or `None` once the
    /// announced object count is exhausted and the trailer has validated.
    pub async fn next_object(&mut self, store: &ObjectStore) -> GitResult<Option<PackedObject>> {
        loop {
            if let Some(obj) = self.ready.pop_front() {
                return Ok(Some(obj));
            }
            if self.records_read == self.objectc {
                self.validate_trailer().await?;
                return Ok(None);
            }
            self.read_record(store).await?;
        }
    }

    /// Base ids of ref-deltas that could not be resolved from this pack or
    /// the caller's store, with the number of deltas parked on each.
    /// Meaningful once `next_object` has returned `None`.
    pub fn missing_bases(&self) -> Vec<(Oid, usize)> {
        let mut missing =
            self.pending.iter().map(|(&oid, todos)| (oid, todos.len())).collect::<Vec<_>>();
        missing.sort_unstable();
        missing
    }

    async fn validate_trailer(&mut self) -> GitResult<()> {
        if self.trailer.is_some() {
            return Ok(());
        }
        let expected = self.reader.digest_so_far();
        let mut trailer = [0u8; 20];
        self.reader.read_exact(&mut trailer, false).await?;
        let actual = Sha1Hash::new(trailer);
        if actual != expected {
            bail!(GitError::BadPackTrailer { expected, actual });
        }
        trace!("PackReader::validate_trailer: pack hash {}", actual);
        self.trailer = Some(actual);
        Ok(())
    }

    // 3 bits object type, MSB means read another size byte
    // the size is the inflated size, not the size in the pack
    async fn read_pack_obj_header(&mut self) -> GitResult<PackObjHeader> {
        let byte = self.reader.read_u8().await?;
        let obj_type = PackObjType::try_from_u8((byte >> 4) & 0x7)?;
        let mut size = (byte & 0x0f) as u64;
        let mut shift = 4;
        let mut byte = byte;
        while byte & 0x80 != 0 {
            byte = self.reader.read_u8().await?;
            size |= ((byte & 0x7f) as u64) << shift;
            shift += 7;
        }
        Ok(PackObjHeader { obj_type, size })
    }

    // backward-offset encoding used by ofs-delta records
    async fn read_offset(&mut self) -> GitResult<u64> {
        let mut byte = self.reader.read_u8().await? as u64;
        let mut offset = byte & 0x7f;
        while byte & 0x80 != 0 {
            offset += 1;
            byte = self.reader.read_u8().await? as u64;
            offset = (offset << 7) | (byte & 0x7f);
        }
        Ok(offset)
    }

    async fn read_oid(&mut self) -> GitResult<Oid> {
        let mut buf = [0u8; 20];
        self.reader.read_exact(&mut buf, true).await?;
        Ok(Oid::new(buf))
    }

    /// Inflate one zlib stream in place, stopping at its natural end so the
    /// reader is left positioned at the next record.
    async fn inflate(&mut self, size_hint: u64) -> GitResult<Vec<u8>> {
        let mut decompressor = Decompress::new(true);
        let mut output = Vec::with_capacity(size_hint as usize);
        loop {
            let input = self.reader.fill_buf().await?;
            let at_eof = input.is_empty();
            let in_so_far = decompressor.total_in();
            let flush = if at_eof { FlushDecompress::Finish } else { FlushDecompress::None };
            let status = decompressor
                .decompress_vec(input, &mut output, flush)
                .map_err(|err| anyhow!(GitError::BadObjectFormat(format!("zlib: {}", err))))?;
            let consumed = (decompressor.total_in() - in_so_far) as usize;
            self.reader.consume(consumed);
            match status {
                flate2::Status::StreamEnd => break,
                flate2::Status::Ok | flate2::Status::BufError => {
                    if at_eof {
                        bail!(GitError::TruncatedPack);
                    }
                    // a lying size prefix must not wedge the decompressor
                    if output.len() == output.capacity() {
                        output.reserve(BUF_SIZE);
                    }
                }
            }
        }
        if output.len() as u64 != size_hint {
            bail!(GitError::BadObjectFormat(format!(
                "object inflated to {} bytes but the record header declared {}",
                output.len(),
                size_hint
            )));
        }
        Ok(output)
    }

    async fn read_record(&mut self, store: &ObjectStore) -> GitResult<()> {
        let offset = self.reader.consumed;
        let PackObjHeader { obj_type, size } = self.read_pack_obj_header().await?;
        trace!("PackReader::read_record(offset: {}, type: {:?}, size: {})", offset, obj_type, size);
        self.records_read += 1;

        match obj_type {
            PackObjType::Commit | PackObjType::Tree | PackObjType::Blob | PackObjType::Tag => {
                let bytes = self.inflate(size).await?;
                let raw = PackObjRaw { obj_type: obj_type.into(), bytes };
                self.emit(offset, raw)?;
            }
            PackObjType::OfsDelta => {
                let rel = self.read_offset().await?;
                let delta_bytes = self.inflate(size).await?;
                let base_offset = offset.checked_sub(rel).ok_or_else(|| {
                    anyhow!(GitError::BadObjectFormat(format!(
                        "ofs-delta at {} reaches {} bytes back before the pack start",
                        offset, rel
                    )))
                })?;
                let base = match self.by_offset.get(&base_offset) {
                    Some(&idx) => self.raws[idx].clone(),
                    None => bail!(GitError::BadObjectFormat(format!(
                        "ofs-delta base offset {} does not name an earlier object",
                        base_offset
                    ))),
                };
                let expanded = base.expand_with_delta_bytes(&delta_bytes)?;
                self.emit(offset, expanded)?;
            }
            PackObjType::RefDelta => {
                let base_oid = self.read_oid().await?;
                let delta_bytes = self.inflate(size).await?;
                let base = match self.by_oid.get(&base_oid) {
                    Some(&idx) => Some(self.raws[idx].clone()),
                    None => store
                        .raw(base_oid)
                        .map(|(obj_type, bytes)| PackObjRaw { obj_type, bytes }),
                };
                match base {
                    Some(base) => {
                        let expanded = base.expand_with_delta_bytes(&delta_bytes)?;
                        self.emit(offset, expanded)?;
                    }
                    None => {
                        trace!("parking ref-delta at {} on unseen base {}", offset, base_oid);
                        self.pending
                            .entry(base_oid)
                            .or_default()
                            .push(PendingRefDelta { offset, delta_bytes });
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit a resolved object and iteratively drain any ref-deltas that
    /// were parked on it (a chain of parked deltas unwinds here without
    /// recursion).
    fn emit(&mut self, offset: u64, raw: PackObjRaw) -> GitResult<()> {
        let mut work: SmallVec<[(u64, PackObjRaw); 1]> = smallvec![(offset, raw)];
        while let Some((offset, raw)) = work.pop() {
            let oid = hash_object(raw.obj_type.as_str(), &raw.bytes);
            let idx = self.raws.len();
            self.raws.push(raw.clone());
            self.by_offset.insert(offset, idx);
            self.by_oid.insert(oid, idx);
            self.ready.push_back(PackedObject { oid, raw: raw.clone() });

            if let Some(todos) = self.pending.remove(&oid) {
                for todo in todos {
                    let expanded = raw.expand_with_delta_bytes(&todo.delta_bytes)?;
                    work.push((todo.offset, expanded));
                }
            }
        }
        Ok(())
    }
}
