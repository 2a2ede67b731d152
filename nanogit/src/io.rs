use crate::error::GitResult;
use crate::hash::{Oid, Sha1Hash};
use sha1::Digest;
use std::io::{self, prelude::*};

// all integers big-endian unless the name says otherwise
pub(crate) trait ReadExt: Read {
    #[inline]
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut i = 0u8;
        self.read_exact(std::slice::from_mut(&mut i))?;
        Ok(i)
    }

    #[inline]
    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    #[inline]
    fn read_oid(&mut self) -> io::Result<Oid> {
        let mut buf = [0; 20];
        self.read_exact(&mut buf)?;
        Ok(Oid::new(buf))
    }

    /// Backward-offset encoding used by ofs-delta records: big-endian 7-bit
    /// groups with the MSB as continuation, plus an off-by-one per
    /// additional byte.
    // https://github.com/git/git/blob/26e47e261e969491ad4e3b6c298450c061749c9e/builtin/pack-objects.c#L1443-L1473
    fn read_offset(&mut self) -> io::Result<u64> {
        let mut byte = self.read_u8()? as u64;
        let mut offset = byte & 0x7f;
        while byte & 0x80 != 0 {
            offset += 1;
            byte = self.read_u8()? as u64;
            offset = (offset << 7) | (byte & 0x7f);
        }
        Ok(offset)
    }

    #[inline]
    /// alias for `read_le_varint` with a more intuitive name
    fn read_size(&mut self) -> io::Result<u64> {
        self.read_le_varint()
    }

    #[inline]
    // variable length little-endian integer encoding
    // read next byte if MSB is 1
    // referred to as "size encoding" in git docs
    fn read_le_varint(&mut self) -> io::Result<u64> {
        self.read_le_varint_with_shift(0).map(|x| x.1)
    }

    // shift is useful for if there is another number encoded in the first few bits
    // (the pack object header keeps the object type in bits 4..6 of the first byte)
    fn read_le_varint_with_shift(&mut self, init_shift: u64) -> io::Result<(u8, u64)> {
        // cannot shift more than 7 as the MSB is reserved
        assert!(init_shift < 8);
        let mut n = 0;
        let byte = self.read_u8()?;
        let anti_shift = 7 - init_shift;
        let k_mask = ((1 << init_shift) - 1) << anti_shift;
        let k = (byte & k_mask as u8) >> anti_shift;

        // process the remaining bits of the first byte
        let mask = (1 << anti_shift) - 1;
        n |= (byte & mask) as u64;

        // only continue if the first byte's MSB is 1
        if byte & 0x80 != 0 {
            let mut shift = 7 - init_shift;
            loop {
                let byte = self.read_u8()? as u64;
                n |= (byte & 0x7f) << shift;
                shift += 7;
                if byte & 0x80 == 0 {
                    break;
                }
            }
        }

        Ok((k, n))
    }

    /// format used for the delta copy operation
    /// header must have the MSB set (otherwise we shouldn't be reading this format)
    /// format on the wire is as follows
    /// +----------+---------+---------+---------+---------+-------+-------+-------+
    /// | 1xxxxxxx | offset1 | offset2 | offset3 | offset4 | size1 | size2 | size3 |
    /// +----------+---------+---------+---------+---------+-------+-------+-------+
    /// if bit zero (lsb) is set, then offset1 is present etc..
    // we choose to read all 7 bits in little endian so be wary when extracting
    // size and offset!
    fn read_le_packed(&mut self, header: u8) -> io::Result<u64> {
        debug_assert!(header & 1 << 7 != 0);
        let mut value = 0;
        for i in 0..7 {
            if header & 1 << i == 0 {
                continue;
            }

            let byte = self.read_u8()? as u64;
            value |= byte << (i * 8)
        }
        Ok(value)
    }

    #[inline]
    fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![];
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read + ?Sized> ReadExt for R {
}

pub(crate) trait BufReadExt: BufRead {
    fn is_at_eof(&mut self) -> io::Result<bool> {
        Ok(self.fill_buf()?.is_empty())
    }
}

impl<R: BufRead + ?Sized> BufReadExt for R {
}

pub(crate) trait WriteExt: Write {
    fn write_u8(&mut self, u: u8) -> io::Result<()> {
        self.write_all(std::slice::from_ref(&u))
    }

    fn write_u32(&mut self, u: u32) -> io::Result<()> {
        self.write_all(&u.to_be_bytes())
    }

    fn write_oid(&mut self, oid: Oid) -> io::Result<()> {
        self.write_all(oid.as_bytes())
    }

    /// Inverse of [`ReadExt::read_le_varint_with_shift`]: `k` rides in the
    /// top `init_shift` bits below the MSB of the first byte.
    fn write_le_varint_with_shift(&mut self, k: u8, mut n: u64, init_shift: u64) -> io::Result<()> {
        assert!(init_shift < 8);
        let anti_shift = 7 - init_shift;
        debug_assert!((k as u64) < (1 << init_shift));
        let mut byte = (k << anti_shift) | (n & ((1 << anti_shift) - 1)) as u8;
        n >>= anti_shift;
        while n > 0 {
            self.write_u8(byte | 0x80)?;
            byte = (n & 0x7f) as u8;
            n >>= 7;
        }
        self.write_u8(byte)
    }
}

impl<W: Write + ?Sized> WriteExt for W {
}

/// hashes all the bytes written into the writer using `D`
pub(crate) struct HashWriter<'a, D> {
    writer: &'a mut dyn Write,
    hasher: D,
}

impl<'a, D: Digest> Write for HashWriter<'a, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<'a, D: Digest> HashWriter<'a, D> {
    pub fn new(writer: &'a mut dyn Write) -> Self {
        Self { writer, hasher: D::new() }
    }
}

impl<'a> HashWriter<'a, sha1::Sha1> {
    pub fn new_sha1(writer: &'a mut dyn Write) -> Self {
        Self::new(writer)
    }

    /// finalize and append the digest itself to the underlying writer
    pub fn write_hash(self) -> io::Result<Sha1Hash> {
        let hash = Sha1Hash::from(self.hasher.finalize());
        self.writer.write_oid(hash)?;
        Ok(hash)
    }
}

pub(crate) fn deflate(bytes: &[u8]) -> GitResult<Vec<u8>> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn le_varint_with_shift_roundtrip() -> GitResult<()> {
        for &(k, n, shift) in
            &[(0u8, 0u64, 3u64), (3, 5, 3), (7, 1 << 20, 3), (1, u32::MAX as u64, 3), (0, 300, 0)]
        {
            let mut buf = vec![];
            buf.write_le_varint_with_shift(k, n, shift)?;
            let (k2, n2) = Cursor::new(buf).read_le_varint_with_shift(shift)?;
            assert_eq!((k, n), (k2, n2));
        }
        Ok(())
    }

    #[test]
    fn offset_encoding_examples() -> GitResult<()> {
        // single byte offsets are the value itself
        assert_eq!(Cursor::new([0x10]).read_offset()?, 0x10);
        // two byte example from the pack format docs: 0b10000000 0b00000000 == 128
        assert_eq!(Cursor::new([0x80, 0x00]).read_offset()?, 128);
        Ok(())
    }

    #[test]
    fn le_packed_reads_only_flagged_bytes() -> GitResult<()> {
        // header 0b10010001: offset1 and size1 present
        let mut cursor = Cursor::new([0x42, 0x07]);
        let n = cursor.read_le_packed(0b1001_0001)?;
        assert_eq!(n & 0xFFFF_FFFF, 0x42);
        assert_eq!(n >> 32, 0x07);
        Ok(())
    }
}
