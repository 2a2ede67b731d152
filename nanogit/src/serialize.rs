use crate::error::GitResult;
use std::io::{prelude::*, BufReader};

pub trait Serialize {
    fn serialize(&self, writer: &mut dyn Write) -> GitResult<()>;

    fn to_bytes(&self) -> GitResult<Vec<u8>> {
        let mut buf = vec![];
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}

/// deserialize trait where the number of payload bytes must be known up front
/// (git object payloads are always length-prefixed, either by the object
/// header or by the pack record header)
pub trait DeserializeSized {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> GitResult<Self>
    where
        Self: Sized;

    fn deserialize_from_slice(slice: &[u8]) -> GitResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize_sized(&mut BufReader::new(slice), slice.len() as u64)
    }
}
