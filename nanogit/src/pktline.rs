use crate::error::{GitError, GitResult};
use std::fmt::{self, Debug, Formatter};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest payload encodable in a pkt-line: the four length characters
/// count themselves and the length field caps out at `0xFFFF`.
pub const MAX_PKT_PAYLOAD: usize = 0xFFFF - 4;

pub const FLUSH_PKT: &[u8] = b"0000";
pub const DELIM_PKT: &[u8] = b"0001";
pub const RESPONSE_END_PKT: &[u8] = b"0002";

#[derive(PartialEq, Eq, Clone)]
pub enum PktLine {
    Flush,
    Delim,
    ResponseEnd,
    Data(Vec<u8>),
}

impl PktLine {
    /// payload with a single trailing newline stripped, as text
    pub fn text(&self) -> GitResult<&str> {
        match self {
            PktLine::Data(data) => {
                let data = data.strip_suffix(b"\n").unwrap_or(data);
                std::str::from_utf8(data)
                    .map_err(|_| anyhow!(GitError::MalformedPktLine("non-utf8 payload".into())))
            }
            _ => bail!(GitError::MalformedPktLine("expected a data pkt".into())),
        }
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, PktLine::Flush)
    }
}

impl Debug for PktLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PktLine::Flush => write!(f, "Flush"),
            PktLine::Delim => write!(f, "Delim"),
            PktLine::ResponseEnd => write!(f, "ResponseEnd"),
            PktLine::Data(data) => write!(f, "Data({:?})", String::from_utf8_lossy(data)),
        }
    }
}

/// Encode a single data pkt-line.
pub fn encode(payload: &[u8]) -> GitResult<Vec<u8>> {
    if payload.len() > MAX_PKT_PAYLOAD {
        bail!(GitError::MalformedPktLine(format!(
            "payload of {} bytes exceeds the pkt-line maximum of {}",
            payload.len(),
            MAX_PKT_PAYLOAD
        )));
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(format!("{:04x}", 4 + payload.len()).as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// An in-memory pkt-line command stream under construction. Command streams
/// are always terminated by a flush.
#[derive(Default)]
pub struct PktBuf {
    buf: Vec<u8>,
}

impl PktBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_data(&mut self, payload: impl AsRef<[u8]>) -> GitResult<&mut Self> {
        self.buf.extend_from_slice(&encode(payload.as_ref())?);
        Ok(self)
    }

    pub fn write_delim(&mut self) -> &mut Self {
        self.buf.extend_from_slice(DELIM_PKT);
        self
    }

    pub fn write_flush(&mut self) -> &mut Self {
        self.buf.extend_from_slice(FLUSH_PKT);
        self
    }

    /// append raw bytes with no framing (a packfile rides behind the
    /// command list of a receive-pack request)
    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Decodes pkt-lines off an async byte stream.
pub struct PktReader<R> {
    reader: R,
    /// whether the previous pkt was a flush; EOF is only clean on a flush
    /// boundary
    after_flush: bool,
}

impl<R: AsyncRead + Unpin> PktReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, after_flush: false }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// The next pkt, or `None` on clean end-of-stream. EOF in the middle of
    /// a pkt, or on a non-flush boundary, is a truncation error.
    pub async fn read_pkt(&mut self) -> GitResult<Option<PktLine>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.reader.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 && self.after_flush {
                    return Ok(None);
                }
                bail!(GitError::MalformedPktLine("eof before terminating flush".into()));
            }
            filled += n;
        }

        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| anyhow!(GitError::MalformedPktLine("non-ascii length".into())))?;
        let len = usize::from_str_radix(len_str, 16).map_err(|_| {
            anyhow!(GitError::MalformedPktLine(format!("non-hex length `{}`", len_str)))
        })?;

        self.after_flush = len == 0;
        match len {
            0 => Ok(Some(PktLine::Flush)),
            1 => Ok(Some(PktLine::Delim)),
            2 => Ok(Some(PktLine::ResponseEnd)),
            3 => bail!(GitError::MalformedPktLine("reserved length 0003".into())),
            _ => {
                let mut payload = vec![0; len - 4];
                self.reader.read_exact(&mut payload).await.map_err(|_| {
                    anyhow!(GitError::MalformedPktLine(format!(
                        "eof inside a pkt of declared length {}",
                        len
                    )))
                })?;
                Ok(Some(PktLine::Data(payload)))
            }
        }
    }

    /// The next pkt, erroring on clean EOF; for positions where the
    /// protocol promises more input.
    pub async fn expect_pkt(&mut self) -> GitResult<PktLine> {
        self.read_pkt()
            .await?
            .ok_or_else(|| anyhow!(GitError::MalformedPktLine("unexpected end of stream".into())))
    }
}
