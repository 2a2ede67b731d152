//! Shared fixtures: an in-memory transport with scripted responses, byte
//! trickling for chunk-size invariance, and hand-rolled pack/delta encoders
//! for exercising the decoder against adversarial input.

use crate::delta::DeltaOp;
use crate::error::{GitError, GitResult};
use crate::hash::Oid;
use crate::io::{deflate, HashWriter, WriteExt};
use crate::obj::GitObjType;
use crate::pktline::{encode as encode_pkt, FLUSH_PKT};
use crate::transport::{ByteStream, Service, SmartTransport};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::prelude::*;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// opt-in log output while debugging tests: `RUST_LOG=trace cargo test -- --nocapture`
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Which endpoint a recorded request hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentRequest {
    Info(Service),
    UploadPack(Vec<u8>),
    ReceivePack(Vec<u8>),
}

type Scripted = VecDeque<Result<Vec<u8>, GitError>>;

/// A [`SmartTransport`] with scripted responses per endpoint. Requests are
/// recorded for assertions; an unscripted request panics the test.
#[derive(Default)]
pub struct MockTransport {
    info: Mutex<Scripted>,
    upload: Mutex<Scripted>,
    receive: Mutex<Scripted>,
    requests: Mutex<Vec<SentRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_info(&self, response: Result<Vec<u8>, GitError>) -> &Self {
        self.info.lock().unwrap().push_back(response);
        self
    }

    pub fn script_upload(&self, response: Result<Vec<u8>, GitError>) -> &Self {
        self.upload.lock().unwrap().push_back(response);
        self
    }

    pub fn script_receive(&self, response: Result<Vec<u8>, GitError>) -> &Self {
        self.receive.lock().unwrap().push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<SentRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// bodies of recorded upload-pack requests, decoded as text pkt-lines
    pub fn upload_request_lines(&self) -> Vec<Vec<String>> {
        self.requests()
            .iter()
            .filter_map(|req| match req {
                SentRequest::UploadPack(body) => Some(decode_request_lines(body)),
                _ => None,
            })
            .collect()
    }

    fn pop(&self, queue: &Mutex<Scripted>, what: &str) -> GitResult<ByteStream> {
        let response = queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted {} request", what));
        match response {
            Ok(bytes) => Ok(Box::new(std::io::Cursor::new(bytes)) as ByteStream),
            Err(kind) => Err(anyhow::Error::new(kind).context(format!("mock {}", what))),
        }
    }
}

#[async_trait::async_trait]
impl SmartTransport for MockTransport {
    async fn smart_info(&self, service: Service) -> GitResult<ByteStream> {
        self.requests.lock().unwrap().push(SentRequest::Info(service));
        self.pop(&self.info, "info/refs")
    }

    async fn upload_pack(&self, body: Bytes) -> GitResult<ByteStream> {
        self.requests.lock().unwrap().push(SentRequest::UploadPack(body.to_vec()));
        self.pop(&self.upload, "git-upload-pack")
    }

    async fn receive_pack(&self, body: Bytes) -> GitResult<ByteStream> {
        self.requests.lock().unwrap().push(SentRequest::ReceivePack(body.to_vec()));
        self.pop(&self.receive, "git-receive-pack")
    }
}

/// Decode the textual pkt-lines of a request body ("0000" for flush,
/// "0001" for delim); stops at the first raw (non-pkt) region.
pub fn decode_request_lines(mut body: &[u8]) -> Vec<String> {
    let mut lines = vec![];
    while body.len() >= 4 {
        let len = match std::str::from_utf8(&body[..4]).ok().and_then(|s| usize::from_str_radix(s, 16).ok()) {
            Some(len) => len,
            None => break,
        };
        match len {
            0 => {
                lines.push("0000".to_owned());
                body = &body[4..];
            }
            1 => {
                lines.push("0001".to_owned());
                body = &body[4..];
            }
            2 | 3 => break,
            _ => {
                let payload = &body[4..len];
                lines.push(String::from_utf8_lossy(payload).trim_end().to_owned());
                body = &body[len..];
            }
        }
    }
    lines
}

/// An `AsyncRead` that yields at most `chunk` bytes per read, for checking
/// that decoding is invariant under read-chunk size.
pub struct TrickleReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl TrickleReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        assert!(chunk > 0);
        Self { data, pos: 0, chunk }
    }
}

impl AsyncRead for TrickleReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = &mut *self;
        let n = this.chunk.min(this.data.len() - this.pos).min(buf.remaining());
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Encode a delta program the way packs carry it (two size varints, then
/// instructions).
pub fn encode_delta(source_size: u64, target_size: u64, ops: &[DeltaOp]) -> Vec<u8> {
    let mut buf = vec![];
    buf.write_le_varint_with_shift(0, source_size, 0).unwrap();
    buf.write_le_varint_with_shift(0, target_size, 0).unwrap();
    for op in ops {
        match op {
            &DeltaOp::Copy(offset, size) => {
                let size = if size == 0x10000 { 0 } else { size };
                let mut header = 0x80u8;
                let mut tail = vec![];
                for i in 0..4 {
                    let byte = ((offset >> (i * 8)) & 0xff) as u8;
                    if byte != 0 {
                        header |= 1 << i;
                        tail.push(byte);
                    }
                }
                for i in 0..3 {
                    let byte = ((size >> (i * 8)) & 0xff) as u8;
                    if byte != 0 {
                        header |= 1 << (4 + i);
                        tail.push(byte);
                    }
                }
                buf.push(header);
                buf.extend_from_slice(&tail);
            }
            DeltaOp::Insert(data) => {
                assert!(!data.is_empty() && data.len() <= 0x7f);
                buf.push(data.len() as u8);
                buf.extend_from_slice(data);
            }
        }
    }
    buf
}

/// One record of a hand-assembled pack.
pub enum RawRecord {
    Full(GitObjType, Vec<u8>),
    /// ref-delta: base named by id, delta program given uncompressed
    RefDelta(Oid, Vec<u8>),
    /// ofs-delta against the record at the given index of the same pack
    OfsDeltaTo(usize, Vec<u8>),
}

/// Assemble a pack byte-for-byte, delta records included, with a valid
/// trailer. Returns the pack and each record's byte offset.
pub fn raw_pack(records: &[RawRecord]) -> (Vec<u8>, Vec<u64>) {
    let mut buf = vec![];
    let mut written = Vec::with_capacity(records.len());
    {
        let mut writer = HashWriter::new_sha1(&mut buf);
        writer.write_all(b"PACK").unwrap();
        writer.write_u32(2).unwrap();
        writer.write_u32(records.len() as u32).unwrap();
        let mut offset = 12u64;
        for record in records {
            written.push(offset);
            let mut body = vec![];
            let pack_type: u8;
            let inflated_len: usize;
            match record {
                RawRecord::Full(obj_type, bytes) => {
                    pack_type = *obj_type as u8;
                    inflated_len = bytes.len();
                    body.extend_from_slice(&deflate(bytes).unwrap());
                }
                RawRecord::RefDelta(base, delta) => {
                    pack_type = 7;
                    inflated_len = delta.len();
                    body.extend_from_slice(base.as_bytes());
                    body.extend_from_slice(&deflate(delta).unwrap());
                }
                RawRecord::OfsDeltaTo(base_index, delta) => {
                    pack_type = 6;
                    inflated_len = delta.len();
                    let rel = offset - written[*base_index];
                    body.extend_from_slice(&encode_ofs(rel));
                    body.extend_from_slice(&deflate(delta).unwrap());
                }
            }
            let mut header = vec![];
            header.write_le_varint_with_shift(pack_type, inflated_len as u64, 3).unwrap();
            writer.write_all(&header).unwrap();
            writer.write_all(&body).unwrap();
            offset += (header.len() + body.len()) as u64;
        }
        writer.write_hash().unwrap();
    }
    (buf, written)
}

/// git's backward-offset encoding for ofs-delta bases
pub fn encode_ofs(mut n: u64) -> Vec<u8> {
    let mut bytes = vec![(n & 0x7f) as u8];
    n >>= 7;
    while n > 0 {
        n -= 1;
        bytes.push(0x80 | (n & 0x7f) as u8);
        n >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Wrap pack bytes into a v2 fetch response: a `packfile` section header
/// followed by side-band channel-1 frames and a flush.
pub fn fetch_response(pack: &[u8]) -> Vec<u8> {
    fetch_response_with_progress(pack, &[])
}

pub fn fetch_response_with_progress(pack: &[u8], progress: &[&str]) -> Vec<u8> {
    let mut body = vec![];
    body.extend_from_slice(&encode_pkt(b"packfile\n").unwrap());
    for msg in progress {
        let mut frame = vec![2u8];
        frame.extend_from_slice(msg.as_bytes());
        body.extend_from_slice(&encode_pkt(&frame).unwrap());
    }
    for chunk in pack.chunks(1000) {
        let mut frame = vec![1u8];
        frame.extend_from_slice(chunk);
        body.extend_from_slice(&encode_pkt(&frame).unwrap());
    }
    body.extend_from_slice(FLUSH_PKT);
    body
}

/// An `info/refs` capability advertisement body the way git's http backend
/// writes it: service banner, flush, version line, capabilities, flush.
pub fn advertisement_response(service: &str, caps: &[&str]) -> Vec<u8> {
    let mut body = vec![];
    body.extend_from_slice(&encode_pkt(format!("# service={}\n", service).as_bytes()).unwrap());
    body.extend_from_slice(FLUSH_PKT);
    body.extend_from_slice(&encode_pkt(b"version 2\n").unwrap());
    for cap in caps {
        body.extend_from_slice(&encode_pkt(format!("{}\n", cap).as_bytes()).unwrap());
    }
    body.extend_from_slice(FLUSH_PKT);
    body
}

/// An ls-refs response body from `<oid> <name>...` lines.
pub fn ls_refs_response(lines: &[&str]) -> Vec<u8> {
    let mut body = vec![];
    for line in lines {
        body.extend_from_slice(&encode_pkt(format!("{}\n", line).as_bytes()).unwrap());
    }
    body.extend_from_slice(FLUSH_PKT);
    body
}

/// A plain (non-side-band) report-status response body.
pub fn report_status_response(lines: &[&str]) -> Vec<u8> {
    let mut body = vec![];
    for line in lines {
        body.extend_from_slice(&encode_pkt(format!("{}\n", line).as_bytes()).unwrap());
    }
    body.extend_from_slice(FLUSH_PKT);
    body
}

/// The same report wrapped in side-band channel 1.
pub fn banded_report_status_response(lines: &[&str]) -> Vec<u8> {
    let inner = report_status_response(lines);
    let mut body = vec![];
    for chunk in inner.chunks(900) {
        let mut frame = vec![1u8];
        frame.extend_from_slice(chunk);
        body.extend_from_slice(&encode_pkt(&frame).unwrap());
    }
    body.extend_from_slice(FLUSH_PKT);
    body
}
