use crate::error::{GitError, GitGenericError, GitResult};
use crate::hash::Oid;
use crate::obj::GitObject;
use crate::pack::PackReader;
use crate::pktline::{PktBuf, PktLine, PktReader};
use crate::refs::{rejection_kind, RefUpdate, RemoteRef};
use crate::store::ObjectStore;
use crate::transport::{ByteStream, Service, SmartTransport};
use bytes::Bytes;
use itertools::Itertools;
use std::io;
use std::sync::{Arc, Mutex};
use tokio_util::io::StreamReader;

pub const OBJECT_FORMAT: &str = "object-format=sha1";

/// The capability advertisement a server answers `info/refs` with under
/// protocol v2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub version: u32,
    /// capability lines verbatim (`ls-refs`, `fetch=shallow filter`, ...)
    pub caps: Vec<String>,
}

impl Capabilities {
    /// whether a capability with this name (or `name=value`) was advertised
    pub fn supports(&self, name: &str) -> bool {
        self.caps
            .iter()
            .any(|cap| cap == name || cap.strip_prefix(name).map_or(false, |r| r.starts_with('=')))
    }
}

/// Read a `GET info/refs?service=...` response: an optional
/// `# service=<name>` banner, then the `version 2` line and capability
/// lines up to the flush.
pub async fn read_advertisement(
    stream: ByteStream,
    service: Service,
) -> GitResult<Capabilities> {
    let mut pkts = PktReader::new(stream);
    let mut version = None;
    let mut caps = vec![];
    loop {
        match pkts.read_pkt().await? {
            Some(pkt @ PktLine::Data(..)) => {
                let line = pkt.text()?;
                check_err_line(line)?;
                if let Some(name) = line.strip_prefix("# service=") {
                    if name != service.as_str() {
                        bail!(GitError::UnexpectedServerMessage(line.to_owned()));
                    }
                    continue;
                }
                if let Some(v) = line.strip_prefix("version ") {
                    version = Some(v.parse().map_err(|_| {
                        GitError::UnexpectedServerMessage(line.to_owned())
                    })?);
                    continue;
                }
                caps.push(line.to_owned());
            }
            // the service banner is followed by its own flush
            Some(PktLine::Flush) if version.is_none() && caps.is_empty() => continue,
            Some(PktLine::Flush) | None => break,
            Some(pkt) => bail!(GitError::UnexpectedServerMessage(format!(
                "{:?} in capability advertisement",
                pkt
            ))),
        }
    }
    let version = version
        .ok_or_else(|| anyhow!(GitError::UnexpectedServerMessage("missing version line".into())))?;
    ensure_eq!(version, 2, GitError::UnexpectedServerMessage(format!("version {}", version)));
    Ok(Capabilities { version, caps })
}

/// `ls-refs` over protocol v2, optionally narrowed by `ref-prefix`
/// arguments.
pub async fn ls_refs(
    transport: &dyn SmartTransport,
    prefixes: &[&str],
) -> GitResult<Vec<RemoteRef>> {
    let mut buf = PktBuf::new();
    buf.write_data("command=ls-refs\n")?;
    buf.write_data(format!("{}\n", OBJECT_FORMAT))?;
    buf.write_delim();
    buf.write_data("symrefs\n")?;
    buf.write_data("peel\n")?;
    for prefix in prefixes {
        buf.write_data(format!("ref-prefix {}\n", prefix))?;
    }
    buf.write_flush();

    let stream = transport.upload_pack(Bytes::from(buf.into_bytes())).await?;
    let mut pkts = PktReader::new(stream);
    let mut refs = vec![];
    loop {
        match pkts.read_pkt().await? {
            Some(pkt @ PktLine::Data(..)) => {
                let line = pkt.text()?;
                check_err_line(line)?;
                refs.push(RemoteRef::parse(line)?);
            }
            Some(PktLine::Flush) | None => break,
            Some(pkt) => {
                bail!(GitError::UnexpectedServerMessage(format!("{:?} in ls-refs response", pkt)))
            }
        }
    }
    trace!("ls_refs: server advertised {} refs", refs.len());
    Ok(refs)
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// ids the client already has complete history for
    pub shallow: Vec<Oid>,
    /// truncate history at this depth
    pub deepen: Option<u32>,
    /// object filter spec, e.g. `blob:none`
    pub filter: Option<String>,
    /// Forwarded verbatim. Protocol v2 does not require `done` the way v1
    /// negotiation did, but this client never negotiates with `have`
    /// rounds, so it defaults to sending it and taking the pack in one
    /// round trip.
    pub done: bool,
    pub no_progress: bool,
    /// stop decoding as soon as every originally wanted id has been
    /// emitted; the remainder of the stream is abandoned
    pub stop_when_satisfied: bool,
    /// surface `DeltaBaseMissing` instead of skipping deltas whose base is
    /// neither in the pack nor in the store
    pub strict_deltas: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            shallow: vec![],
            deepen: None,
            filter: None,
            done: true,
            no_progress: true,
            stop_when_satisfied: false,
            strict_deltas: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// ids decoded out of the pack, in emission order
    pub fetched: Vec<Oid>,
    /// `shallow-info` section contents, when history was truncated
    pub shallow: Vec<Oid>,
    pub unshallow: Vec<Oid>,
    /// ref-delta bases that could not be resolved (empty under
    /// `strict_deltas`, which errors instead)
    pub missing_bases: Vec<Oid>,
}

/// `fetch` over protocol v2: ask for `wants`, feed the returned pack
/// through the codec into `store`.
///
/// Ids already present in `store` are not requested again; if nothing is
/// missing the request is skipped entirely.
pub async fn fetch(
    transport: &dyn SmartTransport,
    store: &mut ObjectStore,
    wants: &[Oid],
    opts: &FetchOptions,
) -> GitResult<FetchResult> {
    let mut result = FetchResult::default();
    let missing_wants =
        wants.iter().copied().filter(|oid| oid.is_known() && !store.contains(*oid)).unique();
    let missing_wants = missing_wants.collect::<Vec<_>>();
    if missing_wants.is_empty() {
        trace!("fetch: all {} wants already cached", wants.len());
        return Ok(result);
    }

    let mut buf = PktBuf::new();
    buf.write_data("command=fetch\n")?;
    buf.write_data(format!("{}\n", OBJECT_FORMAT))?;
    buf.write_delim();
    if opts.no_progress {
        buf.write_data("no-progress\n")?;
    }
    buf.write_data("ofs-delta\n")?;
    if let Some(filter) = &opts.filter {
        buf.write_data(format!("filter {}\n", filter))?;
    }
    for oid in &opts.shallow {
        buf.write_data(format!("shallow {}\n", oid))?;
    }
    if let Some(depth) = opts.deepen {
        buf.write_data(format!("deepen {}\n", depth))?;
    }
    for oid in &missing_wants {
        buf.write_data(format!("want {}\n", oid))?;
    }
    if opts.done {
        buf.write_data("done\n")?;
    }
    buf.write_flush();

    debug!("fetch: requesting {} objects", missing_wants.len());
    let stream = transport.upload_pack(Bytes::from(buf.into_bytes())).await?;
    let mut pkts = PktReader::new(stream);

    // response sections: optional acknowledgments, optional shallow-info,
    // then the packfile; sections are separated by delimiter pkts
    loop {
        match pkts.read_pkt().await? {
            Some(pkt @ PktLine::Data(..)) => {
                let line = pkt.text()?;
                check_err_line(line)?;
                match line {
                    "packfile" => break,
                    "acknowledgments" => {
                        if !skip_section(&mut pkts).await? {
                            // flush after acknowledgments: the server sent no pack
                            debug!("fetch: response ended after acknowledgments");
                            return Ok(result);
                        }
                    }
                    "shallow-info" => {
                        if !read_shallow_info(&mut pkts, &mut result).await? {
                            return Ok(result);
                        }
                    }
                    other => bail!(GitError::UnexpectedServerMessage(other.to_owned())),
                }
            }
            Some(PktLine::Flush) | None => return Ok(result),
            Some(pkt) => {
                bail!(GitError::UnexpectedServerMessage(format!("{:?} in fetch response", pkt)))
            }
        }
    }

    // the packfile section carries side-band framed pack bytes
    let sideband_err: Arc<Mutex<Option<GitGenericError>>> = Default::default();
    let reader = StreamReader::new(Box::pin(sideband_stream(pkts, sideband_err.clone())));

    let mut pack = match PackReader::new(reader).await {
        Ok(pack) => pack,
        Err(err) => return Err(take_sideband_err(&sideband_err).unwrap_or(err)),
    };
    loop {
        match pack.next_object(store).await {
            Ok(Some(obj)) => {
                let parsed = GitObject::parse(obj.raw.obj_type, obj.raw.bytes)?;
                debug_assert_eq!(parsed.oid(), obj.oid);
                result.fetched.push(obj.oid);
                store.insert(parsed);
                if opts.stop_when_satisfied
                    && missing_wants.iter().all(|want| store.contains(*want))
                {
                    trace!("fetch: early termination, all wants emitted");
                    return Ok(result);
                }
            }
            Ok(None) => break,
            Err(err) => return Err(take_sideband_err(&sideband_err).unwrap_or(err)),
        }
    }

    let missing = pack.missing_bases();
    if !missing.is_empty() {
        if opts.strict_deltas {
            let (base, count) = missing[0];
            return Err(anyhow::Error::new(GitError::DeltaBaseMissing(base))
                .context(format!("{} deltas parked on the base", count)));
        }
        warn!("fetch: skipping deltas parked on {} absent bases", missing.len());
        result.missing_bases = missing.into_iter().map(|(oid, _)| oid).collect();
    }
    Ok(result)
}

/// Skip a section body. Returns true when a delimiter introduced another
/// section, false when the response flushed.
async fn skip_section(pkts: &mut PktReader<ByteStream>) -> GitResult<bool> {
    loop {
        match pkts.read_pkt().await? {
            Some(PktLine::Data(..)) => continue,
            Some(PktLine::Delim) => return Ok(true),
            Some(PktLine::Flush) | Some(PktLine::ResponseEnd) | None => return Ok(false),
        }
    }
}

async fn read_shallow_info(
    pkts: &mut PktReader<ByteStream>,
    result: &mut FetchResult,
) -> GitResult<bool> {
    loop {
        match pkts.read_pkt().await? {
            Some(pkt @ PktLine::Data(..)) => {
                let line = pkt.text()?;
                if let Some(oid) = line.strip_prefix("shallow ") {
                    result.shallow.push(oid.parse()?);
                } else if let Some(oid) = line.strip_prefix("unshallow ") {
                    result.unshallow.push(oid.parse()?);
                } else {
                    bail!(GitError::UnexpectedServerMessage(line.to_owned()));
                }
            }
            Some(PktLine::Delim) => return Ok(true),
            Some(PktLine::Flush) | Some(PktLine::ResponseEnd) | None => return Ok(false),
        }
    }
}

/// Demultiplex side-band data pkts into a plain byte stream of channel-1
/// (pack) bytes. Progress (channel 2) is logged, a channel-3 message is
/// fatal. The original error is stashed in `err_slot` because everything
/// crossing the `StreamReader` boundary must look like `io::Error`.
fn sideband_stream(
    pkts: PktReader<ByteStream>,
    err_slot: Arc<Mutex<Option<GitGenericError>>>,
) -> impl futures::Stream<Item = io::Result<Bytes>> {
    futures::stream::try_unfold(pkts, move |mut pkts| {
        let err_slot = err_slot.clone();
        async move {
            loop {
                let stash = |err: GitGenericError| {
                    let detail = format!("{:#}", err);
                    *err_slot.lock().unwrap() = Some(err);
                    io::Error::new(io::ErrorKind::Other, detail)
                };
                match pkts.read_pkt().await {
                    Ok(Some(PktLine::Data(payload))) => match payload.first() {
                        Some(1) => {
                            let data = Bytes::from(payload).slice(1..);
                            return Ok(Some((data, pkts)));
                        }
                        Some(2) => {
                            debug!(
                                "remote: {}",
                                String::from_utf8_lossy(&payload[1..]).trim_end()
                            );
                            continue;
                        }
                        Some(3) => {
                            let msg =
                                String::from_utf8_lossy(&payload[1..]).trim_end().to_owned();
                            return Err(stash(anyhow!(GitError::ServerReported(msg))));
                        }
                        channel => {
                            return Err(stash(anyhow!(GitError::MalformedPktLine(format!(
                                "invalid side-band channel {:?}",
                                channel
                            )))));
                        }
                    },
                    Ok(Some(PktLine::Flush)) | Ok(None) => return Ok(None),
                    Ok(Some(pkt)) => {
                        return Err(stash(anyhow!(GitError::UnexpectedServerMessage(format!(
                            "{:?} inside packfile section",
                            pkt
                        )))));
                    }
                    Err(err) => return Err(stash(err)),
                }
            }
        }
    })
}

fn take_sideband_err(slot: &Arc<Mutex<Option<GitGenericError>>>) -> Option<GitGenericError> {
    slot.lock().unwrap().take()
}

fn check_err_line(line: &str) -> GitResult<()> {
    if let Some(msg) = line.strip_prefix("ERR ") {
        bail!(GitError::ServerReported(msg.to_owned()));
    }
    Ok(())
}

/// Parsed report-status section of a receive-pack response. Ref results
/// are preserved in the server's order.
#[derive(Debug, PartialEq, Eq)]
pub struct ReportStatus {
    pub unpack: Result<(), String>,
    pub refs: Vec<(String, Result<(), String>)>,
}

impl ReportStatus {
    /// Surface the first failure as a structured error.
    pub fn into_result(self) -> GitResult<()> {
        if let Err(reason) = self.unpack {
            bail!(GitError::PackUnpack(reason));
        }
        for (name, status) in self.refs {
            if let Err(reason) = status {
                bail!(rejection_kind(&name, &reason));
            }
        }
        Ok(())
    }
}

/// `receive-pack`: one pkt-line per ref update (capabilities ride on the
/// first), a flush, then the raw packfile. Deletion-only command lists send
/// no pack at all.
pub async fn receive_pack(
    transport: &dyn SmartTransport,
    updates: &[RefUpdate],
    pack: Option<Vec<u8>>,
    agent: &str,
) -> GitResult<ReportStatus> {
    ensure!(!updates.is_empty(), "receive-pack requires at least one ref update");

    let caps = format!("report-status {} agent={}", OBJECT_FORMAT, agent);
    let mut buf = PktBuf::new();
    for (i, update) in updates.iter().enumerate() {
        let line = if i == 0 {
            format!("{} {} {}\0{}\n", update.old, update.new, update.name, caps)
        } else {
            format!("{} {} {}\n", update.old, update.new, update.name)
        };
        buf.write_data(line)?;
    }
    buf.write_flush();
    if let Some(pack) = &pack {
        buf.write_raw(pack);
    }

    debug!("receive_pack: {} commands, pack: {}", updates.len(), pack.is_some());
    let stream = transport.receive_pack(Bytes::from(buf.into_bytes())).await?;
    parse_report_status(stream).await
}

/// The report may arrive as naked pkt-lines or pkt-lines nested inside
/// side-band channel 1; report lines always start with ascii (`unpack`,
/// `ok`, `ng`) so the leading channel byte disambiguates.
async fn parse_report_status(stream: ByteStream) -> GitResult<ReportStatus> {
    let mut pkts = PktReader::new(stream);
    let mut lines = vec![];
    let mut banded_buf: Vec<u8> = vec![];
    let mut banded: Option<bool> = None;

    loop {
        match pkts.read_pkt().await? {
            Some(PktLine::Data(payload)) => {
                let banded =
                    *banded.get_or_insert_with(|| matches!(payload.first(), Some(1..=3)));
                if banded {
                    match payload.first() {
                        Some(1) => banded_buf.extend_from_slice(&payload[1..]),
                        Some(2) => debug!(
                            "remote: {}",
                            String::from_utf8_lossy(&payload[1..]).trim_end()
                        ),
                        Some(3) => bail!(GitError::ServerReported(
                            String::from_utf8_lossy(&payload[1..]).trim_end().to_owned()
                        )),
                        channel => bail!(GitError::MalformedPktLine(format!(
                            "invalid side-band channel {:?}",
                            channel
                        ))),
                    }
                } else {
                    lines.push(PktLine::Data(payload).text()?.to_owned());
                }
            }
            Some(PktLine::Flush) | None => break,
            Some(pkt) => bail!(GitError::UnexpectedServerMessage(format!(
                "{:?} in report-status",
                pkt
            ))),
        }
    }

    if !banded_buf.is_empty() {
        let mut inner = PktReader::new(std::io::Cursor::new(banded_buf));
        loop {
            match inner.read_pkt().await {
                Ok(Some(pkt @ PktLine::Data(..))) => lines.push(pkt.text()?.to_owned()),
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(err) => return Err(err.context("side-band report-status")),
            }
        }
    }

    interpret_report(lines)
}

fn interpret_report(lines: Vec<String>) -> GitResult<ReportStatus> {
    let mut iter = lines.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| anyhow!(GitError::UnexpectedServerMessage("empty report-status".into())))?;
    check_err_line(&first)?;
    if let Some(msg) = first.strip_prefix("error:") {
        bail!(GitError::ServerReported(msg.trim().to_owned()));
    }
    let unpack = match first.strip_prefix("unpack ") {
        Some("ok") => Ok(()),
        Some(err) => Err(err.to_owned()),
        None => bail!(GitError::UnexpectedServerMessage(first)),
    };

    let mut refs = vec![];
    for line in iter {
        if let Some(name) = line.strip_prefix("ok ") {
            refs.push((name.to_owned(), Ok(())));
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            refs.push((name.to_owned(), Err(reason.to_owned())));
        } else if let Some(msg) = line.strip_prefix("error:") {
            bail!(GitError::ServerReported(msg.trim().to_owned()));
        } else {
            bail!(GitError::UnexpectedServerMessage(line));
        }
    }
    Ok(ReportStatus { unpack, refs })
}
