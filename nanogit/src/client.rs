use crate::diff::{self, FileChange, FlatTreeEntry};
use crate::error::{GitError, GitErrorExt, GitResult, GitResultExt};
use crate::hash::Oid;
use crate::obj::{Commit, GitObjType, ObjectKind, Tree};
use crate::pack::PackBuilder;
use crate::protocol::{self, FetchOptions, FetchResult};
use crate::refs::{self, is_valid_name, RefUpdate, RemoteRef};
use crate::stage::StagedWriter;
use crate::store::ObjectStore;
use crate::transport::{Auth, Backoff, HttpTransport, RetryPolicy, Service, SmartTransport};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Enumerated construction options. Configuring both auth schemes is a
/// construction-time error.
#[derive(Default)]
pub struct ClientOptions {
    user_agent: Option<String>,
    http_client: Option<reqwest::Client>,
    basic_auth: Option<(String, String)>,
    token_auth: Option<String>,
    retry: Option<Arc<dyn RetryPolicy>>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// substitute transport for timeouts, proxies, tls settings
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    /// written to the `Authorization` header verbatim
    pub fn token_auth(mut self, token: impl Into<String>) -> Self {
        self.token_auth = Some(token.into());
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    fn auth(&self) -> GitResult<Auth> {
        match (&self.basic_auth, &self.token_auth) {
            (Some(..), Some(..)) => bail!(GitError::InvalidOption(
                "basic and token auth are mutually exclusive".into()
            )),
            (Some((username, password)), None) => {
                Ok(Auth::Basic { username: username.clone(), password: password.clone() })
            }
            (None, Some(token)) => Ok(Auth::Token(token.clone())),
            (None, None) => Ok(Auth::None),
        }
    }
}

/// A client for one remote repository.
///
/// Holds immutable configuration only; per-call state lives in locals (and
/// in the [`ObjectStore`] the caller passes in), so a client may be shared
/// across tasks.
pub struct GitClient {
    transport: Arc<dyn SmartTransport>,
    user_agent: String,
}

impl std::fmt::Debug for GitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitClient")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListCommitsOptions {
    /// cap on returned commits; zero means no cap
    pub limit: usize,
    /// commits to step over before collecting
    pub skip: usize,
}

impl GitClient {
    pub fn new(url: &str) -> GitResult<Self> {
        Self::with_options(url, ClientOptions::default())
    }

    pub fn with_options(url: &str, options: ClientOptions) -> GitResult<Self> {
        let auth = options.auth()?;
        let retry = options.retry.unwrap_or_else(|| Arc::new(Backoff::default()));
        let transport = HttpTransport::new(
            url,
            options.http_client.unwrap_or_default(),
            auth,
            options.user_agent,
            retry,
        )?;
        let user_agent = transport.user_agent().to_owned();
        Ok(Self { transport: Arc::new(transport), user_agent })
    }

    /// A client over a caller-supplied transport; protocol behaviour is
    /// identical over any wire.
    pub fn with_transport(transport: Arc<dyn SmartTransport>, user_agent: &str) -> Self {
        Self { transport, user_agent: user_agent.to_owned() }
    }

    pub(crate) fn transport(&self) -> &dyn SmartTransport {
        &*self.transport
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Probe `info/refs` for the repository's existence; auth errors
    /// propagate.
    pub async fn repo_exists(&self) -> GitResult<bool> {
        match self.transport.smart_info(Service::UploadPack).await {
            Ok(..) => Ok(true),
            Err(err) if matches!(err.git_kind(), Some(GitError::RepositoryNotFound)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether the configured credentials may fetch. A definite "no" is
    /// `Ok(false)`, not an error.
    pub async fn can_read(&self) -> GitResult<bool> {
        self.probe(Service::UploadPack).await
    }

    /// Whether the configured credentials may push.
    pub async fn can_write(&self) -> GitResult<bool> {
        self.probe(Service::ReceivePack).await
    }

    async fn probe(&self, service: Service) -> GitResult<bool> {
        match self.transport.smart_info(service).await {
            Ok(..) => Ok(true),
            Err(err) if err.is_auth_err() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The server's protocol-v2 capability advertisement for a service.
    pub async fn server_capabilities(
        &self,
        service: Service,
    ) -> GitResult<protocol::Capabilities> {
        let stream = self.transport.smart_info(service).await?;
        protocol::read_advertisement(stream, service).await
    }

    /// The branch `HEAD` points at, from the symref target the server
    /// advertises.
    pub async fn default_branch(&self) -> GitResult<String> {
        let head = self.get_ref(refs::HEAD).await?;
        head.symref_target
            .ok_or_else(|| anyhow!("server did not advertise a symref target for HEAD"))
    }

    // ------------------------------------------------------------------
    // reference manager
    // ------------------------------------------------------------------

    /// All refs the server advertises, `HEAD` included.
    pub async fn list_refs(&self) -> GitResult<Vec<RemoteRef>> {
        protocol::ls_refs(self.transport(), &[]).await
    }

    pub async fn get_ref(&self, name: &str) -> GitResult<RemoteRef> {
        let refs = protocol::ls_refs(self.transport(), &[name]).await?;
        refs.into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!(GitError::RefNotFound(name.to_owned())))
    }

    /// Point a new ref at an existing commit. The server rejects the
    /// update when the ref is already there.
    pub async fn create_ref(&self, name: &str, oid: Oid) -> GitResult<()> {
        self.validate_ref_name(name)?;
        ensure!(oid.is_known(), "refusing to create `{}` at the zero id", name);
        self.send_ref_update(RefUpdate::create(name, oid)).await
    }

    /// Compare-and-swap a ref: `expected_old` is what the caller last saw;
    /// a mismatch surfaces as `RefStale`.
    pub async fn update_ref(&self, name: &str, expected_old: Oid, new: Oid) -> GitResult<()> {
        self.validate_ref_name(name)?;
        ensure!(new.is_known(), "refusing to update `{}` to the zero id, use delete_ref", name);
        self.send_ref_update(RefUpdate::update(name, expected_old, new)).await
    }

    /// Delete a ref. The current value is looked up first, so a missing
    /// ref is `RefNotFound` rather than a server-side rejection.
    pub async fn delete_ref(&self, name: &str) -> GitResult<()> {
        let current = self.get_ref(name).await?;
        let update = RefUpdate::delete(name, current.oid);
        // a deletion moves no objects, so no pack rides along
        protocol::receive_pack(self.transport(), &[update], None, &self.user_agent)
            .await?
            .into_result()
    }

    async fn send_ref_update(&self, update: RefUpdate) -> GitResult<()> {
        let pack = PackBuilder::empty()?;
        protocol::receive_pack(self.transport(), &[update], Some(pack), &self.user_agent)
            .await?
            .into_result()
    }

    fn validate_ref_name(&self, name: &str) -> GitResult<()> {
        ensure!(is_valid_name(name), "invalid ref name `{}`", name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // object reads
    // ------------------------------------------------------------------

    /// Fetch arbitrary objects into `store`; already-cached ids are not
    /// requested again.
    pub async fn fetch_objects(
        &self,
        store: &mut ObjectStore,
        wants: &[Oid],
        opts: &FetchOptions,
    ) -> GitResult<FetchResult> {
        protocol::fetch(self.transport(), store, wants, opts).await
    }

    pub async fn get_commit(&self, store: &mut ObjectStore, oid: Oid) -> GitResult<Commit> {
        self.ensure_object(store, oid, shallow_opts()).await?;
        Ok(store.get(oid).unwrap().as_commit()?.clone())
    }

    pub async fn get_tree(&self, store: &mut ObjectStore, oid: Oid) -> GitResult<Tree> {
        self.ensure_object(store, oid, shallow_opts()).await?;
        Ok(store.get(oid).unwrap().as_tree()?.clone())
    }

    pub async fn get_blob(&self, store: &mut ObjectStore, oid: Oid) -> GitResult<Vec<u8>> {
        self.ensure_object(store, oid, FetchOptions::default()).await?;
        Ok(store.get(oid).unwrap().as_blob()?.to_vec())
    }

    async fn ensure_object(
        &self,
        store: &mut ObjectStore,
        oid: Oid,
        opts: FetchOptions,
    ) -> GitResult<()> {
        ensure!(oid.is_known(), GitError::ObjectNotFound(oid.to_hex()));
        if store.contains(oid) {
            return Ok(());
        }
        protocol::fetch(self.transport(), store, &[oid], &opts).await?;
        ensure!(store.contains(oid), GitError::ObjectNotFound(oid.to_hex()));
        Ok(())
    }

    /// Resolve a commit-or-tree id down to a tree id.
    async fn resolve_tree_oid(&self, store: &mut ObjectStore, treeish: Oid) -> GitResult<Oid> {
        self.ensure_object(store, treeish, shallow_opts()).await?;
        let obj = store.get(treeish).unwrap();
        match obj.kind() {
            ObjectKind::Tree(..) => Ok(treeish),
            ObjectKind::Commit(commit) => Ok(commit.tree),
            _ => Err(anyhow!(GitError::UnexpectedObjectType {
                expected: GitObjType::Tree,
                actual: obj.obj_type(),
            })),
        }
    }

    /// Read one blob by its path under a commit or tree.
    pub async fn get_blob_by_path(
        &self,
        store: &mut ObjectStore,
        root: Oid,
        path: &str,
    ) -> GitResult<Vec<u8>> {
        let not_found = || anyhow!(GitError::PathNotFound(path.to_owned()));
        let mut tree_oid = self.resolve_tree_oid(store, root).await?;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        ensure!(components.peek().is_some(), GitError::PathNotFound(path.to_owned()));

        while let Some(component) = components.next() {
            let tree = self.get_tree(store, tree_oid).await?;
            let entry = tree.entry(component).ok_or_else(not_found)?.clone();
            if components.peek().is_none() {
                ensure!(entry.mode.is_blob(), GitError::PathNotFound(path.to_owned()));
                return self.get_blob(store, entry.oid).await;
            }
            ensure!(entry.mode.is_tree(), GitError::PathNotFound(path.to_owned()));
            tree_oid = entry.oid;
        }
        Err(not_found())
    }

    /// Recursively enumerate a tree into path-qualified entries (subtrees
    /// included), sorted by path.
    pub async fn get_flat_tree(
        &self,
        store: &mut ObjectStore,
        treeish: Oid,
    ) -> GitResult<Vec<FlatTreeEntry>> {
        let root = self.resolve_tree_oid(store, treeish).await?;
        let mut out = vec![];
        let mut stack = vec![(String::new(), root)];
        while let Some((prefix, tree_oid)) = stack.pop() {
            let tree = self.get_tree(store, tree_oid).await?;
            for entry in tree.entries() {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.mode.is_tree() {
                    stack.push((path.clone(), entry.oid));
                }
                out.push(FlatTreeEntry { path, mode: entry.mode, oid: entry.oid });
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// First-parent history page starting at `start`.
    pub async fn list_commits(
        &self,
        store: &mut ObjectStore,
        start: Oid,
        opts: &ListCommitsOptions,
    ) -> GitResult<Vec<(Oid, Commit)>> {
        let mut out = vec![];
        let mut cursor = Some(start);
        let mut to_skip = opts.skip;
        while let Some(oid) = cursor {
            if opts.limit > 0 && out.len() == opts.limit {
                break;
            }
            let commit = self.get_commit(store, oid).await?;
            cursor = commit.parent();
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            out.push((oid, commit));
        }
        Ok(out)
    }

    /// Blob-level difference between two commits, sorted by path. A rename
    /// reports as an add/delete pair.
    pub async fn compare_commits(
        &self,
        store: &mut ObjectStore,
        old: Oid,
        new: Oid,
    ) -> GitResult<Vec<FileChange>> {
        let old_blobs = self.flat_blobs(store, old).await?;
        let new_blobs = self.flat_blobs(store, new).await?;
        Ok(diff::diff_flat_blobs(&old_blobs, &new_blobs))
    }

    async fn flat_blobs(
        &self,
        store: &mut ObjectStore,
        treeish: Oid,
    ) -> GitResult<diff::FlatBlobs> {
        let entries = self.get_flat_tree(store, treeish).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.mode.is_blob())
            .map(|entry| (entry.path, (entry.mode, entry.oid)))
            .collect::<BTreeMap<_, _>>())
    }

    // ------------------------------------------------------------------
    // writes
    // ------------------------------------------------------------------

    /// A staged writer positioned on an existing ref.
    pub async fn staged_writer<'c>(&'c self, ref_name: &str) -> GitResult<StagedWriter<'c>> {
        let r = self.get_ref(ref_name).await?;
        StagedWriter::new(self, ref_name, r.oid).await
    }

    /// A staged writer at an explicit baseline; the zero id starts from an
    /// empty tree (new ref, or empty repository).
    pub async fn staged_writer_at<'c>(
        &'c self,
        ref_name: &str,
        baseline: Oid,
    ) -> GitResult<StagedWriter<'c>> {
        StagedWriter::new(self, ref_name, baseline).await
    }
}

/// Object fetches for commits/trees: one level deep, no blobs.
fn shallow_opts() -> FetchOptions {
    FetchOptions { deepen: Some(1), filter: Some("blob:none".into()), ..Default::default() }
}
