use crate::client::GitClient;
use crate::error::{GitError, GitErrorExt, GitResult};
use crate::hash::Oid;
use crate::obj::{Commit, FileMode, GitObjType, GitObject, Tree, TreeEntry};
use crate::pack::PackBuilder;
use crate::protocol;
use crate::refs::{is_valid_name, RefUpdate};
use crate::signature::Signature;
use crate::store::ObjectStore;
use indexmap::IndexMap;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// A virtual tree node. Subtrees are pulled from the server lazily, the
/// first time a path walks through them.
enum Node {
    Blob { mode: FileMode, oid: Oid },
    Tree(TreeNode),
}

struct TreeNode {
    children: BTreeMap<String, Node>,
    /// server-side id at load time; zero for locally synthesized trees
    oid: Oid,
    loaded: bool,
}

impl TreeNode {
    fn empty() -> Self {
        Self { children: BTreeMap::new(), oid: Oid::ZERO, loaded: true }
    }

    fn lazy(oid: Oid) -> Self {
        Self { children: BTreeMap::new(), oid, loaded: false }
    }
}

/// Stages blob/tree/commit mutations entirely in memory and pushes them as
/// a single packfile with an optimistic (compare-and-swap) ref update.
///
/// A writer is a single-producer state machine: construct it at a ref,
/// mutate, [`commit`](Self::commit), [`push`](Self::push). After a
/// successful push (or a `RefStale` rejection) the writer is spent and a
/// new one must be constructed from the server's tip.
pub struct StagedWriter<'c> {
    client: &'c GitClient,
    store: ObjectStore,
    ref_name: String,
    /// the commit the server is expected to be at when we push
    baseline: Oid,
    /// latest committed id; equals `baseline` until the first commit
    tip: Oid,
    root: TreeNode,
    new_objects: IndexMap<Oid, GitObject>,
    spent: bool,
}

impl<'c> StagedWriter<'c> {
    pub(crate) async fn new(
        client: &'c GitClient,
        ref_name: &str,
        baseline: Oid,
    ) -> GitResult<StagedWriter<'c>> {
        ensure!(is_valid_name(ref_name), "invalid ref name `{}`", ref_name);
        let mut store = ObjectStore::new();
        let root = if baseline.is_zero() {
            TreeNode::empty()
        } else {
            let commit = client.get_commit(&mut store, baseline).await?;
            TreeNode::lazy(commit.tree)
        };
        debug!("StagedWriter::new: ref `{}` at baseline {:#}", ref_name, baseline);
        Ok(Self {
            client,
            store,
            ref_name: ref_name.to_owned(),
            baseline,
            tip: baseline,
            root,
            new_objects: IndexMap::new(),
            spent: false,
        })
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    pub fn baseline(&self) -> Oid {
        self.baseline
    }

    /// the last committed id; the baseline until [`commit`](Self::commit)
    /// is called
    pub fn tip(&self) -> Oid {
        self.tip
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    fn check_usable(&self) -> GitResult<()> {
        ensure!(!self.spent, "writer is spent; construct a new one from the server's tip");
        Ok(())
    }

    // ------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------

    pub async fn blob_exists(&mut self, path: &str) -> GitResult<bool> {
        self.check_usable()?;
        let components = split_path(path)?;
        self.load_path(&components).await?;
        Ok(matches!(self.node_at(&components), Some(Node::Blob { .. })))
    }

    /// Current content of the blob at `path`, staged or baseline.
    pub async fn get_blob(&mut self, path: &str) -> GitResult<Vec<u8>> {
        self.check_usable()?;
        let components = split_path(path)?;
        self.load_path(&components).await?;
        let oid = match self.node_at(&components) {
            Some(&Node::Blob { oid, .. }) => oid,
            _ => bail!(GitError::ObjectNotFound(path.to_owned())),
        };
        match self.new_objects.get(&oid) {
            Some(obj) => Ok(obj.as_blob()?.to_vec()),
            None => self.client.get_blob(&mut self.store, oid).await,
        }
    }

    /// Entries of the tree at `path` (empty string for the root), with ids
    /// reflecting all staged mutations.
    pub async fn get_tree(&mut self, path: &str) -> GitResult<Vec<TreeEntry>> {
        self.check_usable()?;
        let components =
            if path.is_empty() { vec![] } else { split_path(path)? };
        self.load_path(&components).await?;
        let node = match self.node_at(&components) {
            _ if components.is_empty() => None,
            Some(Node::Tree(tree)) => Some(tree),
            Some(Node::Blob { .. }) => bail!(GitError::UnexpectedObjectType {
                expected: GitObjType::Tree,
                actual: GitObjType::Blob,
            }),
            None => bail!(GitError::ObjectNotFound(path.to_owned())),
        };
        let node = node.unwrap_or(&self.root);
        let mut scratch = vec![];
        let mut entries = vec![];
        for (name, child) in &node.children {
            if let Some(entry) = child_entry(name, child, &mut scratch)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // mutations (in-memory until commit/push)
    // ------------------------------------------------------------------

    /// Stage a new blob at `path`, creating intermediate trees as needed.
    pub async fn create_blob(&mut self, path: &str, content: &[u8]) -> GitResult<Oid> {
        self.check_usable()?;
        let components = split_path(path)?;
        self.load_path(&components).await?;

        let (dirs, name) = components.split_at(components.len() - 1);
        let mut node = &mut self.root;
        for (i, comp) in dirs.iter().enumerate() {
            node = match node.children.entry(comp.clone()) {
                Entry::Occupied(entry) => match entry.into_mut() {
                    Node::Tree(tree) => tree,
                    Node::Blob { .. } => bail!(GitError::PathAlreadyExists(
                        components[..=i].join("/")
                    )),
                },
                Entry::Vacant(entry) => match entry.insert(Node::Tree(TreeNode::empty())) {
                    Node::Tree(tree) => tree,
                    Node::Blob { .. } => unreachable!(),
                },
            };
        }
        let name = &name[0];
        if node.children.contains_key(name) {
            bail!(GitError::PathAlreadyExists(path.to_owned()));
        }

        let obj = GitObject::blob(content.to_vec());
        let oid = obj.oid();
        trace!("create_blob: `{}` -> {:#}", path, oid);
        self.new_objects.insert(oid, obj);
        node.children.insert(name.clone(), Node::Blob { mode: FileMode::REG, oid });
        Ok(oid)
    }

    /// Replace the content of an existing blob; its mode is preserved.
    pub async fn update_blob(&mut self, path: &str, content: &[u8]) -> GitResult<Oid> {
        self.check_usable()?;
        let components = split_path(path)?;
        self.load_path(&components).await?;

        let obj = GitObject::blob(content.to_vec());
        let oid = obj.oid();
        match self.node_at_mut(&components) {
            Some(Node::Blob { oid: slot, .. }) => *slot = oid,
            _ => bail!(GitError::ObjectNotFound(path.to_owned())),
        }
        trace!("update_blob: `{}` -> {:#}", path, oid);
        self.new_objects.insert(oid, obj);
        Ok(oid)
    }

    /// Unstage/delete the blob at `path`; emptied ancestor trees are
    /// pruned.
    pub async fn delete_blob(&mut self, path: &str) -> GitResult<()> {
        self.check_usable()?;
        let components = split_path(path)?;
        self.load_path(&components).await?;

        let (dirs, name) = components.split_at(components.len() - 1);
        let parent = match self.tree_node_at_mut(dirs) {
            Some(parent) => parent,
            None => bail!(GitError::ObjectNotFound(path.to_owned())),
        };
        match parent.children.get(&name[0]) {
            Some(Node::Blob { .. }) => {
                parent.children.remove(&name[0]);
            }
            _ => bail!(GitError::ObjectNotFound(path.to_owned())),
        }
        prune_empty(&mut self.root, dirs);
        trace!("delete_blob: `{}`", path);
        Ok(())
    }

    /// Delete the whole subtree at `path`; the empty string clears
    /// everything under the root (an empty root tree is valid).
    pub async fn delete_tree(&mut self, path: &str) -> GitResult<()> {
        self.check_usable()?;
        if path.is_empty() {
            self.root = TreeNode::empty();
            trace!("delete_tree: cleared root");
            return Ok(());
        }
        let components = split_path(path)?;
        self.load_path(&components).await?;

        let (dirs, name) = components.split_at(components.len() - 1);
        let parent = match self.tree_node_at_mut(dirs) {
            Some(parent) => parent,
            None => bail!(GitError::ObjectNotFound(path.to_owned())),
        };
        match parent.children.get(&name[0]) {
            Some(Node::Tree(..)) => {
                parent.children.remove(&name[0]);
            }
            Some(Node::Blob { .. }) => bail!(GitError::UnexpectedObjectType {
                expected: GitObjType::Tree,
                actual: GitObjType::Blob,
            }),
            None => bail!(GitError::ObjectNotFound(path.to_owned())),
        }
        prune_empty(&mut self.root, dirs);
        trace!("delete_tree: `{}`", path);
        Ok(())
    }

    // ------------------------------------------------------------------
    // commit & push
    // ------------------------------------------------------------------

    /// Materialise the staged tree as a commit on top of the current tip.
    /// A trailing newline is added to the message if missing.
    pub fn commit(
        &mut self,
        message: &str,
        author: Signature,
        committer: Signature,
    ) -> GitResult<Oid> {
        self.check_usable()?;
        let mut minted = vec![];
        let root_oid = build_tree(&self.root, &mut minted)?;
        if root_oid == self.tip_tree()? {
            bail!(GitError::NothingToCommit);
        }

        for obj in minted {
            // subtrees the server already has are not new objects
            if !self.store.contains(obj.oid()) {
                self.new_objects.insert(obj.oid(), obj);
            }
        }

        let mut message = message.to_owned();
        if !message.ends_with('\n') {
            message.push('\n');
        }
        let parents = if self.tip.is_zero() { vec![] } else { vec![self.tip] };
        let commit = Commit::new(root_oid, parents, author, committer, message);
        let obj = GitObject::commit(commit)?;
        let oid = obj.oid();
        debug!("commit: {:#} (tree {:#}) on `{}`", oid, root_oid, self.ref_name);
        self.new_objects.insert(oid, obj);
        self.tip = oid;
        Ok(oid)
    }

    /// Emit a pack of everything minted since construction and move the
    /// ref from the baseline to the latest commit in one compare-and-swap.
    ///
    /// On success, and on a `RefStale` rejection, the writer is spent.
    pub async fn push(&mut self) -> GitResult<Oid> {
        self.check_usable()?;
        if self.tip == self.baseline {
            bail!(GitError::NothingToPush);
        }

        let mut builder = PackBuilder::new();
        for obj in self.new_objects.values() {
            builder.push_object(obj);
        }
        debug!(
            "push: `{}` {:#} -> {:#} ({} objects)",
            self.ref_name,
            self.baseline,
            self.tip,
            builder.object_count()
        );
        let pack = builder.build()?;
        let update = RefUpdate::update(self.ref_name.clone(), self.baseline, self.tip);
        let report = protocol::receive_pack(
            self.client.transport(),
            &[update],
            Some(pack),
            self.client.user_agent(),
        )
        .await?;

        let result = report.into_result();
        match &result {
            Ok(()) => self.spent = true,
            Err(err) if matches!(err.git_kind(), Some(GitError::RefStale(..))) => {
                self.spent = true
            }
            Err(..) => {}
        }
        result.map(|()| self.tip)
    }

    // ------------------------------------------------------------------
    // virtual tree plumbing
    // ------------------------------------------------------------------

    /// Depth and id of the first unloaded tree along `components`, if any.
    fn first_unloaded(&self, components: &[String]) -> Option<(usize, Oid)> {
        let mut node = &self.root;
        if !node.loaded {
            return Some((0, node.oid));
        }
        for (i, comp) in components.iter().enumerate() {
            match node.children.get(comp) {
                Some(Node::Tree(tree)) => {
                    if !tree.loaded {
                        return Some((i + 1, tree.oid));
                    }
                    node = tree;
                }
                _ => return None,
            }
        }
        None
    }

    /// Pull every tree along `components` into the virtual tree.
    async fn load_path(&mut self, components: &[String]) -> GitResult<()> {
        while let Some((depth, oid)) = self.first_unloaded(components) {
            trace!("load_path: loading tree {:#} at depth {}", oid, depth);
            let client = self.client;
            let tree = client.get_tree(&mut self.store, oid).await?;
            let node = self
                .tree_node_at_mut(&components[..depth])
                .expect("path to an unloaded tree walks loaded trees");
            node.children = tree
                .entries()
                .iter()
                .map(|entry| {
                    let child = if entry.mode.is_tree() {
                        Node::Tree(TreeNode::lazy(entry.oid))
                    } else {
                        Node::Blob { mode: entry.mode, oid: entry.oid }
                    };
                    (entry.name.clone(), child)
                })
                .collect();
            node.loaded = true;
        }
        Ok(())
    }

    fn node_at(&self, components: &[String]) -> Option<&Node> {
        let mut node = &self.root;
        let (last, dirs) = components.split_last()?;
        for comp in dirs {
            match node.children.get(comp) {
                Some(Node::Tree(tree)) => node = tree,
                _ => return None,
            }
        }
        node.children.get(last)
    }

    fn node_at_mut(&mut self, components: &[String]) -> Option<&mut Node> {
        let (last, dirs) = components.split_last()?;
        let parent = self.tree_node_at_mut(dirs)?;
        parent.children.get_mut(last)
    }

    fn tree_node_at_mut(&mut self, components: &[String]) -> Option<&mut TreeNode> {
        let mut node = &mut self.root;
        for comp in components {
            match node.children.get_mut(comp) {
                Some(Node::Tree(tree)) => node = tree,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Tree id of the current tip commit; zero when there is no tip yet.
    fn tip_tree(&self) -> GitResult<Oid> {
        if self.tip.is_zero() {
            return Ok(Oid::ZERO);
        }
        let obj = self
            .new_objects
            .get(&self.tip)
            .or_else(|| self.store.get(self.tip))
            .ok_or_else(|| anyhow!(GitError::ObjectNotFound(self.tip.to_hex())))?;
        Ok(obj.as_commit()?.tree)
    }
}

/// Rebuild a subtree bottom-up, collecting every materialised tree object.
/// Unloaded subtrees keep their server-side id; emptied subtrees are elided
/// from their parents.
fn build_tree(node: &TreeNode, minted: &mut Vec<GitObject>) -> GitResult<Oid> {
    debug_assert!(node.loaded || node.oid.is_known());
    if !node.loaded {
        return Ok(node.oid);
    }
    let mut entries = vec![];
    for (name, child) in &node.children {
        if let Some(entry) = child_entry(name, child, minted)? {
            entries.push(entry);
        }
    }
    let obj = GitObject::tree(Tree::new(entries)?)?;
    let oid = obj.oid();
    minted.push(obj);
    Ok(oid)
}

fn child_entry(
    name: &str,
    child: &Node,
    minted: &mut Vec<GitObject>,
) -> GitResult<Option<TreeEntry>> {
    match child {
        Node::Blob { mode, oid } => Ok(Some(TreeEntry::new(*mode, name, *oid))),
        Node::Tree(tree) if tree.loaded && tree.children.is_empty() => Ok(None),
        Node::Tree(tree) => {
            let oid = build_tree(tree, minted)?;
            Ok(Some(TreeEntry::new(FileMode::TREE, name, oid)))
        }
    }
}

/// Remove emptied trees along `path`, deepest first.
fn prune_empty(node: &mut TreeNode, path: &[String]) {
    if let Some((first, rest)) = path.split_first() {
        if let Some(Node::Tree(child)) = node.children.get_mut(first) {
            prune_empty(child, rest);
            if child.loaded && child.children.is_empty() {
                node.children.remove(first);
            }
        }
    }
}

fn split_path(path: &str) -> GitResult<Vec<String>> {
    let components = path
        .split('/')
        .filter(|c| !c.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    ensure!(!components.is_empty(), "empty path");
    ensure!(
        components.iter().all(|c| c != "." && c != ".."),
        "path `{}` contains relative components",
        path
    );
    Ok(components)
}
