use crate::hash::Oid;
use crate::obj::FileMode;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// A path-qualified entry of a recursively enumerated tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatTreeEntry {
    pub path: String,
    pub mode: FileMode,
    pub oid: Oid,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<Oid>,
    pub new: Option<Oid>,
}

pub(crate) type FlatBlobs = BTreeMap<String, (FileMode, Oid)>;

/// Walk two flattened trees in step and report per-path changes, sorted by
/// path. Renames are not detected; a renamed file reports as an add/delete
/// pair.
pub(crate) fn diff_flat_blobs(old: &FlatBlobs, new: &FlatBlobs) -> Vec<FileChange> {
    let mut changes = vec![];
    let mut old_iter = old.iter().peekable();
    let mut new_iter = new.iter().peekable();

    loop {
        match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (Some(..), None) => {
                let (path, &(_, oid)) = old_iter.next().unwrap();
                changes.push(deleted(path, oid));
            }
            (None, Some(..)) => {
                let (path, &(_, oid)) = new_iter.next().unwrap();
                changes.push(added(path, oid));
            }
            (Some((old_path, ..)), Some((new_path, ..))) => match old_path.cmp(new_path) {
                Ordering::Less => {
                    let (path, &(_, oid)) = old_iter.next().unwrap();
                    changes.push(deleted(path, oid));
                }
                Ordering::Greater => {
                    let (path, &(_, oid)) = new_iter.next().unwrap();
                    changes.push(added(path, oid));
                }
                Ordering::Equal => {
                    let (path, &(old_mode, old_oid)) = old_iter.next().unwrap();
                    let (_, &(new_mode, new_oid)) = new_iter.next().unwrap();
                    if old_oid != new_oid || old_mode != new_mode {
                        changes.push(FileChange {
                            path: path.clone(),
                            kind: ChangeKind::Modified,
                            old: Some(old_oid),
                            new: Some(new_oid),
                        });
                    }
                }
            },
        }
    }
    changes
}

fn added(path: &str, oid: Oid) -> FileChange {
    FileChange { path: path.to_owned(), kind: ChangeKind::Added, old: None, new: Some(oid) }
}

fn deleted(path: &str, oid: Oid) -> FileChange {
    FileChange { path: path.to_owned(), kind: ChangeKind::Deleted, old: Some(oid), new: None }
}
