use crate::hash::Oid;
use crate::obj::{GitObject, GitObjType};
use indexmap::IndexMap;

/// An in-memory, insertion-ordered object map.
///
/// Doubles as the fetch cache (already-fetched ids are dropped from `want`
/// sets) and as the base resolver for ref-deltas whose bases arrived in an
/// earlier fetch. The store is deliberately single-owner; share it across
/// tasks behind your own lock if you must.
#[derive(Default)]
pub struct ObjectStore {
    objects: IndexMap<Oid, GitObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, oid: Oid) -> Option<&GitObject> {
        self.objects.get(&oid)
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.objects.contains_key(&oid)
    }

    pub fn insert(&mut self, obj: GitObject) {
        self.objects.insert(obj.oid(), obj);
    }

    /// raw payload for delta resolution
    pub(crate) fn raw(&self, oid: Oid) -> Option<(GitObjType, Vec<u8>)> {
        self.get(oid).map(|obj| (obj.obj_type(), obj.data().to_vec()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// objects in insertion order, which for fetched objects is pack
    /// emission order
    pub fn iter(&self) -> impl Iterator<Item = &GitObject> {
        self.objects.values()
    }
}
