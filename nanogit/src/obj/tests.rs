use super::*;
use crate::error::GitErrorExt;
use crate::hash::Sha1Hash;
use crate::signature::Signature;
use pretty_assertions::assert_eq;
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use rand::seq::SliceRandom;
use std::str::FromStr;

#[test]
fn empty_blob_oid() {
    assert_eq!(GitObject::blob(vec![]).oid(), Sha1Hash::EMPTY_BLOB);
}

#[test]
fn empty_tree_oid() -> GitResult<()> {
    assert_eq!(GitObject::tree(Tree::default())?.oid(), Sha1Hash::EMPTY_TREE);
    Ok(())
}

#[test]
fn blob_parse_and_rebuild_have_equal_ids() -> GitResult<()> {
    let parsed = GitObject::parse(GitObjType::Blob, b"new content".to_vec())?;
    let built = GitObject::blob(b"new content".to_vec());
    assert_eq!(parsed.oid(), built.oid());
    assert_eq!(parsed.as_blob()?, b"new content");
    Ok(())
}

#[quickcheck]
fn blob_roundtrip(bytes: Vec<u8>) -> GitResult<()> {
    let obj = GitObject::blob(bytes.clone());
    let reparsed = GitObject::parse(GitObjType::Blob, obj.data().to_vec())?;
    assert_eq!(obj.oid(), reparsed.oid());
    assert_eq!(reparsed.as_blob()?, bytes.as_slice());
    Ok(())
}

fn sample_tree() -> Tree {
    Tree::new(vec![
        TreeEntry::new(FileMode::TREE, "index", Sha1Hash::EMPTY_TREE),
        TreeEntry::new(FileMode::REG, "index.rs", Sha1Hash::EMPTY_BLOB),
        TreeEntry::new(FileMode::EXEC, "run.sh", Sha1Hash::EMPTY_BLOB),
    ])
    .unwrap()
}

#[test]
fn tree_sorts_files_before_sibling_directories() {
    let tree = sample_tree();
    let names = tree.entries().iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
    // `index.rs` sorts before the subtree `index` because the subtree
    // compares as `index/`
    assert_eq!(names, ["index.rs", "index", "run.sh"]);
}

#[test]
fn tree_id_invariant_under_presentation_order() -> GitResult<()> {
    let entries = vec![
        TreeEntry::new(FileMode::REG, "b.txt", Sha1Hash::EMPTY_BLOB),
        TreeEntry::new(FileMode::TREE, "b", Sha1Hash::EMPTY_TREE),
        TreeEntry::new(FileMode::REG, "a", Sha1Hash::EMPTY_BLOB),
        TreeEntry::new(FileMode::LINK, "z", Sha1Hash::EMPTY_BLOB),
    ];
    let expected = GitObject::tree(Tree::new(entries.clone())?)?.oid();
    let mut rng = rand::thread_rng();
    for _ in 0..16 {
        let mut shuffled = entries.clone();
        shuffled.shuffle(&mut rng);
        assert_eq!(GitObject::tree(Tree::new(shuffled)?)?.oid(), expected);
    }
    Ok(())
}

#[test]
fn tree_roundtrip() -> GitResult<()> {
    let obj = GitObject::tree(sample_tree())?;
    let reparsed = GitObject::parse(GitObjType::Tree, obj.data().to_vec())?;
    assert_eq!(reparsed.oid(), obj.oid());
    assert_eq!(reparsed.as_tree()?, obj.as_tree()?);
    Ok(())
}

#[test]
fn tree_rejects_invalid_entry_names() {
    for name in ["", "a/b", "nul\0byte"] {
        let entries = vec![TreeEntry::new(FileMode::REG, name, Sha1Hash::EMPTY_BLOB)];
        assert!(Tree::new(entries).is_err(), "`{}` should be rejected", name);
    }
}

#[test]
fn tree_rejects_duplicate_names() {
    let entries = vec![
        TreeEntry::new(FileMode::REG, "a", Sha1Hash::EMPTY_BLOB),
        TreeEntry::new(FileMode::REG, "a", Sha1Hash::EMPTY_TREE),
    ];
    assert!(Tree::new(entries).is_err());
}

fn sample_signature() -> Signature {
    Signature::from_str("Test Author <test@example.com> 1234567890 +0000").unwrap()
}

#[test]
fn commit_serialization_format() -> GitResult<()> {
    let commit = Commit::new(
        Sha1Hash::EMPTY_TREE,
        vec![],
        sample_signature(),
        sample_signature(),
        "initial commit\n",
    );
    let expected = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                    author Test Author <test@example.com> 1234567890 +0000\n\
                    committer Test Author <test@example.com> 1234567890 +0000\n\
                    \n\
                    initial commit\n";
    assert_eq!(String::from_utf8(commit.to_bytes()?).unwrap(), expected);
    Ok(())
}

#[test]
fn commit_roundtrip_with_parents() -> GitResult<()> {
    let commit = Commit::new(
        Sha1Hash::EMPTY_TREE,
        vec![Sha1Hash::EMPTY_BLOB, Sha1Hash::EMPTY_TREE],
        sample_signature(),
        sample_signature(),
        "merge two histories\n\nwith a body\n",
    );
    let obj = GitObject::commit(commit.clone())?;
    let reparsed = GitObject::parse(GitObjType::Commit, obj.data().to_vec())?;
    assert_eq!(reparsed.oid(), obj.oid());
    assert_eq!(reparsed.as_commit()?, &commit);
    Ok(())
}

#[test]
fn commit_parse_skips_gpgsig_but_reserializes_raw_bytes() -> GitResult<()> {
    let raw = "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
               parent e69de29bb2d1d6434b8b29ae775ad8c2e48c5391\n\
               author Test Author <test@example.com> 1234567890 +0000\n\
               committer Test Author <test@example.com> 1234567890 +0000\n\
               gpgsig -----BEGIN PGP SIGNATURE-----\n \n some base64 here\n -----END PGP SIGNATURE-----\n\
               \n\
               signed!\n";
    let obj = GitObject::parse(GitObjType::Commit, raw.as_bytes().to_vec())?;
    let commit = obj.as_commit()?;
    assert_eq!(commit.message, "signed!\n");
    assert_eq!(commit.parents.len(), 1);
    // the raw payload is carried verbatim, so the id still matches the bytes
    assert_eq!(obj.data(), raw.as_bytes());
    assert_eq!(obj.oid(), crate::hash::hash_object("commit", raw.as_bytes()));
    Ok(())
}

#[test]
fn tag_parse() -> GitResult<()> {
    let raw = "object e69de29bb2d1d6434b8b29ae775ad8c2e48c5391\n\
               type commit\n\
               tag v1.0.0\n\
               tagger Test Author <test@example.com> 1234567890 +0000\n\
               \n\
               release v1.0.0\n";
    let obj = GitObject::parse(GitObjType::Tag, raw.as_bytes().to_vec())?;
    let tag = obj.as_tag()?;
    assert_eq!(tag.name, "v1.0.0");
    assert_eq!(tag.obj_type, GitObjType::Commit);
    assert_eq!(tag.message, "release v1.0.0\n");
    Ok(())
}

#[test]
fn object_accessors_enforce_kind() {
    let blob = GitObject::blob(b"x".to_vec());
    let err = blob.as_commit().unwrap_err();
    assert_eq!(
        err.git_kind(),
        Some(&GitError::UnexpectedObjectType {
            expected: GitObjType::Commit,
            actual: GitObjType::Blob
        })
    );
}

impl Arbitrary for FileMode {
    fn arbitrary(g: &mut Gen) -> Self {
        *g.choose(&[FileMode::REG, FileMode::EXEC, FileMode::LINK]).unwrap()
    }
}

impl Arbitrary for TreeEntry {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = 1 + usize::arbitrary(g) % 12;
        let name = (0..len)
            .map(|_| *g.choose(&[b'a', b'b', b'c', b'd', b'.', b'-', b'_']).unwrap() as char)
            .collect::<String>();
        Self { mode: Arbitrary::arbitrary(g), name, oid: Arbitrary::arbitrary(g) }
    }
}

#[quickcheck]
fn tree_serialize_then_parse(entries: Vec<TreeEntry>) -> GitResult<()> {
    let tree = match Tree::new(entries) {
        Ok(tree) => tree,
        // duplicate names are rejected at construction, nothing to check
        Err(..) => return Ok(()),
    };
    let bytes = tree.to_bytes()?;
    let parsed = Tree::deserialize_from_slice(&bytes)?;
    assert_eq!(tree, parsed);
    Ok(())
}
