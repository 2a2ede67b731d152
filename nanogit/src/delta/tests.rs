use super::*;
use crate::error::GitErrorExt;
use crate::test_utils::encode_delta;
use pretty_assertions::assert_eq;

#[test]
fn expand_insert_only_delta() -> GitResult<()> {
    let bytes = encode_delta(0, 5, &[DeltaOp::Insert(b"hello".to_vec())]);
    let delta = Delta::deserialize(&bytes)?;
    assert_eq!(delta.expand(b"")?, b"hello");
    Ok(())
}

#[test]
fn expand_copy_and_insert() -> GitResult<()> {
    let base = b"the quick brown fox";
    let ops =
        [DeltaOp::Copy(4, 5), DeltaOp::Insert(b" and lazy ".to_vec()), DeltaOp::Copy(16, 3)];
    let bytes = encode_delta(base.len() as u64, 18, &ops);
    let delta = Delta::deserialize(&bytes)?;
    assert_eq!(delta.expand(base)?, b"quick and lazy fox");
    Ok(())
}

#[test]
fn copy_with_zero_size_field_means_0x10000() -> GitResult<()> {
    let base = vec![0xaa; 0x10000];
    let bytes = encode_delta(base.len() as u64, 0x10000, &[DeltaOp::Copy(0, 0x10000)]);
    let delta = Delta::deserialize(&bytes)?;
    assert_eq!(delta.expand(&base)?.len(), 0x10000);
    Ok(())
}

#[test]
fn zero_instruction_byte_is_fatal() {
    // sizes 0/0 then a reserved zero instruction
    let err = Delta::deserialize(&[0x00, 0x00, 0x00]).unwrap_err();
    assert!(matches!(err.git_kind(), Some(GitError::DeltaReconstructionFailed(..))));
}

#[test]
fn source_size_mismatch_is_fatal() {
    let bytes = encode_delta(3, 1, &[DeltaOp::Copy(0, 1)]);
    let delta = Delta::deserialize(&bytes).unwrap();
    let err = delta.expand(b"way too long for declared source").unwrap_err();
    assert!(matches!(err.git_kind(), Some(GitError::DeltaReconstructionFailed(..))));
}

#[test]
fn target_size_mismatch_is_fatal() {
    let bytes = encode_delta(4, 10, &[DeltaOp::Copy(0, 4)]);
    let delta = Delta::deserialize(&bytes).unwrap();
    let err = delta.expand(b"abcd").unwrap_err();
    assert!(matches!(err.git_kind(), Some(GitError::DeltaReconstructionFailed(..))));
}

#[test]
fn copy_out_of_bounds_is_fatal() {
    let bytes = encode_delta(4, 8, &[DeltaOp::Copy(2, 6)]);
    let delta = Delta::deserialize(&bytes).unwrap();
    assert!(delta.expand(b"abcd").is_err());
}

#[test]
fn roundtrip_ops() -> GitResult<()> {
    let ops = [
        DeltaOp::Insert(b"prefix ".to_vec()),
        DeltaOp::Copy(0x1234, 0x56),
        DeltaOp::Copy(0, 16),
    ];
    let bytes = encode_delta(0x2000, 7 + 0x56 + 16, &ops);
    let delta = Delta::deserialize(&bytes)?;
    assert_eq!(delta.ops, ops);
    Ok(())
}
