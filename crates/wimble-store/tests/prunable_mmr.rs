//! End-to-end tests of the file-backed prunable MMR: spend semantics,
//! eager prune-list collapse, rewind and compaction.

use roaring::RoaringBitmap;
use wimble_mmr::{arith, Backend, Pmmr};
use wimble_primitives::{Commitment, OutputFeatures, OutputIdentifier, COMMITMENT_SIZE};
use wimble_store::{PmmrBackend, WriteParticipant};

type OutputMmr = Pmmr<OutputIdentifier, PmmrBackend<OutputIdentifier>>;

fn ident(n: u8) -> OutputIdentifier {
    OutputIdentifier {
        features: OutputFeatures::Plain,
        commit: Commitment([n; COMMITMENT_SIZE]),
    }
}

fn open(dir: &std::path::Path) -> OutputMmr {
    let backend: PmmrBackend<OutputIdentifier> = PmmrBackend::open(dir, true).unwrap();
    let size = backend.unpruned_size();
    Pmmr::at(backend, size)
}

fn flush(pmmr: &mut OutputMmr) {
    pmmr.backend_mut().commit().unwrap();
}

#[test]
fn spend_then_spend_sibling_collapses_into_parent() {
    let dir = tempfile::tempdir().unwrap();
    let mut pmmr = open(dir.path());

    let (a, b) = (ident(1), ident(2));
    pmmr.push(&a).unwrap();
    pmmr.push(&b).unwrap();
    let root = pmmr.root().unwrap();

    // Spending A clears its leaf bit only.
    pmmr.remove(0).unwrap();
    assert_eq!(pmmr.get_data(0), None);
    assert_eq!(pmmr.get_data(1), Some(b));
    assert!(pmmr.backend().pruned_roots().is_empty());

    // Spending B collapses the pair into their parent.
    pmmr.remove(1).unwrap();
    assert_eq!(pmmr.backend().pruned_roots(), vec![2]);
    assert!(pmmr.backend().is_pruned(0));
    assert!(pmmr.backend().is_pruned(1));
    assert!(pmmr.backend().is_pruned(2));
    assert_eq!(pmmr.get_data(0), None);
    assert_eq!(pmmr.get_data(1), None);

    // The peak hash survives, so the root is unchanged.
    assert_eq!(pmmr.root().unwrap(), root);
}

#[test]
fn size_and_data_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = {
        let mut pmmr = open(dir.path());
        for n in 0..5 {
            pmmr.push(&ident(n)).unwrap();
        }
        pmmr.remove(arith::leaf_to_pos(2)).unwrap();
        flush(&mut pmmr);
        pmmr.root().unwrap()
    };

    let pmmr = open(dir.path());
    assert_eq!(pmmr.n_leaves(), 5);
    assert_eq!(pmmr.root().unwrap(), root);
    assert_eq!(pmmr.get_data(arith::leaf_to_pos(2)), None);
    assert_eq!(pmmr.get_data(arith::leaf_to_pos(3)), Some(ident(3)));
}

#[test]
fn discard_drops_uncommitted_appends_and_spends() {
    let dir = tempfile::tempdir().unwrap();
    let mut pmmr = open(dir.path());
    for n in 0..3 {
        pmmr.push(&ident(n)).unwrap();
    }
    flush(&mut pmmr);
    let committed_size = pmmr.size();
    let root = pmmr.root().unwrap();

    pmmr.push(&ident(9)).unwrap();
    pmmr.remove(0).unwrap();
    pmmr.discard(committed_size);

    assert_eq!(pmmr.size(), committed_size);
    assert_eq!(pmmr.root().unwrap(), root);
    assert_eq!(pmmr.get_data(0), Some(ident(0)));
}

#[test]
fn rewind_restores_spent_leaves_and_root() {
    let dir = tempfile::tempdir().unwrap();
    let mut pmmr = open(dir.path());
    for n in 0..4 {
        pmmr.push(&ident(n)).unwrap();
    }
    flush(&mut pmmr);
    let size_before = pmmr.size();
    let root_before = pmmr.root().unwrap();
    let leafset_before = pmmr.backend().leaf_set_snapshot();

    // A block appends 2 outputs and spends leaves 1 and 2.
    pmmr.push(&ident(10)).unwrap();
    pmmr.push(&ident(11)).unwrap();
    pmmr.remove(arith::leaf_to_pos(1)).unwrap();
    pmmr.remove(arith::leaf_to_pos(2)).unwrap();
    flush(&mut pmmr);
    assert_ne!(pmmr.root().unwrap(), root_before);

    let mut spent = RoaringBitmap::new();
    spent.insert(1);
    spent.insert(2);
    pmmr.rewind(size_before, &spent).unwrap();
    flush(&mut pmmr);

    assert_eq!(pmmr.size(), size_before);
    assert_eq!(pmmr.root().unwrap(), root_before);
    assert_eq!(pmmr.backend().leaf_set_snapshot(), leafset_before);
    for n in 0..4 {
        assert_eq!(pmmr.get_data(arith::leaf_to_pos(n)), Some(ident(n as u8)));
    }
}

#[test]
fn compaction_preserves_root_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut pmmr = open(dir.path());
    for n in 0..8 {
        pmmr.push(&ident(n)).unwrap();
    }
    // Spend leaves 0,1,2,3: two sibling pairs collapse to parents 2 and
    // 5, which collapse again into position 6.
    for leaf in 0..4 {
        pmmr.remove(arith::leaf_to_pos(leaf)).unwrap();
    }
    flush(&mut pmmr);
    let size = pmmr.size();
    let root = pmmr.root().unwrap();
    assert_eq!(pmmr.backend().pruned_roots(), vec![6]);

    assert!(pmmr.backend_mut().compact(size).unwrap());
    assert_eq!(pmmr.root().unwrap(), root);
    assert_eq!(pmmr.backend().pruned_roots(), vec![6]);

    // Data of pruned leaves is gone, the rest still reads.
    for leaf in 0..4u64 {
        assert_eq!(pmmr.get_data(arith::leaf_to_pos(leaf)), None);
    }
    for leaf in 4..8u64 {
        assert_eq!(
            pmmr.get_data(arith::leaf_to_pos(leaf)),
            Some(ident(leaf as u8))
        );
    }

    // Internal hashes under the pruned root are physically gone; the
    // root hash of the pruned subtree stays.
    assert_eq!(pmmr.backend().get_from_file(2), None);
    assert!(pmmr.backend().get_from_file(6).is_some());

    // Fixpoint: a second compaction changes nothing.
    assert!(!pmmr.backend_mut().compact(size).unwrap());
    assert_eq!(pmmr.root().unwrap(), root);
}

#[test]
fn appends_after_compaction_use_shifted_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let mut pmmr = open(dir.path());
    for n in 0..4 {
        pmmr.push(&ident(n)).unwrap();
    }
    pmmr.remove(0).unwrap();
    pmmr.remove(1).unwrap();
    flush(&mut pmmr);
    let size = pmmr.size();
    pmmr.backend_mut().compact(size).unwrap();

    let expected_root = {
        // Reference MMR with the same leaves, never pruned.
        let ref_dir = tempfile::tempdir().unwrap();
        let mut reference = open(ref_dir.path());
        for n in 0..4 {
            reference.push(&ident(n)).unwrap();
        }
        reference.push(&ident(40)).unwrap();
        reference.root().unwrap()
    };

    pmmr.push(&ident(40)).unwrap();
    flush(&mut pmmr);
    assert_eq!(pmmr.root().unwrap(), expected_root);
    assert_eq!(pmmr.get_data(arith::leaf_to_pos(4)), Some(ident(40)));

    // And everything still lines up after a reopen.
    drop(pmmr);
    let pmmr = open(dir.path());
    assert_eq!(pmmr.root().unwrap(), expected_root);
}
