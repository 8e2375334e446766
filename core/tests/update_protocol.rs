// core/tests/update_protocol.rs
//
// Integration tests for the incremental update protocol.
//
// Tests cover:
// - Redelivered batches are ignored and never re-applied
// - Sequence gaps are rejected without touching the model or checkpoint
// - Checkpoint reporting and restore after restart
// - Domain lifecycle (creation by edits, DropDomain, emptied domains)
// - Independent channels
// - Batches that would overflow a count are rejected as a whole

use ilm_core::{
    ApplyOutcome, Checkpoint, Config, ContextVector, Edit, EditOp, IncrementalModel,
    InterpolatedLm, LanguageModel, UpdateBatch, UpdateError, BackoffModel, SENTENCE_END,
};

fn background() -> BackoffModel {
    let mut bg = BackoffModel::new(3);
    for (w, lp) in [(10, -1.0), (11, -1.6), (12, -2.3), (13, -2.9), (SENTENCE_END, -1.1)] {
        bg.insert_unigram(w, lp);
    }
    bg.insert(&[10, 11], -0.4, -0.2);
    bg
}

fn new_lm() -> InterpolatedLm {
    InterpolatedLm::new(background(), Config::default()).expect("valid config")
}

fn sentence_batch(channel: u16, seq: u64, domain: u32, words: &[u32]) -> UpdateBatch {
    UpdateBatch::new(
        channel,
        seq,
        vec![Edit::new(
            domain,
            EditOp::AddSentence {
                words: words.to_vec(),
            },
        )],
    )
}

fn batches() -> Vec<UpdateBatch> {
    vec![
        sentence_batch(1, 1, 7, &[10, 11, 12]),
        sentence_batch(1, 2, 7, &[12, 13]),
        sentence_batch(1, 3, 7, &[10, 13, 13]),
    ]
}

fn probe(lm: &InterpolatedLm) -> Vec<f32> {
    let ctx = ContextVector::new([(7, 0.8)]).unwrap();
    let mut out = Vec::new();
    for prefix in [&[][..], &[10][..], &[12, 13][..]] {
        let h = lm.make_history_key(prefix);
        for w in [10, 11, 12, 13, SENTENCE_END] {
            out.push(lm.compute_probability(w, &h, &ctx).log_prob);
        }
    }
    out
}

#[test]
fn test_redelivery_is_not_reapplied() {
    let once = new_lm();
    for b in batches() {
        once.on_update_batch_received(&b).unwrap();
    }

    let redelivered = new_lm();
    for b in batches() {
        redelivered.on_update_batch_received(&b).unwrap();
    }
    let outcome = redelivered
        .on_update_batch_received(&batches()[1])
        .expect("duplicate is not an error");
    assert_eq!(
        outcome,
        ApplyOutcome::Duplicate {
            channel: 1,
            seq: 2,
            last_applied: 3
        }
    );

    assert_eq!(redelivered.generation(), 3);
    assert_eq!(probe(&once), probe(&redelivered));

    let a = once.snapshot();
    let b = redelivered.snapshot();
    let (a, b) = (a.domain(7).unwrap(), b.domain(7).unwrap());
    for ngram in [&[12][..], &[12, 13][..], &[13, 13][..], &[10, 13, 13][..]] {
        assert_eq!(a.count(ngram), b.count(ngram), "count of {:?}", ngram);
    }
    assert_eq!(b.count(&[12, 13]), 1);
}

#[test]
fn test_gap_is_rejected_and_channel_stays() {
    let lm = new_lm();
    lm.on_update_batch_received(&sentence_batch(4, 1, 7, &[10])).unwrap();
    let before = probe(&lm);

    let err = lm
        .on_update_batch_received(&sentence_batch(4, 3, 7, &[11, 11, 11]))
        .unwrap_err();
    assert_eq!(
        err,
        UpdateError::Gap {
            channel: 4,
            expected: 2,
            received: 3
        }
    );
    assert_eq!(lm.latest_updates_identifier().get(4), Some(1));
    assert_eq!(lm.generation(), 1);
    assert_eq!(probe(&lm), before);

    // still stalled until the missing batch shows up
    assert!(lm.on_update_batch_received(&sentence_batch(4, 3, 7, &[11])).is_err());
    lm.on_update_batch_received(&sentence_batch(4, 2, 7, &[11])).unwrap();
    lm.on_update_batch_received(&sentence_batch(4, 3, 7, &[11])).unwrap();
    assert_eq!(lm.latest_updates_identifier().get(4), Some(3));
}

#[test]
fn test_fresh_channel_must_start_at_first_sequence() {
    let lm = new_lm();
    let err = lm
        .on_update_batch_received(&sentence_batch(2, 5, 7, &[10]))
        .unwrap_err();
    assert!(matches!(err, UpdateError::Gap { expected: 1, received: 5, .. }));
    assert!(lm.latest_updates_identifier().is_empty());
    assert!(lm.domains().is_empty());
}

#[test]
fn test_checkpoint_reports_every_channel() {
    let lm = new_lm();
    for seq in 1..=5 {
        lm.on_update_batch_received(&sentence_batch(1, seq, 7, &[10])).unwrap();
    }
    for seq in 1..=2 {
        lm.on_update_batch_received(&sentence_batch(2, seq, 8, &[11])).unwrap();
    }
    assert_eq!(
        lm.latest_updates_identifier(),
        Checkpoint::from([(1, 5), (2, 2)])
    );
    assert_eq!(lm.generation(), 7);
}

#[test]
fn test_restore_checkpoint_resumes_replay() {
    let lm = new_lm();
    lm.restore_checkpoint(&Checkpoint::from([(1, 41)]));

    let dup = lm.on_update_batch_received(&sentence_batch(1, 41, 7, &[10])).unwrap();
    assert!(matches!(dup, ApplyOutcome::Duplicate { last_applied: 41, .. }));
    assert!(lm.on_update_batch_received(&sentence_batch(1, 43, 7, &[10])).is_err());

    let ok = lm.on_update_batch_received(&sentence_batch(1, 42, 7, &[10])).unwrap();
    assert!(matches!(ok, ApplyOutcome::Applied { seq: 42, generation: 1, .. }));
    assert_eq!(lm.latest_updates_identifier().get(1), Some(42));
}

#[test]
fn test_first_sequence_is_configurable() {
    let cfg = Config {
        first_sequence: 0,
        ..Config::default()
    };
    let lm = InterpolatedLm::new(background(), cfg).unwrap();
    assert!(lm.on_update_batch_received(&sentence_batch(3, 0, 7, &[10])).is_ok());
    assert_eq!(lm.latest_updates_identifier().get(3), Some(0));
}

#[test]
fn test_drop_domain_and_emptied_domains_disappear() {
    let lm = new_lm();
    lm.on_update_batch_received(&sentence_batch(1, 1, 7, &[10, 11])).unwrap();
    lm.on_update_batch_received(&UpdateBatch::new(
        1,
        2,
        vec![Edit::new(8, EditOp::Insert { ngram: vec![12], count: 4 })],
    ))
    .unwrap();
    assert_eq!(lm.domains(), vec![7, 8]);

    // removing the only entry of domain 8 leaves nothing to interpolate
    lm.on_update_batch_received(&UpdateBatch::new(
        1,
        3,
        vec![
            Edit::new(8, EditOp::Decrement { ngram: vec![12], by: 10 }),
            Edit::new(7, EditOp::DropDomain),
        ],
    ))
    .unwrap();
    assert!(lm.domains().is_empty());

    let ctx = ContextVector::new([(7, 0.5), (8, 0.5)]).unwrap();
    assert!(lm.normalize_context(&ctx).is_empty());
}

#[test]
fn test_channels_are_independent() {
    let lm = new_lm();
    lm.on_update_batch_received(&sentence_batch(1, 1, 7, &[10])).unwrap();
    lm.on_update_batch_received(&sentence_batch(2, 1, 7, &[10])).unwrap();
    assert!(lm.on_update_batch_received(&sentence_batch(2, 3, 7, &[10])).is_err());
    lm.on_update_batch_received(&sentence_batch(1, 2, 7, &[10])).unwrap();

    let snap = lm.snapshot();
    assert_eq!(snap.domain(7).unwrap().count(&[10]), 3);
    assert_eq!(lm.latest_updates_identifier(), Checkpoint::from([(1, 2), (2, 1)]));
}

#[test]
fn test_count_overflow_rejects_batch() {
    let lm = new_lm();
    lm.on_update_batch_received(&UpdateBatch::new(
        1,
        1,
        vec![Edit::new(3, EditOp::Insert { ngram: vec![12], count: 5 })],
    ))
    .unwrap();
    let before = probe(&lm);

    let batch = UpdateBatch::new(
        1,
        2,
        vec![
            Edit::new(3, EditOp::Insert { ngram: vec![10], count: u64::MAX }),
            Edit::new(3, EditOp::Insert { ngram: vec![11], count: 2 }),
        ],
    );
    assert!(batch.validate(lm.order()).is_ok());
    let err = lm.on_update_batch_received(&batch).unwrap_err();
    assert!(matches!(err, UpdateError::InvalidEdit { index: 0, .. }));

    assert_eq!(lm.generation(), 1);
    assert_eq!(lm.latest_updates_identifier().get(1), Some(1));
    assert_eq!(lm.snapshot().domain(3).unwrap().count(&[10]), 0);
    assert_eq!(probe(&lm), before);

    let ctx = ContextVector::new([(3, 1.0)]).unwrap();
    for prefix in [&[][..], &[10][..]] {
        let h = lm.make_history_key(prefix);
        for w in [10, 11, 12, 13, SENTENCE_END] {
            assert!(lm.compute_probability(w, &h, &ctx).log_prob <= 0.0);
        }
    }

    // the channel is not stalled: a sane batch with the same sequence applies
    lm.on_update_batch_received(&sentence_batch(1, 2, 3, &[10, 11]))
        .unwrap();
    assert_eq!(lm.generation(), 2);
}
