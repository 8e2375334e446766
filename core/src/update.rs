//! Incremental updates: batch format, per-channel sequence tracking and
//! application of edits to the domain components.
//!
//! Each channel moves through `Unseen -> Synced(seq)`. A batch is accepted
//! only when its sequence number immediately follows the last applied one
//! (or equals the configured first sequence for an unseen channel). Older
//! sequence numbers are redeliveries and are ignored; newer ones leave a gap
//! and are rejected until the collaborator resends what is missing.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::counts::CountModel;
use crate::error::UpdateError;
use crate::interpolation::ModelSnapshot;
use crate::{ChannelId, DomainId, SeqId, WordId, SENTENCE_START};

/// One mutation of a domain component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    /// Add `by` to the count of `ngram`.
    Increment { ngram: Vec<WordId>, by: u64 },
    /// Subtract `by` from the count of `ngram`, removing it at zero.
    Decrement { ngram: Vec<WordId>, by: u64 },
    /// Set the count of `ngram`, inserting it if absent.
    Insert { ngram: Vec<WordId>, count: u64 },
    /// Remove `ngram`.
    Delete { ngram: Vec<WordId> },
    /// Count every n-gram of a sentence (one translation-memory segment).
    AddSentence { words: Vec<WordId> },
    /// Remove the whole domain component.
    DropDomain,
}

/// An edit addressed to one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub domain: DomainId,
    #[serde(flatten)]
    pub op: EditOp,
}

impl Edit {
    pub fn new(domain: DomainId, op: EditOp) -> Self {
        Self { domain, op }
    }
}

/// Sequence-numbered, channel-scoped set of edits applied as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub channel: ChannelId,
    pub seq: SeqId,
    pub edits: Vec<Edit>,
}

impl UpdateBatch {
    pub fn new(channel: ChannelId, seq: SeqId, edits: Vec<Edit>) -> Self {
        Self {
            channel,
            seq,
            edits,
        }
    }

    /// Check every edit against a model of the given order. The first
    /// offending edit is reported; nothing is applied in that case.
    pub fn validate(&self, order: usize) -> Result<(), UpdateError> {
        for (index, edit) in self.edits.iter().enumerate() {
            let invalid = |reason: String| UpdateError::InvalidEdit { index, reason };
            match &edit.op {
                EditOp::Increment { ngram, by } | EditOp::Decrement { ngram, by } => {
                    check_ngram(ngram, order).map_err(invalid)?;
                    if *by == 0 {
                        return Err(invalid("count delta must be positive".to_string()));
                    }
                }
                EditOp::Insert { ngram, count } => {
                    check_ngram(ngram, order).map_err(invalid)?;
                    if *count == 0 {
                        return Err(invalid("inserted count must be positive".to_string()));
                    }
                }
                EditOp::Delete { ngram } => check_ngram(ngram, order).map_err(invalid)?,
                EditOp::AddSentence { words } => {
                    if words.contains(&SENTENCE_START) {
                        return Err(invalid(
                            "sentence must not contain the start symbol".to_string(),
                        ));
                    }
                }
                EditOp::DropDomain => {}
            }
        }
        Ok(())
    }
}

fn check_ngram(ngram: &[WordId], order: usize) -> Result<(), String> {
    if ngram.is_empty() {
        return Err("empty n-gram".to_string());
    }
    if ngram.len() > order {
        return Err(format!(
            "n-gram of length {} exceeds model order {}",
            ngram.len(),
            order
        ));
    }
    if ngram.last() == Some(&SENTENCE_START) {
        return Err("n-gram predicts the start symbol".to_string());
    }
    Ok(())
}

/// What happened to a batch that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Edits are live; `generation` is the new model generation.
    Applied {
        channel: ChannelId,
        seq: SeqId,
        generation: u64,
    },
    /// Redelivery of an already-applied sequence number; nothing changed.
    Duplicate {
        channel: ChannelId,
        seq: SeqId,
        last_applied: SeqId,
    },
}

/// Latest applied sequence number per channel. This is the only checkpoint
/// the model exposes; the ingestion side replays everything after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint(pub BTreeMap<ChannelId, SeqId>);

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: ChannelId) -> Option<SeqId> {
        self.0.get(&channel).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Save as JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Load from JSON written by [`Checkpoint::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl<const N: usize> From<[(ChannelId, SeqId); N]> for Checkpoint {
    fn from(value: [(ChannelId, SeqId); N]) -> Self {
        Self(value.into_iter().collect())
    }
}

/// Ingestion state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unseen,
    Synced(SeqId),
}

/// Decision for an incoming batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    Duplicate { last_applied: SeqId },
}

/// Per-channel sequence bookkeeping.
#[derive(Debug, Clone)]
pub struct UpdateTracker {
    first_sequence: SeqId,
    channels: AHashMap<ChannelId, SeqId>,
}

impl UpdateTracker {
    pub fn new(first_sequence: SeqId) -> Self {
        Self {
            first_sequence,
            channels: AHashMap::new(),
        }
    }

    pub fn state(&self, channel: ChannelId) -> ChannelState {
        match self.channels.get(&channel) {
            Some(&seq) => ChannelState::Synced(seq),
            None => ChannelState::Unseen,
        }
    }

    /// Sequence number the channel accepts next.
    pub fn expected(&self, channel: ChannelId) -> SeqId {
        match self.state(channel) {
            ChannelState::Unseen => self.first_sequence,
            ChannelState::Synced(seq) => seq.saturating_add(1),
        }
    }

    /// Classify a batch without changing any state.
    pub fn check(&self, channel: ChannelId, seq: SeqId) -> Result<Verdict, UpdateError> {
        let expected = self.expected(channel);
        if seq == expected {
            return Ok(Verdict::Apply);
        }
        if seq < expected {
            let last_applied = match self.state(channel) {
                ChannelState::Synced(last) => last,
                // below the first sequence of a fresh channel: nothing to replay
                ChannelState::Unseen => seq,
            };
            return Ok(Verdict::Duplicate { last_applied });
        }
        Err(UpdateError::Gap {
            channel,
            expected,
            received: seq,
        })
    }

    /// Record `seq` as the last applied batch of `channel`.
    pub fn commit(&mut self, channel: ChannelId, seq: SeqId) {
        self.channels.insert(channel, seq);
    }

    /// Replace the whole mapping, e.g. after a restart.
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.channels = checkpoint.0.iter().map(|(&c, &s)| (c, s)).collect();
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.channels.iter().map(|(&c, &s)| (c, s)).collect())
    }
}

/// Build the snapshot that results from applying `batch` on top of `base`.
///
/// Only the domains the batch touches are copied; every other component is
/// shared with `base`. The caller publishes the result. An edit that would
/// overflow a count rejects the whole batch and `base` stays as it was.
pub(crate) fn apply_batch(
    base: &ModelSnapshot,
    batch: &UpdateBatch,
    oov_log_prob: f32,
) -> Result<ModelSnapshot, UpdateError> {
    let order = base.order();
    let mut domains = base.domains.clone();
    let mut created: Vec<DomainId> = Vec::new();
    let mut dropped: Vec<DomainId> = Vec::new();

    for (index, edit) in batch.edits.iter().enumerate() {
        if let EditOp::DropDomain = edit.op {
            if domains.remove(&edit.domain).is_some() {
                dropped.push(edit.domain);
            }
            continue;
        }

        let model = domains.entry(edit.domain).or_insert_with(|| {
            created.push(edit.domain);
            Arc::new(CountModel::new(order).with_oov_log_prob(oov_log_prob))
        });
        let model = Arc::make_mut(model);

        let applied = match &edit.op {
            EditOp::Increment { ngram, by } => model.increment(ngram, *by),
            EditOp::Decrement { ngram, by } => {
                model.decrement(ngram, *by);
                Ok(())
            }
            EditOp::Insert { ngram, count } => model.set_count(ngram, *count),
            EditOp::Delete { ngram } => {
                model.remove(ngram);
                Ok(())
            }
            EditOp::AddSentence { words } => model.add_sentence(words),
            EditOp::DropDomain => Ok(()),
        };
        applied.map_err(|err| UpdateError::InvalidEdit {
            index,
            reason: err.to_string(),
        })?;
    }

    // a component with no counts is not a live domain
    domains.retain(|_, model| !model.is_empty());

    for domain in dropped {
        if !domains.contains_key(&domain) {
            info!(domain, channel = batch.channel, "dropped domain");
        }
    }
    for domain in created {
        if domains.contains_key(&domain) {
            info!(domain, channel = batch.channel, "created domain");
        }
    }

    Ok(ModelSnapshot {
        generation: base.generation + 1,
        background: Arc::clone(&base.background),
        domains,
    })
}

/// Log a verdict the way the ingestion path reports it.
pub(crate) fn log_rejection(batch: &UpdateBatch, err: &UpdateError) {
    match err {
        UpdateError::Gap { .. } => warn!(
            channel = batch.channel,
            seq = batch.seq,
            error = %err,
            "rejected batch, channel stalled until the missing sequence is resent"
        ),
        UpdateError::InvalidEdit { .. } => warn!(
            channel = batch.channel,
            seq = batch.seq,
            error = %err,
            "rejected malformed batch"
        ),
    }
}

pub(crate) fn log_duplicate(batch: &UpdateBatch, last_applied: SeqId) {
    debug!(
        channel = batch.channel,
        seq = batch.seq,
        last_applied,
        "ignored redelivered batch"
    );
}
