//! Capability traits shared by the component models and the facade.
//!
//! - [`Scorable`]: one n-gram model answering `score(history, word)`.
//! - [`LanguageModel`]: context-aware scoring as seen by the decoder.
//! - [`IncrementalModel`]: versioned batch ingestion and checkpoints.
//!
//! Component models implement only `Scorable`; `InterpolatedLm` implements the
//! other two.
use crate::{
    ApplyOutcome, Checkpoint, ContextVector, HistoryKey, UpdateBatch, UpdateError, WordId,
};

/// Score of a single word produced by one component model.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentScore {
    /// ln P(word | history), or the reserved OOV value when `oov` is set.
    pub log_prob: f32,
    /// The word is not in this component's vocabulary.
    pub oov: bool,
    /// History to use for the next query.
    pub history: HistoryKey,
}

/// A single n-gram model.
///
/// For a fixed model state `score` must be a pure function of its inputs; the
/// query cache relies on it.
pub trait Scorable {
    /// N-gram order (histories hold at most `order - 1` words).
    fn order(&self) -> usize;

    /// Whether `word` is part of this model's vocabulary.
    fn contains(&self, word: WordId) -> bool;

    /// ln-probability of `word` after `history`, with backoff.
    fn score(&self, history: &HistoryKey, word: WordId) -> ComponentScore;
}

/// Result of a context-aware probability query.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Interpolated ln-probability.
    pub log_prob: f32,
    /// Canonical history for the next query.
    pub history: HistoryKey,
}

/// Decoder-facing scoring interface.
pub trait LanguageModel {
    fn make_history_key(&self, words: &[WordId]) -> HistoryKey;

    fn make_empty_history_key(&self) -> HistoryKey;

    fn compute_probability(
        &self,
        word: WordId,
        history: &HistoryKey,
        context: &ContextVector,
    ) -> Scored;

    fn is_oov(&self, context: &ContextVector, word: WordId) -> bool;

    fn normalize_context(&self, context: &ContextVector) -> ContextVector;
}

/// Ingestion-facing interface: apply sequence-numbered batches per channel.
pub trait IncrementalModel {
    fn on_update_batch_received(&self, batch: &UpdateBatch) -> Result<ApplyOutcome, UpdateError>;

    fn latest_updates_identifier(&self) -> Checkpoint;
}
