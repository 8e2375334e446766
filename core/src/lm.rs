//! `InterpolatedLm`: the decoder- and ingestion-facing facade.
//!
//! State is split three ways:
//! - the current [`ModelSnapshot`] (components + generation) behind a
//!   `RwLock<Arc<_>>` that readers hold only long enough to clone the `Arc`;
//! - the [`UpdateTracker`] behind a mutex that serializes writers;
//! - the [`QueryCache`], which needs no model lock at all: the generation
//!   tag of each entry decides whether it is still usable.
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::backoff::BackoffModel;
use crate::cache::{CacheKey, CacheStats, QueryCache};
use crate::error::{ConfigError, UpdateError};
use crate::interpolation::{Interpolator, ModelSnapshot};
use crate::model::{IncrementalModel, LanguageModel, Scorable, Scored};
use crate::update::{self, ApplyOutcome, Checkpoint, UpdateBatch, UpdateTracker, Verdict};
use crate::{Config, ContextVector, DomainId, HistoryKey, WordId};

/// Interpolated, incrementally updatable language model.
///
/// Safe to share between decoder threads and the ingestion thread(s).
#[derive(Debug)]
pub struct InterpolatedLm {
    config: Config,
    interpolator: Interpolator,
    snapshot: RwLock<Arc<ModelSnapshot>>,
    tracker: Mutex<UpdateTracker>,
    cache: QueryCache,
}

impl InterpolatedLm {
    /// Wrap a background model. Domain components appear as update batches
    /// arrive.
    pub fn new(mut background: BackoffModel, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        background.set_oov_log_prob(config.oov_log_prob);

        info!(
            order = background.order(),
            ngrams = background.len(),
            cache_capacity = config.cache_capacity,
            "interpolated LM ready"
        );

        Ok(Self {
            interpolator: Interpolator::new(config.background_weight, config.oov_log_prob),
            snapshot: RwLock::new(Arc::new(ModelSnapshot::new(background))),
            tracker: Mutex::new(UpdateTracker::new(config.first_sequence)),
            cache: QueryCache::new(config.cache_capacity, config.cache_shards),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current snapshot. Holding it pins one generation of the model.
    pub fn snapshot(&self) -> Arc<ModelSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation()
    }

    pub fn order(&self) -> usize {
        self.snapshot.read().order()
    }

    /// Ids of the live domain components, ascending.
    pub fn domains(&self) -> Vec<DomainId> {
        self.snapshot().domain_ids()
    }

    /// Sum of ln-probabilities of `words` followed by `</s>`, starting from
    /// the empty history.
    pub fn score_sequence(&self, words: &[WordId], context: &ContextVector) -> f32 {
        let mut history = self.make_empty_history_key();
        let mut total = 0.0f32;
        for &word in words.iter().chain(std::iter::once(&crate::SENTENCE_END)) {
            let scored = self.compute_probability(word, &history, context);
            total += scored.log_prob;
            history = scored.history;
        }
        total
    }

    /// Seed the per-channel checkpoint after a restart, before replay.
    pub fn restore_checkpoint(&self, checkpoint: &Checkpoint) {
        let mut tracker = self.tracker.lock();
        tracker.restore(checkpoint);
        info!(channels = checkpoint.len(), "restored update checkpoint");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache_hit_rate(&self) -> Option<f32> {
        self.cache.hit_rate()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn canonical_history(&self, history: &HistoryKey, order: usize) -> HistoryKey {
        let max_len = order - 1;
        if history.len() > max_len {
            HistoryKey::from_words(history.words(), max_len)
        } else {
            history.clone()
        }
    }
}

impl LanguageModel for InterpolatedLm {
    fn make_history_key(&self, words: &[WordId]) -> HistoryKey {
        HistoryKey::from_words(words, self.order() - 1)
    }

    fn make_empty_history_key(&self) -> HistoryKey {
        HistoryKey::empty()
    }

    fn compute_probability(
        &self,
        word: WordId,
        history: &HistoryKey,
        context: &ContextVector,
    ) -> Scored {
        let snapshot = self.snapshot();
        let normalized = self.interpolator.normalize(&snapshot, context);
        let history = self.canonical_history(history, snapshot.order());

        if !self.cache.is_enabled() {
            return self
                .interpolator
                .compute(&snapshot, word, &history, &normalized);
        }

        let key = CacheKey {
            history,
            word,
            context: normalized,
        };
        if let Some(hit) = self.cache.get(&key, snapshot.generation()) {
            return hit;
        }

        let scored = self
            .interpolator
            .compute(&snapshot, word, &key.history, &key.context);
        self.cache.insert(key, snapshot.generation(), &scored);
        scored
    }

    fn is_oov(&self, context: &ContextVector, word: WordId) -> bool {
        let snapshot = self.snapshot();
        let normalized = self.interpolator.normalize(&snapshot, context);
        self.interpolator.is_oov(&snapshot, &normalized, word)
    }

    fn normalize_context(&self, context: &ContextVector) -> ContextVector {
        let snapshot = self.snapshot();
        self.interpolator.normalize(&snapshot, context)
    }
}

impl IncrementalModel for InterpolatedLm {
    fn on_update_batch_received(&self, batch: &UpdateBatch) -> Result<ApplyOutcome, UpdateError> {
        // one writer at a time; readers keep going on the current snapshot
        let mut tracker = self.tracker.lock();

        match tracker.check(batch.channel, batch.seq) {
            Ok(Verdict::Apply) => {}
            Ok(Verdict::Duplicate { last_applied }) => {
                update::log_duplicate(batch, last_applied);
                return Ok(ApplyOutcome::Duplicate {
                    channel: batch.channel,
                    seq: batch.seq,
                    last_applied,
                });
            }
            Err(err) => {
                update::log_rejection(batch, &err);
                return Err(err);
            }
        }

        let base = self.snapshot();
        if let Err(err) = batch.validate(base.order()) {
            update::log_rejection(batch, &err);
            return Err(err);
        }

        let next = match update::apply_batch(&base, batch, self.config.oov_log_prob) {
            Ok(next) => next,
            Err(err) => {
                update::log_rejection(batch, &err);
                return Err(err);
            }
        };
        let generation = next.generation();
        *self.snapshot.write() = Arc::new(next);
        tracker.commit(batch.channel, batch.seq);

        debug!(
            channel = batch.channel,
            seq = batch.seq,
            edits = batch.edits.len(),
            generation,
            "applied update batch"
        );

        Ok(ApplyOutcome::Applied {
            channel: batch.channel,
            seq: batch.seq,
            generation,
        })
    }

    fn latest_updates_identifier(&self) -> Checkpoint {
        self.tracker.lock().checkpoint()
    }
}
