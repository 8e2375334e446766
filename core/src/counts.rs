// core/src/counts.rs
//
// Count-based n-gram model for domain components built from incremental
// updates. Counts can go up and down at any time; probabilities are derived
// on demand with interpolated Witten-Bell smoothing, so there is no
// re-estimation step after an edit.

use ahash::AHashMap;

use crate::error::CountOverflow;
use crate::model::{ComponentScore, Scorable};
use crate::{HistoryKey, WordId, DEFAULT_OOV_LOG_PROB, SENTENCE_END, SENTENCE_START};

/// Aggregates over all n-grams sharing one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Sum of the counts of every continuation.
    pub total: u64,
    /// Number of distinct continuations with a non-zero count.
    pub distinct: u64,
}

/// Mutable n-gram count table.
///
/// `ngrams` maps a full n-gram (context + word) to its count; `contexts`
/// keeps per-context totals in sync with it. The empty context holds the
/// unigram totals.
#[derive(Debug, Clone)]
pub struct CountModel {
    order: usize,
    ngrams: AHashMap<Box<[WordId]>, u64>,
    contexts: AHashMap<Box<[WordId]>, ContextStats>,
    oov_log_prob: f32,
}

impl CountModel {
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            ngrams: AHashMap::new(),
            contexts: AHashMap::new(),
            oov_log_prob: DEFAULT_OOV_LOG_PROB,
        }
    }

    pub fn with_oov_log_prob(mut self, oov_log_prob: f32) -> Self {
        self.oov_log_prob = oov_log_prob;
        self
    }

    /// Count of an n-gram (0 when absent).
    pub fn count(&self, ngram: &[WordId]) -> u64 {
        self.ngrams.get(ngram).copied().unwrap_or(0)
    }

    /// Aggregates of a context, if any continuation of it has been counted.
    pub fn context_stats(&self, context: &[WordId]) -> Option<ContextStats> {
        self.contexts.get(context).copied()
    }

    /// Number of distinct n-grams with a non-zero count.
    pub fn len(&self) -> usize {
        self.ngrams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ngrams.is_empty()
    }

    /// Total number of counted unigram tokens.
    pub fn total_tokens(&self) -> u64 {
        let unigram_context: &[WordId] = &[];
        self.contexts
            .get(unigram_context)
            .map(|s| s.total)
            .unwrap_or(0)
    }

    /// Set the count of an n-gram; a count of zero removes the entry.
    ///
    /// N-grams that are empty or longer than the order are ignored (callers
    /// validate before mutating). Fails without touching the table when the
    /// context total would exceed `u64::MAX`.
    pub fn set_count(&mut self, ngram: &[WordId], count: u64) -> Result<(), CountOverflow> {
        if ngram.is_empty() || ngram.len() > self.order {
            return Ok(());
        }
        let old = self.count(ngram);
        if old == count {
            return Ok(());
        }
        // a context total always includes the counts of its continuations
        let total = (self.context_total(ngram) - old)
            .checked_add(count)
            .ok_or_else(|| CountOverflow {
                ngram: ngram.to_vec(),
            })?;
        self.store(ngram, old, count, total);
        Ok(())
    }

    /// Add `by` to the count of an n-gram.
    pub fn increment(&mut self, ngram: &[WordId], by: u64) -> Result<(), CountOverflow> {
        let count = self
            .count(ngram)
            .checked_add(by)
            .ok_or_else(|| CountOverflow {
                ngram: ngram.to_vec(),
            })?;
        self.set_count(ngram, count)
    }

    /// Subtract `by` from the count of an n-gram, saturating at zero.
    pub fn decrement(&mut self, ngram: &[WordId], by: u64) {
        if ngram.is_empty() || ngram.len() > self.order {
            return;
        }
        let old = self.count(ngram);
        let count = old.saturating_sub(by);
        if old == count {
            return;
        }
        let total = self.context_total(ngram) - (old - count);
        self.store(ngram, old, count, total);
    }

    /// Remove an n-gram, returning its previous count.
    pub fn remove(&mut self, ngram: &[WordId]) -> u64 {
        let old = self.count(ngram);
        self.decrement(ngram, old);
        old
    }

    /// Count every n-gram (orders 1..=order) of a sentence padded with
    /// sentence boundaries. `<s>` is only ever used as context.
    ///
    /// On overflow the n-grams counted before the failing one stay counted;
    /// the update path discards the whole copy in that case.
    pub fn add_sentence(&mut self, words: &[WordId]) -> Result<(), CountOverflow> {
        let mut padded = Vec::with_capacity(words.len() + 2);
        padded.push(SENTENCE_START);
        padded.extend_from_slice(words);
        padded.push(SENTENCE_END);

        for end in 1..padded.len() {
            let longest = self.order.min(end + 1);
            for n in 1..=longest {
                let ngram = &padded[end + 1 - n..=end];
                self.increment(ngram, 1)?;
            }
        }
        Ok(())
    }

    fn context_total(&self, ngram: &[WordId]) -> u64 {
        let context = &ngram[..ngram.len() - 1];
        self.contexts.get(context).map_or(0, |s| s.total)
    }

    fn store(&mut self, ngram: &[WordId], old: u64, count: u64, total: u64) {
        if count == 0 {
            self.ngrams.remove(ngram);
        } else {
            self.ngrams.insert(Box::from(ngram), count);
        }

        let context = &ngram[..ngram.len() - 1];
        let stats = self.contexts.entry(Box::from(context)).or_default();
        stats.total = total;
        if old == 0 {
            stats.distinct += 1;
        } else if count == 0 {
            stats.distinct -= 1;
        }
        if stats.distinct == 0 {
            self.contexts.remove(context);
        }
    }

    /// Interpolated Witten-Bell probability, from unigram upward.
    fn probability(&self, context: &[WordId], word: WordId) -> f64 {
        let unigram_total = self.total_tokens();
        if unigram_total == 0 {
            return 0.0;
        }
        let mut p = self.count(&[word]) as f64 / unigram_total as f64;

        let mut ngram: Vec<WordId> = Vec::with_capacity(context.len() + 1);
        for k in 1..=context.len() {
            let ctx = &context[context.len() - k..];
            let Some(stats) = self.contexts.get(ctx) else {
                continue;
            };
            if stats.total == 0 {
                continue;
            }
            ngram.clear();
            ngram.extend_from_slice(ctx);
            ngram.push(word);
            let c = self.count(&ngram) as f64;
            let d = stats.distinct as f64;
            p = (c + d * p) / (stats.total as f64 + d);
        }
        p
    }
}

impl Scorable for CountModel {
    fn order(&self) -> usize {
        self.order
    }

    fn contains(&self, word: WordId) -> bool {
        self.count(&[word]) > 0
    }

    fn score(&self, history: &HistoryKey, word: WordId) -> ComponentScore {
        let next = history.extended(word, self.order - 1);
        if !self.contains(word) {
            return ComponentScore {
                log_prob: self.oov_log_prob,
                oov: true,
                history: next,
            };
        }
        let p = self.probability(history.suffix(self.order - 1), word);
        ComponentScore {
            log_prob: p.min(1.0).ln() as f32,
            oov: false,
            history: next,
        }
    }
}
