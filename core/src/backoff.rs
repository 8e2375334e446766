//! Background n-gram model with Katz backoff.
//!
//! Entries store natural-log probabilities and backoff weights, the way ARPA
//! models do. The table is built in memory through `insert`; loading a model
//! from disk is the caller's business.
use ahash::AHashMap;

use crate::model::{ComponentScore, Scorable};
use crate::{HistoryKey, WordId, DEFAULT_OOV_LOG_PROB};

/// ln-probability and ln-backoff of one n-gram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffEntry {
    pub log_prob: f32,
    pub backoff: f32,
}

/// Backoff n-gram table of a fixed order.
///
/// Unigram entries define the vocabulary. Scoring finds the longest suffix of
/// the history that continues with the word and adds the backoff weights of
/// the longer histories skipped on the way.
#[derive(Debug, Clone)]
pub struct BackoffModel {
    order: usize,
    entries: AHashMap<Box<[WordId]>, BackoffEntry>,
    oov_log_prob: f32,
}

impl BackoffModel {
    /// Create an empty model of the given order (at least 1).
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            entries: AHashMap::new(),
            oov_log_prob: DEFAULT_OOV_LOG_PROB,
        }
    }

    /// Set the ln-probability reported for words outside the vocabulary.
    pub fn with_oov_log_prob(mut self, oov_log_prob: f32) -> Self {
        self.oov_log_prob = oov_log_prob;
        self
    }

    pub(crate) fn set_oov_log_prob(&mut self, oov_log_prob: f32) {
        self.oov_log_prob = oov_log_prob;
    }

    /// Insert or replace an n-gram entry.
    ///
    /// Returns false (and stores nothing) when the n-gram is empty or longer
    /// than the model order.
    pub fn insert(&mut self, ngram: &[WordId], log_prob: f32, backoff: f32) -> bool {
        if ngram.is_empty() || ngram.len() > self.order {
            return false;
        }
        self.entries
            .insert(Box::from(ngram), BackoffEntry { log_prob, backoff });
        true
    }

    /// Insert a unigram ln-probability with no backoff weight.
    pub fn insert_unigram(&mut self, word: WordId, log_prob: f32) {
        self.insert(&[word], log_prob, 0.0);
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&mut self, ngram: &[WordId]) -> Option<BackoffEntry> {
        self.entries.remove(ngram)
    }

    pub fn get(&self, ngram: &[WordId]) -> Option<BackoffEntry> {
        self.entries.get(ngram).copied()
    }

    /// Number of stored n-grams of every order.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct unigrams.
    pub fn vocab_size(&self) -> usize {
        self.entries.keys().filter(|k| k.len() == 1).count()
    }

    pub fn oov_log_prob(&self) -> f32 {
        self.oov_log_prob
    }
}

impl Scorable for BackoffModel {
    fn order(&self) -> usize {
        self.order
    }

    fn contains(&self, word: WordId) -> bool {
        self.entries.contains_key(&[word][..])
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

        let context = history.suffix(self.order - 1);
        let mut ngram: Vec<WordId> = Vec::with_capacity(context.len() + 1);
        let mut backoff = 0.0f32;

        for n in (0..=context.len()).rev() {
            let ctx = &context[context.len() - n..];
            ngram.clear();
            ngram.extend_from_slice(ctx);
            ngram.push(word);

            if let Some(entry) = self.entries.get(&ngram[..]) {
                return ComponentScore {
                    log_prob: entry.log_prob + backoff,
                    oov: false,
                    history: next,
                };
            }
            if n > 0 {
                if let Some(ctx_entry) = self.entries.get(ctx) {
                    backoff += ctx_entry.backoff;
                }
            }
        }

        // n == 0 always hits for an in-vocabulary word
        ComponentScore {
            log_prob: self.oov_log_prob,
            oov: true,
            history: next,
        }
    }
}
