//! History keys: the word context the model needs to score the next word.
//!
//! A `HistoryKey` is the canonical, comparable form of an n-gram history. The
//! interpolation engine, the component models and the query cache all read it
//! through [`HistoryKey::words`]; none of them needs privileged access.
use std::fmt;
use std::sync::Arc;

use crate::WordId;

/// Immutable, bounded word history, oldest word first.
///
/// Keys holding the same words compare and hash equal no matter how they were
/// built, so they are interchangeable as cache keys. Cloning is cheap (shared
/// buffer).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryKey(Arc<[WordId]>);

impl HistoryKey {
    /// The canonical start-of-sentence key (no words).
    pub fn empty() -> Self {
        Self(Arc::from(Vec::<WordId>::new()))
    }

    /// Build a key from an explicit prefix, keeping at most the last
    /// `max_len` words.
    pub fn from_words(words: &[WordId], max_len: usize) -> Self {
        let start = words.len().saturating_sub(max_len);
        Self(Arc::from(&words[start..]))
    }

    /// Words of the history, oldest first.
    pub fn words(&self) -> &[WordId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key for the history after `word` has been emitted. Pure: `self` is
    /// untouched and the result holds at most `max_len` words.
    pub fn extended(&self, word: WordId, max_len: usize) -> Self {
        if max_len == 0 {
            return Self::empty();
        }
        let keep = self.0.len().min(max_len - 1);
        let mut words = Vec::with_capacity(keep + 1);
        words.extend_from_slice(&self.0[self.0.len() - keep..]);
        words.push(word);
        Self(Arc::from(words))
    }

    /// The most recent `n` words (or all of them when the key is shorter).
    pub fn suffix(&self, n: usize) -> &[WordId] {
        &self.0[self.0.len().saturating_sub(n)..]
    }
}

impl Default for HistoryKey {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HistoryKey{:?}", &self.0[..])
    }
}
