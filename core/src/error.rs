//! Error types surfaced by the language model core.
//!
//! Queries never fail: OOV words and unknown domains are defined answers.
//! Only batch ingestion, context construction and configuration can error.
use thiserror::Error;

use crate::{ChannelId, DomainId, SeqId, WordId};

/// Rejection of an update batch. The channel checkpoint and the live model are
/// left untouched whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("sequence gap on channel {channel}: expected {expected}, received {received}")]
    Gap {
        channel: ChannelId,
        expected: SeqId,
        received: SeqId,
    },

    #[error("invalid edit #{index} in batch: {reason}")]
    InvalidEdit { index: usize, reason: String },
}

/// Validation failure when building a [`crate::ContextVector`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("domain {0} appears more than once in context")]
    DuplicateDomain(DomainId),

    #[error("weight {weight} for domain {domain} is negative or not finite")]
    InvalidWeight { domain: DomainId, weight: f32 },
}

/// Out-of-range value in a [`crate::Config`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A count or per-context total of a [`crate::CountModel`] would exceed
/// `u64::MAX`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("count overflow at n-gram {ngram:?}")]
pub struct CountOverflow {
    pub ngram: Vec<WordId>,
}
