//! ilm-core
//!
//! Interpolated, incrementally updatable n-gram language model used as the
//! LM feature of a phrase-based decoder.
//!
//! A static background model is interpolated with domain models that are
//! grown from translation-memory updates while the decoder keeps querying.
//! Updates arrive as sequence-numbered batches per channel and become visible
//! atomically; a generation-tagged query cache amortizes repeated scoring.
//!
//! Public API:
//! - `InterpolatedLm` - the facade (`LanguageModel` + `IncrementalModel`)
//! - `HistoryKey` - canonical word history for the next query
//! - `ContextVector` - weighted domain mixture of a request
//! - `BackoffModel` / `CountModel` - the component models (`Scorable`)
//! - `UpdateBatch` / `Checkpoint` - the ingestion protocol
//! - `Config` - tuning knobs, loadable from TOML
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{ConfigError, ContextError, CountOverflow, UpdateError};

pub mod history;
pub use history::HistoryKey;

pub mod context;
pub use context::{ContextVector, DomainWeight};

pub mod model;
pub use model::{ComponentScore, IncrementalModel, LanguageModel, Scorable, Scored};

pub mod backoff;
pub use backoff::{BackoffEntry, BackoffModel};

pub mod counts;
pub use counts::{ContextStats, CountModel};

pub mod interpolation;
pub use interpolation::{Interpolator, MixtureComponent, ModelSnapshot};

pub mod update;
pub use update::{
    ApplyOutcome, ChannelState, Checkpoint, Edit, EditOp, UpdateBatch, UpdateTracker, Verdict,
};

pub mod cache;
pub use cache::{CacheKey, CacheStats, QueryCache};

pub mod lm;
pub use lm::InterpolatedLm;

/// Vocabulary id of a word.
pub type WordId = u32;
/// Identifier of a domain (one translation memory).
pub type DomainId = u32;
/// Identifier of an update channel.
pub type ChannelId = u16;
/// Per-channel batch sequence number.
pub type SeqId = u64;

/// Id reserved for words the vocabulary does not map.
pub const UNKNOWN_WORD: WordId = 0;
/// `<s>`; only ever appears as history.
pub const SENTENCE_START: WordId = 1;
/// `</s>`.
pub const SENTENCE_END: WordId = 2;

/// ln-probability reserved for out-of-vocabulary words.
pub const DEFAULT_OOV_LOG_PROB: f32 = -20.0;

/// Configuration of the interpolated model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Share of probability mass always given to the background model, in
    /// (0, 1]. Context weights split the remainder among domains; unassigned
    /// context mass also falls back to the background.
    pub background_weight: f32,

    /// ln-probability returned for words no consulted component knows.
    pub oov_log_prob: f32,

    /// Maximum number of cached query results. 0 disables the cache.
    pub cache_capacity: usize,

    /// Number of independently locked cache shards.
    pub cache_shards: usize,

    /// Sequence number expected from a channel that never delivered a batch.
    pub first_sequence: SeqId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            background_weight: 0.5,
            oov_log_prob: DEFAULT_OOV_LOG_PROB,
            cache_capacity: 65_536,
            cache_shards: 16,
            first_sequence: 1,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.background_weight > 0.0 && self.background_weight <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "background_weight",
                reason: format!("{} is outside (0, 1]", self.background_weight),
            });
        }
        if !self.oov_log_prob.is_finite() || self.oov_log_prob > 0.0 {
            return Err(ConfigError::Invalid {
                field: "oov_log_prob",
                reason: format!("{} is not a finite ln-probability", self.oov_log_prob),
            });
        }
        if self.cache_shards == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_shards",
                reason: "at least one shard is required".to_string(),
            });
        }
        Ok(())
    }
}
