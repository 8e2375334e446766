//! Linear interpolation of the background model with domain components.
//!
//! Given a normalized context with domain weights `w_d` summing to `s <= 1`
//! and a background share `β`, the mixture weights are
//!
//! ```text
//! m_bg = β + (1 - β)(1 - s)
//! m_d  = (1 - β) w_d
//! ```
//!
//! and the combined probability is `Σ m_i p_i / Σ m_i`, computed in
//! probability space. The background model is always part of the mixture.
use std::sync::Arc;

use ahash::AHashMap;

use crate::backoff::BackoffModel;
use crate::counts::CountModel;
use crate::model::{Scorable, Scored};
use crate::{ContextVector, DomainId, HistoryKey, WordId};

/// Immutable view of every component at one generation.
///
/// Queries run against a snapshot without holding any lock; the update path
/// builds a new snapshot and swaps it in.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub(crate) generation: u64,
    pub(crate) background: Arc<BackoffModel>,
    pub(crate) domains: AHashMap<DomainId, Arc<CountModel>>,
}

impl ModelSnapshot {
    pub fn new(background: BackoffModel) -> Self {
        Self {
            generation: 0,
            background: Arc::new(background),
            domains: AHashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Order shared by every component.
    pub fn order(&self) -> usize {
        self.background.order()
    }

    pub fn background(&self) -> &BackoffModel {
        &self.background
    }

    pub fn domain(&self, domain: DomainId) -> Option<&CountModel> {
        self.domains.get(&domain).map(|m| &**m)
    }

    pub fn has_domain(&self, domain: DomainId) -> bool {
        self.domains.contains_key(&domain)
    }

    /// Ids of the live domain components, ascending.
    pub fn domain_ids(&self) -> Vec<DomainId> {
        let mut ids: Vec<DomainId> = self.domains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// One weighted member of a mixture.
pub struct MixtureComponent<'a> {
    pub domain: Option<DomainId>,
    pub model: &'a dyn Scorable,
    pub weight: f64,
}

/// Interpolation parameters.
#[derive(Debug, Clone, Copy)]
pub struct Interpolator {
    background_weight: f64,
    oov_log_prob: f32,
}

impl Interpolator {
    /// `background_weight` is clamped into (0, 1] so the background model is
    /// always consulted.
    pub fn new(background_weight: f32, oov_log_prob: f32) -> Self {
        let bw = if background_weight.is_finite() {
            (background_weight as f64).clamp(f64::MIN_POSITIVE, 1.0)
        } else {
            1.0
        };
        Self {
            background_weight: bw,
            oov_log_prob,
        }
    }

    pub fn oov_log_prob(&self) -> f32 {
        self.oov_log_prob
    }

    /// Drop domains the snapshot does not know and rescale the rest.
    pub fn normalize(&self, snapshot: &ModelSnapshot, context: &ContextVector) -> ContextVector {
        context.normalized(|d| snapshot.has_domain(d))
    }

    /// Components consulted for a normalized context, background first.
    /// Members with zero weight are left out.
    pub fn mixture<'a>(
        &self,
        snapshot: &'a ModelSnapshot,
        normalized: &ContextVector,
    ) -> Vec<MixtureComponent<'a>> {
        let beta = self.background_weight;
        let domain_mass = normalized.total_weight().min(1.0) as f64;

        let mut out = Vec::with_capacity(normalized.len() + 1);
        out.push(MixtureComponent {
            domain: None,
            model: &*snapshot.background,
            weight: beta + (1.0 - beta) * (1.0 - domain_mass),
        });

        for entry in normalized.entries() {
            let weight = (1.0 - beta) * entry.weight as f64;
            if weight <= 0.0 {
                continue;
            }
            if let Some(model) = snapshot.domains.get(&entry.domain) {
                out.push(MixtureComponent {
                    domain: Some(entry.domain),
                    model: &**model,
                    weight,
                });
            }
        }
        out
    }

    /// Interpolated ln-probability of `word` after `history`.
    ///
    /// The outgoing history always comes from the background model so every
    /// caller sees one canonical key.
    pub fn compute(
        &self,
        snapshot: &ModelSnapshot,
        word: WordId,
        history: &HistoryKey,
        normalized: &ContextVector,
    ) -> Scored {
        let mixture = self.mixture(snapshot, normalized);

        let mut out_history = None;
        let mut all_oov = true;
        let mut mass = 0.0f64;
        let mut weight_sum = 0.0f64;
        let mut single = 0.0f32;

        for component in &mixture {
            let score = component.model.score(history, word);
            all_oov &= score.oov;
            single = score.log_prob;
            mass += component.weight * (score.log_prob as f64).exp();
            weight_sum += component.weight;
            if out_history.is_none() {
                out_history = Some(score.history);
            }
        }

        let history = out_history.unwrap_or_else(|| history.extended(word, snapshot.order() - 1));

        let log_prob = if all_oov {
            self.oov_log_prob
        } else if mixture.len() == 1 {
            single
        } else if mass > 0.0 && weight_sum > 0.0 {
            (mass / weight_sum).ln() as f32
        } else {
            self.oov_log_prob
        };

        Scored { log_prob, history }
    }

    /// True when no consulted component knows `word`.
    pub fn is_oov(&self, snapshot: &ModelSnapshot, normalized: &ContextVector, word: WordId) -> bool {
        !self
            .mixture(snapshot, normalized)
            .iter()
            .any(|c| c.model.contains(word))
    }
}
