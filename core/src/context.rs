//! Translation context: the weighted domain mixture attached to a request.
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::DomainId;

/// Slack tolerated above 1.0 before normalization rescales the weights.
/// Rescaled vectors land within this slack, which keeps normalization
/// idempotent under float rounding.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-6;

/// One (domain, weight) pair of a context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainWeight {
    pub domain: DomainId,
    pub weight: f32,
}

/// Set of (domain, weight) pairs describing the desired domain mixture.
///
/// Domains are unique and kept sorted by id, weights are finite and
/// non-negative. Any mass not assigned to a domain implicitly goes to the
/// background model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DomainWeight>", into = "Vec<DomainWeight>")]
pub struct ContextVector {
    entries: Vec<DomainWeight>,
}

impl ContextVector {
    /// The empty context: pure background scoring.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a context from (domain, weight) pairs.
    pub fn new<I>(pairs: I) -> Result<Self, ContextError>
    where
        I: IntoIterator<Item = (DomainId, f32)>,
    {
        let mut entries: Vec<DomainWeight> = Vec::new();
        for (domain, weight) in pairs {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ContextError::InvalidWeight { domain, weight });
            }
            // -0.0 and 0.0 must hash alike
            let weight = if weight == 0.0 { 0.0 } else { weight };
            entries.push(DomainWeight { domain, weight });
        }
        entries.sort_by_key(|e| e.domain);
        if let Some(pair) = entries.windows(2).find(|w| w[0].domain == w[1].domain) {
            return Err(ContextError::DuplicateDomain(pair[0].domain));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DomainWeight] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weight of `domain`, or 0.0 when the domain is absent.
    pub fn weight(&self, domain: DomainId) -> f32 {
        self.entries
            .binary_search_by_key(&domain, |e| e.domain)
            .map(|idx| self.entries[idx].weight)
            .unwrap_or(0.0)
    }

    /// Sum of all domain weights.
    pub fn total_weight(&self) -> f32 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    /// Return a normalized copy of this context.
    ///
    /// Drops domains for which `is_known` is false and zero-weight entries,
    /// then rescales the rest to sum to 1 if (and only if) they sum to more
    /// than that. Normalizing a normalized context returns it unchanged.
    pub fn normalized<F>(&self, is_known: F) -> ContextVector
    where
        F: Fn(DomainId) -> bool,
    {
        let mut entries: Vec<DomainWeight> = self
            .entries
            .iter()
            .filter(|e| e.weight > 0.0 && is_known(e.domain))
            .copied()
            .collect();

        let sum: f32 = entries.iter().map(|e| e.weight).sum();
        if sum > 1.0 + WEIGHT_SUM_TOLERANCE {
            for e in entries.iter_mut() {
                e.weight /= sum;
            }
            entries.retain(|e| e.weight > 0.0);
        }

        ContextVector { entries }
    }
}

impl Eq for ContextVector {}

impl Hash for ContextVector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.entries.len());
        for e in &self.entries {
            e.domain.hash(state);
            e.weight.to_bits().hash(state);
        }
    }
}

impl TryFrom<Vec<DomainWeight>> for ContextVector {
    type Error = ContextError;

    fn try_from(value: Vec<DomainWeight>) -> Result<Self, Self::Error> {
        ContextVector::new(value.into_iter().map(|e| (e.domain, e.weight)))
    }
}

impl From<ContextVector> for Vec<DomainWeight> {
    fn from(value: ContextVector) -> Self {
        value.entries
    }
}
