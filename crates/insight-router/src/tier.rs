//! Model tier selection.
//!
//! Each tier is a provider model with a per-call cost and the hardest task
//! it is trusted with. A request goes to the cheapest tier capable of its
//! complexity; when money runs low every request drops to the cheapest tier.

use insight_types::{ModelTierSettings, RouterSettings};
use serde::Serialize;

/// One provider model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelTier {
    pub model_id: String,
    /// Dollars per call
    pub cost: f64,
    /// Hardest complexity (0.0-1.0) this model handles
    pub max_complexity: f32,
}

impl ModelTier {
    pub fn new(model_id: impl Into<String>, cost: f64, max_complexity: f32) -> Self {
        Self {
            model_id: model_id.into(),
            cost: cost.max(0.0),
            max_complexity: max_complexity.clamp(0.0, 1.0),
        }
    }

    fn handles(&self, complexity: f32) -> bool {
        self.max_complexity >= complexity
    }
}

impl From<&ModelTierSettings> for ModelTier {
    fn from(settings: &ModelTierSettings) -> Self {
        Self::new(&settings.model_id, settings.cost, settings.max_complexity)
    }
}

/// Why a tier was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierChoice {
    /// Cheapest tier rated for the complexity
    Capable,
    /// No tier is rated that high; the most capable one
    Strongest,
    /// Remaining budget is low or cannot cover the capable tier
    Downgraded,
}

/// Ordered set of tiers, cheapest first.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    tiers: Vec<ModelTier>,
    /// Remaining budget under which every call uses the cheapest tier
    pub low_budget_reserve: f64,
}

impl TierPolicy {
    /// Tiers are sorted by cost, then by capability. An empty list is
    /// replaced by a single fully capable tier of `fallback_model`.
    pub fn new(mut tiers: Vec<ModelTier>, fallback_model: &str, fallback_cost: f64) -> Self {
        if tiers.is_empty() {
            tiers.push(ModelTier::new(fallback_model, fallback_cost, 1.0));
        }
        tiers.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then(b.max_complexity.total_cmp(&a.max_complexity))
        });
        Self {
            tiers,
            low_budget_reserve: 0.0,
        }
    }

    /// A single tier.
    pub fn single(model_id: &str, cost: f64) -> Self {
        Self::new(Vec::new(), model_id, cost)
    }

    pub fn from_settings(settings: &RouterSettings, fallback_model: &str) -> Self {
        let tiers = settings.tiers.iter().map(ModelTier::from).collect();
        let mut policy = Self::new(tiers, fallback_model, settings.model_call_cost);
        policy.low_budget_reserve = settings.low_budget_reserve.max(0.0);
        policy
    }

    pub fn with_low_budget_reserve(mut self, reserve: f64) -> Self {
        self.low_budget_reserve = reserve.max(0.0);
        self
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    pub fn cheapest(&self) -> &ModelTier {
        &self.tiers[0]
    }

    /// Pick the tier for a task of `complexity` given `remaining` dollars.
    pub fn select(&self, complexity: f32, remaining: f64) -> (&ModelTier, TierChoice) {
        let complexity = complexity.clamp(0.0, 1.0);
        let (tier, choice) = match self.tiers.iter().find(|t| t.handles(complexity)) {
            Some(tier) => (tier, TierChoice::Capable),
            None => {
                let strongest = self
                    .tiers
                    .iter()
                    .max_by(|a, b| {
                        a.max_complexity
                            .total_cmp(&b.max_complexity)
                            .then(b.cost.total_cmp(&a.cost))
                    })
                    .unwrap_or(self.cheapest());
                (strongest, TierChoice::Strongest)
            }
        };

        let cheapest = self.cheapest();
        let short = remaining < self.low_budget_reserve || remaining < tier.cost;
        if short && tier.cost > cheapest.cost {
            return (cheapest, TierChoice::Downgraded);
        }
        (tier, choice)
    }
}

/// Rough difficulty of a prompt in [0, 1], from its length and how many
/// related notes it must tie together.
pub fn estimate_complexity(text: &str, related_notes: usize) -> f32 {
    let words = text.split_whitespace().count() as f32;
    let length = (words / 1500.0).min(1.0);
    let breadth = (related_notes as f32 / 10.0).min(1.0);
    (0.7 * length + 0.3 * breadth).clamp(0.0, 1.0)
}
