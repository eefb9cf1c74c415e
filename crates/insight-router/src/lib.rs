//! # insight-router
//!
//! Decides, per model-dependent step, whether to answer from the semantic
//! cache, call a model, or hand the item to a human.
//!
//! ## Policy
//! 1. A semantic cache hit answers for free.
//! 2. An exhausted budget escalates.
//! 3. Confidence is estimated from how strongly the nearest indexed chunks
//!    match the prompt and agree with each other; too little escalates.
//! 4. Otherwise the cheapest model tier able to handle the task is picked
//!    (the cheapest tier outright when the budget runs low), its cost is
//!    reserved from the shared budget, and the provider is invoked with
//!    timeout and exponential backoff. The answer is cached; a provider that
//!    keeps failing escalates, and so does a call its caller abandons.
//!
//! Human answers resolved from the escalation queue are written back into
//! the semantic cache.

pub mod budget;
pub mod confidence;
pub mod error;
pub mod escalation;
pub mod provider;
pub mod router;
pub mod tier;

pub use budget::CostBudget;
pub use confidence::neighbor_confidence;
pub use error::{ProviderError, RouterError};
pub use escalation::{Escalation, EscalationQueue, EscalationReason, KvEscalationQueue, Resolution};
pub use provider::{CommandProvider, InvocationParams, MockProvider, ModelProvider};
pub use router::{
    CostRouter, RouteOutcome, RouteRequest, Routed, RouterConfig, RouterDeps, RouterStats,
    RoutingDecision, RoutingPath, TaskKind,
};
pub use tier::{estimate_complexity, ModelTier, TierChoice, TierPolicy};
