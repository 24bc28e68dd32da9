//! AgentKern-Gate: Phase Gate, Rate Limiter, Usage & Quota Tracker, Circuit
//! Breaker, and Prompt Safety Pipeline.
//!
//! Five of the fabric's seven components (spec §4.A, §4.C, §4.D, §4.E, §4.F)
//! live here because they share no mutable state with each other and none
//! depend on anything beyond [`agentkern_tenancy`]. The approval gate and audit
//! sink (which need these types) live one crate up, in `agentkern-arbiter`.

pub mod circuit;
pub mod config;
pub mod error;
pub mod phase;
pub mod prompt_safety;
pub mod quota;
pub mod rate_limit;

pub use circuit::{Circuit, CircuitConfig, CircuitRegistry};
pub use config::AppConfig;
pub use error::{CircuitError, PhaseError, PromptSafetyError, QuotaError, RateLimitError};
pub use phase::{Phase, PhaseGate};
pub use prompt_safety::PromptArtifact;
pub use quota::{QuotaStatus, Snapshot as QuotaSnapshot, UsageKind, UsageTracker};
pub use rate_limit::{Decision as RateLimitDecision, RateLimiter};

/// All of the gate crate's stateful services, constructed once from a shared
/// [`AppConfig`] and handed to the admission pipeline by explicit injection
/// (spec §9: no process-wide statics). Each field owns its own interior
/// mutability; this struct itself holds no lock.
pub struct GateServices {
    pub phase: PhaseGate,
    pub rate_limiter: RateLimiter,
    pub usage: UsageTracker,
    pub circuits: CircuitRegistry,
    pub config: AppConfig,
}

impl GateServices {
    pub fn new(config: AppConfig) -> Self {
        Self {
            phase: PhaseGate::from_config(&config),
            rate_limiter: RateLimiter::from_config(&config),
            usage: UsageTracker::new(),
            circuits: CircuitRegistry::default(),
            config,
        }
    }

    /// Reset every stateful service to a clean slate. Test scaffolding only.
    pub fn reset(&mut self) {
        self.phase.reset(self.config.ai_enabled, self.config.phase);
        self.rate_limiter.reset();
        self.usage.reset();
        self.circuits.reset();
    }
}

impl Default for GateServices {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}
