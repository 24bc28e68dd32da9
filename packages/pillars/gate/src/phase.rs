//! Phase Gate — the process-wide configuration oracle deciding whether a
//! given operation class is permitted by the deployed rollout phase.
//!
//! The gate is a pure function of an immutable snapshot: two calls against the
//! same snapshot always agree. Refreshing the snapshot is an explicit
//! operation reserved for test scaffolding, never an implicit background poll.

use serde::{Deserialize, Serialize};

use crate::error::PhaseError;

/// Deployment phase. Ordinal comparison: `ReadOnly < Proposal < Execution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    ReadOnly,
    Proposal,
    Execution,
}

impl Phase {
    /// Parse a phase string. Accepts both the `A|B|C` shorthand and the long
    /// names. Any unrecognized value resolves to `ReadOnly` — fail-safe,
    /// since the gate must never default open.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "a" | "readonly" | "read_only" | "read-only" => Phase::ReadOnly,
            "b" | "proposal" => Phase::Proposal,
            "c" | "execution" => Phase::Execution,
            _ => Phase::ReadOnly,
        }
    }
}

/// Immutable snapshot of the phase gate's configuration.
///
/// Constructed once at startup ([`PhaseGate::new`]) or explicitly reset by test
/// scaffolding ([`PhaseGate::reset`]); never mutated in place.
#[derive(Debug, Clone)]
pub struct PhaseGate {
    enabled: bool,
    phase: Phase,
}

impl PhaseGate {
    pub fn new(enabled: bool, phase: Phase) -> Self {
        Self { enabled, phase }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(config.ai_enabled, config.phase)
    }

    pub fn current_phase(&self) -> Phase {
        self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Succeeds iff the master switch is on and `current_phase >= required`.
    pub fn require_phase(&self, required: Phase) -> Result<(), PhaseError> {
        if !self.enabled {
            return Err(PhaseError::AIDisabled);
        }
        if self.phase >= required {
            Ok(())
        } else {
            Err(PhaseError::PhaseViolation {
                current: self.phase,
                required,
            })
        }
    }

    /// Replace the snapshot. Used only by test scaffolding: config is a
    /// scoped singleton reset deterministically between test cases.
    pub fn reset(&mut self, enabled: bool, phase: Phase) {
        self.enabled = enabled;
        self.phase = phase;
    }
}

impl Default for PhaseGate {
    fn default() -> Self {
        Self::new(true, Phase::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_comparison_holds() {
        assert!(Phase::ReadOnly < Phase::Proposal);
        assert!(Phase::Proposal < Phase::Execution);
    }

    #[test]
    fn unknown_phase_string_fails_safe_to_read_only() {
        assert_eq!(Phase::parse("bogus"), Phase::ReadOnly);
        assert_eq!(Phase::parse(""), Phase::ReadOnly);
    }

    #[test]
    fn shorthand_and_long_names_agree() {
        assert_eq!(Phase::parse("A"), Phase::parse("ReadOnly"));
        assert_eq!(Phase::parse("b"), Phase::parse("proposal"));
        assert_eq!(Phase::parse("C"), Phase::parse("execution"));
    }

    // Phase determinism: repeated calls against the same snapshot agree.
    #[test]
    fn require_phase_is_deterministic() {
        let gate = PhaseGate::new(true, Phase::Proposal);
        for _ in 0..50 {
            assert!(gate.require_phase(Phase::ReadOnly).is_ok());
            assert!(gate.require_phase(Phase::Proposal).is_ok());
            assert!(gate.require_phase(Phase::Execution).is_err());
        }
    }

    #[test]
    fn disabled_master_switch_rejects_everything() {
        let gate = PhaseGate::new(false, Phase::Execution);
        assert_eq!(
            gate.require_phase(Phase::ReadOnly),
            Err(PhaseError::AIDisabled)
        );
    }

    #[test]
    fn reset_replaces_the_snapshot() {
        let mut gate = PhaseGate::new(true, Phase::ReadOnly);
        assert!(gate.require_phase(Phase::Proposal).is_err());
        gate.reset(true, Phase::Execution);
        assert!(gate.require_phase(Phase::Proposal).is_ok());
    }
}
