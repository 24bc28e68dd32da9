//! Process-wide configuration snapshot (spec §6).
//!
//! Read from the environment once at startup and passed down by explicit
//! injection, per spec §9's "Global singletons" design note — nothing in this
//! crate reaches for a process-wide static to read config.

use std::env;
use std::time::Duration;

use crate::phase::Phase;

/// Snapshot of the `AI_*` / `TENANT_STRICT_MODE` environment keys in spec §6.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub ai_enabled: bool,
    pub phase: Phase,
    pub tenant_rate_limit_per_minute: u32,
    pub user_rate_limit_per_minute: u32,
    pub rate_limit_window: Duration,
    pub strict_tenant_mode: bool,
    pub prompt_risk_threshold: f64,
    pub approval_token_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            phase: Phase::ReadOnly,
            tenant_rate_limit_per_minute: 60,
            user_rate_limit_per_minute: 20,
            rate_limit_window: Duration::from_secs(60),
            strict_tenant_mode: true,
            prompt_risk_threshold: 0.7,
            approval_token_ttl: Duration::from_secs(600),
        }
    }
}

impl AppConfig {
    /// Build a snapshot from the process environment. Unset keys fall back to
    /// [`AppConfig::default`] values; malformed values fail safe rather than panic
    /// (an invalid phase string resolves to `ReadOnly` per spec §4.A).
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            ai_enabled: env_bool("AI_ENABLED", default.ai_enabled),
            phase: env::var("AI_PHASE")
                .ok()
                .map(|s| Phase::parse(&s))
                .unwrap_or(default.phase),
            tenant_rate_limit_per_minute: env_u32(
                "AI_RATE_LIMIT_PER_MINUTE",
                default.tenant_rate_limit_per_minute,
            ),
            user_rate_limit_per_minute: env_u32(
                "AI_RATE_LIMIT_PER_USER_PER_MINUTE",
                default.user_rate_limit_per_minute,
            ),
            rate_limit_window: default.rate_limit_window,
            strict_tenant_mode: env_bool("TENANT_STRICT_MODE", default.strict_tenant_mode),
            prompt_risk_threshold: default.prompt_risk_threshold,
            approval_token_ttl: default.approval_token_ttl,
        }
    }

    /// A config snapshot suitable for test scaffolding; equivalent to
    /// [`AppConfig::default`] but named for call-site clarity in tests.
    pub fn test_default() -> Self {
        Self::default()
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_read_only() {
        assert_eq!(AppConfig::default().phase, Phase::ReadOnly);
    }

    #[test]
    fn test_default_matches_default() {
        assert_eq!(AppConfig::test_default(), AppConfig::default());
    }
}
