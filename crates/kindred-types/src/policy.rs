//! Relay policy configuration.

use serde::{Deserialize, Serialize};

/// Operational policy of a Kindred relay.
///
/// Loaded from the `[relay]` section of the server configuration file and
/// shared by the websocket relay, the voice broker, and the wallet ledger.
/// Missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayPolicy {
    /// Maximum number of prior transcript entries sent to the language model.
    pub context_window: usize,
    /// Coins charged for one voice turn.
    pub voice_turn_cost: i64,
    /// Coins granted when a wallet is first created.
    pub starting_balance: i64,
    /// Maximum size of a chat message body, in bytes.
    pub max_message_bytes: usize,
    /// Maximum size of an uploaded audio clip, in bytes.
    pub max_audio_bytes: usize,
    /// Voice sessions idle for longer than this many days are pruned.
    /// Zero disables pruning.
    pub voice_session_idle_days: u32,
    /// Seconds between pruning sweeps.
    pub prune_interval_secs: u64,
    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,
}

impl RelayPolicy {
    /// Number of transcript entries retained per voice session.
    ///
    /// The store keeps twice the context window so compaction never trims
    /// an entry the next generation call would have used.
    pub fn transcript_cap(&self) -> usize {
        self.context_window * 2
    }
}

/// Configuration for API rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Max requests per minute for voice turn submission.
    pub voice_limit: u32,
    /// Max requests per minute for other endpoints.
    pub default_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            voice_limit: 10,
            default_limit: 120,
        }
    }
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            context_window: 12,
            voice_turn_cost: 5,
            starting_balance: 100,
            max_message_bytes: 64 * 1024,
            max_audio_bytes: 10 * 1024 * 1024,
            voice_session_idle_days: 90,
            prune_interval_secs: 3_600,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let policy = RelayPolicy::default();
        assert_eq!(policy.context_window, 12);
        assert_eq!(policy.voice_turn_cost, 5);
        assert_eq!(policy.starting_balance, 100);
        assert_eq!(policy.max_message_bytes, 65_536);
        assert_eq!(policy.max_audio_bytes, 10 * 1024 * 1024);
        assert_eq!(policy.voice_session_idle_days, 90);
        assert_eq!(policy.prune_interval_secs, 3_600);
        assert_eq!(policy.rate_limit.voice_limit, 10);
        assert_eq!(policy.rate_limit.default_limit, 120);
    }

    #[test]
    fn transcript_cap_is_twice_the_context_window() {
        let policy = RelayPolicy::default();
        assert_eq!(policy.transcript_cap(), 24);

        let wider = RelayPolicy {
            context_window: 20,
            ..RelayPolicy::default()
        };
        assert_eq!(wider.transcript_cap(), 40);
    }

    #[test]
    fn serialization_round_trip() {
        let policy = RelayPolicy::default();
        let json = serde_json::to_string(&policy).expect("should serialize");
        let decoded: RelayPolicy = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(policy, decoded);
    }

    #[test]
    fn partial_table_fills_missing_fields() {
        let decoded: RelayPolicy =
            serde_json::from_str(r#"{"voice_turn_cost": 8}"#).expect("should deserialize");
        assert_eq!(decoded.voice_turn_cost, 8);
        assert_eq!(decoded.context_window, 12);
        assert_eq!(decoded.rate_limit.default_limit, 120);
    }
}
