//! Shared types and constants for the Kindred platform.
//!
//! This crate provides the foundational types used across all Kindred crates:
//! transcript roles, wallet transaction kinds, and the relay policy structure
//! that every layer consults for its limits.
//!
//! No crate in the workspace depends on anything *except* `kindred-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};

/// Speaker role for a single entry in a voice session transcript.
///
/// Stored as a lowercase string in the `voice_turns` table and forwarded
/// verbatim as the `role` field of chat-completion requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The human side of the exchange.
    User,
    /// The persona side of the exchange.
    Assistant,
}

impl TurnRole {
    /// Returns the lowercase string label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Attempts to convert a stored string label to a `TurnRole`.
    ///
    /// Returns `None` if the label does not correspond to a known role.
    pub fn from_str(label: &str) -> Option<Self> {
        match label {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Classifies an entry in the wallet audit trail.
///
/// Stored as a lowercase string in the `wallet_transactions` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Coins bought through the payment provider.
    Purchase,
    /// Coins spent on platform features.
    Deduction,
    /// Coins granted by the platform (starting balance, promotions).
    Bonus,
    /// Coins returned after a failed charge.
    Refund,
}

impl TransactionKind {
    /// Returns the lowercase string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Deduction => "deduction",
            Self::Bonus => "bonus",
            Self::Refund => "refund",
        }
    }

    /// Attempts to convert a stored string label to a `TransactionKind`.
    ///
    /// Returns `None` if the label does not correspond to a known kind.
    pub fn from_str(label: &str) -> Option<Self> {
        match label {
            "purchase" => Some(Self::Purchase),
            "deduction" => Some(Self::Deduction),
            "bonus" => Some(Self::Bonus),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

mod policy;
pub use policy::{RateLimitConfig, RelayPolicy};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_role_round_trip() {
        for role in [TurnRole::User, TurnRole::Assistant] {
            let label = role.as_str();
            assert_eq!(TurnRole::from_str(label), Some(role));
        }
    }

    #[test]
    fn turn_role_invalid() {
        assert_eq!(TurnRole::from_str(""), None);
        assert_eq!(TurnRole::from_str("system"), None);
        assert_eq!(TurnRole::from_str("User"), None);
    }

    #[test]
    fn transaction_kind_round_trip() {
        for kind in [
            TransactionKind::Purchase,
            TransactionKind::Deduction,
            TransactionKind::Bonus,
            TransactionKind::Refund,
        ] {
            let label = kind.as_str();
            assert_eq!(TransactionKind::from_str(label), Some(kind));
        }
    }

    #[test]
    fn transaction_kind_invalid() {
        assert_eq!(TransactionKind::from_str(""), None);
        assert_eq!(TransactionKind::from_str("charge"), None);
        assert_eq!(TransactionKind::from_str("PURCHASE"), None);
    }

    #[test]
    fn turn_role_serde_uses_lowercase() {
        let json = serde_json::to_string(&TurnRole::Assistant).expect("should serialize");
        assert_eq!(json, "\"assistant\"");
        let decoded: TurnRole = serde_json::from_str("\"user\"").expect("should deserialize");
        assert_eq!(decoded, TurnRole::User);
    }
}
