//! Contribution-proof types
//!
//! One proof per (node, period); the JSON file on disk is idempotent and its
//! signature covers the canonical `{period, metrics}` payload.

use crate::numeric::u128_str;
use serde::{Deserialize, Serialize};

/// Role a node advertises and is rewarded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Relay,
    Storage,
    Match,
}

impl NodeType {
    /// The `uint8` the reward contract expects.
    pub fn as_u8(&self) -> u8 {
        match self {
            NodeType::Relay => 0,
            NodeType::Storage => 1,
            NodeType::Match => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Relay => "relay",
            NodeType::Storage => "storage",
            NodeType::Match => "match",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relay" => Ok(NodeType::Relay),
            "storage" => Ok(NodeType::Storage),
            "match" => Ok(NodeType::Match),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Per-period metrics carried inside a contribution proof.
///
/// `volume_matched` is in integer base units (amount * 10^18) and therefore
/// travels as a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProofMetrics {
    pub uptime: f64,
    #[serde(rename = "storageUsedGB", default, skip_serializing_if = "is_zero_f64")]
    pub storage_used_gb: f64,
    #[serde(rename = "storageTotalGB", default, skip_serializing_if = "is_zero_f64")]
    pub storage_total_gb: f64,
    #[serde(rename = "bytesRelayed", default, skip_serializing_if = "is_zero_u64")]
    pub bytes_relayed: u64,
    #[serde(rename = "tradesMatched", default, skip_serializing_if = "is_zero_u64")]
    pub trades_matched: u64,
    #[serde(rename = "volumeMatched", default, with = "u128_str")]
    pub volume_matched: u128,
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// A signed attestation of one node's contribution over one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionProof {
    pub node_id: String,
    pub node_type: NodeType,
    /// ISO date range `YYYY-MM-DD_YYYY-MM-DD`.
    pub period: String,
    pub metrics: ProofMetrics,
    pub signature: String,
    pub timestamp: i64,
}
