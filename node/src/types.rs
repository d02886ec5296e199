//! Records exchanged with a node.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Protocol spoken by a node.
///
/// Nodes running [ProtocolVersion::New] understand everything [ProtocolVersion::Old] does, but
/// not the other way around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    Old,
    New,
}

impl ProtocolVersion {
    /// Numeric identifier of [ProtocolVersion::Old].
    pub const OLD: u32 = 70915;

    /// Numeric identifier of [ProtocolVersion::New].
    pub const NEW: u32 = 71000;

    /// Numeric identifier exchanged during the handshake.
    pub fn number(self) -> u32 {
        match self {
            Self::Old => Self::OLD,
            Self::New => Self::NEW,
        }
    }
}

impl TryFrom<u32> for ProtocolVersion {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            Self::OLD => Ok(Self::Old),
            Self::NEW => Ok(Self::New),
            other => Err(Error::UnknownProtocolVersion(other)),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Collateral bracket of a masternode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Copper,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    /// All tiers, from smallest to largest collateral.
    pub const ALL: [Tier; 5] = [
        Self::Copper,
        Self::Silver,
        Self::Gold,
        Self::Platinum,
        Self::Diamond,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Copper => "COPPER",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Platinum => "PLATINUM",
            Self::Diamond => "DIAMOND",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownTier(s.to_string()))
    }
}

/// Status of a masternode as seen by one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasternodeStatus {
    Unknown,
    LocalActive,
    Enabled,
    Expired,
}

impl fmt::Display for MasternodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::LocalActive => "LOCAL_ACTIVE",
            Self::Enabled => "ENABLED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// One entry of a node's masternode list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeListEntry {
    /// Identifier of the collateral transaction.
    pub txhash: String,
    pub tier: Tier,
    pub status: MasternodeStatus,
}

/// Networking state of a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(rename = "protocolversion")]
    pub protocol_version: u32,
    pub connections: usize,
    /// Local time of the node (mocked or not).
    pub time: u64,
}

/// Summary of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub height: u64,
    pub time: u64,
}

/// Outcome of a masternode broadcast request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BroadcastResult {
    /// Status reported when the broadcast was accepted and relayed.
    pub const SUCCESS: &'static str = "success";

    /// Status reported when the broadcast was refused by the signing node.
    pub const FAILED: &'static str = "failed";

    pub fn success() -> Self {
        Self {
            status: Self::SUCCESS.to_string(),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Self::FAILED.to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

/// Collateral locked for a masternode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralReceipt {
    pub label: String,
    pub txhash: String,
    pub tier: Tier,
}
