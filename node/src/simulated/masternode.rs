//! Masternode broadcasts: wire format, validation, and the per-node masternode list.

use super::{
    chain::{Chain, Digest},
    Config,
};
use crate::{MasternodeListEntry, MasternodeStatus, ProtocolVersion, Tier};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{Encode, EncodeSize, Error, Read, ReadExt, Write};
use commonware_utils::hex;
use std::collections::BTreeMap;

/// Maximum length of a custom reward address.
pub const MAX_ADDRESS_LEN: usize = u8::MAX as usize;

/// Reasons a broadcast is refused by a node.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("unknown collateral")]
    UnknownCollateral,
    #[error("collateral tier mismatch (announced {announced}, locked {locked})")]
    TierMismatch { announced: Tier, locked: Tier },
    #[error("collateral has {confirmations} confirmations (requires {required})")]
    Immature { confirmations: u64, required: u64 },
    #[error("signature time {sig_time} predates collateral maturity at {mature_at}")]
    PredatesMaturity { sig_time: u64, mature_at: u64 },
    #[error("signature time {sig_time} too far in the future (limit {limit})")]
    FromFuture { sig_time: u64, limit: u64 },
}

/// Amount of collateral locked by a masternode of the given tier.
pub fn collateral(tier: Tier) -> u64 {
    match tier {
        Tier::Copper => 1_000,
        Tier::Silver => 3_000,
        Tier::Gold => 10_000,
        Tier::Platinum => 30_000,
        Tier::Diamond => 100_000,
    }
}

/// Signed announcement of a masternode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broadcast {
    pub collateral: Digest,
    pub tier: Tier,
    pub sig_time: u64,
    /// Protocol version of the signing node.
    pub protocol: u32,
    /// Custom reward address (only carried by [ProtocolVersion::New] encodings).
    pub reward_address: Option<String>,
}

impl Broadcast {
    /// View of the broadcast in the format spoken by a session at `version`.
    pub fn framed(&self, version: u32) -> Framed<'_> {
        Framed {
            broadcast: self,
            version,
        }
    }

    /// Encode the broadcast for a session speaking `version`.
    pub fn encode_for(&self, version: u32) -> Bytes {
        Bytes::from(self.framed(version).encode())
    }

    fn reward_address(&self) -> Option<&[u8]> {
        self.reward_address
            .as_ref()
            .map(|address| &address.as_bytes()[..address.len().min(MAX_ADDRESS_LEN)])
    }

    /// Check the broadcast against `chain` at local time `now`.
    pub fn verify(&self, chain: &Chain, now: u64, cfg: &Config) -> Result<(), Rejection> {
        let (height, tx) = chain
            .find_transaction(&self.collateral)
            .ok_or(Rejection::UnknownCollateral)?;
        if tx.tier != self.tier {
            return Err(Rejection::TierMismatch {
                announced: self.tier,
                locked: tx.tier,
            });
        }
        let confirmations = chain.confirmations(height);
        let required = cfg.collateral_confirmations.max(1);
        if confirmations < required {
            return Err(Rejection::Immature {
                confirmations,
                required,
            });
        }

        // The block providing the last required confirmation must not be newer than the signature
        let mature_at = chain
            .get(height + required - 1)
            .map(|block| block.time)
            .unwrap_or_default();
        if self.sig_time < mature_at {
            return Err(Rejection::PredatesMaturity {
                sig_time: self.sig_time,
                mature_at,
            });
        }
        let limit = now.saturating_add(cfg.max_future_broadcast);
        if self.sig_time > limit {
            return Err(Rejection::FromFuture {
                sig_time: self.sig_time,
                limit,
            });
        }
        Ok(())
    }
}

/// A [Broadcast] as written to a session.
///
/// The reward address is omitted for sessions below [ProtocolVersion::NEW].
pub struct Framed<'a> {
    broadcast: &'a Broadcast,
    version: u32,
}

impl Write for Framed<'_> {
    fn write(&self, buf: &mut impl BufMut) {
        let broadcast = self.broadcast;
        broadcast.collateral.write(buf);
        (broadcast.tier as u8).write(buf);
        broadcast.sig_time.write(buf);
        broadcast.protocol.write(buf);
        if self.version < ProtocolVersion::NEW {
            return;
        }
        match broadcast.reward_address() {
            Some(address) => {
                true.write(buf);
                (address.len() as u8).write(buf);
                buf.put_slice(address);
            }
            None => false.write(buf),
        }
    }
}

impl EncodeSize for Framed<'_> {
    fn encode_size(&self) -> usize {
        let broadcast = self.broadcast;
        let fixed = broadcast.collateral.encode_size()
            + (broadcast.tier as u8).encode_size()
            + broadcast.sig_time.encode_size()
            + broadcast.protocol.encode_size();
        if self.version < ProtocolVersion::NEW {
            return fixed;
        }
        let address = broadcast
            .reward_address()
            .map_or(0, |address| (address.len() as u8).encode_size() + address.len());
        fixed + true.encode_size() + address
    }
}

impl Read for Broadcast {
    /// Protocol version of the session the broadcast was received on.
    type Cfg = u32;

    fn read_cfg(buf: &mut impl Buf, version: &u32) -> Result<Self, Error> {
        let collateral = Digest::read(buf)?;
        let tier = *Tier::ALL
            .get(u8::read(buf)? as usize)
            .ok_or(Error::Invalid("Broadcast", "invalid tier"))?;
        let sig_time = u64::read(buf)?;
        let protocol = u32::read(buf)?;
        let reward_address = if *version >= ProtocolVersion::NEW && bool::read(buf)? {
            let len = u8::read(buf)? as usize;
            if buf.remaining() < len {
                return Err(Error::EndOfBuffer);
            }
            let mut address = vec![0u8; len];
            buf.copy_to_slice(&mut address);
            let address = String::from_utf8(address)
                .map_err(|_| Error::Invalid("Broadcast", "reward address not utf-8"))?;
            Some(address)
        } else {
            None
        };
        Ok(Self {
            collateral,
            tier,
            sig_time,
            protocol,
            reward_address,
        })
    }
}

/// Masternodes known to a single node, keyed by collateral.
#[derive(Clone, Debug, Default)]
pub struct List {
    known: BTreeMap<Digest, Broadcast>,
}

impl List {
    /// Record `broadcast`, returning whether it was new (or newer than the one already known).
    pub fn insert(&mut self, broadcast: Broadcast) -> bool {
        if self.is_stale(&broadcast) {
            return false;
        }
        self.known.insert(broadcast.collateral, broadcast);
        true
    }

    /// Whether a broadcast for the same collateral at least as recent is already known.
    pub fn is_stale(&self, broadcast: &Broadcast) -> bool {
        self.known
            .get(&broadcast.collateral)
            .is_some_and(|existing| existing.sig_time >= broadcast.sig_time)
    }

    pub fn contains(&self, collateral: &Digest) -> bool {
        self.known.contains_key(collateral)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Broadcast> {
        self.known.values()
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }

    /// Entries as reported at local time `now`.
    pub fn entries(&self, now: u64, expiration: u64) -> Vec<MasternodeListEntry> {
        self.known
            .values()
            .map(|broadcast| MasternodeListEntry {
                txhash: hex(&broadcast.collateral),
                tier: broadcast.tier,
                status: if now >= broadcast.sig_time.saturating_add(expiration) {
                    MasternodeStatus::Expired
                } else {
                    MasternodeStatus::Enabled
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::chain::{Block, Transaction};
    use commonware_codec::Decode;

    fn broadcast(reward_address: Option<&str>) -> Broadcast {
        Broadcast {
            collateral: [7u8; 32],
            tier: Tier::Gold,
            sig_time: 1_580_000_000,
            protocol: ProtocolVersion::NEW,
            reward_address: reward_address.map(str::to_string),
        }
    }

    #[test]
    fn test_new_session_carries_reward_address() {
        let original = broadcast(Some("reward"));
        let encoded = original.encode_for(ProtocolVersion::NEW);
        assert_eq!(encoded.len(), original.framed(ProtocolVersion::NEW).encode_size());
        let decoded = Broadcast::decode_cfg(encoded, &ProtocolVersion::NEW).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_old_session_drops_reward_address() {
        let original = broadcast(Some("reward"));
        let encoded = original.encode_for(ProtocolVersion::OLD);
        assert_eq!(encoded.len(), 32 + 1 + 8 + 4);
        let decoded = Broadcast::decode_cfg(encoded, &ProtocolVersion::OLD).unwrap();
        assert_eq!(decoded.reward_address, None);
        assert_eq!(decoded.collateral, original.collateral);
        assert_eq!(decoded.tier, original.tier);
        assert_eq!(decoded.sig_time, original.sig_time);
    }

    #[test]
    fn test_version_mismatch_fails_to_decode() {
        // An old node cannot parse the new encoding
        let encoded = broadcast(Some("reward")).encode_for(ProtocolVersion::NEW);
        assert!(matches!(
            Broadcast::decode_cfg(encoded, &ProtocolVersion::OLD),
            Err(Error::ExtraData(8))
        ));

        // A new node cannot parse the old encoding
        let encoded = broadcast(None).encode_for(ProtocolVersion::OLD);
        assert!(matches!(
            Broadcast::decode_cfg(encoded, &ProtocolVersion::NEW),
            Err(Error::EndOfBuffer)
        ));
    }

    #[test]
    fn test_decode_invalid_fields() {
        let mut encoded = broadcast(None).encode_for(ProtocolVersion::OLD).to_vec();
        encoded[32] = 9;
        assert!(matches!(
            Broadcast::decode_cfg(encoded.as_slice(), &ProtocolVersion::OLD),
            Err(Error::Invalid("Broadcast", "invalid tier"))
        ));

        // Address longer than the remaining buffer
        let mut encoded = broadcast(Some("reward"))
            .encode_for(ProtocolVersion::NEW)
            .to_vec();
        encoded.truncate(encoded.len() - 1);
        let err = Broadcast::decode_cfg(encoded.as_slice(), &ProtocolVersion::NEW).unwrap_err();
        assert!(matches!(err, Error::EndOfBuffer));

        // Surfaced by nodes as a codec error
        assert!(matches!(crate::Error::from(err), crate::Error::Codec(_)));
    }

    fn chain_with_collateral(tier: Tier, confirmations: u64, late_time: u64) -> (Chain, Digest) {
        let mut chain = Chain::new(Block::genesis(1_000));
        let tx = Transaction::collateral(0, "mn1", tier, 0);
        let id = tx.id;
        let block = Block::new(chain.tip(), 1_000, 2, vec![tx]);
        chain.append(block, 1_000, 0).unwrap();
        for _ in 1..confirmations {
            let block = Block::new(chain.tip(), 1_000, 2, Vec::new());
            chain.append(block, 1_000, 0).unwrap();
        }
        let block = Block::new(chain.tip(), late_time, 2, Vec::new());
        chain.append(block, late_time, 0).unwrap();
        (chain, id)
    }

    #[test]
    fn test_verify() {
        let cfg = Config::default();
        let (chain, collateral) = chain_with_collateral(Tier::Copper, 15, 5_000);
        let mut broadcast = Broadcast {
            collateral,
            tier: Tier::Copper,
            sig_time: 5_000,
            protocol: ProtocolVersion::OLD,
            reward_address: None,
        };
        broadcast.verify(&chain, 5_000, &cfg).unwrap();

        // Signature must not predate the block providing the 15th confirmation
        broadcast.sig_time = 999;
        assert_eq!(
            broadcast.verify(&chain, 5_000, &cfg),
            Err(Rejection::PredatesMaturity {
                sig_time: 999,
                mature_at: 1_000
            })
        );

        // Signature must not be too far ahead of the validating node
        broadcast.sig_time = 5_000 + cfg.max_future_broadcast + 1;
        assert!(matches!(
            broadcast.verify(&chain, 5_000, &cfg),
            Err(Rejection::FromFuture { .. })
        ));

        // Tier must match the locked collateral
        broadcast.sig_time = 5_000;
        broadcast.tier = Tier::Silver;
        assert_eq!(
            broadcast.verify(&chain, 5_000, &cfg),
            Err(Rejection::TierMismatch {
                announced: Tier::Silver,
                locked: Tier::Copper
            })
        );
    }

    #[test]
    fn test_verify_immature_and_unknown() {
        let cfg = Config::default();
        let (chain, collateral) = chain_with_collateral(Tier::Copper, 10, 1_000);
        let mut broadcast = Broadcast {
            collateral,
            tier: Tier::Copper,
            sig_time: 1_000,
            protocol: ProtocolVersion::OLD,
            reward_address: None,
        };
        assert_eq!(
            broadcast.verify(&chain, 1_000, &cfg),
            Err(Rejection::Immature {
                confirmations: 11,
                required: 15
            })
        );
        broadcast.collateral = [1u8; 32];
        assert_eq!(
            broadcast.verify(&chain, 1_000, &cfg),
            Err(Rejection::UnknownCollateral)
        );
    }

    #[test]
    fn test_list_insert_and_expiry() {
        let mut list = List::default();
        let mut first = broadcast(None);
        first.sig_time = 100;
        assert!(list.insert(first.clone()));
        assert!(!list.insert(first.clone()));

        // A newer signature replaces the older one
        let mut newer = first.clone();
        newer.sig_time = 200;
        assert!(list.insert(newer));
        assert!(!list.insert(first));

        let entries = list.entries(250, 100);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, MasternodeStatus::Enabled);
        assert_eq!(entries[0].txhash, hex(&[7u8; 32]));
        assert_eq!(list.entries(300, 100)[0].status, MasternodeStatus::Expired);
    }
}
