use alloy_primitives::{Address, B256};
use ember_primitives::block::BlockHeader;
use ember_primitives::crypto::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

/// Information about a validator in the initial set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Address derived from the validator's public key. Votes are matched
    /// against this, so it must equal `public_key.address()`.
    pub address: Address,
    /// Validator's secp256k1 public key.
    pub public_key: PublicKey,
}

impl ValidatorInfo {
    pub fn from_public_key(public_key: PublicKey) -> Self {
        Self {
            address: public_key.address(),
            public_key,
        }
    }
}

/// Consensus parameters shared by every node on the chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Nominal seconds between blocks; also the unit of the timeout back-off.
    pub block_interval_secs: u64,
    /// Byzantine faults tolerated. Zero means "derive from the live
    /// validator count" as `(n - 1) / 3`.
    pub fault_tolerance: u32,
    /// Initial validator set, active from genesis.
    pub initial_validators: Vec<ValidatorInfo>,
}

impl ConsensusConfig {
    /// Single-validator dev configuration.
    pub fn dev() -> Self {
        Self {
            block_interval_secs: 10,
            fault_tolerance: 0,
            initial_validators: Vec::new(),
        }
    }

    /// Dev configuration with `count` deterministic validators.
    ///
    /// Validator `i` gets a 32-byte secret key with `(i + 1)` big-endian in
    /// the last 4 bytes; addresses are derived from the resulting public
    /// keys so that vote membership checks line up.
    pub fn dev_multi(count: usize) -> Self {
        let validators = (0..count)
            .map(|i| {
                let sk = SecretKey::from_bytes(&Self::deterministic_key_bytes(i))
                    .expect("deterministic secp256k1 key should be valid");
                ValidatorInfo::from_public_key(sk.public_key())
            })
            .collect();

        let f = if count >= 4 {
            ((count as u32) - 1) / 3
        } else {
            0
        };

        Self {
            block_interval_secs: 10,
            fault_tolerance: f,
            initial_validators: validators,
        }
    }

    /// Deterministic 32-byte secret key material for validator `index`.
    pub fn deterministic_key_bytes(index: usize) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        let val = (index + 1) as u32;
        bytes[28..32].copy_from_slice(&val.to_be_bytes());
        bytes
    }

    /// Faults tolerated for a live set of `validator_count` members:
    /// the configured value when set, `(n - 1) / 3` otherwise.
    pub fn fault_tolerance_for(&self, validator_count: usize) -> usize {
        if self.fault_tolerance > 0 {
            self.fault_tolerance as usize
        } else {
            validator_count.saturating_sub(1) / 3
        }
    }

    /// Quorum size for the configured fault tolerance: `2f + 1`.
    pub fn quorum_size(&self) -> u32 {
        2 * self.fault_tolerance + 1
    }

    /// Addresses of the initial validators, in set order.
    pub fn validator_addresses(&self) -> Vec<Address> {
        self.initial_validators.iter().map(|v| v.address).collect()
    }

    /// Checks that the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_interval_secs == 0 {
            return Err("block_interval_secs must be > 0".to_string());
        }
        let n = self.initial_validators.len() as u32;
        let min_validators = 3 * self.fault_tolerance + 1;
        if n > 0 && n < min_validators {
            return Err(format!(
                "validator set size ({n}) must be >= 3f+1 ({min_validators}) for fault_tolerance f={}",
                self.fault_tolerance
            ));
        }
        for v in &self.initial_validators {
            if v.address != v.public_key.address() {
                return Err(format!(
                    "validator address {} does not match its public key",
                    v.address
                ));
            }
        }
        Ok(())
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::dev()
    }
}

/// The height-0 header every chain instance starts from: zero parent, empty
/// transaction root, no signer. Its timestamp anchors all timeout math.
pub fn genesis_header(timestamp: u64) -> BlockHeader {
    BlockHeader::new(0, B256::ZERO, timestamp, 0)
}
