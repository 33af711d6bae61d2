//! Network-wide consensus parameters and the epoch clock.
//!
//! `epoch -> timestamp` has exactly one definition, here. Every component
//! that needs the wall-clock position of an epoch goes through
//! [`ConsensusConstants::epoch_timestamp`].

use serde::{Deserialize, Serialize};

/// Serialized size of a transaction input, in weight units.
pub const INPUT_SIZE: u64 = 133;
/// Serialized size of a transaction output, in weight units.
pub const OUTPUT_SIZE: u64 = 36;
/// Weight charged per expected commit.
pub const COMMIT_WEIGHT: u64 = 400;
/// Weight charged per expected reveal.
pub const REVEAL_WEIGHT: u64 = 200;
/// Weight charged for the eventual tally.
pub const TALLY_WEIGHT: u64 = 100;

/// Rarely-changing network parameters, loaded once at startup and immutable
/// for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConstants {
    /// Unix timestamp of checkpoint zero (the start of epoch 0).
    pub checkpoint_zero_timestamp: i64,
    /// Seconds per epoch.
    pub checkpoints_period: u32,
    /// Epochs between superblocks; the finality window derives from this.
    pub superblock_period: u32,
    /// Minimum collateral for a commit transaction.
    pub collateral_minimum: u64,
    /// Epochs between block-reward halvings.
    pub halving_period: u32,
    /// Block reward before the first halving.
    pub initial_block_reward: u64,
}

impl ConsensusConstants {
    /// Wall-clock timestamp at which the given epoch's block is expected.
    pub fn epoch_timestamp(&self, epoch: u32) -> i64 {
        self.checkpoint_zero_timestamp + (i64::from(epoch) + 1) * i64::from(self.checkpoints_period)
    }

    /// The epoch in progress at the given timestamp, or `None` before
    /// checkpoint zero.
    pub fn epoch_at(&self, timestamp: i64) -> Option<u32> {
        let elapsed = timestamp - self.checkpoint_zero_timestamp;
        if elapsed < 0 {
            return None;
        }
        u32::try_from(elapsed / i64::from(self.checkpoints_period)).ok()
    }

    /// Seconds until the next epoch boundary after `now`.
    pub fn until_next_epoch(&self, now: i64) -> u64 {
        let period = i64::from(self.checkpoints_period);
        let elapsed = now - self.checkpoint_zero_timestamp;
        if elapsed < 0 {
            return (-elapsed) as u64;
        }
        (period - elapsed % period) as u64
    }

    /// Number of epochs an unconfirmed block must age before the confirm
    /// loop reconciles it: two superblock periods.
    pub fn finality_window(&self) -> u32 {
        2 * self.superblock_period
    }

    /// Block reward at the given epoch, honoring the halving schedule.
    pub fn block_reward(&self, epoch: u32) -> u64 {
        let halvings = epoch / self.halving_period;
        if halvings >= 64 {
            return 0;
        }
        self.initial_block_reward >> halvings
    }
}

/// Weight of a value transfer with the given input/output counts.
pub fn vt_weight(inputs: u64, outputs: u64) -> u64 {
    inputs * INPUT_SIZE + outputs * OUTPUT_SIZE
}

/// Weight of a data request: its serialized output size plus the traffic
/// the witnesses will generate resolving it.
pub fn dr_weight(dro_bytes_len: u64, witnesses: u64) -> u64 {
    dro_bytes_len + witnesses * (INPUT_SIZE + OUTPUT_SIZE + COMMIT_WEIGHT + REVEAL_WEIGHT)
        + TALLY_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants() -> ConsensusConstants {
        ConsensusConstants {
            checkpoint_zero_timestamp: 1_602_666_000,
            checkpoints_period: 45,
            superblock_period: 10,
            collateral_minimum: 1_000_000_000,
            halving_period: 3_500_000,
            initial_block_reward: 250_000_000_000,
        }
    }

    #[test]
    fn epoch_timestamp_formula() {
        let c = constants();
        for epoch in [0u32, 1, 17, 683_540, 2_000_000] {
            assert_eq!(
                c.epoch_timestamp(epoch),
                c.checkpoint_zero_timestamp + (i64::from(epoch) + 1) * 45
            );
        }
    }

    #[test]
    fn epoch_at_inverts_timestamp() {
        let c = constants();
        // The timestamp of epoch e is the first second of epoch e + 1.
        assert_eq!(c.epoch_at(c.epoch_timestamp(99)), Some(100));
        assert_eq!(c.epoch_at(c.epoch_timestamp(99) - 1), Some(99));
        assert_eq!(c.epoch_at(c.checkpoint_zero_timestamp - 1), None);
    }

    #[test]
    fn until_next_epoch_aligns_to_boundary() {
        let c = constants();
        let boundary = c.epoch_timestamp(10);
        assert_eq!(c.until_next_epoch(boundary - 1), 1);
        assert_eq!(c.until_next_epoch(boundary), 45);
    }

    #[test]
    fn block_reward_halves() {
        let c = constants();
        assert_eq!(c.block_reward(0), 250_000_000_000);
        assert_eq!(c.block_reward(3_500_000), 125_000_000_000);
        assert_eq!(c.block_reward(7_000_000), 62_500_000_000);
    }
}
