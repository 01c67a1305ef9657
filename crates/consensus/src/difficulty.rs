//! The canonical Ethash difficulty schedule.

use alloy_primitives::U256;
use corten_chainspec::ChainConfig;

/// Lowest difficulty the schedule may return.
const MIN_DIFFICULTY: u64 = 131_072;
/// Blocks per difficulty-bomb period.
const BOMB_PERIOD: u64 = 100_000;

/// Difficulty-bomb delay active at a block, per the glacier forks.
fn bomb_delay(config: &ChainConfig, block_number: u64) -> Option<u64> {
    let active = |threshold: Option<u64>| threshold.is_some_and(|t| t <= block_number);
    if active(config.gray_glacier_block) {
        Some(11_400_000)
    } else if active(config.arrow_glacier_block) {
        Some(10_700_000)
    } else if active(config.london_block) {
        Some(9_700_000)
    } else if active(config.muir_glacier_block) {
        Some(9_000_000)
    } else if active(config.constantinople_block) {
        Some(5_000_000)
    } else if active(config.byzantium_block) {
        Some(3_000_000)
    } else {
        None
    }
}

/// The canonical difficulty of a block under Ethash.
pub fn canonical_difficulty(
    block_number: u64,
    block_time: u64,
    parent_difficulty: U256,
    parent_time: u64,
    parent_has_ommers: bool,
    config: &ChainConfig,
) -> U256 {
    let revision = config.revision(block_number, block_time);
    let x = parent_difficulty >> 11; // parent / 2048
    let elapsed = block_time.saturating_sub(parent_time);

    let mut difficulty = if revision >= corten_chainspec::Revision::Byzantium {
        // EIP-100: ommer-aware adjustment
        let y: i64 = if parent_has_ommers { 2 } else { 1 };
        let adjustment = (y - (elapsed / 9) as i64).max(-99);
        apply_adjustment(parent_difficulty, x, adjustment)
    } else if revision >= corten_chainspec::Revision::Homestead {
        let adjustment = (1 - (elapsed / 10) as i64).max(-99);
        apply_adjustment(parent_difficulty, x, adjustment)
    } else if elapsed < 13 {
        parent_difficulty + x
    } else {
        parent_difficulty.saturating_sub(x)
    };

    if difficulty < U256::from(MIN_DIFFICULTY) {
        difficulty = U256::from(MIN_DIFFICULTY);
    }

    // the difficulty bomb, pushed back by the glacier forks
    let bomb_block = match bomb_delay(config, block_number) {
        Some(delay) => block_number.saturating_sub(delay),
        None => block_number,
    };
    let period_count = bomb_block / BOMB_PERIOD;
    if period_count > 1 {
        difficulty += U256::from(1u64) << (period_count - 2);
    }
    difficulty
}

fn apply_adjustment(parent: U256, x: U256, adjustment: i64) -> U256 {
    if adjustment >= 0 {
        parent + x * U256::from(adjustment as u64)
    } else {
        parent.saturating_sub(x * U256::from((-adjustment) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_chainspec::MAINNET_CONFIG;

    #[test]
    fn fast_blocks_raise_difficulty() {
        let parent = U256::from(10_000_000u64);
        let fast = canonical_difficulty(100, 10, parent, 1, false, &MAINNET_CONFIG);
        let slow = canonical_difficulty(100, 100, parent, 1, false, &MAINNET_CONFIG);
        assert!(fast > parent);
        assert!(slow < parent);
    }

    #[test]
    fn floor_is_enforced() {
        let tiny = U256::from(MIN_DIFFICULTY);
        let next = canonical_difficulty(100, 1000, tiny, 1, false, &MAINNET_CONFIG);
        assert_eq!(next, U256::from(MIN_DIFFICULTY));
    }

    // Mainnet block 13,635,001 (first Arrow Glacier block area) is far
    // into the bomb; spot-check the bomb term against the fake-block rule.
    #[test]
    fn bomb_uses_delayed_block_number() {
        let number = 13_773_001u64;
        let parent = U256::from(10_000_000_000_000_000u64);
        let with_bomb = canonical_difficulty(number, 13, parent, 1, false, &MAINNET_CONFIG);
        // fake block = number - 10_700_000 -> period 30 -> 2^28
        let expected_bomb = U256::from(1u64) << 28;
        assert!(with_bomb >= parent + expected_bomb);
    }

    #[test]
    fn ommer_parents_get_the_eip100_bonus() {
        let parent = U256::from(10_000_000u64);
        let with_ommers = canonical_difficulty(5_000_000, 10, parent, 1, true, &MAINNET_CONFIG);
        let without = canonical_difficulty(5_000_000, 10, parent, 1, false, &MAINNET_CONFIG);
        assert!(with_ommers > without);
    }
}
