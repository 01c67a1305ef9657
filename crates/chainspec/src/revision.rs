//! The totally ordered protocol revision lattice.

use serde::{Deserialize, Serialize};

/// A protocol revision.
///
/// Revisions are totally ordered; a rule gated "from X" compares with
/// `revision >= Revision::X`. Difficulty-bomb delays (Muir, Arrow and Gray
/// Glacier) are not revisions: they change the difficulty schedule without
/// touching execution semantics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Revision {
    /// The launch rules.
    #[default]
    Frontier,
    /// EIP-2, EIP-7, EIP-8.
    Homestead,
    /// EIP-150 gas repricing.
    TangerineWhistle,
    /// EIP-155/160/161/170.
    SpuriousDragon,
    /// Byzantium metropolis half.
    Byzantium,
    /// Constantinople metropolis half.
    Constantinople,
    /// Constantinople with EIP-1283 removed.
    Petersburg,
    /// Istanbul repricings.
    Istanbul,
    /// EIP-2565/2929/2718/2930.
    Berlin,
    /// EIP-1559 and friends.
    London,
    /// The merge (EIP-3675).
    Paris,
    /// Withdrawals, EIP-3855/3860.
    Shanghai,
    /// EIP-4844 and friends.
    Cancun,
}

impl Revision {
    /// All revisions in ascending order.
    pub const ALL: [Self; 13] = [
        Self::Frontier,
        Self::Homestead,
        Self::TangerineWhistle,
        Self::SpuriousDragon,
        Self::Byzantium,
        Self::Constantinople,
        Self::Petersburg,
        Self::Istanbul,
        Self::Berlin,
        Self::London,
        Self::Paris,
        Self::Shanghai,
        Self::Cancun,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order() {
        for pair in Revision::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(Revision::Paris > Revision::London);
        assert!(Revision::Frontier < Revision::Cancun);
    }
}
