use crate::bet::Bet;

pub mod save_outcome {
    pub const OK: u8 = 0x00;
    pub const ERROR: u8 = 0x01;
}

/// One frame of bets sent by an agency
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BetBatch {
    pub bets: Vec<Bet>,
    // whether the agency will send further batches on the same connection
    pub more_to_come: bool,
}

impl BetBatch {
    pub fn new(bets: Vec<Bet>, more_to_come: bool) -> Self {
        Self { bets, more_to_come }
    }

    /// the agency that submitted the batch, taken from its last record
    pub fn agency(&self) -> Option<u8> {
        self.bets.last().map(|bet| bet.agency)
    }
}

/// Acknowledgement sent back after every batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Ok,
    Error,
}

/// The bets of a single agency that won the raffle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WinnerList(pub Vec<Bet>);

impl From<Vec<Bet>> for WinnerList {
    fn from(bets: Vec<Bet>) -> Self {
        Self(bets)
    }
}
