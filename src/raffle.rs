use crate::{
    bet::Bet,
    store::{BetScan, StoreError},
};

/// Simulated winner number of the lottery contest
pub const WINNING_NUMBER: u16 = 7574;

pub fn has_won(bet: &Bet) -> bool {
    bet.number == WINNING_NUMBER
}

/// Collects the winning bets of an agency out of a full scan of the store,
/// keeping the order in which they were stored
pub async fn winners(agency: u8, mut scan: BetScan) -> Result<Vec<Bet>, StoreError> {
    let mut winners = vec![];
    while let Some(bet) = scan.next_bet().await {
        let bet = bet?;
        if bet.agency == agency && has_won(&bet) {
            winners.push(bet);
        }
    }

    Ok(winners)
}
