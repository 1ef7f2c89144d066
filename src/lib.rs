//! A lottery where agencies submit their bets over a framed binary protocol.
//!
//! Every bet lands in a single append-only store shared by all connections.
//! Once an agency is done submitting, it gets back those of its bets that
//! match the winning number.

pub mod agency;
pub mod barrier;
pub mod bet;
pub mod config;
pub mod pool;
pub mod protocol;
pub mod raffle;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;
