//! Simulates a lottery agency: submits the bets from its file and prints
//! how many of them won.

use agency_lottery::{
    agency::{self, AgencyClient},
    config::AgencyArgs,
};
use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = AgencyArgs::parse();

    let bets = agency::read_bets(&args.bets, args.id)
        .await
        .with_context(|| format!("failed to read bets from {}", args.bets.display()))?;
    tracing::info!("agency {} read {} bets", args.id, bets.len());

    let client = AgencyClient::connect(&args.server, args.submission.max_packet_size)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    let winners = client
        .submit(
            bets,
            args.submission.batch_size,
            args.submission.batch_period,
        )
        .await
        .context("failed to submit bets")?;

    tracing::info!(
        "agency {} has {} winners: {:?}",
        args.id,
        winners.0.len(),
        winners
            .0
            .iter()
            .map(|bet| bet.document.as_str())
            .collect::<Vec<_>>()
    );

    Ok(())
}
