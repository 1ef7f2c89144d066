use std::num::NonZeroUsize;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    barrier::AgencyBarrier,
    pool::Detach,
    protocol::{
        deserializer::{Deserialize, DeserializeError},
        message::{BetBatch, SaveOutcome, WinnerList},
        serializer::{Serialize, SerializeError},
    },
    raffle,
    store::{BetStore, StoreError},
    transport::{self, TransportError},
};

/// Everything a session needs besides its connection
#[derive(Debug, Clone)]
pub struct Session {
    store: BetStore,
    max_packet_size: NonZeroUsize,
    barrier: Option<AgencyBarrier>,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("received a malformed frame: {0}")]
    Frame(#[from] DeserializeError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Serialize(#[from] SerializeError),

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// What a session that ran to completion went through
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub agency: Option<u8>,
    pub stored: usize,
    pub winners: usize,
}

enum State {
    AwaitBatch,
    Persisting(BetBatch),
    Acknowledging { more_to_come: bool },
    Resolving(u8),
    SendingWinners(WinnerList),
    Closed,
}

impl Session {
    pub fn new(store: BetStore, max_packet_size: NonZeroUsize) -> Self {
        Self {
            store,
            max_packet_size,
            barrier: None,
        }
    }

    /// Make every session wait for the other agencies before resolving the raffle
    pub fn with_barrier(mut self, barrier: AgencyBarrier) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Serves a single agency connection from its first batch until it is closed
    ///
    /// the connection is shut down on every path, including failures.
    pub async fn handle<S>(&self, stream: S) -> Result<Summary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.handle_in_pool(stream, Detach::default()).await
    }

    /// Like [`Session::handle`], but gives the worker back to its pool while
    /// waiting on the other agencies
    pub async fn handle_in_pool<S>(
        &self,
        mut stream: S,
        detach: Detach,
    ) -> Result<Summary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let result = self.run(&mut stream, detach).await;

        if let Err(err) = stream.shutdown().await {
            tracing::debug!("failed to shutdown the connection: {}", err);
        }

        result
    }

    async fn run<S>(&self, stream: &mut S, mut detach: Detach) -> Result<Summary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut summary = Summary::default();
        let mut state = State::AwaitBatch;

        loop {
            state = match state {
                State::AwaitBatch => State::Persisting(BetBatch::deserialize(stream).await?),
                State::Persisting(batch) => {
                    match self.store.append(&batch.bets).await {
                        Ok(()) => {
                            // the last stored record seen on the connection names the agency
                            if let Some(agency) = batch.agency() {
                                summary.agency = Some(agency);
                            }
                            tracing::info!(
                                "stored {} bets from agency {:?}",
                                batch.bets.len(),
                                summary.agency
                            );
                            summary.stored += batch.bets.len();
                            State::Acknowledging {
                                more_to_come: batch.more_to_come,
                            }
                        }
                        Err(err) => {
                            tracing::error!("failed to store bets: {}", err);
                            send_outcome(stream, SaveOutcome::Error).await?;

                            // the agency can retry with its next batch, but a
                            // final batch that was not stored ends the session
                            if !batch.more_to_come {
                                return Err(err.into());
                            }
                            State::AwaitBatch
                        }
                    }
                }
                State::Acknowledging { more_to_come } => {
                    send_outcome(stream, SaveOutcome::Ok).await?;

                    match (more_to_come, summary.agency) {
                        (true, _) => State::AwaitBatch,
                        (false, Some(agency)) => State::Resolving(agency),
                        // the connection never carried a single bet, nobody can win
                        (false, None) => State::SendingWinners(WinnerList::default()),
                    }
                }
                State::Resolving(agency) => {
                    if let Some(barrier) = &self.barrier {
                        detach.detach();
                        barrier.finish(agency).await;
                    }

                    let scan = self.store.scan().await?;
                    State::SendingWinners(raffle::winners(agency, scan).await?.into())
                }
                State::SendingWinners(winners) => {
                    let frame = winners.to_bytes()?;
                    transport::send_chunked(&frame, self.max_packet_size, stream).await?;

                    tracing::info!(
                        "sent {} winners to agency {:?}",
                        winners.0.len(),
                        summary.agency
                    );
                    summary.winners = winners.0.len();
                    State::Closed
                }
                State::Closed => return Ok(summary),
            };
        }
    }
}

async fn send_outcome<W>(stream: &mut W, outcome: SaveOutcome) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + Send,
{
    let frame = outcome.to_bytes()?;
    transport::send_all(&frame, stream).await?;

    Ok(())
}
