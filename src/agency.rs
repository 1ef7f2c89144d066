//! The agency side of the protocol: submits bets in batches, then waits for
//! the raffle results.

use std::{num::NonZeroUsize, path::Path, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};

use crate::{
    bet::Bet,
    protocol::{
        deserializer::{Deserialize, DeserializeError},
        message::{BetBatch, SaveOutcome, WinnerList},
        serializer::{Serialize, SerializeError},
    },
    store::record::{self, RecordErr},
    transport::{self, TransportError},
};

#[derive(thiserror::Error, Debug)]
pub enum AgencyError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("line {line} of the bets file is invalid: {reason}")]
    Record { line: usize, reason: RecordErr },

    #[error("received a malformed frame: {0}")]
    Frame(#[from] DeserializeError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Serialize(#[from] SerializeError),

    #[error("the server failed to store batch {0}")]
    Rejected(usize),
}

pub struct AgencyClient<S> {
    stream: S,
    max_packet_size: NonZeroUsize,
}

impl AgencyClient<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        max_packet_size: NonZeroUsize,
    ) -> Result<Self, AgencyError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream, max_packet_size))
    }
}

impl<S> AgencyClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, max_packet_size: NonZeroUsize) -> Self {
        Self {
            stream,
            max_packet_size,
        }
    }

    /// Sends a single batch and waits for the server to acknowledge it
    pub async fn send_batch(&mut self, batch: &BetBatch) -> Result<SaveOutcome, AgencyError> {
        let frame = batch.to_bytes()?;
        transport::send_chunked(&frame, self.max_packet_size, &mut self.stream).await?;

        Ok(SaveOutcome::deserialize(&mut self.stream).await?)
    }

    pub async fn receive_winners(&mut self) -> Result<WinnerList, AgencyError> {
        Ok(WinnerList::deserialize(&mut self.stream).await?)
    }

    /// Submits every bet, `batch_size` at a time, and returns the agency's winners
    ///
    /// an agency without bets still sends an empty final batch.
    pub async fn submit(
        mut self,
        bets: Vec<Bet>,
        batch_size: NonZeroUsize,
        batch_period: Duration,
    ) -> Result<WinnerList, AgencyError> {
        let batches: Vec<&[Bet]> = match bets.is_empty() {
            true => vec![bets.as_slice()],
            false => bets.chunks(batch_size.get()).collect(),
        };

        let last = batches.len() - 1;
        for (idx, bets) in batches.into_iter().enumerate() {
            let batch = BetBatch::new(bets.to_vec(), idx != last);
            match self.send_batch(&batch).await? {
                SaveOutcome::Ok => {
                    tracing::info!("batch {} with {} bets stored", idx, bets.len())
                }
                SaveOutcome::Error => return Err(AgencyError::Rejected(idx)),
            }

            if idx != last && !batch_period.is_zero() {
                tokio::time::sleep(batch_period).await;
            }
        }

        let winners = self.receive_winners().await?;
        if let Err(err) = self.stream.shutdown().await {
            tracing::debug!("failed to shutdown the connection: {}", err);
        }

        Ok(winners)
    }
}

/// Reads the bets file of an agency, one `first_name,last_name,document,birthdate,number` per line
pub async fn read_bets(path: impl AsRef<Path>, agency: u8) -> Result<Vec<Bet>, AgencyError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_bets(&content, agency)
}

fn parse_bets(content: &str, agency: u8) -> Result<Vec<Bet>, AgencyError> {
    let mut bets = vec![];
    let mut pending = String::new();
    let mut first_line = 1;

    for (idx, line) in content.split_inclusive('\n').enumerate() {
        if pending.is_empty() {
            first_line = idx + 1;
        }
        pending.push_str(line);

        // a quoted field may hold a line break
        if !record::is_complete(pending.as_bytes()) {
            continue;
        }

        if !pending.trim().is_empty() {
            let bet = record::from_agency_record(&pending, agency).map_err(|reason| {
                AgencyError::Record {
                    line: first_line,
                    reason,
                }
            })?;
            bets.push(bet);
        }
        pending.clear();
    }

    if !pending.trim().is_empty() {
        return Err(AgencyError::Record {
            line: first_line,
            reason: RecordErr::UnterminatedQuote,
        });
    }

    Ok(bets)
}
