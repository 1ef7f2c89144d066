use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::message::{save_outcome, BetBatch, SaveOutcome, WinnerList};
use crate::{
    bet::{Bet, BirthdateParseErr},
    transport::{recv_exact, TransportError},
};

#[async_trait]
pub trait Deserialize: Sized {
    type Error;

    // Deserialize a structure from a reader
    async fn deserialize<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Self::Error>;
}

/// Every way a frame can turn out to be malformed
#[derive(thiserror::Error, Debug)]
pub enum DeserializeError {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Utf(#[from] std::string::FromUtf8Error),

    #[error("{0}")]
    Birthdate(#[from] BirthdateParseErr),

    #[error("agency id 0 does not identify an agency")]
    ReservedAgency,

    #[error("Unknown save outcome: {0}")]
    UnknownOutcome(u8),
}

async fn read_array<const N: usize, R>(reader: &mut R) -> Result<[u8; N], TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let raw = recv_exact(N, reader).await?;

    let mut array = [0u8; N];
    array.copy_from_slice(&raw);
    Ok(array)
}

async fn read_u8<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<u8, TransportError> {
    Ok(u8::from_be_bytes(read_array(reader).await?))
}

async fn read_u16<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<u16, TransportError> {
    Ok(u16::from_be_bytes(read_array(reader).await?))
}

async fn read_u32<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<u32, TransportError> {
    Ok(u32::from_be_bytes(read_array(reader).await?))
}

#[async_trait]
impl Deserialize for String {
    type Error = DeserializeError;

    async fn deserialize<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Self::Error> {
        // Read raw bytes
        let length = read_u16(reader).await?;
        let raw = recv_exact(length as usize, reader).await?;

        // Parse the raw bytes into a string
        let text = String::from_utf8(raw)?;

        Ok(text)
    }
}

#[async_trait]
impl Deserialize for Bet {
    type Error = DeserializeError;

    async fn deserialize<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Self::Error> {
        let first_name = String::deserialize(reader).await?;
        let last_name = String::deserialize(reader).await?;
        let document = String::deserialize(reader).await?;
        let birthdate = String::deserialize(reader).await?.parse()?;
        let number = read_u16(reader).await?;

        let agency = read_u8(reader).await?;
        if agency == 0 {
            return Err(DeserializeError::ReservedAgency);
        }

        Ok(Self {
            agency,
            first_name,
            last_name,
            document,
            birthdate,
            number,
        })
    }
}

// the shared prefix of batches and winner lists
async fn deserialize_bets<R>(reader: &mut R) -> Result<Vec<Bet>, DeserializeError>
where
    R: AsyncRead + Unpin + Send,
{
    let count = read_u32(reader).await?;

    // the count is untrusted, let the vector grow as the records arrive
    let mut bets = Vec::new();
    for _ in 0..count {
        bets.push(Bet::deserialize(reader).await?);
    }

    Ok(bets)
}

#[async_trait]
impl Deserialize for BetBatch {
    type Error = DeserializeError;

    async fn deserialize<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Self::Error> {
        let bets = deserialize_bets(reader).await?;
        let more_to_come = read_u8(reader).await? != 0;

        Ok(Self { bets, more_to_come })
    }
}

#[async_trait]
impl Deserialize for SaveOutcome {
    type Error = DeserializeError;

    // `Self::Error` would also name the `SaveOutcome::Error` variant
    async fn deserialize<R: AsyncRead + Unpin + Send>(
        reader: &mut R,
    ) -> Result<Self, DeserializeError> {
        match read_u8(reader).await? {
            save_outcome::OK => Ok(SaveOutcome::Ok),
            save_outcome::ERROR => Ok(SaveOutcome::Error),
            other => Err(DeserializeError::UnknownOutcome(other)),
        }
    }
}

#[async_trait]
impl Deserialize for WinnerList {
    type Error = DeserializeError;

    async fn deserialize<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Self::Error> {
        Ok(Self(deserialize_bets(reader).await?))
    }
}
