use bytes::{BufMut, Bytes, BytesMut};

use super::message::{save_outcome, BetBatch, SaveOutcome, WinnerList};
use crate::bet::Bet;

pub trait Serialize {
    /// Serialize a structure at the end of the buffer
    fn serialize(&self, buffer: &mut BytesMut) -> Result<(), SerializeError>;

    /// Serialize a structure into its own immutable frame
    fn to_bytes(&self) -> Result<Bytes, SerializeError> {
        let mut buffer = BytesMut::new();
        self.serialize(&mut buffer)?;
        Ok(buffer.freeze())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SerializeError {
    #[error("The text is too long: {0} bytes")]
    TooLong(usize),

    #[error("Too many bets for a single frame: {0}")]
    TooManyBets(usize),
}

impl Serialize for str {
    fn serialize(&self, buffer: &mut BytesMut) -> Result<(), SerializeError> {
        let length: u16 = self
            .len()
            .try_into()
            .map_err(|_| SerializeError::TooLong(self.len()))?;

        buffer.put_u16(length);
        buffer.put_slice(self.as_bytes());

        Ok(())
    }
}

impl Serialize for Bet {
    fn serialize(&self, buffer: &mut BytesMut) -> Result<(), SerializeError> {
        self.first_name.as_str().serialize(buffer)?;
        self.last_name.as_str().serialize(buffer)?;
        self.document.as_str().serialize(buffer)?;
        self.birthdate.to_string().as_str().serialize(buffer)?;
        buffer.put_u16(self.number);
        buffer.put_u8(self.agency);

        Ok(())
    }
}

// both batches and winner lists open with the number of records
fn serialize_bets(bets: &[Bet], buffer: &mut BytesMut) -> Result<(), SerializeError> {
    let count: u32 = bets
        .len()
        .try_into()
        .map_err(|_| SerializeError::TooManyBets(bets.len()))?;

    buffer.put_u32(count);
    for bet in bets {
        bet.serialize(buffer)?;
    }

    Ok(())
}

impl Serialize for BetBatch {
    fn serialize(&self, buffer: &mut BytesMut) -> Result<(), SerializeError> {
        serialize_bets(&self.bets, buffer)?;
        buffer.put_u8(self.more_to_come.into());

        Ok(())
    }
}

impl Serialize for SaveOutcome {
    fn serialize(&self, buffer: &mut BytesMut) -> Result<(), SerializeError> {
        buffer.put_u8(match self {
            SaveOutcome::Ok => save_outcome::OK,
            SaveOutcome::Error => save_outcome::ERROR,
        });

        Ok(())
    }
}

impl Serialize for WinnerList {
    fn serialize(&self, buffer: &mut BytesMut) -> Result<(), SerializeError> {
        serialize_bets(&self.0, buffer)
    }
}
