//! The delimited text form of a persisted bet
//!
//! one record per line, `agency,first_name,last_name,document,birthdate,number`,
//! fields are only quoted when they contain a delimiter, a quote or a line break.

use std::num::ParseIntError;

use crate::bet::{Bet, BirthdateParseErr};

const DELIMITER: char = ',';
const QUOTE: char = '"';

#[derive(thiserror::Error, Debug)]
pub enum RecordErr {
    #[error("a quoted field was never closed")]
    UnterminatedQuote,

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("{0}")]
    Utf(#[from] std::string::FromUtf8Error),

    #[error("failed to parse a number: {0}")]
    Number(#[from] ParseIntError),

    #[error("{0}")]
    Birthdate(#[from] BirthdateParseErr),
}

/// Renders a bet as a single record, including its line terminator
pub fn to_record(bet: &Bet) -> String {
    let fields = [
        &bet.agency.to_string(),
        &bet.first_name,
        &bet.last_name,
        &bet.document,
        &bet.birthdate.to_string(),
        &bet.number.to_string(),
    ];

    let mut record = String::new();
    for (idx, field) in fields.into_iter().enumerate() {
        if idx > 0 {
            record.push(DELIMITER);
        }
        push_field(&mut record, field);
    }
    record.push('\n');

    record
}

fn push_field(record: &mut String, field: &str) {
    if !field.contains([DELIMITER, QUOTE, '\n', '\r']) {
        record.push_str(field);
        return;
    }

    record.push(QUOTE);
    for char in field.chars() {
        if char == QUOTE {
            record.push(QUOTE);
        }
        record.push(char);
    }
    record.push(QUOTE);
}

/// Parses a record written by [`to_record`]
pub fn from_record(record: &str) -> Result<Bet, RecordErr> {
    let [agency, first_name, last_name, document, birthdate, number] = fields::<6>(record)?;

    Ok(Bet {
        agency: agency.parse()?,
        first_name,
        last_name,
        document,
        birthdate: birthdate.parse()?,
        number: number.parse()?,
    })
}

/// Parses a line of an agency's bet file, which carries no agency column
pub fn from_agency_record(record: &str, agency: u8) -> Result<Bet, RecordErr> {
    let [first_name, last_name, document, birthdate, number] = fields::<5>(record)?;

    Ok(Bet {
        agency,
        first_name,
        last_name,
        document,
        birthdate: birthdate.parse()?,
        number: number.parse()?,
    })
}

fn fields<const N: usize>(record: &str) -> Result<[String; N], RecordErr> {
    let fields = split_fields(record)?;
    let found = fields.len();

    fields
        .try_into()
        .map_err(|_| RecordErr::FieldCount { expected: N, found })
}

/// Splits a record into its unquoted fields
pub fn split_fields(record: &str) -> Result<Vec<String>, RecordErr> {
    // drop the line terminator, either '\n' or '\r\n'
    let record = match record.strip_suffix('\n') {
        Some(record) => record.strip_suffix('\r').unwrap_or(record),
        None => record,
    };

    let mut fields = vec![];
    let mut field = String::new();
    let mut quoted = false;

    let mut chars = record.chars().peekable();
    while let Some(char) = chars.next() {
        match (quoted, char) {
            (true, QUOTE) if chars.peek() == Some(&QUOTE) => {
                chars.next();
                field.push(QUOTE);
            }
            (true, QUOTE) => quoted = false,
            (false, QUOTE) if field.is_empty() => quoted = true,
            (false, DELIMITER) => fields.push(std::mem::take(&mut field)),
            (_, char) => field.push(char),
        }
    }

    if quoted {
        return Err(RecordErr::UnterminatedQuote);
    }
    fields.push(field);

    Ok(fields)
}

/// Whether the raw bytes hold a whole record, or a quoted field still spans
/// onto the next line
pub fn is_complete(raw: &[u8]) -> bool {
    raw.iter().filter(|&&byte| byte == QUOTE as u8).count() % 2 == 0
}
