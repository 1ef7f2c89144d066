use std::{fmt, str::FromStr};

use chrono::NaiveDate;

/// A single wagered entry submitted by an agency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub agency: u8,
    pub first_name: String,
    pub last_name: String,
    pub document: String,
    pub birthdate: Birthdate,
    pub number: u16,
}

/// A calendar date in its ISO form (YYYY-MM-DD)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Birthdate(NaiveDate);

#[derive(thiserror::Error, Debug)]
pub enum BirthdateParseErr {
    #[error("expected a date in the YYYY-MM-DD format")]
    UnknownFormat,

    #[error("invalid date: {0}")]
    Invalid(#[from] chrono::ParseError),

    #[error("{0} is not a valid calendar date")]
    OutOfRange(String),
}

const BIRTHDATE_FORMAT: &str = "%Y-%m-%d";

impl Birthdate {
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self, BirthdateParseErr> {
        NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())
            .map(Self)
            .ok_or_else(|| {
                BirthdateParseErr::OutOfRange(format!("{:04}-{:02}-{:02}", year, month, day))
            })
    }
}

impl FromStr for Birthdate {
    type Err = BirthdateParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // only the zero padded form is accepted, chrono alone would take "1999-3-7"
        let well_formed = s.len() == 10
            && s.bytes().enumerate().all(|(idx, byte)| match idx {
                4 | 7 => byte == b'-',
                _ => byte.is_ascii_digit(),
            });
        if !well_formed {
            return Err(BirthdateParseErr::UnknownFormat);
        }

        Ok(Self(NaiveDate::parse_from_str(s, BIRTHDATE_FORMAT)?))
    }
}

impl fmt::Display for Birthdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BIRTHDATE_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::Birthdate;

    #[test]
    fn check_birthdate_parsing() {
        let raw_dates = ["1999-03-17", "2000-02-29", "0001-12-31"];
        let expected_dates = [
            Birthdate::new(1999, 3, 17).unwrap(),
            Birthdate::new(2000, 2, 29).unwrap(),
            Birthdate::new(1, 12, 31).unwrap(),
        ];

        for (raw, expected) in raw_dates.iter().zip(expected_dates) {
            let parsed: Birthdate = raw.parse().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), *raw);
        }
    }

    #[test]
    fn check_bad_birthdate_parsing() {
        let bad_dates = [
            "",
            "1999-3-17",
            "1999/03/17",
            "1999-13-01",
            "1900-02-29",
            "2023-04-31",
            "+999-01-01",
            "1999-03-17-01",
            "1999-03-1a",
        ];

        for date in bad_dates {
            assert!(date.parse::<Birthdate>().is_err(), "{} parsed", date);
        }

        assert!(Birthdate::new(2023, 2, 29).is_err());
        assert!(Birthdate::new(2023, 0, 1).is_err());
    }
}
