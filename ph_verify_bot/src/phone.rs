use std::fmt::Display;

use phonenumber::{country, Mode};

/// ISO 3166 code of the only region whose numbers are accepted.
pub const TARGET_REGION: &str = "PH";
/// Calling code of the only region whose numbers are accepted.
pub const TARGET_CALLING_CODE: u16 = 63;

/// Outcome of looking at a phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// `true` only for valid numbers of [`TARGET_REGION`] under [`TARGET_CALLING_CODE`].
    pub is_match: bool,
    /// Calling code the number was parsed with, if it parsed at all.
    pub calling_code: Option<u16>,
    /// ISO 3166 region the number belongs to, if it could be determined.
    pub region: Option<String>,
    /// E.164 rendition of the number, or the raw input if it didn't parse.
    pub normalized: String,
    /// Whether the number is valid according to its region's numbering plan.
    pub is_valid_number: bool,
}

/// Why a number was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Doesn't parse, or parses as a Philippine number that can't exist.
    InvalidFormat,
    /// A number from somewhere else.
    WrongCountry,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidFormat => write!(f, "invalid format"),
            Rejection::WrongCountry => write!(f, "wrong country"),
        }
    }
}

impl Classification {
    fn unparseable(raw: &str) -> Self {
        Classification {
            is_match: false,
            calling_code: None,
            region: None,
            normalized: raw.to_string(),
            is_valid_number: false,
        }
    }

    /// Returns why this number was rejected, or [`None`] if it matched.
    #[must_use]
    pub fn rejection(&self) -> Option<Rejection> {
        if self.is_match {
            return None;
        }

        let Some(calling_code) = self.calling_code else {
            return Some(Rejection::InvalidFormat);
        };

        let right_region = self.region.as_deref().map_or(true, |r| r == TARGET_REGION);

        if calling_code == TARGET_CALLING_CODE && right_region {
            // Philippine-looking, just not a real number.
            Some(Rejection::InvalidFormat)
        } else {
            Some(Rejection::WrongCountry)
        }
    }
}

/// Coerces locally written Philippine numbers, like `0917 123 4567`, into
/// international form. Numbers that already look international, for any country,
/// are returned as is minus spaces and hyphens.
///
/// Exactly one rewrite applies per input, tried in this order.
#[must_use]
pub fn apply_local_conventions(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
    let ten_digits = cleaned.len() == 10 && cleaned.bytes().all(|b| b.is_ascii_digit());

    if let Some(rest) = cleaned.strip_prefix("09") {
        // Trunk prefix plus mobile prefix.
        format!("+639{rest}")
    } else if cleaned.starts_with('9') && ten_digits {
        // Mobile number without the trunk prefix.
        format!("+63{cleaned}")
    } else if cleaned.starts_with("63") {
        // Calling code without the plus.
        format!("+{cleaned}")
    } else if ten_digits {
        // Probably a landline, maybe with a trunk prefix.
        let national = cleaned.strip_prefix('0').unwrap_or(&cleaned);
        format!("+63{national}")
    } else {
        cleaned
    }
}

/// Classifies a phone number, as shared in a Telegram contact, as Philippine or not.
///
/// This never fails. Garbage input just results in a non-matching classification
/// with the input echoed back as [`Classification::normalized`].
#[must_use]
pub fn classify(raw: &str) -> Classification {
    let candidate = apply_local_conventions(raw);

    let number = match phonenumber::parse(None, &candidate) {
        Ok(number) => number,
        Err(e) => {
            log::debug!("Failed to parse phone number {raw:?}: {e}");
            return Classification::unparseable(raw);
        }
    };

    let calling_code = number.code().value();
    let region = number.country().id().map(region_code);
    let is_valid_number = phonenumber::is_valid(&number);

    let is_match = is_valid_number
        && calling_code == TARGET_CALLING_CODE
        && region.as_deref() == Some(TARGET_REGION);

    Classification {
        is_match,
        calling_code: Some(calling_code),
        region,
        normalized: number.format().mode(Mode::E164).to_string(),
        is_valid_number,
    }
}

fn region_code(id: country::Id) -> String {
    // Variant names are the ISO 3166 codes themselves.
    format!("{id:?}")
}
