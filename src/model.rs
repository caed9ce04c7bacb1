use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::identity::Role;

pub const MAX_MESSAGE_LEN: usize = 300;
pub const FEED_LIMIT: u32 = 100;
pub const UNKNOWN_FLAG: &str = "🏳";

/// Two-letter ISO country code, always stored uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode([u8; 2]);

impl CountryCode {
    pub fn parse(code: &str) -> Option<CountryCode> {
        let code = code.trim().as_bytes();
        match code {
            [a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
                Some(CountryCode([a.to_ascii_uppercase(), b.to_ascii_uppercase()]))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }

    /// Regional indicator pair, e.g. `US` -> 🇺🇸.
    pub fn flag(&self) -> String {
        self.0
            .iter()
            .filter_map(|b| char::from_u32(0x1F1E6 + u32::from(b - b'A')))
            .collect()
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CountryCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CountryCode::parse(&value).ok_or(format!("{value:?} is not a two-letter country code"))
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.as_str().to_owned()
    }
}

pub fn flag_or_unknown(country: Option<CountryCode>) -> String {
    country.map(|c| c.flag()).unwrap_or_else(|| UNKNOWN_FLAG.to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub country: Option<CountryCode>,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn flag(&self) -> String {
        flag_or_unknown(self.country)
    }

    /// `h:MM AM/PM` in the given offset.
    pub fn time_label(&self, offset: UtcOffset) -> String {
        let at = self.created_at.to_offset(offset);
        let (hour, minute) = (at.hour(), at.minute());
        let suffix = if hour >= 12 { "PM" } else { "AM" };
        let hour = match hour % 12 {
            0 => 12,
            h => h,
        };
        format!("{hour}:{minute:02} {suffix}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub username: String,
    #[serde(default)]
    pub country: Option<CountryCode>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub country: Option<CountryCode>,
    #[serde(default)]
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active: OffsetDateTime,
}

impl Presence {
    /// Inclusive: a record refreshed exactly `window` ago still counts.
    pub fn is_active(&self, now: OffsetDateTime, window: Duration) -> bool {
        let elapsed = (now - self.last_active).whole_milliseconds();
        elapsed <= window.as_millis() as i128
    }

    pub fn initials(&self) -> String {
        self.username
            .split_whitespace()
            .take(2)
            .filter_map(|part| part.chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }
}
