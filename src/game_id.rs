//! Conversion between display room identifiers and wire game ids.
//!
//! Players type a room as four hex digits (`"D332"`); the server addresses
//! it by the `u16` those digits encode. [`GameId`] is the wire value and
//! renders back to the display form through [`Display`](fmt::Display).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of hex digits in a display room identifier.
pub const DISPLAY_LEN: usize = 4;

/// A display room identifier failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameIdError {
    /// The input was not exactly four hex digits.
    #[error("room id must be four hex characters, got {0:?}")]
    InvalidFormat(String),
}

/// Decode a display room identifier into its numeric id.
///
/// Accepts exactly [`DISPLAY_LEN`] ASCII hex digits in either case. Signs,
/// prefixes, separators and surrounding whitespace are rejected.
///
/// ```
/// use cfh_client::game_id::decode;
///
/// assert_eq!(decode("D332"), Ok(0xD332));
/// assert_eq!(decode("00ff"), Ok(0x00FF));
/// assert!(decode("D33").is_err());
/// assert!(decode("+D33").is_err());
/// ```
pub fn decode(display: &str) -> Result<u16, GameIdError> {
    let well_formed =
        display.len() == DISPLAY_LEN && display.bytes().all(|b| b.is_ascii_hexdigit());
    if !well_formed {
        return Err(GameIdError::InvalidFormat(display.to_owned()));
    }
    u16::from_str_radix(display, 16).map_err(|_| GameIdError::InvalidFormat(display.to_owned()))
}

/// Encode a numeric id as four zero-padded uppercase hex digits.
pub fn encode(value: u16) -> String {
    format!("{value:04X}")
}

/// Numeric room identifier as sent on the wire.
///
/// Serializes as a plain JSON number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GameId(u16);

impl GameId {
    /// Wrap a raw numeric id.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// The raw numeric id.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The four-digit display form.
    pub fn to_display(self) -> String {
        encode(self.0)
    }
}

impl FromStr for GameId {
    type Err = GameIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s).map(Self)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl From<u16> for GameId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<GameId> for u16 {
    fn from(id: GameId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn every_u16_survives_encode_then_decode() {
        for value in 0..=u16::MAX {
            assert_eq!(decode(&encode(value)), Ok(value), "value {value:#06x}");
        }
    }

    #[test]
    fn encode_pads_and_uppercases() {
        assert_eq!(encode(0), "0000");
        assert_eq!(encode(0xA), "000A");
        assert_eq!(encode(0xd332), "D332");
        assert_eq!(encode(u16::MAX), "FFFF");
    }

    #[test]
    fn decode_accepts_mixed_case() {
        assert_eq!(decode("d332"), Ok(0xD332));
        assert_eq!(decode("aBcD"), Ok(0xABCD));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        for input in ["", "D", "D33", "D3320", "0000FFFF"] {
            assert_eq!(
                decode(input),
                Err(GameIdError::InvalidFormat(input.to_owned())),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn decode_rejects_non_hex_and_decorations() {
        for input in ["ZZZZ", "D33G", "+D33", "-001", " D33", "D33 ", "D3-2", "0x12", "ＤＤ"] {
            assert!(decode(input).is_err(), "input {input:?} should be rejected");
        }
    }

    #[test]
    fn game_id_display_and_parse_agree() {
        let id: GameId = "d332".parse().unwrap();
        assert_eq!(id.get(), 0xD332);
        assert_eq!(id.to_string(), "D332");
        assert_eq!(id.to_display(), "D332");
        assert_eq!(u16::from(id), 0xD332);
        assert_eq!(GameId::from(7u16), GameId::new(7));
    }

    #[test]
    fn game_id_is_a_number_on_the_wire() {
        let json = serde_json::to_string(&GameId::new(0xD332)).unwrap();
        assert_eq!(json, "54066");
        let back: GameId = serde_json::from_str("54066").unwrap();
        assert_eq!(back, GameId::new(0xD332));
    }

    #[test]
    fn error_message_names_the_format() {
        let err = decode("nope").unwrap_err();
        assert!(err.to_string().contains("four hex characters"));
    }
}
