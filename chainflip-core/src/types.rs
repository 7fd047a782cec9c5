use crate::error::{ChainFlipError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub type MatchId = u64;

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
const ETHER_DECIMALS: usize = 18;

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// Sentinel for "nobody": an unjoined second player or a match without a winner.
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Shortened form for tables, e.g. `0x1234…cdef`.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

impl FromStr for Address {
    type Err = ChainFlipError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| ChainFlipError::InvalidAddress(format!("missing 0x prefix: {}", s)))?;

        if digits.len() != 40 {
            return Err(ChainFlipError::InvalidAddress(format!(
                "expected 40 hex digits, got {}: {}",
                digits.len(),
                s
            )));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| ChainFlipError::InvalidAddress(format!("{}: {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for TxHash {
    type Err = ChainFlipError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim().trim_start_matches("0x");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| ChainFlipError::decode(format!("invalid tx hash {}: {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

/// Chainlink VRF request id. A full uint256, kept as its big-endian word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RequestId([u8; 32]);

impl RequestId {
    pub const ZERO: RequestId = RequestId([0u8; 32]);

    pub const fn from_word(word: [u8; 32]) -> Self {
        Self(word)
    }

    pub fn as_word(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a decimal string of up to 78 digits.
    pub fn from_decimal(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChainFlipError::decode(format!("invalid request id {}", s)));
        }

        let mut word = [0u8; 32];
        for digit in s.bytes().map(|b| (b - b'0') as u32) {
            // word = word * 10 + digit
            let mut carry = digit;
            for byte in word.iter_mut().rev() {
                let v = *byte as u32 * 10 + carry;
                *byte = (v & 0xff) as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return Err(ChainFlipError::decode(format!(
                    "request id {} exceeds 256 bits",
                    s
                )));
            }
        }
        Ok(Self(word))
    }

    /// Parse up to 64 hex digits, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.is_empty() || digits.len() > 64 {
            return Err(ChainFlipError::decode(format!("invalid request id {}", s)));
        }
        let padded = format!("{:0>64}", digits);
        let mut word = [0u8; 32];
        hex::decode_to_slice(&padded, &mut word)
            .map_err(|e| ChainFlipError::decode(format!("invalid request id {}: {}", s, e)))?;
        Ok(Self(word))
    }
}

impl From<u128> for RequestId {
    fn from(value: u128) -> Self {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        Self(word)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        let trimmed = encoded.trim_start_matches('0');
        write!(f, "0x{}", if trimmed.is_empty() { "0" } else { trimmed })
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Native-currency amount in wei.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub const fn from_wei(wei: u128) -> Self {
        Self(wei)
    }

    pub fn as_wei(&self) -> u128 {
        self.0
    }

    /// Parse a decimal ether amount such as `"0.1"` or `"2"`.
    pub fn parse_ether(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ChainFlipError::InvalidAmount("empty amount".to_string()));
        }

        let (whole, fraction) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ChainFlipError::InvalidAmount(format!("not a decimal: {}", s)));
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(ChainFlipError::InvalidAmount(format!("not a decimal: {}", s)));
        }
        if fraction.len() > ETHER_DECIMALS {
            return Err(ChainFlipError::InvalidAmount(format!(
                "more than {} decimals: {}",
                ETHER_DECIMALS, s
            )));
        }

        let overflow = || ChainFlipError::InvalidAmount(format!("amount too large: {}", s));

        let whole_wei = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .map_err(|_| overflow())?
                .checked_mul(WEI_PER_ETHER)
                .ok_or_else(overflow)?
        };

        let fraction_wei = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", fraction, width = ETHER_DECIMALS);
            padded.parse::<u128>().map_err(|_| overflow())?
        };

        whole_wei
            .checked_add(fraction_wei)
            .map(Wei)
            .ok_or_else(overflow)
    }

    /// Render as ether with trailing zeros trimmed (`1.9`, `0.001`, `2`).
    pub fn format_ether(&self) -> String {
        let whole = self.0 / WEI_PER_ETHER;
        let fraction = self.0 % WEI_PER_ETHER;
        if fraction == 0 {
            return whole.to_string();
        }
        let fraction = format!("{:018}", fraction);
        format!("{}.{}", whole, fraction.trim_end_matches('0'))
    }

    /// Lossy conversion for ratios and display only.
    pub fn to_ether_f64(&self) -> f64 {
        self.0 as f64 / WEI_PER_ETHER as f64
    }

    pub fn checked_add(self, other: Wei) -> Option<Wei> {
        self.0.checked_add(other.0).map(Wei)
    }

    pub fn saturating_sub(self, other: Wei) -> Wei {
        Wei(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_ether())
    }
}

/// Lifecycle of a match as reported by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchState {
    Waiting,
    Flipping,
    Canceled,
    Ended,
}

impl MatchState {
    pub fn from_discriminant(value: u128) -> Result<Self> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Flipping),
            2 => Ok(Self::Canceled),
            3 => Ok(Self::Ended),
            other => Err(ChainFlipError::decode(format!(
                "unknown match state discriminant {}",
                other
            ))),
        }
    }

    pub fn discriminant(&self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Flipping => 1,
            Self::Canceled => 2,
            Self::Ended => 3,
        }
    }

    /// Waiting for a second player or waiting on the oracle.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Flipping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Ended)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Flipping => 1,
            Self::Canceled | Self::Ended => 2,
        }
    }

    /// States only move forward; terminal states never change.
    pub fn can_transition_to(&self, next: MatchState) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "Waiting for Player",
            Self::Flipping => "Flipping Coin",
            Self::Canceled => "Canceled",
            Self::Ended => "Ended",
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn from_bool(heads: bool) -> Self {
        if heads {
            Self::Heads
        } else {
            Self::Tails
        }
    }

    pub fn as_bool(&self) -> bool {
        matches!(self, Self::Heads)
    }
}

impl FromStr for CoinSide {
    type Err = ChainFlipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "heads" | "h" | "true" => Ok(Self::Heads),
            "tails" | "t" | "false" => Ok(Self::Tails),
            other => Err(ChainFlipError::config(format!(
                "choice must be heads or tails, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heads => f.write_str("Heads"),
            Self::Tails => f.write_str("Tails"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub state: MatchState,
    pub player1: Address,
    pub player2: Address,
    pub bet_amount: Wei,
    pub winner: Address,
    pub result: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub player1_choice: CoinSide,
    pub player2_choice: CoinSide,
    pub vrf_request_id: RequestId,
}

impl Match {
    pub fn is_joined(&self) -> bool {
        !self.player2.is_zero()
    }

    pub fn has_winner(&self) -> bool {
        self.state == MatchState::Ended && !self.winner.is_zero()
    }

    pub fn involves(&self, account: &Address) -> bool {
        self.player1 == *account || (self.is_joined() && self.player2 == *account)
    }
}

/// Aggregates the contract keeps for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub total_matches: u64,
    pub total_wins: u64,
    pub total_losses: u64,
    pub total_canceled: u64,
    pub amount_won: Wei,
    pub amount_invested: Wei,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub address: Address,
    pub wins: u64,
}

/// Converts a unix timestamp into a datetime, treating zero as unset.
pub fn timestamp_from_secs(secs: u128) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip_and_zero() {
        let addr: Address = "0x00000000000000000000000000000000000000Ab".parse().unwrap();
        assert_eq!(addr.to_string(), "0x00000000000000000000000000000000000000ab");
        assert!(!addr.is_zero());
        assert!(Address::ZERO.is_zero());

        assert!("0x1234".parse::<Address>().is_err());
        assert!("00000000000000000000000000000000000000ab".parse::<Address>().is_err());
        assert!("0xzz000000000000000000000000000000000000ab".parse::<Address>().is_err());
    }

    #[test]
    fn test_parse_and_format_ether() {
        assert_eq!(Wei::parse_ether("1").unwrap(), Wei(WEI_PER_ETHER));
        assert_eq!(Wei::parse_ether("0.1").unwrap(), Wei(WEI_PER_ETHER / 10));
        assert_eq!(Wei::parse_ether(".5").unwrap(), Wei(WEI_PER_ETHER / 2));
        assert_eq!(Wei::parse_ether("0.001").unwrap().format_ether(), "0.001");
        assert_eq!(Wei(1_900_000_000_000_000_000).format_ether(), "1.9");
        assert_eq!(Wei(2 * WEI_PER_ETHER).format_ether(), "2");
        assert_eq!(Wei(1).format_ether(), "0.000000000000000001");

        assert!(Wei::parse_ether("").is_err());
        assert!(Wei::parse_ether("-1").is_err());
        assert!(Wei::parse_ether("1.0000000000000000001").is_err());
        assert!(Wei::parse_ether("abc").is_err());
        assert!(Wei::parse_ether(".").is_err());
    }

    #[test]
    fn test_match_state_transitions_are_monotonic() {
        use MatchState::*;
        assert!(Waiting.can_transition_to(Flipping));
        assert!(Waiting.can_transition_to(Canceled));
        assert!(Flipping.can_transition_to(Ended));
        assert!(Flipping.can_transition_to(Canceled));

        for terminal in [Canceled, Ended] {
            assert!(terminal.can_transition_to(terminal));
            for other in [Waiting, Flipping] {
                assert!(!terminal.can_transition_to(other));
            }
        }
        assert!(!Ended.can_transition_to(Canceled));
        assert!(!Flipping.can_transition_to(Waiting));

        assert!(MatchState::from_discriminant(4).is_err());
        assert_eq!(MatchState::from_discriminant(3).unwrap(), Ended);
    }

    #[test]
    fn test_request_id_holds_full_uint256() {
        // 2^128 + 5, above what u128 can carry
        let big = RequestId::from_decimal("340282366920938463463374607431768211461").unwrap();
        assert_eq!(big.as_word()[15], 1);
        assert_eq!(big.as_word()[31], 5);
        assert_eq!(big.to_string(), "0x100000000000000000000000000000005");
        assert_eq!(RequestId::from_hex(&big.to_string()).unwrap(), big);

        let max = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(RequestId::from_decimal(max).unwrap().as_word(), &[0xff; 32]);
        assert!(RequestId::from_decimal(&format!("{}0", max)).is_err());

        assert_eq!(RequestId::from(42u128).to_string(), "0x2a");
        assert_eq!(RequestId::ZERO.to_string(), "0x0");
        assert!(RequestId::from_hex(&"f".repeat(65)).is_err());
    }

    #[test]
    fn test_timestamp_zero_is_unset() {
        assert!(timestamp_from_secs(0).is_none());
        assert_eq!(
            timestamp_from_secs(1_700_000_000).unwrap().timestamp(),
            1_700_000_000
        );
    }
}
