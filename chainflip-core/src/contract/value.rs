//! Canonical decoding of contract return values.
//!
//! The same logical struct can reach us positionally (ABI tuple order) or by
//! field name (JSON object from a gateway or fixture). Both normalize into the
//! domain types here; anything else is a hard decode error.

use crate::error::{ChainFlipError, Result};
use crate::types::{
    timestamp_from_secs, Address, CoinSide, Match, MatchId, MatchState, PlayerStats, RequestId,
    Wei,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractValue {
    Uint(u128),
    /// A uint256 too wide for `Uint`, as its big-endian word.
    Word([u8; 32]),
    Address(Address),
    Bool(bool),
    List(Vec<ContractValue>),
    /// Positional struct, fields in ABI order.
    Tuple(Vec<ContractValue>),
    /// Named struct, fields keyed by their ABI names.
    Record(Vec<(String, ContractValue)>),
}

impl ContractValue {
    /// Collapse a decoded output list: one output is returned as is, several
    /// become a positional tuple.
    pub fn from_outputs(mut outputs: Vec<ContractValue>) -> Self {
        if outputs.len() == 1 {
            outputs.remove(0)
        } else {
            ContractValue::Tuple(outputs)
        }
    }

    /// Narrowest representation of a uint256 word.
    pub fn from_word(word: &[u8; 32]) -> Self {
        if word[..16].iter().all(|b| *b == 0) {
            let mut low = [0u8; 16];
            low.copy_from_slice(&word[16..]);
            Self::Uint(u128::from_be_bytes(low))
        } else {
            Self::Word(*word)
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Uint(_) => "uint",
            Self::Word(_) => "uint256",
            Self::Address(_) => "address",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Record(_) => "record",
        }
    }

    pub fn as_uint(&self, what: &str) -> Result<u128> {
        match self {
            Self::Uint(v) => Ok(*v),
            Self::Word(w) => Err(ChainFlipError::decode(format!(
                "{}: uint256 0x{} does not fit in 128 bits",
                what,
                hex::encode(w)
            ))),
            other => Err(ChainFlipError::decode(format!(
                "{}: expected uint, got {}",
                what,
                other.kind()
            ))),
        }
    }

    pub fn as_u64(&self, what: &str) -> Result<u64> {
        let v = self.as_uint(what)?;
        u64::try_from(v)
            .map_err(|_| ChainFlipError::decode(format!("{}: {} does not fit in u64", what, v)))
    }

    pub fn as_wei(&self, what: &str) -> Result<Wei> {
        self.as_uint(what).map(Wei)
    }

    /// Any uint, at full 256-bit width.
    pub fn as_request_id(&self, what: &str) -> Result<RequestId> {
        match self {
            Self::Uint(v) => Ok(RequestId::from(*v)),
            Self::Word(w) => Ok(RequestId::from_word(*w)),
            other => Err(ChainFlipError::decode(format!(
                "{}: expected uint, got {}",
                what,
                other.kind()
            ))),
        }
    }

    pub fn as_address(&self, what: &str) -> Result<Address> {
        match self {
            Self::Address(a) => Ok(*a),
            other => Err(ChainFlipError::decode(format!(
                "{}: expected address, got {}",
                what,
                other.kind()
            ))),
        }
    }

    pub fn as_bool(&self, what: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(ChainFlipError::decode(format!(
                "{}: expected bool, got {}",
                what,
                other.kind()
            ))),
        }
    }

    pub fn as_list(&self, what: &str) -> Result<&[ContractValue]> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(ChainFlipError::decode(format!(
                "{}: expected list, got {}",
                what,
                other.kind()
            ))),
        }
    }

    /// Build from loosely-typed JSON. Arrays are read as positional tuples and
    /// objects as named records; `as_list` accepts either array form.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => n
                .as_u64()
                .map(|v| Self::Uint(v as u128))
                .ok_or_else(|| ChainFlipError::decode(format!("not an unsigned integer: {}", n))),
            Value::String(s) => parse_scalar_string(s),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Self::Tuple),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Self::from_json(v)?)))
                .collect::<Result<Vec<_>>>()
                .map(Self::Record),
            Value::Null => Err(ChainFlipError::decode("null is not a contract value")),
        }
    }

    /// A JSON array of structs arrives as a tuple of records or tuples.
    fn into_list(self) -> Self {
        match self {
            Self::Tuple(items) => Self::List(items),
            other => other,
        }
    }
}

fn parse_scalar_string(s: &str) -> Result<ContractValue> {
    let trimmed = s.trim();
    // bigints are often serialized with a trailing `n`
    let trimmed = trimmed.strip_suffix('n').unwrap_or(trimmed);

    if let Some(digits) = trimmed.strip_prefix("0x") {
        if digits.len() == 40 {
            return trimmed.parse().map(ContractValue::Address);
        }
        return RequestId::from_hex(digits)
            .map(|id| ContractValue::from_word(id.as_word()))
            .map_err(|e| ChainFlipError::decode(format!("invalid hex integer {}: {}", s, e)));
    }

    RequestId::from_decimal(trimmed)
        .map(|id| ContractValue::from_word(id.as_word()))
        .map_err(|e| ChainFlipError::decode(format!("invalid integer {}: {}", s, e)))
}

/// Field access over either struct shape.
enum StructView<'a> {
    Positional(&'a [ContractValue]),
    Named {
        name: &'static str,
        entries: &'a [(String, ContractValue)],
    },
}

impl<'a> StructView<'a> {
    fn of(value: &'a ContractValue, name: &'static str, fields: &[&str]) -> Result<Self> {
        match value {
            ContractValue::Tuple(items) => {
                if items.len() != fields.len() {
                    return Err(ChainFlipError::decode(format!(
                        "{}: expected {} positional fields, got {}",
                        name,
                        fields.len(),
                        items.len()
                    )));
                }
                Ok(Self::Positional(items))
            }
            ContractValue::Record(entries) => Ok(Self::Named { name, entries }),
            other => Err(ChainFlipError::decode(format!(
                "{}: unrecognized shape {}",
                name,
                other.kind()
            ))),
        }
    }

    fn field(&self, index: usize, field: &str) -> Result<&'a ContractValue> {
        match self {
            Self::Positional(items) => Ok(&items[index]),
            Self::Named { name, entries } => entries
                .iter()
                .find(|(k, _)| k == field)
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    ChainFlipError::decode(format!("{}: missing field {}", name, field))
                }),
        }
    }
}

pub const MATCH_FIELDS: [&str; 12] = [
    "id",
    "startTime",
    "endTime",
    "betAmount",
    "vrfRequestId",
    "player1",
    "player2",
    "winner",
    "result",
    "player1Choice",
    "player2Choice",
    "state",
];

pub const PLAYER_STATS_FIELDS: [&str; 6] = [
    "totalMatches",
    "totalWins",
    "totalLosses",
    "totalCanceled",
    "totalAmountWonByPlayer",
    "totalAmountInvestedByPlayer",
];

pub fn decode_match(value: &ContractValue) -> Result<Match> {
    let view = StructView::of(value, "Match", &MATCH_FIELDS)?;
    let f = |i: usize| view.field(i, MATCH_FIELDS[i]);

    Ok(Match {
        id: f(0)?.as_u64("Match.id")?,
        start_time: timestamp_from_secs(f(1)?.as_uint("Match.startTime")?),
        end_time: timestamp_from_secs(f(2)?.as_uint("Match.endTime")?),
        bet_amount: f(3)?.as_wei("Match.betAmount")?,
        vrf_request_id: f(4)?.as_request_id("Match.vrfRequestId")?,
        player1: f(5)?.as_address("Match.player1")?,
        player2: f(6)?.as_address("Match.player2")?,
        winner: f(7)?.as_address("Match.winner")?,
        result: f(8)?.as_bool("Match.result")?,
        player1_choice: CoinSide::from_bool(f(9)?.as_bool("Match.player1Choice")?),
        player2_choice: CoinSide::from_bool(f(10)?.as_bool("Match.player2Choice")?),
        state: MatchState::from_discriminant(f(11)?.as_uint("Match.state")?)?,
    })
}

pub fn decode_match_list(value: &ContractValue) -> Result<Vec<Match>> {
    value
        .clone()
        .into_list()
        .as_list("Match[]")?
        .iter()
        .map(decode_match)
        .collect()
}

pub fn decode_match_ids(value: &ContractValue) -> Result<Vec<MatchId>> {
    value
        .clone()
        .into_list()
        .as_list("uint256[]")?
        .iter()
        .map(|v| v.as_u64("match id"))
        .collect()
}

pub fn decode_player_stats(value: &ContractValue) -> Result<PlayerStats> {
    let view = StructView::of(value, "PlayerStats", &PLAYER_STATS_FIELDS)?;
    let f = |i: usize| view.field(i, PLAYER_STATS_FIELDS[i]);

    Ok(PlayerStats {
        total_matches: f(0)?.as_u64("PlayerStats.totalMatches")?,
        total_wins: f(1)?.as_u64("PlayerStats.totalWins")?,
        total_losses: f(2)?.as_u64("PlayerStats.totalLosses")?,
        total_canceled: f(3)?.as_u64("PlayerStats.totalCanceled")?,
        amount_won: f(4)?.as_wei("PlayerStats.totalAmountWonByPlayer")?,
        amount_invested: f(5)?.as_wei("PlayerStats.totalAmountInvestedByPlayer")?,
    })
}
