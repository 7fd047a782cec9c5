//! Minimal Solidity ABI codec for the ChainFlip surface.
//!
//! Only what the contract exposes is supported: uint/address/bool words,
//! dynamic arrays and (static or dynamic) tuples.

use super::value::ContractValue;
use crate::error::{ChainFlipError, Result};
use crate::types::Address;
use sha3::{Digest, Keccak256};

const WORD: usize = 32;

/// `Error(string)`
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Custom errors the contract can revert with.
const CUSTOM_ERRORS: [(&str, &str); 15] = [
    ("CoinFlip__CantJoinYourOwnGame()", "you cannot join your own match"),
    ("CoinFlip__FeeTooHigh()", "fee percent too high"),
    ("CoinFlip__FeeTooLow()", "fee percent too low"),
    ("CoinFlip__InvalidBetAmount()", "bet amount does not match"),
    ("CoinFlip__InvalidMatchId()", "invalid match id"),
    ("CoinFlip__InvalidMatchState()", "match is not in a valid state for this action"),
    ("CoinFlip__InvalidMinimumBetAmount()", "invalid minimum bet amount"),
    ("CoinFlip__MatchAlreadyEnded()", "match already ended"),
    ("CoinFlip__MatchDoesNotExist()", "match does not exist"),
    ("CoinFlip__NoFeesToWithdraw()", "no fees to withdraw"),
    ("CoinFlip__NoPrizeToClaim()", "no prize to claim"),
    ("CoinFlip__NoRefundToClaim()", "no refund to claim"),
    ("CoinFlip__NotTheMatchCreator()", "only the match creator can do this"),
    ("CoinFlip__NotValidTimeOut()", "invalid timeout"),
    ("CoinFlip__TransferFailed()", "transfer failed"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Uint,
    Address,
    Bool,
    Array(Box<ParamKind>),
    Tuple(Vec<ParamKind>),
}

impl ParamKind {
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Uint | Self::Address | Self::Bool => false,
            Self::Array(_) => true,
            Self::Tuple(components) => components.iter().any(ParamKind::is_dynamic),
        }
    }

    /// Bytes occupied in the head of the enclosing sequence.
    fn head_size(&self) -> usize {
        match self {
            Self::Tuple(components) if !self.is_dynamic() => {
                components.iter().map(ParamKind::head_size).sum()
            }
            _ => WORD,
        }
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

pub fn encode_uint(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn encode_address(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

pub fn encode_bool(value: bool) -> [u8; 32] {
    encode_uint(value as u128)
}

/// Calldata for a function taking only static scalar arguments.
pub fn encode_call(signature: &str, args: &[ContractValue]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));

    for arg in args {
        let word = match arg {
            ContractValue::Uint(v) => encode_uint(*v),
            ContractValue::Word(w) => *w,
            ContractValue::Address(a) => encode_address(a),
            ContractValue::Bool(b) => encode_bool(*b),
            other => {
                return Err(ChainFlipError::internal(format!(
                    "unsupported call argument for {}: {:?}",
                    signature, other
                )))
            }
        };
        data.extend_from_slice(&word);
    }

    Ok(data)
}

/// Decode return data (or log data) against a list of output kinds.
pub fn decode(kinds: &[ParamKind], data: &[u8]) -> Result<Vec<ContractValue>> {
    decode_sequence(kinds.iter(), data, 0)
}

fn decode_sequence<'k>(
    kinds: impl Iterator<Item = &'k ParamKind>,
    data: &[u8],
    base: usize,
) -> Result<Vec<ContractValue>> {
    let mut head = base;
    let mut out = Vec::new();

    for kind in kinds {
        if kind.is_dynamic() {
            let relative = read_offset(data, head)?;
            let start = base
                .checked_add(relative)
                .ok_or_else(|| ChainFlipError::decode("ABI offset overflow"))?;
            out.push(decode_at(kind, data, start)?);
            head += WORD;
        } else {
            out.push(decode_at(kind, data, head)?);
            head += kind.head_size();
        }
    }

    Ok(out)
}

fn decode_at(kind: &ParamKind, data: &[u8], at: usize) -> Result<ContractValue> {
    match kind {
        ParamKind::Uint => word(data, at).map(ContractValue::from_word),
        ParamKind::Address => decode_address_word(word(data, at)?).map(ContractValue::Address),
        ParamKind::Bool => decode_bool_word(word(data, at)?).map(ContractValue::Bool),
        ParamKind::Tuple(components) => {
            decode_sequence(components.iter(), data, at).map(ContractValue::Tuple)
        }
        ParamKind::Array(inner) => {
            let len = read_offset(data, at)?;
            let elements_start = at + WORD;
            let remaining = data.len().saturating_sub(elements_start);
            // every element takes at least one head word
            if len > remaining / WORD {
                return Err(ChainFlipError::decode(format!(
                    "array length {} exceeds available data",
                    len
                )));
            }
            decode_sequence(std::iter::repeat(inner.as_ref()).take(len), data, elements_start)
                .map(ContractValue::List)
        }
    }
}

fn word(data: &[u8], at: usize) -> Result<&[u8; 32]> {
    at.checked_add(WORD)
        .and_then(|end| data.get(at..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            ChainFlipError::decode(format!(
                "truncated ABI data: need word at {}, have {} bytes",
                at,
                data.len()
            ))
        })
}

fn read_offset(data: &[u8], at: usize) -> Result<usize> {
    let value = decode_uint_word(word(data, at)?)?;
    usize::try_from(value)
        .ok()
        .filter(|v| *v <= data.len())
        .ok_or_else(|| ChainFlipError::decode(format!("ABI offset {} out of range", value)))
}

pub fn decode_uint_word(word: &[u8; 32]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(ChainFlipError::decode(format!(
            "uint256 0x{} does not fit in 128 bits",
            hex::encode(word)
        )));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(bytes))
}

pub fn decode_address_word(word: &[u8; 32]) -> Result<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ChainFlipError::decode("dirty address padding"));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address::new(bytes))
}

pub fn decode_bool_word(word: &[u8; 32]) -> Result<bool> {
    if word[..31].iter().any(|b| *b != 0) || word[31] > 1 {
        return Err(ChainFlipError::decode("invalid bool word"));
    }
    Ok(word[31] == 1)
}

/// Turn revert data into a readable reason, if it is one we recognise.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let (sel, body) = (data.get(..4)?, data.get(4..)?);

    if sel == ERROR_STRING_SELECTOR {
        let offset = usize::try_from(decode_uint_word(word(body, 0).ok()?).ok()?).ok()?;
        let len = usize::try_from(decode_uint_word(word(body, offset).ok()?).ok()?).ok()?;
        let start = offset.checked_add(WORD)?;
        let bytes = body.get(start..start.checked_add(len)?)?;
        return String::from_utf8(bytes.to_vec()).ok();
    }

    CUSTOM_ERRORS
        .iter()
        .find(|(signature, _)| selector(signature) == sel)
        .map(|(signature, reason)| {
            let name = signature.trim_end_matches("()");
            format!("{} ({})", reason, name)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(ws: &[[u8; 32]]) -> Vec<u8> {
        ws.iter().flat_map(|w| w.iter().copied()).collect()
    }

    #[test]
    fn test_known_selectors() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(ERROR_STRING_SELECTOR), hex::encode(selector("Error(string)")));
    }

    #[test]
    fn test_encode_call_layout() {
        let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        let data = encode_call(
            "withdrawFees(address,uint256)",
            &[ContractValue::Address(addr), ContractValue::Uint(5)],
        )
        .unwrap();

        assert_eq!(data.len(), 4 + 64);
        assert_eq!(data[4 + 31], 0xff);
        assert_eq!(data[4 + 63], 5);

        assert!(encode_call("f(uint256[])", &[ContractValue::List(vec![])]).is_err());
    }

    #[test]
    fn test_decode_dynamic_array_of_uints() {
        let data = words(&[encode_uint(32), encode_uint(2), encode_uint(4), encode_uint(9)]);
        let out = decode(&[ParamKind::Array(Box::new(ParamKind::Uint))], &data).unwrap();
        assert_eq!(
            out,
            vec![ContractValue::List(vec![ContractValue::Uint(4), ContractValue::Uint(9)])]
        );
    }

    #[test]
    fn test_decode_array_of_static_tuples() {
        let tuple = ParamKind::Tuple(vec![ParamKind::Uint, ParamKind::Bool]);
        let data = words(&[
            encode_uint(32),
            encode_uint(2),
            encode_uint(1),
            encode_bool(true),
            encode_uint(2),
            encode_bool(false),
        ]);
        let out = decode(&[ParamKind::Array(Box::new(tuple))], &data).unwrap();
        assert_eq!(
            out[0],
            ContractValue::List(vec![
                ContractValue::Tuple(vec![ContractValue::Uint(1), ContractValue::Bool(true)]),
                ContractValue::Tuple(vec![ContractValue::Uint(2), ContractValue::Bool(false)]),
            ])
        );
    }

    #[test]
    fn test_decode_rejects_malformed_data() {
        // truncated
        assert!(decode(&[ParamKind::Uint, ParamKind::Uint], &encode_uint(1)).is_err());
        // offset past the end
        assert!(decode(&[ParamKind::Array(Box::new(ParamKind::Uint))], &encode_uint(4096)).is_err());
        // absurd array length
        let data = words(&[encode_uint(32), encode_uint(1 << 40)]);
        assert!(decode(&[ParamKind::Array(Box::new(ParamKind::Uint))], &data).is_err());
        // bool word that is not 0/1
        assert!(decode(&[ParamKind::Bool], &encode_uint(2)).is_err());
    }

    #[test]
    fn test_wide_uint_decodes_to_word() {
        let mut big = [0u8; 32];
        big[0] = 1;
        assert_eq!(decode(&[ParamKind::Uint], &big).unwrap(), vec![ContractValue::Word(big)]);
        assert_eq!(
            decode(&[ParamKind::Uint], &encode_uint(7)).unwrap(),
            vec![ContractValue::Uint(7)]
        );
    }

    #[test]
    fn test_paginated_page_with_flipping_match() {
        use crate::contract::match_kind;
        use crate::contract::value::decode_match_list;
        use crate::types::MatchState;

        let p1: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let p2: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
        let mut vrf = [0u8; 32];
        vrf[0] = 0x9f;
        vrf[31] = 0x05;

        // Match[] return: offset, length, then one static 12-word tuple
        let data = words(&[
            encode_uint(32),
            encode_uint(1),
            encode_uint(3),
            encode_uint(1_700_000_000),
            encode_uint(0),
            encode_uint(1_000_000_000_000_000_000),
            vrf,
            encode_address(&p1),
            encode_address(&p2),
            encode_address(&Address::ZERO),
            encode_bool(false),
            encode_bool(true),
            encode_bool(false),
            encode_uint(1),
        ]);

        let out = decode(&[ParamKind::Array(Box::new(match_kind()))], &data).unwrap();
        let matches = decode_match_list(&ContractValue::from_outputs(out)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, 3);
        assert_eq!(matches[0].state, MatchState::Flipping);
        assert_eq!(matches[0].player2, p2);
        assert_eq!(matches[0].vrf_request_id.as_word(), &vrf);
    }

    #[test]
    fn test_revert_reasons() {
        let custom = selector("CoinFlip__NotTheMatchCreator()");
        let reason = decode_revert_reason(&custom).unwrap();
        assert!(reason.contains("CoinFlip__NotTheMatchCreator"));

        let msg = b"nope";
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend_from_slice(&encode_uint(32));
        data.extend_from_slice(&encode_uint(msg.len() as u128));
        let mut padded = [0u8; 32];
        padded[..msg.len()].copy_from_slice(msg);
        data.extend_from_slice(&padded);
        assert_eq!(decode_revert_reason(&data).as_deref(), Some("nope"));

        assert!(decode_revert_reason(&[0xde, 0xad, 0xbe, 0xef]).is_none());
    }
}
