pub mod abi;
#[cfg(any(test, feature = "testutils"))]
pub mod mock;
pub mod rpc;
pub mod value;

pub use abi::ParamKind;
pub use rpc::RpcContract;
pub use value::ContractValue;

use crate::error::Result;
use crate::overlay::{ActionKey, ActionKind};
use crate::types::{Address, CoinSide, MatchId, TxHash, Wei};
use async_trait::async_trait;
use std::fmt;

/// Read-only functions of the contract the client consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadCall {
    FeePercent,
    MinimumBetAmount,
    CollectedFees,
    CurrentMatchId,
    TimeOutForStuckMatches,
    Owner,
    Match(MatchId),
    MatchesByPlayer(Address),
    PlayerStats(Address),
    Refunds(Address),
    MatchesPaginated { offset: u64, limit: u64 },
}

impl ReadCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FeePercent => "getFeePercent",
            Self::MinimumBetAmount => "getMinimumBetAmount",
            Self::CollectedFees => "getCollectedFees",
            Self::CurrentMatchId => "getCurrentMatchId",
            Self::TimeOutForStuckMatches => "getTimeOutForStuckMatches",
            Self::Owner => "owner",
            Self::Match(_) => "getMatch",
            Self::MatchesByPlayer(_) => "getMatchesByPlayer",
            Self::PlayerStats(_) => "getPlayerStats",
            Self::Refunds(_) => "getRefunds",
            Self::MatchesPaginated { .. } => "getMatchesPaginated",
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            Self::FeePercent => "getFeePercent()",
            Self::MinimumBetAmount => "getMinimumBetAmount()",
            Self::CollectedFees => "getCollectedFees()",
            Self::CurrentMatchId => "getCurrentMatchId()",
            Self::TimeOutForStuckMatches => "getTimeOutForStuckMatches()",
            Self::Owner => "owner()",
            Self::Match(_) => "getMatch(uint256)",
            Self::MatchesByPlayer(_) => "getMatchesByPlayer(address)",
            Self::PlayerStats(_) => "getPlayerStats(address)",
            Self::Refunds(_) => "getRefunds(address)",
            Self::MatchesPaginated { .. } => "getMatchesPaginated(uint256,uint256)",
        }
    }

    pub fn args(&self) -> Vec<ContractValue> {
        match self {
            Self::Match(id) => vec![ContractValue::Uint(*id as u128)],
            Self::MatchesByPlayer(a) | Self::PlayerStats(a) | Self::Refunds(a) => {
                vec![ContractValue::Address(*a)]
            }
            Self::MatchesPaginated { offset, limit } => vec![
                ContractValue::Uint(*offset as u128),
                ContractValue::Uint(*limit as u128),
            ],
            _ => Vec::new(),
        }
    }

    pub fn outputs(&self) -> Vec<ParamKind> {
        match self {
            Self::Owner => vec![ParamKind::Address],
            Self::Match(_) => vec![match_kind()],
            Self::MatchesByPlayer(_) => vec![ParamKind::Array(Box::new(ParamKind::Uint))],
            Self::PlayerStats(_) => vec![ParamKind::Uint; 6],
            Self::MatchesPaginated { .. } => vec![ParamKind::Array(Box::new(match_kind()))],
            _ => vec![ParamKind::Uint],
        }
    }
}

impl fmt::Display for ReadCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(id) => write!(f, "{}({})", self.name(), id),
            Self::MatchesByPlayer(a) | Self::PlayerStats(a) | Self::Refunds(a) => {
                write!(f, "{}({})", self.name(), a)
            }
            Self::MatchesPaginated { offset, limit } => {
                write!(f, "{}({}, {})", self.name(), offset, limit)
            }
            _ => write!(f, "{}()", self.name()),
        }
    }
}

/// ABI layout of the contract's `Match` struct.
pub fn match_kind() -> ParamKind {
    ParamKind::Tuple(vec![
        ParamKind::Uint,    // id
        ParamKind::Uint,    // startTime
        ParamKind::Uint,    // endTime
        ParamKind::Uint,    // betAmount
        ParamKind::Uint,    // vrfRequestId
        ParamKind::Address, // player1
        ParamKind::Address, // player2
        ParamKind::Address, // winner
        ParamKind::Bool,    // result
        ParamKind::Bool,    // player1Choice
        ParamKind::Bool,    // player2Choice
        ParamKind::Uint,    // state (uint8)
    ])
}

/// State-changing functions the client can submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    CreateMatch { choice: CoinSide, wager: Wei },
    JoinMatch { match_id: MatchId, wager: Wei },
    CancelMatch { match_id: MatchId },
    WithdrawRefund,
    WithdrawFees { recipient: Address, amount: Wei },
    SetFeePercent { basis_points: u64 },
    SetMinimumBetAmount { amount: Wei },
    SetTimeOut { seconds: u64 },
}

impl WriteCall {
    pub fn signature(&self) -> &'static str {
        match self {
            Self::CreateMatch { .. } => "createMatch(bool)",
            Self::JoinMatch { .. } => "joinMatch(uint256)",
            Self::CancelMatch { .. } => "cancelMatch(uint256)",
            Self::WithdrawRefund => "withdrawRefund()",
            Self::WithdrawFees { .. } => "withdrawFees(address,uint256)",
            Self::SetFeePercent { .. } => "setFeePercent(uint256)",
            Self::SetMinimumBetAmount { .. } => "setMinimumBetAmount(uint256)",
            Self::SetTimeOut { .. } => "setTimeOutForStuckMatches(uint256)",
        }
    }

    pub fn args(&self) -> Vec<ContractValue> {
        match self {
            Self::CreateMatch { choice, .. } => vec![ContractValue::Bool(choice.as_bool())],
            Self::JoinMatch { match_id, .. } | Self::CancelMatch { match_id } => {
                vec![ContractValue::Uint(*match_id as u128)]
            }
            Self::WithdrawRefund => Vec::new(),
            Self::WithdrawFees { recipient, amount } => vec![
                ContractValue::Address(*recipient),
                ContractValue::Uint(amount.as_wei()),
            ],
            Self::SetFeePercent { basis_points } => vec![ContractValue::Uint(*basis_points as u128)],
            Self::SetMinimumBetAmount { amount } => vec![ContractValue::Uint(amount.as_wei())],
            Self::SetTimeOut { seconds } => vec![ContractValue::Uint(*seconds as u128)],
        }
    }

    /// Value attached to the transaction.
    pub fn value(&self) -> Wei {
        match self {
            Self::CreateMatch { wager, .. } | Self::JoinMatch { wager, .. } => *wager,
            _ => Wei::ZERO,
        }
    }

    pub fn action_key(&self) -> ActionKey {
        match self {
            Self::CreateMatch { .. } => ActionKey::global(ActionKind::CreateMatch),
            Self::JoinMatch { match_id, .. } => ActionKey::on_match(ActionKind::JoinMatch, *match_id),
            Self::CancelMatch { match_id } => ActionKey::on_match(ActionKind::CancelMatch, *match_id),
            Self::WithdrawRefund => ActionKey::global(ActionKind::WithdrawRefund),
            Self::WithdrawFees { .. } => ActionKey::global(ActionKind::WithdrawFees),
            Self::SetFeePercent { .. } => ActionKey::global(ActionKind::SetFeePercent),
            Self::SetMinimumBetAmount { .. } => ActionKey::global(ActionKind::SetMinimumBet),
            Self::SetTimeOut { .. } => ActionKey::global(ActionKind::SetTimeOut),
        }
    }

    pub fn calldata(&self) -> Result<Vec<u8>> {
        abi::encode_call(self.signature(), &self.args())
    }
}

/// Undecoded log entry emitted by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<TxHash>,
}

/// Everything the client needs from the chain.
#[async_trait]
pub trait ChainFlipContract: Send + Sync {
    /// Execute a read-only call and decode its outputs.
    async fn read(&self, call: &ReadCall) -> Result<ContractValue>;

    /// Submit a state-changing transaction from `from`.
    async fn submit(&self, from: Address, call: &WriteCall) -> Result<TxHash>;

    async fn block_number(&self) -> Result<u64>;

    /// Contract logs in the inclusive block range.
    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>>;
}
