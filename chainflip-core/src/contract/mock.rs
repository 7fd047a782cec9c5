//! In-memory contract for tests.

use super::{ChainFlipContract, ContractValue, RawLog, ReadCall, WriteCall};
use crate::error::{ChainFlipError, Result};
use crate::events::ContractEvent;
use crate::types::{Address, Match, MatchId, PlayerStats, TxHash, Wei};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct MockState {
    pub owner: Address,
    pub fee_percent: u64,
    pub minimum_bet: Wei,
    pub collected_fees: Wei,
    pub timeout: u64,
    pub matches: BTreeMap<MatchId, Match>,
    pub refunds: HashMap<Address, Wei>,
    pub stats: HashMap<Address, PlayerStats>,
    /// Read calls (by function name) that fail.
    pub failing_reads: HashSet<&'static str>,
    pub revert_writes: Option<String>,
    pub fail_logs: bool,
    pub submissions: Vec<(Address, WriteCall)>,
    pub reads: usize,
    pub logs: Vec<RawLog>,
    pub block_number: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            owner: Address::new([0xaa; 20]),
            fee_percent: 500,
            minimum_bet: Wei::from_wei(100_000_000_000_000_000),
            collected_fees: Wei::ZERO,
            timeout: 3600,
            matches: BTreeMap::new(),
            refunds: HashMap::new(),
            stats: HashMap::new(),
            failing_reads: HashSet::new(),
            revert_writes: None,
            fail_logs: false,
            submissions: Vec::new(),
            reads: 0,
            logs: Vec::new(),
            block_number: 100,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockContract {
    state: Mutex<MockState>,
}

impl MockContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn snapshot(&self) -> MockState {
        self.state.lock().clone()
    }

    pub fn insert_match(&self, m: Match) {
        self.state.lock().matches.insert(m.id, m);
    }

    pub fn fail_read(&self, name: &'static str) {
        self.state.lock().failing_reads.insert(name);
    }

    pub fn revert_writes(&self, reason: &str) {
        self.state.lock().revert_writes = Some(reason.to_string());
    }

    pub fn set_fail_logs(&self, fail: bool) {
        self.state.lock().fail_logs = fail;
    }

    pub fn current_block(&self) -> u64 {
        self.state.lock().block_number
    }

    /// Mine a block containing the event. Returns the block number.
    pub fn emit(&self, event: ContractEvent) -> u64 {
        let mut state = self.state.lock();
        state.block_number += 1;
        let block = state.block_number;
        state.logs.push(event.to_log(block, 0));
        block
    }

    pub fn submissions(&self) -> Vec<(Address, WriteCall)> {
        self.state.lock().submissions.clone()
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }
}

/// Positional shape, as the ABI decoder produces it.
pub fn match_value(m: &Match) -> ContractValue {
    let secs = |t: Option<chrono::DateTime<chrono::Utc>>| {
        ContractValue::Uint(t.map_or(0, |t| t.timestamp().max(0) as u128))
    };

    ContractValue::Tuple(vec![
        ContractValue::Uint(m.id as u128),
        secs(m.start_time),
        secs(m.end_time),
        ContractValue::Uint(m.bet_amount.as_wei()),
        ContractValue::from_word(m.vrf_request_id.as_word()),
        ContractValue::Address(m.player1),
        ContractValue::Address(m.player2),
        ContractValue::Address(m.winner),
        ContractValue::Bool(m.result),
        ContractValue::Bool(m.player1_choice.as_bool()),
        ContractValue::Bool(m.player2_choice.as_bool()),
        ContractValue::Uint(m.state.discriminant() as u128),
    ])
}

fn stats_value(s: &PlayerStats) -> ContractValue {
    ContractValue::Tuple(vec![
        ContractValue::Uint(s.total_matches as u128),
        ContractValue::Uint(s.total_wins as u128),
        ContractValue::Uint(s.total_losses as u128),
        ContractValue::Uint(s.total_canceled as u128),
        ContractValue::Uint(s.amount_won.as_wei()),
        ContractValue::Uint(s.amount_invested.as_wei()),
    ])
}

#[async_trait]
impl ChainFlipContract for MockContract {
    async fn read(&self, call: &ReadCall) -> Result<ContractValue> {
        let mut state = self.state.lock();
        state.reads += 1;

        if state.failing_reads.contains(call.name()) {
            return Err(ChainFlipError::rpc(format!("mock failure for {}", call)));
        }

        let value = match call {
            ReadCall::FeePercent => ContractValue::Uint(state.fee_percent as u128),
            ReadCall::MinimumBetAmount => ContractValue::Uint(state.minimum_bet.as_wei()),
            ReadCall::CollectedFees => ContractValue::Uint(state.collected_fees.as_wei()),
            ReadCall::CurrentMatchId => {
                ContractValue::Uint(state.matches.keys().max().copied().unwrap_or(0) as u128)
            }
            ReadCall::TimeOutForStuckMatches => ContractValue::Uint(state.timeout as u128),
            ReadCall::Owner => ContractValue::Address(state.owner),
            ReadCall::Match(id) => match state.matches.get(id) {
                Some(m) => match_value(m),
                None => {
                    return Err(ChainFlipError::reverted(
                        "match does not exist (CoinFlip__MatchDoesNotExist)",
                    ))
                }
            },
            ReadCall::MatchesByPlayer(player) => ContractValue::List(
                state
                    .matches
                    .values()
                    .filter(|m| m.involves(player))
                    .map(|m| ContractValue::Uint(m.id as u128))
                    .collect(),
            ),
            ReadCall::PlayerStats(player) => {
                stats_value(&state.stats.get(player).copied().unwrap_or_default())
            }
            ReadCall::Refunds(player) => {
                ContractValue::Uint(state.refunds.get(player).copied().unwrap_or(Wei::ZERO).as_wei())
            }
            ReadCall::MatchesPaginated { offset, limit } => ContractValue::List(
                state
                    .matches
                    .values()
                    .skip(*offset as usize)
                    .take(*limit as usize)
                    .map(match_value)
                    .collect(),
            ),
        };

        Ok(value)
    }

    async fn submit(&self, from: Address, call: &WriteCall) -> Result<TxHash> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.revert_writes {
            return Err(ChainFlipError::reverted(reason.clone()));
        }

        state.submissions.push((from, call.clone()));
        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&(state.submissions.len() as u64).to_be_bytes());
        Ok(TxHash::new(hash))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().block_number)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>> {
        let state = self.state.lock();
        if state.fail_logs {
            return Err(ChainFlipError::rpc("mock log failure"));
        }

        Ok(state
            .logs
            .iter()
            .filter(|l| (from_block..=to_block).contains(&l.block_number))
            .cloned()
            .collect())
    }
}
