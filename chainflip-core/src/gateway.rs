//! Batched reads against the contract.
//!
//! Each call in a batch is tagged independently: a failure is recorded as a
//! [`ReadFailure`] next to the other results, so "unavailable" is never
//! confused with zero.

use crate::contract::value::{decode_match, decode_match_ids, decode_match_list, decode_player_stats};
use crate::contract::{ChainFlipContract, ContractValue, ReadCall};
use crate::error::Result;
use crate::stats;
use crate::types::{Address, LeaderboardEntry, Match, MatchId, PlayerStats, Wei};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;

/// Upper bound on concurrent per-match reads during a scan.
const MAX_CONCURRENT_READS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub call: String,
    pub reason: String,
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.call, self.reason)
    }
}

impl std::error::Error for ReadFailure {}

pub type Read<T> = std::result::Result<T, ReadFailure>;

/// Protocol-wide values.
#[derive(Debug, Clone)]
pub struct ProtocolSnapshot {
    pub fee_percent: Read<u64>,
    pub minimum_bet: Read<Wei>,
    pub collected_fees: Read<Wei>,
    pub current_match_id: Read<MatchId>,
    pub timeout: Read<u64>,
    pub owner: Read<Address>,
}

impl ProtocolSnapshot {
    pub fn is_owner(&self, account: &Address) -> bool {
        self.owner.as_ref().is_ok_and(|owner| owner == account)
    }

    /// Fees can only be withdrawn when a positive balance is known.
    pub fn can_withdraw_fees(&self) -> bool {
        matches!(self.collected_fees, Ok(fees) if fees > Wei::ZERO)
    }

    pub fn failures(&self) -> Vec<&ReadFailure> {
        [
            self.fee_percent.as_ref().err(),
            self.minimum_bet.as_ref().err(),
            self.collected_fees.as_ref().err(),
            self.current_match_id.as_ref().err(),
            self.timeout.as_ref().err(),
            self.owner.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Everything the contract knows about one account.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub account: Address,
    pub stats: Read<PlayerStats>,
    pub refund: Read<Wei>,
    pub match_ids: Read<Vec<MatchId>>,
    /// One entry per id in `match_ids`, in the same order.
    pub matches: Vec<Read<Match>>,
}

impl PlayerSnapshot {
    pub fn loaded_matches(&self) -> Vec<Match> {
        self.matches.iter().filter_map(|m| m.as_ref().ok()).cloned().collect()
    }

    pub fn failures(&self) -> Vec<&ReadFailure> {
        let mut failures: Vec<&ReadFailure> = [
            self.stats.as_ref().err(),
            self.refund.as_ref().err(),
            self.match_ids.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .collect();
        failures.extend(self.matches.iter().filter_map(|m| m.as_ref().err()));
        failures
    }
}

/// One page of the global match listing.
#[derive(Debug, Clone)]
pub struct ListingSnapshot {
    pub offset: u64,
    pub limit: u64,
    pub matches: Read<Vec<Match>>,
}

#[derive(Debug, Clone)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub scanned: usize,
    /// Matches that could not be read and are missing from the tally.
    pub failed: Vec<ReadFailure>,
    pub computed_at: DateTime<Utc>,
}

pub struct ReadGateway {
    contract: Arc<dyn ChainFlipContract>,
}

impl ReadGateway {
    pub fn new(contract: Arc<dyn ChainFlipContract>) -> Self {
        Self { contract }
    }

    async fn read<T>(
        &self,
        call: ReadCall,
        decode: impl FnOnce(&ContractValue) -> Result<T>,
    ) -> Read<T> {
        let outcome = match self.contract.read(&call).await {
            Ok(value) => decode(&value),
            Err(e) => Err(e),
        };

        outcome.map_err(|e| {
            tracing::warn!("Read {} failed: {}", call, e);
            ReadFailure {
                call: call.to_string(),
                reason: e.to_string(),
            }
        })
    }

    pub async fn fee_percent(&self) -> Read<u64> {
        self.read(ReadCall::FeePercent, |v| v.as_u64("feePercent")).await
    }

    pub async fn minimum_bet(&self) -> Read<Wei> {
        self.read(ReadCall::MinimumBetAmount, |v| v.as_wei("minimumBetAmount"))
            .await
    }

    pub async fn collected_fees(&self) -> Read<Wei> {
        self.read(ReadCall::CollectedFees, |v| v.as_wei("collectedFees"))
            .await
    }

    pub async fn current_match_id(&self) -> Read<MatchId> {
        self.read(ReadCall::CurrentMatchId, |v| v.as_u64("currentMatchId"))
            .await
    }

    pub async fn owner(&self) -> Read<Address> {
        self.read(ReadCall::Owner, |v| v.as_address("owner")).await
    }

    pub async fn match_by_id(&self, id: MatchId) -> Read<Match> {
        self.read(ReadCall::Match(id), decode_match).await
    }

    pub async fn player_stats(&self, account: Address) -> Read<PlayerStats> {
        self.read(ReadCall::PlayerStats(account), decode_player_stats)
            .await
    }

    pub async fn refund(&self, account: Address) -> Read<Wei> {
        self.read(ReadCall::Refunds(account), |v| v.as_wei("refunds"))
            .await
    }

    pub async fn protocol(&self) -> ProtocolSnapshot {
        let (fee_percent, minimum_bet, collected_fees, current_match_id, timeout, owner) = futures::join!(
            self.fee_percent(),
            self.minimum_bet(),
            self.collected_fees(),
            self.current_match_id(),
            self.read(ReadCall::TimeOutForStuckMatches, |v| v.as_u64("timeOut")),
            self.owner(),
        );

        ProtocolSnapshot {
            fee_percent,
            minimum_bet,
            collected_fees,
            current_match_id,
            timeout,
            owner,
        }
    }

    pub async fn player(&self, account: Address) -> PlayerSnapshot {
        let (stats, refund, match_ids) = futures::join!(
            self.player_stats(account),
            self.refund(account),
            self.read(ReadCall::MatchesByPlayer(account), decode_match_ids),
        );

        let matches = match &match_ids {
            Ok(ids) => self.matches(ids).await,
            Err(_) => Vec::new(),
        };

        PlayerSnapshot {
            account,
            stats,
            refund,
            match_ids,
            matches,
        }
    }

    /// Read several matches concurrently, preserving the order of `ids`.
    pub async fn matches(&self, ids: &[MatchId]) -> Vec<Read<Match>> {
        if ids.len() <= MAX_CONCURRENT_READS {
            return join_all(ids.iter().map(|id| self.match_by_id(*id))).await;
        }

        stream::iter(ids.iter().copied())
            .map(|id| self.match_by_id(id))
            .buffered(MAX_CONCURRENT_READS)
            .collect::<Vec<_>>()
            .await
    }

    pub async fn listing(&self, offset: u64, limit: u64) -> ListingSnapshot {
        let matches = self
            .read(ReadCall::MatchesPaginated { offset, limit }, decode_match_list)
            .await;

        ListingSnapshot {
            offset,
            limit,
            matches,
        }
    }

    /// Scan every match ever created and tally the winners.
    pub async fn leaderboard(&self) -> Read<Leaderboard> {
        let current = self.current_match_id().await?;
        let ids: Vec<MatchId> = (1..=current).collect();
        let results = self.matches(&ids).await;

        let mut loaded = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(m) => loaded.push(m),
                Err(f) => failed.push(f),
            }
        }

        if !failed.is_empty() {
            tracing::warn!("Leaderboard scan missed {} of {} matches", failed.len(), ids.len());
        }

        Ok(Leaderboard {
            entries: stats::tally_winners(&loaded),
            scanned: loaded.len(),
            failed,
            computed_at: Utc::now(),
        })
    }
}
