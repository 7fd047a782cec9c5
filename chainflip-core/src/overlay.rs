//! Optimistic overlay for in-flight writes.
//!
//! An entry exists from the moment a write is about to be submitted until the
//! confirming event arrives or the submission fails. At most one entry exists
//! per [`ActionKey`]; the membership check and the insert happen under the
//! same lock so two rapid attempts cannot both get through.

use crate::error::{ChainFlipError, Result};
use crate::events::ContractEvent;
use crate::types::{Address, MatchId, TxHash};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    CreateMatch,
    JoinMatch,
    CancelMatch,
    WithdrawRefund,
    WithdrawFees,
    SetFeePercent,
    SetMinimumBet,
    SetTimeOut,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateMatch => "create match",
            Self::JoinMatch => "join match",
            Self::CancelMatch => "cancel match",
            Self::WithdrawRefund => "withdraw refund",
            Self::WithdrawFees => "withdraw fees",
            Self::SetFeePercent => "set fee percent",
            Self::SetMinimumBet => "set minimum bet",
            Self::SetTimeOut => "set timeout",
        }
    }
}

/// Identity of an in-flight intent: the action plus the match it targets,
/// if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub kind: ActionKind,
    pub target: Option<MatchId>,
}

impl ActionKey {
    pub fn global(kind: ActionKind) -> Self {
        Self { kind, target: None }
    }

    pub fn on_match(kind: ActionKind, match_id: MatchId) -> Self {
        Self {
            kind,
            target: Some(match_id),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(id) => write!(f, "{} #{}", self.kind.label(), id),
            None => f.write_str(self.kind.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingPhase {
    /// Handed to the node, no transaction hash yet.
    Submitted,
    /// Accepted by the network; waiting for the domain event.
    AwaitingConfirmation { tx: TxHash },
}

#[derive(Debug, Clone)]
pub struct PendingAction {
    pub key: ActionKey,
    /// Distinguishes this attempt from a later one on the same key.
    pub ticket: Uuid,
    pub phase: PendingPhase,
    pub submitted_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn age(&self) -> Duration {
        (Utc::now() - self.submitted_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default)]
pub struct Overlay {
    entries: Mutex<HashMap<ActionKey, PendingAction>>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an intent before submitting it. Fails with `AlreadyPending`
    /// when an entry for the same key is outstanding.
    pub fn begin(&self, key: ActionKey) -> Result<Uuid> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(ChainFlipError::AlreadyPending(key));
        }

        let ticket = Uuid::new_v4();
        entries.insert(
            key,
            PendingAction {
                key,
                ticket,
                phase: PendingPhase::Submitted,
                submitted_at: Utc::now(),
            },
        );
        tracing::debug!("Pending {} ({})", key, ticket);
        Ok(ticket)
    }

    /// Record the transaction hash once the node accepted the write.
    ///
    /// `NotPending` means the entry is gone, usually because the confirming
    /// event beat the submission response.
    pub fn mark_submitted(&self, key: ActionKey, ticket: Uuid, tx: TxHash) -> Result<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) if entry.ticket == ticket => {
                entry.phase = PendingPhase::AwaitingConfirmation { tx };
                Ok(())
            }
            _ => Err(ChainFlipError::NotPending(key)),
        }
    }

    /// Drop the entry for a failed submission. A stale ticket leaves a newer
    /// attempt untouched.
    pub fn fail(&self, key: ActionKey, ticket: Uuid) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(&key).is_some_and(|e| e.ticket == ticket) {
            entries.remove(&key);
            tracing::debug!("Cleared failed {}", key);
            true
        } else {
            false
        }
    }

    /// Resolve every entry the event confirms. Events nobody was waiting for
    /// resolve nothing.
    pub fn confirm(&self, event: &ContractEvent, account: Option<&Address>) -> Vec<ActionKey> {
        let keys = keys_for_event(event, account);
        let mut entries = self.entries.lock();
        keys.into_iter()
            .filter(|key| entries.remove(key).is_some())
            .inspect(|key| tracing::debug!("Confirmed {} by {}", key, event.name()))
            .collect()
    }

    /// Manual reset of a single entry regardless of ticket.
    pub fn clear(&self, key: &ActionKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn is_pending(&self, key: &ActionKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn pending(&self) -> Vec<PendingAction> {
        let mut pending: Vec<_> = self.entries.lock().values().cloned().collect();
        pending.sort_by_key(|p| p.submitted_at);
        pending
    }

    /// Entries older than `max_age`, left in place.
    pub fn stale(&self, max_age: Duration) -> Vec<PendingAction> {
        self.pending()
            .into_iter()
            .filter(|p| p.age() > max_age)
            .collect()
    }

    /// Remove entries older than `max_age`, returning their keys.
    pub fn prune(&self, max_age: Duration) -> Vec<ActionKey> {
        let mut entries = self.entries.lock();
        let expired: Vec<ActionKey> = entries
            .values()
            .filter(|p| p.age() > max_age)
            .map(|p| p.key)
            .collect();
        for key in &expired {
            entries.remove(key);
            tracing::warn!("Expired pending {} without confirmation", key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Overlay keys a contract event confirms.
pub fn keys_for_event(event: &ContractEvent, account: Option<&Address>) -> Vec<ActionKey> {
    let mine = |who: &Address| account.map_or(true, |a| a == who);

    match event {
        ContractEvent::MatchCreated { player1, .. } if mine(player1) => {
            vec![ActionKey::global(ActionKind::CreateMatch)]
        }
        ContractEvent::MatchCreated { .. } => Vec::new(),
        ContractEvent::MatchJoined { match_id, .. } | ContractEvent::MatchEnded { match_id, .. } => {
            vec![ActionKey::on_match(ActionKind::JoinMatch, *match_id)]
        }
        ContractEvent::MatchCanceledByPlayer { match_id, .. } => {
            vec![ActionKey::on_match(ActionKind::CancelMatch, *match_id)]
        }
        ContractEvent::MatchCanceledByUpkeep { match_id, .. } => vec![
            ActionKey::on_match(ActionKind::CancelMatch, *match_id),
            ActionKey::on_match(ActionKind::JoinMatch, *match_id),
        ],
        ContractEvent::RefundIssued { player, .. } if account == Some(player) => {
            vec![ActionKey::global(ActionKind::WithdrawRefund)]
        }
        ContractEvent::RefundIssued { .. } => Vec::new(),
        ContractEvent::FeesWithdrawn { .. } => vec![ActionKey::global(ActionKind::WithdrawFees)],
        ContractEvent::FeeUpdated { .. } => vec![ActionKey::global(ActionKind::SetFeePercent)],
        ContractEvent::MinimumBetAmountUpdated { .. } => {
            vec![ActionKey::global(ActionKind::SetMinimumBet)]
        }
        ContractEvent::TimeOutUpdated { .. } => vec![ActionKey::global(ActionKind::SetTimeOut)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoinSide, RequestId, Wei};
    use std::sync::Arc;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn joined(match_id: MatchId) -> ContractEvent {
        ContractEvent::MatchJoined {
            match_id,
            player2: addr(2),
            choice: CoinSide::Tails,
            bet_amount: Wei::from_wei(1),
        }
    }

    #[test]
    fn test_second_begin_on_same_key_is_rejected() {
        let overlay = Overlay::new();
        let key = ActionKey::on_match(ActionKind::JoinMatch, 7);

        overlay.begin(key).unwrap();
        let err = overlay.begin(key).unwrap_err();
        assert!(matches!(err, ChainFlipError::AlreadyPending(k) if k == key));

        // a different match is independent
        overlay
            .begin(ActionKey::on_match(ActionKind::JoinMatch, 8))
            .unwrap();
        assert_eq!(overlay.len(), 2);
    }

    #[test]
    fn test_join_event_resolves_pending_join() {
        let overlay = Overlay::new();
        let key = ActionKey::on_match(ActionKind::JoinMatch, 7);
        let ticket = overlay.begin(key).unwrap();
        overlay
            .mark_submitted(key, ticket, TxHash::new([9; 32]))
            .unwrap();

        assert_eq!(overlay.confirm(&joined(7), None), vec![key]);
        assert!(!overlay.is_pending(&key));
    }

    #[test]
    fn test_unrelated_event_resolves_nothing() {
        let overlay = Overlay::new();
        let key = ActionKey::on_match(ActionKind::JoinMatch, 7);
        overlay.begin(key).unwrap();

        assert!(overlay.confirm(&joined(99), None).is_empty());
        assert!(overlay.is_pending(&key));
    }

    #[test]
    fn test_failure_with_stale_ticket_keeps_newer_attempt() {
        let overlay = Overlay::new();
        let key = ActionKey::global(ActionKind::WithdrawRefund);

        let first = overlay.begin(key).unwrap();
        assert!(overlay.fail(key, first));
        let second = overlay.begin(key).unwrap();

        assert!(!overlay.fail(key, first));
        assert!(overlay.is_pending(&key));
        assert!(matches!(
            overlay.mark_submitted(key, first, TxHash::new([0; 32])),
            Err(ChainFlipError::NotPending(_))
        ));
        assert!(overlay.fail(key, second));
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_create_confirmation_respects_account() {
        let me = addr(1);
        let created_by_other = ContractEvent::MatchCreated {
            match_id: 3,
            start_time: None,
            player1: addr(5),
            choice: CoinSide::Heads,
            bet_amount: Wei::from_wei(10),
        };
        assert!(keys_for_event(&created_by_other, Some(&me)).is_empty());
        assert_eq!(
            keys_for_event(&created_by_other, None),
            vec![ActionKey::global(ActionKind::CreateMatch)]
        );
    }

    #[test]
    fn test_upkeep_cancel_resolves_join_and_cancel() {
        let keys = keys_for_event(
            &ContractEvent::MatchCanceledByUpkeep {
                match_id: 4,
                request_id: RequestId::from(77u128),
            },
            None,
        );
        assert!(keys.contains(&ActionKey::on_match(ActionKind::CancelMatch, 4)));
        assert!(keys.contains(&ActionKey::on_match(ActionKind::JoinMatch, 4)));
    }

    #[test]
    fn test_refund_only_confirms_for_the_session_account() {
        let event = ContractEvent::RefundIssued {
            player: addr(1),
            amount: Wei::from_wei(5),
        };
        assert!(keys_for_event(&event, None).is_empty());
        assert!(keys_for_event(&event, Some(&addr(2))).is_empty());
        assert_eq!(
            keys_for_event(&event, Some(&addr(1))),
            vec![ActionKey::global(ActionKind::WithdrawRefund)]
        );
    }

    #[test]
    fn test_stale_and_prune() {
        let overlay = Overlay::new();
        let key = ActionKey::global(ActionKind::SetFeePercent);
        overlay.begin(key).unwrap();

        assert!(overlay.stale(Duration::from_secs(3600)).is_empty());

        // backdate the entry
        overlay.entries.lock().get_mut(&key).unwrap().submitted_at =
            Utc::now() - chrono::Duration::seconds(120);

        assert_eq!(overlay.stale(Duration::from_secs(60)).len(), 1);
        assert!(overlay.is_pending(&key));
        assert_eq!(overlay.prune(Duration::from_secs(60)), vec![key]);
        assert!(!overlay.is_pending(&key));
    }

    #[test]
    fn test_concurrent_begin_admits_exactly_one() {
        let overlay = Arc::new(Overlay::new());
        let key = ActionKey::on_match(ActionKind::CancelMatch, 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let overlay = overlay.clone();
                std::thread::spawn(move || overlay.begin(key).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
