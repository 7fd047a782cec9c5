//! Session context and the reconciling client.

use crate::config::{Chain, ClientConfig};
use crate::contract::{ChainFlipContract, RpcContract, WriteCall};
use crate::error::{ChainFlipError, Result};
use crate::events::{ContractEvent, EventSubscriber, LoggedEvent};
use crate::gateway::{ListingSnapshot, PlayerSnapshot, ProtocolSnapshot, Read, ReadGateway};
use crate::overlay::{ActionKey, Overlay, PendingAction};
use crate::stats::{self, Classified};
use crate::types::{Address, Match, MatchId, MatchState, TxHash, Wei};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Pending entries older than this are reported on refresh when no expiry
/// is configured.
const STALE_AFTER: Duration = Duration::from_secs(300);

/// Settled matches kept for stale-read protection; the oldest ids go first.
const MAX_SETTLED_TRACKED: usize = 512;

/// Who is acting and on which chain. Passed explicitly to every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub chain: Chain,
    pub account: Option<Address>,
}

impl Session {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            account: None,
        }
    }

    pub fn with_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    pub fn account(&self) -> Result<Address> {
        self.account.ok_or(ChainFlipError::NoAccount)
    }
}

/// One consistent refresh of everything the views render.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Monotonic per client; a higher sequence supersedes a lower one.
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub chain: Chain,
    pub protocol: ProtocolSnapshot,
    pub player: Option<PlayerSnapshot>,
    pub listing: ListingSnapshot,
    pub pending: Vec<PendingAction>,
}

impl Snapshot {
    /// Listing split into active and ended, when the listing was readable.
    pub fn listing_classified(&self) -> Read<Classified> {
        self.listing
            .matches
            .as_ref()
            .map(|matches| stats::classify(matches))
            .map_err(Clone::clone)
    }

    /// The session account's own matches, split the same way.
    pub fn my_matches(&self) -> Option<Classified> {
        self.player
            .as_ref()
            .map(|p| stats::classify(&p.loaded_matches()))
    }

    /// Prize after fees for a match, unavailable if the fee read failed.
    pub fn prize_pool(&self, m: &Match) -> Read<Wei> {
        self.protocol
            .fee_percent
            .clone()
            .map(|fee| stats::adjusted_prize_pool(m.bet_amount, fee))
    }

    pub fn is_pending(&self, key: &ActionKey) -> bool {
        self.pending.iter().any(|p| p.key == *key)
    }
}

/// Result of a write the node accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub key: ActionKey,
    pub ticket: Uuid,
    pub tx: TxHash,
}

pub struct ChainFlipClient {
    contract: Arc<dyn ChainFlipContract>,
    gateway: ReadGateway,
    overlay: Overlay,
    config: ClientConfig,
    sequence: AtomicU64,
    latest: Mutex<Option<Arc<Snapshot>>>,
    /// Most advanced record seen per match.
    seen: Mutex<HashMap<MatchId, Match>>,
}

impl ChainFlipClient {
    pub fn new(contract: Arc<dyn ChainFlipContract>, config: ClientConfig) -> Self {
        Self {
            gateway: ReadGateway::new(contract.clone()),
            contract,
            overlay: Overlay::new(),
            config,
            sequence: AtomicU64::new(0),
            latest: Mutex::new(None),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Client backed by the JSON-RPC node named in the config.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let contract = RpcContract::from_config(&config)?;
        tracing::info!(
            "Connected to {} contract {} via {}",
            config.chain,
            contract.address(),
            config.rpc_url
        );
        Ok(Self::new(Arc::new(contract), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &ReadGateway {
        &self.gateway
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.lock().clone()
    }

    pub fn subscriber(&self) -> EventSubscriber {
        EventSubscriber::new(self.contract.clone(), self.config.poll_interval)
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.contract.block_number().await
    }

    /// Submit a write with optimistic tracking.
    ///
    /// A second attempt on the same intent while the first is outstanding is
    /// rejected before anything touches the network.
    pub async fn perform(&self, session: &Session, call: WriteCall) -> Result<Submitted> {
        let account = session.account()?;
        let key = call.action_key();
        let ticket = self.overlay.begin(key)?;

        let outcome = match self.preflight(session, account, &call).await {
            Ok(()) => self.contract.submit(account, &call).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(tx) => {
                if self.overlay.mark_submitted(key, ticket, tx).is_err() {
                    tracing::debug!("{} confirmed before submission returned", key);
                }
                tracing::info!("Submitted {}: {}", key, tx);
                Ok(Submitted { key, ticket, tx })
            }
            Err(e) => {
                self.overlay.fail(key, ticket);
                if e.is_rejection() {
                    tracing::warn!("{} rejected: {}", key, e);
                } else {
                    tracing::warn!("{} failed: {}", key, e);
                }
                Err(e)
            }
        }
    }

    async fn preflight(&self, session: &Session, account: Address, call: &WriteCall) -> Result<()> {
        match call {
            WriteCall::CreateMatch { wager, .. } => {
                let minimum = match self.gateway.minimum_bet().await {
                    Ok(min) => min,
                    Err(failure) => {
                        tracing::warn!("{}; using {} preset", failure, session.chain);
                        session.chain.default_min_bet()
                    }
                };
                if *wager < minimum {
                    return Err(ChainFlipError::BetTooLow {
                        minimum: minimum.as_wei(),
                        offered: wager.as_wei(),
                    });
                }
            }
            WriteCall::JoinMatch { match_id, wager } => {
                let target = self
                    .gateway
                    .match_by_id(*match_id)
                    .await
                    .map_err(|_| ChainFlipError::MatchNotFound(*match_id))?;

                if target.player1 == account {
                    return Err(ChainFlipError::InvalidMatchState(
                        "cannot join your own match".to_string(),
                    ));
                }
                if target.state != MatchState::Waiting || target.is_joined() {
                    return Err(ChainFlipError::InvalidMatchState(format!(
                        "match #{} is {}",
                        match_id, target.state
                    )));
                }
                if *wager != target.bet_amount {
                    return Err(ChainFlipError::InvalidAmount(format!(
                        "join requires exactly {}, got {}",
                        target.bet_amount, wager
                    )));
                }
            }
            WriteCall::WithdrawFees { amount, .. } => {
                let fees = self.gateway.collected_fees().await.map_err(|f| {
                    ChainFlipError::InvalidAmount(format!("collected fees unavailable: {}", f))
                })?;
                if fees == Wei::ZERO {
                    return Err(ChainFlipError::InvalidAmount(
                        "no fees to withdraw".to_string(),
                    ));
                }
                if *amount == Wei::ZERO || *amount > fees {
                    return Err(ChainFlipError::InvalidAmount(format!(
                        "withdraw amount must be between 0 and {}",
                        fees
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Confirm whatever the event resolves, then refresh.
    pub async fn handle_event(&self, session: &Session, event: &ContractEvent) -> Arc<Snapshot> {
        self.confirm(session, event);
        self.refresh(session).await
    }

    fn confirm(&self, session: &Session, event: &ContractEvent) -> Vec<ActionKey> {
        let resolved = self.overlay.confirm(event, session.account.as_ref());
        if resolved.is_empty() {
            tracing::debug!("Event {}", event);
        } else {
            tracing::info!("Event {} confirmed {} pending action(s)", event, resolved.len());
        }
        resolved
    }

    /// Read everything and store it, unless a newer refresh already landed.
    /// Returns whichever snapshot is current afterwards.
    pub async fn refresh(&self, session: &Session) -> Arc<Snapshot> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.expire_pending();

        let player = async {
            match session.account {
                Some(account) => Some(self.gateway.player(account).await),
                None => None,
            }
        };
        let (protocol, mut player, mut listing) = futures::join!(
            self.gateway.protocol(),
            player,
            self.gateway.listing(0, self.config.page_size),
        );

        if let Ok(matches) = listing.matches.as_mut() {
            self.reconcile(matches);
        }
        if let Some(player) = player.as_mut() {
            for m in player.matches.iter_mut().flatten() {
                self.reconcile(std::slice::from_mut(m));
            }
        }

        let snapshot = Snapshot {
            sequence,
            taken_at: Utc::now(),
            chain: session.chain,
            protocol,
            player,
            listing,
            pending: self.overlay.pending(),
        };

        self.store(snapshot)
    }

    fn store(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let mut latest = self.latest.lock();
        match latest.as_ref() {
            Some(current) if current.sequence >= snapshot.sequence => {
                tracing::debug!(
                    "Discarding refresh #{} superseded by #{}",
                    snapshot.sequence,
                    current.sequence
                );
                current.clone()
            }
            _ => {
                let snapshot = Arc::new(snapshot);
                *latest = Some(snapshot.clone());
                snapshot
            }
        }
    }

    /// Keep match states monotonic across reads: a record that would move a
    /// match backwards is replaced by the more advanced one already seen.
    fn reconcile(&self, matches: &mut [Match]) {
        let mut seen = self.seen.lock();
        for m in matches.iter_mut() {
            match seen.get(&m.id) {
                Some(known) if !known.state.can_transition_to(m.state) => {
                    tracing::warn!(
                        "Ignoring stale read of match #{}: {} after {}",
                        m.id,
                        m.state,
                        known.state
                    );
                    *m = known.clone();
                }
                _ => {
                    seen.insert(m.id, m.clone());
                }
            }
        }

        let mut settled: Vec<MatchId> = seen
            .values()
            .filter(|m| m.state.is_terminal())
            .map(|m| m.id)
            .collect();
        if settled.len() > MAX_SETTLED_TRACKED {
            settled.sort_unstable();
            let excess = settled.len() - MAX_SETTLED_TRACKED;
            for id in &settled[..excess] {
                seen.remove(id);
            }
            tracing::debug!("Stopped tracking {} settled matches", excess);
        }
    }

    fn expire_pending(&self) {
        match self.config.overlay_expiry {
            Some(max_age) => {
                self.overlay.prune(max_age);
            }
            None => {
                for stale in self.overlay.stale(STALE_AFTER) {
                    tracing::warn!(
                        "{} still unconfirmed after {}s",
                        stale.key,
                        stale.age().as_secs()
                    );
                }
            }
        }
    }

    /// Consume events until the subscription closes, refreshing once per
    /// burst of queued events.
    pub async fn run<F>(&self, session: &Session, subscriber: EventSubscriber, mut on_update: F)
    where
        F: FnMut(&[LoggedEvent], &Snapshot),
    {
        let mut subscription = subscriber.spawn();
        let initial = self.refresh(session).await;
        on_update(&[], &initial);

        while let Some(first) = subscription.recv().await {
            let mut burst = vec![first];
            while let Some(next) = subscription.try_recv() {
                burst.push(next);
            }

            for logged in &burst {
                self.confirm(session, &logged.event);
            }
            let snapshot = self.refresh(session).await;
            on_update(&burst, &snapshot);
        }

        tracing::info!("Event stream closed");
        subscription.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::mock::MockContract;
    use crate::overlay::ActionKind;
    use crate::types::{CoinSide, RequestId};

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn waiting(id: MatchId, creator: Address, bet: &str) -> Match {
        Match {
            id,
            state: MatchState::Waiting,
            player1: creator,
            player2: Address::ZERO,
            bet_amount: Wei::parse_ether(bet).unwrap(),
            winner: Address::ZERO,
            result: false,
            start_time: None,
            end_time: None,
            player1_choice: CoinSide::Heads,
            player2_choice: CoinSide::Tails,
            vrf_request_id: RequestId::ZERO,
        }
    }

    fn setup() -> (Arc<MockContract>, ChainFlipClient, Session) {
        let mock = Arc::new(MockContract::new());
        let client = ChainFlipClient::new(mock.clone(), ClientConfig::new(Chain::Anvil));
        let session = Session::new(Chain::Anvil).with_account(addr(1));
        (mock, client, session)
    }

    fn join(match_id: MatchId, bet: &str) -> WriteCall {
        WriteCall::JoinMatch {
            match_id,
            wager: Wei::parse_ether(bet).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected_without_network_call() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(7, addr(2), "1"));

        client.perform(&session, join(7, "1")).await.unwrap();
        let reads = mock.read_count();

        let err = client.perform(&session, join(7, "1")).await.unwrap_err();
        assert!(matches!(err, ChainFlipError::AlreadyPending(_)));
        assert_eq!(mock.read_count(), reads);
        assert_eq!(mock.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_join_event_clears_pending_and_refreshes() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(7, addr(2), "1"));
        let key = ActionKey::on_match(ActionKind::JoinMatch, 7);

        client.perform(&session, join(7, "1")).await.unwrap();
        assert!(client.overlay().is_pending(&key));

        let snapshot = client
            .handle_event(
                &session,
                &ContractEvent::MatchJoined {
                    match_id: 7,
                    player2: addr(1),
                    choice: CoinSide::Tails,
                    bet_amount: Wei::parse_ether("1").unwrap(),
                },
            )
            .await;
        assert!(!client.overlay().is_pending(&key));
        assert!(!snapshot.is_pending(&key));

        // an event for a match nobody is waiting on is still fine
        let again = client
            .handle_event(
                &session,
                &ContractEvent::MatchJoined {
                    match_id: 99,
                    player2: addr(3),
                    choice: CoinSide::Tails,
                    bet_amount: Wei::ZERO,
                },
            )
            .await;
        assert!(again.sequence > snapshot.sequence);
    }

    #[tokio::test]
    async fn test_revert_clears_pending_immediately() {
        let (mock, client, session) = setup();
        mock.revert_writes("no refund to claim (CoinFlip__NoRefundToClaim)");

        let err = client
            .perform(&session, WriteCall::WithdrawRefund)
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(client.overlay().is_empty());
    }

    #[tokio::test]
    async fn test_create_below_minimum_is_rejected() {
        let (mock, client, session) = setup();
        let err = client
            .perform(
                &session,
                WriteCall::CreateMatch {
                    choice: CoinSide::Tails,
                    wager: Wei::parse_ether("0.01").unwrap(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChainFlipError::BetTooLow { .. }));
        assert!(mock.submissions().is_empty());
        assert!(client.overlay().is_empty());
    }

    #[tokio::test]
    async fn test_join_preflight() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(1, addr(1), "1"));
        mock.insert_match(waiting(2, addr(2), "1"));

        let own = client.perform(&session, join(1, "1")).await.unwrap_err();
        assert!(matches!(own, ChainFlipError::InvalidMatchState(_)));

        let wrong_value = client.perform(&session, join(2, "0.5")).await.unwrap_err();
        assert!(matches!(wrong_value, ChainFlipError::InvalidAmount(_)));

        let missing = client.perform(&session, join(3, "1")).await.unwrap_err();
        assert!(matches!(missing, ChainFlipError::MatchNotFound(3)));

        assert!(mock.submissions().is_empty());
        assert!(client.overlay().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_fees_bounded_by_collected() {
        let (mock, client, session) = setup();
        let withdraw = |amount: u128| WriteCall::WithdrawFees {
            recipient: addr(1),
            amount: Wei::from_wei(amount),
        };

        assert!(client.perform(&session, withdraw(1)).await.is_err());

        mock.update(|s| s.collected_fees = Wei::from_wei(10));
        assert!(client.perform(&session, withdraw(11)).await.is_err());
        assert!(client.perform(&session, withdraw(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_perform_requires_account() {
        let (_mock, client, _) = setup();
        let err = client
            .perform(&Session::new(Chain::Anvil), WriteCall::WithdrawRefund)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainFlipError::NoAccount));
    }

    #[tokio::test]
    async fn test_refresh_keeps_min_bet_when_fee_read_fails() {
        let (mock, client, session) = setup();
        mock.fail_read("getFeePercent");
        mock.insert_match(waiting(1, addr(2), "1"));

        let snapshot = client.refresh(&session).await;
        assert!(snapshot.protocol.fee_percent.is_err());
        assert_eq!(
            snapshot.protocol.minimum_bet,
            Ok(Wei::parse_ether("0.1").unwrap())
        );

        let listed = snapshot.listing.matches.as_ref().unwrap();
        assert!(snapshot.prize_pool(&listed[0]).is_err());
    }

    #[tokio::test]
    async fn test_older_refresh_never_overwrites_newer() {
        let (_mock, client, session) = setup();
        let first = client.refresh(&session).await;
        let second = client.refresh(&session).await;
        assert!(second.sequence > first.sequence);

        let mut stale = (*first).clone();
        stale.sequence = first.sequence;
        let kept = client.store(stale);
        assert_eq!(kept.sequence, second.sequence);
        assert_eq!(client.latest().unwrap().sequence, second.sequence);
    }

    #[tokio::test]
    async fn test_match_state_never_regresses() {
        let (mock, client, session) = setup();
        let mut ended = waiting(1, addr(2), "1");
        ended.state = MatchState::Ended;
        ended.player2 = addr(3);
        ended.winner = addr(3);
        mock.insert_match(ended);
        client.refresh(&session).await;

        // lagging node serves an older view
        mock.insert_match(waiting(1, addr(2), "1"));
        let snapshot = client.refresh(&session).await;
        let listed = snapshot.listing.matches.as_ref().unwrap();
        assert_eq!(listed[0].state, MatchState::Ended);
    }

    #[test]
    fn test_settled_tracking_is_bounded() {
        let (_mock, client, _session) = setup();
        let total = MAX_SETTLED_TRACKED as MatchId + 100;

        let mut batch: Vec<Match> = (1..=total)
            .map(|id| {
                let mut m = waiting(id, addr(2), "1");
                m.state = MatchState::Ended;
                m
            })
            .collect();
        let mut open = waiting(total + 1, addr(2), "1");
        open.state = MatchState::Flipping;
        batch.push(open);
        client.reconcile(&mut batch);

        {
            let seen = client.seen.lock();
            assert_eq!(seen.len(), MAX_SETTLED_TRACKED + 1);
            assert!(!seen.contains_key(&1));
            assert!(seen.contains_key(&total));
            assert!(seen.contains_key(&(total + 1)));
        }

        // recent settled matches still refuse to move backwards
        let mut stale = vec![waiting(total, addr(2), "1")];
        client.reconcile(&mut stale);
        assert_eq!(stale[0].state, MatchState::Ended);
    }

    #[tokio::test]
    async fn test_snapshot_classification() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(1, addr(1), "1"));
        let mut canceled = waiting(2, addr(1), "1");
        canceled.state = MatchState::Canceled;
        mock.insert_match(canceled);

        let snapshot = client.refresh(&session).await;
        let listing = snapshot.listing_classified().unwrap();
        assert_eq!(listing.active.len(), 1);
        assert_eq!(listing.ended.len(), 1);

        let mine = snapshot.my_matches().unwrap();
        assert_eq!(mine.active.len() + mine.ended.len(), 2);
    }

    #[tokio::test]
    async fn test_run_processes_events_until_stream_closes() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(5, addr(2), "1"));
        client.perform(&session, join(5, "1")).await.unwrap();

        let start = mock.current_block() + 1;
        mock.emit(ContractEvent::MatchJoined {
            match_id: 5,
            player2: addr(1),
            choice: CoinSide::Tails,
            bet_amount: Wei::parse_ether("1").unwrap(),
        });

        let subscriber = client.subscriber().starting_at(start);
        let client = Arc::new(client);
        let runner = client.clone();
        let session_for_run = session.clone();

        let handle = tokio::spawn(async move {
            let mut seen = 0usize;
            runner
                .run(&session_for_run, subscriber, |events, _| {
                    seen += events.len();
                })
                .await;
            seen
        });

        let key = ActionKey::on_match(ActionKind::JoinMatch, 5);
        for _ in 0..200 {
            if !client.overlay().is_pending(&key) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!client.overlay().is_pending(&key));
        handle.abort();
    }
}
