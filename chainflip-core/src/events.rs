//! Contract events and the log-polling subscriber.

use crate::contract::abi::{self, decode_address_word, decode_uint_word, ParamKind};
use crate::contract::{ChainFlipContract, ContractValue, RawLog};
use crate::error::{ChainFlipError, Result};
use crate::types::{timestamp_from_secs, Address, CoinSide, MatchId, RequestId, TxHash, Wei};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MATCH_CREATED: &str = "MatchCreated(uint256,uint256,address,bool,uint256)";
const MATCH_JOINED: &str = "MatchJoined(uint256,address,bool,uint256)";
const MATCH_ENDED: &str = "MatchEnded(uint256,address,uint256,uint256)";
const MATCH_CANCELED_BY_PLAYER: &str = "MatchCanceledByPlayer(uint256,address)";
const MATCH_CANCELED_BY_UPKEEP: &str = "MatchCanceledByUpkeep(uint256,uint256)";
const REFUND_ISSUED: &str = "RefundIssued(address,uint256)";
const FEES_WITHDRAWN: &str = "FeesWithdrawn(address,uint256)";
const FEE_UPDATED: &str = "FeeUpdated(uint256)";
const MINIMUM_BET_UPDATED: &str = "MinimumBetAmountUpdated(uint256)";
const TIMEOUT_UPDATED: &str = "TimeOutUpdated(uint256)";

const SUBSCRIBED: [&str; 10] = [
    MATCH_CREATED,
    MATCH_JOINED,
    MATCH_ENDED,
    MATCH_CANCELED_BY_PLAYER,
    MATCH_CANCELED_BY_UPKEEP,
    REFUND_ISSUED,
    FEES_WITHDRAWN,
    FEE_UPDATED,
    MINIMUM_BET_UPDATED,
    TIMEOUT_UPDATED,
];

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    MatchCreated {
        match_id: MatchId,
        start_time: Option<DateTime<Utc>>,
        player1: Address,
        choice: CoinSide,
        bet_amount: Wei,
    },
    MatchJoined {
        match_id: MatchId,
        player2: Address,
        choice: CoinSide,
        bet_amount: Wei,
    },
    MatchEnded {
        match_id: MatchId,
        winner: Address,
        prize: Wei,
        end_time: Option<DateTime<Utc>>,
    },
    MatchCanceledByPlayer {
        match_id: MatchId,
        player1: Address,
    },
    MatchCanceledByUpkeep {
        match_id: MatchId,
        request_id: RequestId,
    },
    RefundIssued {
        player: Address,
        amount: Wei,
    },
    FeesWithdrawn {
        recipient: Address,
        amount: Wei,
    },
    FeeUpdated {
        new_fee: u64,
    },
    MinimumBetAmountUpdated {
        new_amount: Wei,
    },
    TimeOutUpdated {
        new_timeout: u64,
    },
}

impl ContractEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MatchCreated { .. } => "MatchCreated",
            Self::MatchJoined { .. } => "MatchJoined",
            Self::MatchEnded { .. } => "MatchEnded",
            Self::MatchCanceledByPlayer { .. } => "MatchCanceledByPlayer",
            Self::MatchCanceledByUpkeep { .. } => "MatchCanceledByUpkeep",
            Self::RefundIssued { .. } => "RefundIssued",
            Self::FeesWithdrawn { .. } => "FeesWithdrawn",
            Self::FeeUpdated { .. } => "FeeUpdated",
            Self::MinimumBetAmountUpdated { .. } => "MinimumBetAmountUpdated",
            Self::TimeOutUpdated { .. } => "TimeOutUpdated",
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            Self::MatchCreated { .. } => MATCH_CREATED,
            Self::MatchJoined { .. } => MATCH_JOINED,
            Self::MatchEnded { .. } => MATCH_ENDED,
            Self::MatchCanceledByPlayer { .. } => MATCH_CANCELED_BY_PLAYER,
            Self::MatchCanceledByUpkeep { .. } => MATCH_CANCELED_BY_UPKEEP,
            Self::RefundIssued { .. } => REFUND_ISSUED,
            Self::FeesWithdrawn { .. } => FEES_WITHDRAWN,
            Self::FeeUpdated { .. } => FEE_UPDATED,
            Self::MinimumBetAmountUpdated { .. } => MINIMUM_BET_UPDATED,
            Self::TimeOutUpdated { .. } => TIMEOUT_UPDATED,
        }
    }

    pub fn match_id(&self) -> Option<MatchId> {
        match self {
            Self::MatchCreated { match_id, .. }
            | Self::MatchJoined { match_id, .. }
            | Self::MatchEnded { match_id, .. }
            | Self::MatchCanceledByPlayer { match_id, .. }
            | Self::MatchCanceledByUpkeep { match_id, .. } => Some(*match_id),
            _ => None,
        }
    }

    /// Whether the event changes protocol-wide parameters rather than a
    /// single match or player.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::FeesWithdrawn { .. }
                | Self::FeeUpdated { .. }
                | Self::MinimumBetAmountUpdated { .. }
                | Self::TimeOutUpdated { .. }
        )
    }

    /// Decode a raw log. `Ok(None)` for logs this client does not subscribe to.
    pub fn decode(log: &RawLog) -> Result<Option<Self>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(signature) = SUBSCRIBED
            .iter()
            .copied()
            .find(|s| abi::event_topic(s) == *topic0)
        else {
            return Ok(None);
        };

        let reader = LogReader { log, signature };

        let event = match signature {
            MATCH_CREATED => {
                let data = reader.data(&[ParamKind::Uint, ParamKind::Bool, ParamKind::Uint])?;
                Self::MatchCreated {
                    match_id: reader.topic_id(1)?,
                    start_time: timestamp_from_secs(data[0].as_uint("startTime")?),
                    player1: reader.topic_address(2)?,
                    choice: CoinSide::from_bool(data[1].as_bool("choice")?),
                    bet_amount: data[2].as_wei("betAmount")?,
                }
            }
            MATCH_JOINED => {
                let data = reader.data(&[ParamKind::Bool, ParamKind::Uint])?;
                Self::MatchJoined {
                    match_id: reader.topic_id(1)?,
                    player2: reader.topic_address(2)?,
                    choice: CoinSide::from_bool(data[0].as_bool("choice")?),
                    bet_amount: data[1].as_wei("betAmount")?,
                }
            }
            MATCH_ENDED => {
                let data = reader.data(&[ParamKind::Address, ParamKind::Uint, ParamKind::Uint])?;
                Self::MatchEnded {
                    match_id: reader.topic_id(1)?,
                    winner: data[0].as_address("winner")?,
                    prize: data[1].as_wei("prize")?,
                    end_time: timestamp_from_secs(data[2].as_uint("endTime")?),
                }
            }
            MATCH_CANCELED_BY_PLAYER => Self::MatchCanceledByPlayer {
                match_id: reader.topic_id(1)?,
                player1: reader.topic_address(2)?,
            },
            MATCH_CANCELED_BY_UPKEEP => Self::MatchCanceledByUpkeep {
                match_id: reader.topic_id(1)?,
                request_id: RequestId::from_word(*reader.topic(2)?),
            },
            REFUND_ISSUED => {
                let data = reader.data(&[ParamKind::Uint])?;
                Self::RefundIssued {
                    player: reader.topic_address(1)?,
                    amount: data[0].as_wei("amount")?,
                }
            }
            FEES_WITHDRAWN => {
                let data = reader.data(&[ParamKind::Address, ParamKind::Uint])?;
                Self::FeesWithdrawn {
                    recipient: data[0].as_address("recipient")?,
                    amount: data[1].as_wei("amount")?,
                }
            }
            FEE_UPDATED => Self::FeeUpdated {
                new_fee: reader.data(&[ParamKind::Uint])?[0].as_u64("newFee")?,
            },
            MINIMUM_BET_UPDATED => Self::MinimumBetAmountUpdated {
                new_amount: reader.data(&[ParamKind::Uint])?[0].as_wei("newAmount")?,
            },
            TIMEOUT_UPDATED => Self::TimeOutUpdated {
                new_timeout: reader.data(&[ParamKind::Uint])?[0].as_u64("newTimeOut")?,
            },
            _ => return Ok(None),
        };

        Ok(Some(event))
    }

    /// Encode as the contract would emit it.
    #[cfg(any(test, feature = "testutils"))]
    pub fn to_log(&self, block_number: u64, log_index: u64) -> RawLog {
        use abi::{encode_address, encode_bool, encode_uint};

        let secs = |t: &Option<DateTime<Utc>>| t.map_or(0, |t| t.timestamp().max(0) as u128);

        let (indexed, data): (Vec<[u8; 32]>, Vec<[u8; 32]>) = match self {
            Self::MatchCreated {
                match_id,
                start_time,
                player1,
                choice,
                bet_amount,
            } => (
                vec![encode_uint(*match_id as u128), encode_address(player1)],
                vec![
                    encode_uint(secs(start_time)),
                    encode_bool(choice.as_bool()),
                    encode_uint(bet_amount.as_wei()),
                ],
            ),
            Self::MatchJoined {
                match_id,
                player2,
                choice,
                bet_amount,
            } => (
                vec![encode_uint(*match_id as u128), encode_address(player2)],
                vec![encode_bool(choice.as_bool()), encode_uint(bet_amount.as_wei())],
            ),
            Self::MatchEnded {
                match_id,
                winner,
                prize,
                end_time,
            } => (
                vec![encode_uint(*match_id as u128)],
                vec![
                    encode_address(winner),
                    encode_uint(prize.as_wei()),
                    encode_uint(secs(end_time)),
                ],
            ),
            Self::MatchCanceledByPlayer { match_id, player1 } => (
                vec![encode_uint(*match_id as u128), encode_address(player1)],
                Vec::new(),
            ),
            Self::MatchCanceledByUpkeep {
                match_id,
                request_id,
            } => (
                vec![encode_uint(*match_id as u128), *request_id.as_word()],
                Vec::new(),
            ),
            Self::RefundIssued { player, amount } => (
                vec![encode_address(player)],
                vec![encode_uint(amount.as_wei())],
            ),
            Self::FeesWithdrawn { recipient, amount } => (
                Vec::new(),
                vec![encode_address(recipient), encode_uint(amount.as_wei())],
            ),
            Self::FeeUpdated { new_fee } => (Vec::new(), vec![encode_uint(*new_fee as u128)]),
            Self::MinimumBetAmountUpdated { new_amount } => {
                (Vec::new(), vec![encode_uint(new_amount.as_wei())])
            }
            Self::TimeOutUpdated { new_timeout } => {
                (Vec::new(), vec![encode_uint(*new_timeout as u128)])
            }
        };

        let mut topics = vec![abi::event_topic(self.signature())];
        topics.extend(indexed);

        RawLog {
            topics,
            data: data.concat(),
            block_number,
            log_index,
            tx_hash: None,
        }
    }
}

impl fmt::Display for ContractEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.match_id() {
            Some(id) => write!(f, "{} #{}", self.name(), id),
            None => f.write_str(self.name()),
        }
    }
}

struct LogReader<'a> {
    log: &'a RawLog,
    signature: &'static str,
}

impl LogReader<'_> {
    fn topic(&self, index: usize) -> Result<&[u8; 32]> {
        self.log.topics.get(index).ok_or_else(|| {
            ChainFlipError::decode(format!("{}: missing topic {}", self.signature, index))
        })
    }

    fn topic_id(&self, index: usize) -> Result<MatchId> {
        let value = decode_uint_word(self.topic(index)?)?;
        MatchId::try_from(value).map_err(|_| {
            ChainFlipError::decode(format!("{}: match id {} out of range", self.signature, value))
        })
    }

    fn topic_address(&self, index: usize) -> Result<Address> {
        decode_address_word(self.topic(index)?)
    }

    fn data(&self, kinds: &[ParamKind]) -> Result<Vec<ContractValue>> {
        abi::decode(kinds, &self.log.data)
            .map_err(|e| ChainFlipError::decode(format!("{}: {}", self.signature, e)))
    }
}

/// Decoded event together with where it was found on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub event: ContractEvent,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<TxHash>,
}

/// Polls contract logs from a block cursor and decodes the subscribed set.
///
/// The cursor only moves forward after a poll succeeded, so a failed poll is
/// retried over the same range and events may be seen more than once.
pub struct EventSubscriber {
    contract: Arc<dyn ChainFlipContract>,
    poll_interval: Duration,
    next_block: Option<u64>,
}

impl EventSubscriber {
    pub fn new(contract: Arc<dyn ChainFlipContract>, poll_interval: Duration) -> Self {
        Self {
            contract,
            poll_interval,
            next_block: None,
        }
    }

    /// Start from a given block instead of the chain head.
    pub fn starting_at(mut self, block: u64) -> Self {
        self.next_block = Some(block);
        self
    }

    pub fn cursor(&self) -> Option<u64> {
        self.next_block
    }

    /// Fetch and decode everything between the cursor and the current head.
    pub async fn poll(&mut self) -> Result<Vec<LoggedEvent>> {
        let head = self.contract.block_number().await?;

        let from = match self.next_block {
            Some(block) => block,
            None => {
                // first poll without an explicit start: only new blocks
                self.next_block = Some(head + 1);
                tracing::debug!("Event cursor initialised at block {}", head + 1);
                return Ok(Vec::new());
            }
        };

        if from > head {
            return Ok(Vec::new());
        }

        let logs = self.contract.logs(from, head).await?;
        let mut events: Vec<LoggedEvent> = logs.iter().filter_map(decode_logged).collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));

        self.next_block = Some(head + 1);
        if !events.is_empty() {
            tracing::debug!("Polled {} events in blocks {}..={}", events.len(), from, head);
        }
        Ok(events)
    }

    /// Run the poll loop on a tokio task, forwarding events to the returned
    /// subscription.
    pub fn spawn(mut self) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Event subscriber shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.poll().await {
                            Ok(events) => {
                                for event in events {
                                    if tx.send(event).await.is_err() {
                                        tracing::debug!("Event receiver dropped");
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    "Event poll failed, retrying from block {:?}: {}",
                                    self.next_block,
                                    e
                                );
                            }
                        }
                    }
                }
            }
        });

        Subscription {
            events: rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

fn decode_logged(log: &RawLog) -> Option<LoggedEvent> {
    match ContractEvent::decode(log) {
        Ok(Some(event)) => Some(LoggedEvent {
            event,
            block_number: log.block_number,
            log_index: log.log_index,
            tx_hash: log.tx_hash,
        }),
        Ok(None) => {
            tracing::debug!(
                "Skipping unsubscribed log at block {} index {}",
                log.block_number,
                log.log_index
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                "Skipping malformed log at block {} index {}: {}",
                log.block_number,
                log.log_index,
                e
            );
            None
        }
    }
}

/// Receiving side of a spawned [`EventSubscriber`]. Dropping it stops the
/// poll task.
pub struct Subscription {
    events: mpsc::Receiver<LoggedEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<LoggedEvent> {
        self.events.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<LoggedEvent> {
        self.events.try_recv().ok()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Event subscriber task ended abnormally: {}", e);
        }
    }
}
