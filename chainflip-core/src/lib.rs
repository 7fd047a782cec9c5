//! ChainFlip core - client-side reconciliation for the ChainFlip coin-flip
//! contract.
//!
//! Reads are batched through a [`ReadGateway`], writes are tracked by an
//! optimistic [`Overlay`] until the contract confirms them through an event,
//! and everything the views need is gathered into a [`Snapshot`].

pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod gateway;
pub mod overlay;
pub mod session;
pub mod stats;
pub mod types;

pub use config::{Chain, ClientConfig};
pub use contract::{ChainFlipContract, ReadCall, RpcContract, WriteCall};
pub use error::{ChainFlipError, Result};
pub use events::{ContractEvent, EventSubscriber, LoggedEvent};
pub use gateway::{Read, ReadFailure, ReadGateway};
pub use overlay::{ActionKey, ActionKind, Overlay, PendingAction, PendingPhase};
pub use session::{ChainFlipClient, Session, Snapshot, Submitted};
pub use types::{
    Address, CoinSide, Match, MatchId, MatchState, PlayerStats, RequestId, TxHash, Wei,
};
