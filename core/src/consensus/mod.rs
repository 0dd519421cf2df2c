//! The BFT consensus engine: four-phase (ADD_TX → PROPOSE → SIGN →
//! COMMIT) state-machine replication of an entity's state across a
//! weighted validator quorum, with a pluggable [`transport::Transport`]
//! and deterministic [`entity::apply`].

pub mod entity;
pub mod frame;
pub mod transport;
pub mod tx;

pub use entity::{
	apply, state_hash, ConsensusMode, Entity, EntityConfig, EntityId, EntityIdKind, EntityInput,
	EntityState,
};
pub use frame::Frame;
pub use transport::{InMemoryTransport, Transport};
pub use tx::{Action, EntityTx, Proposal, ProposalStatus, TxPayload, VoteChoice};
