//! `entityd_core`: a credit-line payment channel engine with BFT entity
//! consensus. Bilateral channels carry asymmetric per-asset credit limits
//! and HTLC-routed multi-hop payments; hubs extend fractional-reserve
//! liquidity across many channels; entities reach agreement on shared state
//! (chat, governance, or channel/HTLC events mirrored for audit) via a
//! four-phase ADD_TX/PROPOSE/SIGN/COMMIT protocol over a pluggable
//! transport.

pub mod channel;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod router;
pub mod wal;

pub use channel::{Channel, ChannelId, ChannelStatus, HtlcSpec, PaySpec};
pub use crypto::{Address, Wallet};
pub use error::{EngineError, ErrorKind, Result};
