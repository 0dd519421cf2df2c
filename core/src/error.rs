//! Error taxonomy shared by every subsystem.
//!
//! Kinds follow the error taxonomy: validation failures are
//! rejected outright, credit/liquidity failures are retryable by the caller,
//! signature/ordering failures are fatal for the operation (and may indicate
//! a byzantine peer), and WAL/checkpoint failures require operator
//! intervention. Every variant carries a stable [`ErrorKind`] code alongside
//! a human message.

use std::fmt;

/// Stable, machine-readable error kind. Logged and matched on by callers;
/// never parsed from the human `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	Validation,
	InsufficientFunds,
	CreditExceeded,
	InvalidSignature,
	NonceMismatch,
	ChannelClosed,
	HubUnavailable,
	RouteFailed,
	ConsensusTimeout,
	ThresholdNotReached,
	StateHashMismatch,
	WalCorruption,
	CheckpointMissing,
	MempoolFull,
	Io,
	/// An HTLC reservation was released (settled or refunded) twice. This
	/// can only happen if a caller replays an already-terminal operation;
	/// it indicates a broken invariant and is treated as fatal.
	DoubleRelease,
}

impl ErrorKind {
	/// The stable code, e.g. for log lines and CLI exit-code mapping.
	pub fn code(self) -> &'static str {
		match self {
			ErrorKind::Validation => "VALIDATION",
			ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
			ErrorKind::CreditExceeded => "CREDIT_EXCEEDED",
			ErrorKind::InvalidSignature => "INVALID_SIGNATURE",
			ErrorKind::NonceMismatch => "NONCE_MISMATCH",
			ErrorKind::ChannelClosed => "CHANNEL_CLOSED",
			ErrorKind::HubUnavailable => "HUB_UNAVAILABLE",
			ErrorKind::RouteFailed => "ROUTE_FAILED",
			ErrorKind::ConsensusTimeout => "CONSENSUS_TIMEOUT",
			ErrorKind::ThresholdNotReached => "THRESHOLD_NOT_REACHED",
			ErrorKind::StateHashMismatch => "STATE_HASH_MISMATCH",
			ErrorKind::WalCorruption => "WAL_CORRUPTION",
			ErrorKind::CheckpointMissing => "CHECKPOINT_MISSING",
			ErrorKind::MempoolFull => "MEMPOOL_FULL",
			ErrorKind::Io => "IO",
			ErrorKind::DoubleRelease => "DOUBLE_RELEASE",
		}
	}

	/// Whether this kind of failure should abort the host process rather
	/// than be returned to a caller for a retry decision. Only WAL
	/// corruption, a missing checkpoint on recovery, and broken invariants
	/// (surfaced as `Validation` from `debug_assert`-style invariant checks
	/// in non-debug builds) are fatal.
	pub fn is_fatal(self) -> bool {
		matches!(
			self,
			ErrorKind::WalCorruption | ErrorKind::CheckpointMissing | ErrorKind::DoubleRelease
		)
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.code())
	}
}

/// A tagged error result: stable `kind` plus a human `message`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
	pub kind: ErrorKind,
	pub message: String,
}

impl EngineError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into() }
	}

	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Validation, message)
	}

	pub fn insufficient_funds(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InsufficientFunds, message)
	}

	pub fn credit_exceeded(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::CreditExceeded, message)
	}

	pub fn invalid_signature(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidSignature, message)
	}

	pub fn nonce_mismatch(expected: u64, actual: u64) -> Self {
		Self::new(
			ErrorKind::NonceMismatch,
			format!("expected nonce {}, got {}", expected, actual),
		)
	}

	pub fn channel_closed(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::ChannelClosed, message)
	}

	pub fn hub_unavailable(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::HubUnavailable, message)
	}

	pub fn route_failed(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::RouteFailed, message)
	}

	pub fn consensus_timeout(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::ConsensusTimeout, message)
	}

	pub fn threshold_not_reached(have: u128, need: u128) -> Self {
		Self::new(ErrorKind::ThresholdNotReached, format!("{} < {}", have, need))
	}

	pub fn state_hash_mismatch(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::StateHashMismatch, message)
	}

	pub fn wal_corruption(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::WalCorruption, message)
	}

	pub fn checkpoint_missing(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::CheckpointMissing, message)
	}

	pub fn mempool_full() -> Self {
		Self::new(ErrorKind::MempoolFull, "mempool is at capacity")
	}

	pub fn double_release(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::DoubleRelease, message)
	}

	pub fn is_fatal(&self) -> bool {
		self.kind.is_fatal()
	}
}

impl From<std::io::Error> for EngineError {
	fn from(e: std::io::Error) -> Self {
		Self::new(ErrorKind::Io, e.to_string())
	}
}

impl From<serde_json::Error> for EngineError {
	fn from(e: serde_json::Error) -> Self {
		Self::new(ErrorKind::WalCorruption, format!("malformed json: {}", e))
	}
}

pub type Result<T> = std::result::Result<T, EngineError>;
