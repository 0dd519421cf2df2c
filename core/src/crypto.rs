//! Deterministic keypairs, message signing, state hashing and HTLC
//! preimages.
//!
//! Signatures are secp256k1 ECDSA, deterministic per wallet and message
//! (RFC6979 nonce derivation, the default of the `secp256k1` crate).
//! `verify` recovers the signer's public key from the signature and checks
//! it hashes to the expected [`Address`]; it never needs the public key to
//! be supplied out of band. `state_hash` is a single canonical encoder
//! ([`CanonicalEncode`]) shared by channel states and consensus frames so
//! there is exactly one place that defines field order.

use std::fmt;
use std::str::FromStr;

use bitcoin_hashes::{sha256, Hash as HashesHash};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// A 32-byte hash, as produced by [`hash`] and [`state_hash`].
pub type Hash32 = [u8; 32];

/// A 20-byte address derived from a public key. Equality is byte equality.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
	pub const fn zero() -> Self {
		Address([0u8; 20])
	}

	pub fn from_public_key(pk: &PublicKey) -> Self {
		let digest = sha256::Hash::hash(&pk.serialize());
		let mut bytes = [0u8; 20];
		bytes.copy_from_slice(&digest.to_byte_array()[12..32]);
		Address(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 20] {
		&self.0
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl FromStr for Address {
	type Err = EngineError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.strip_prefix("0x").unwrap_or(s);
		let bytes = hex::decode(s)
			.map_err(|e| EngineError::validation(format!("invalid address hex: {}", e)))?;
		if bytes.len() != 20 {
			return Err(EngineError::validation(format!(
				"address must be 20 bytes, got {}",
				bytes.len()
			)));
		}
		let mut out = [0u8; 20];
		out.copy_from_slice(&bytes);
		Ok(Address(out))
	}
}

impl Serialize for Address {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for Address {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Address::from_str(&s).map_err(DeError::custom)
	}
}

/// A detached signature: 64-byte compact ECDSA signature plus a 1-byte
/// recovery id, so [`verify`] can recover the signer without an
/// out-of-band public key.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl fmt::Debug for Signature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Signature(0x{})", hex::encode(self.0))
	}
}

impl Serialize for Signature {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&hex::encode(self.0))
	}
}

impl<'de> Deserialize<'de> for Signature {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		let bytes = hex::decode(&s).map_err(DeError::custom)?;
		if bytes.len() != 65 {
			return Err(DeError::custom("signature must be 65 bytes"));
		}
		let mut out = [0u8; 65];
		out.copy_from_slice(&bytes);
		Ok(Signature(out))
	}
}

/// A wallet owns a private key and can sign messages; its address is its
/// public identity.
pub struct Wallet {
	secret_key: SecretKey,
	public_key: PublicKey,
	address: Address,
}

impl Wallet {
	pub fn address(&self) -> Address {
		self.address
	}

	pub fn public_key(&self) -> PublicKey {
		self.public_key
	}
}

/// Derive a wallet deterministically from a seed. The seed is hashed (with
/// an incrementing counter suffix, vanishingly unlikely to ever be needed)
/// until it lands on a valid secp256k1 scalar.
pub fn keypair_from_seed(seed: &[u8]) -> Wallet {
	let secp = Secp256k1::new();
	let mut counter: u8 = 0;
	let secret_key = loop {
		let mut preimage = Vec::with_capacity(seed.len() + 1);
		preimage.extend_from_slice(seed);
		preimage.push(counter);
		let digest = sha256::Hash::hash(&preimage);
		match SecretKey::from_slice(digest.as_byte_array()) {
			Ok(sk) => break sk,
			Err(_) => {
				counter = counter.wrapping_add(1);
				continue;
			},
		}
	};
	let public_key = PublicKey::from_secret_key(&secp, &secret_key);
	let address = Address::from_public_key(&public_key);
	Wallet { secret_key, public_key, address }
}

/// Sign an arbitrary message. Deterministic given `wallet` and `message`.
pub fn sign(wallet: &Wallet, message: &[u8]) -> Signature {
	let secp = Secp256k1::new();
	let digest = sha256::Hash::hash(message);
	let msg = Message::from_digest(*digest.as_byte_array());
	let recoverable = secp.sign_ecdsa_recoverable(&msg, &wallet.secret_key);
	let (recovery_id, compact) = recoverable.serialize_compact();
	let mut out = [0u8; 65];
	out[..64].copy_from_slice(&compact);
	out[64] = recovery_id_to_byte(recovery_id);
	Signature(out)
}

/// Verify that `signature` was produced over `message` by the holder of
/// `expected`. Side-effect free. Never panics: malformed signatures verify
/// to `false`.
pub fn verify(signature: &Signature, message: &[u8], expected: Address) -> bool {
	recover_address(signature, message).map(|addr| addr == expected).unwrap_or(false)
}

/// Recover the address that produced `signature` over `message`, if the
/// signature is well-formed.
pub fn recover_address(signature: &Signature, message: &[u8]) -> Option<Address> {
	let secp = Secp256k1::new();
	let digest = sha256::Hash::hash(message);
	let msg = Message::from_digest(*digest.as_byte_array());
	let recovery_id = recovery_id_from_byte(signature.0[64])?;
	let recoverable = RecoverableSignature::from_compact(&signature.0[..64], recovery_id).ok()?;
	let pubkey = secp.recover_ecdsa(&msg, &recoverable).ok()?;
	Some(Address::from_public_key(&pubkey))
}

fn recovery_id_to_byte(id: RecoveryId) -> u8 {
	i32::from(id) as u8
}

fn recovery_id_from_byte(byte: u8) -> Option<RecoveryId> {
	RecoveryId::from_i32(byte as i32).ok()
}

/// Hash an arbitrary byte string with SHA-256.
pub fn hash(bytes: &[u8]) -> Hash32 {
	*sha256::Hash::hash(bytes).as_byte_array()
}

/// Implemented by every type that participates in state hashing (channel
/// states, consensus frames). Appends a canonical, deterministic byte
/// encoding of `self` to `buf`: fixed field order, big-endian fixed-width
/// integers, maps and sets serialized as key-sorted sequences. Independent
/// of in-memory field insertion order.
pub trait CanonicalEncode {
	fn encode_canonical(&self, buf: &mut Vec<u8>);
}

/// Hash the canonical encoding of `value`.
pub fn state_hash<T: CanonicalEncode>(value: &T) -> Hash32 {
	let mut buf = Vec::new();
	value.encode_canonical(&mut buf);
	hash(&buf)
}

impl CanonicalEncode for Address {
	fn encode_canonical(&self, buf: &mut Vec<u8>) {
		buf.extend_from_slice(&self.0);
	}
}

/// Encode a `u64` as 8 big-endian bytes.
pub fn push_u64(buf: &mut Vec<u8>, v: u64) {
	buf.extend_from_slice(&v.to_be_bytes());
}

/// Encode a `u128` as 16 big-endian bytes.
pub fn push_u128(buf: &mut Vec<u8>, v: u128) {
	buf.extend_from_slice(&v.to_be_bytes());
}

/// Encode an `i128` as 16 big-endian two's-complement bytes.
pub fn push_i128(buf: &mut Vec<u8>, v: i128) {
	buf.extend_from_slice(&v.to_be_bytes());
}

/// Generate a uniformly random 32-byte value (used for HTLC preimages).
pub fn random_32() -> [u8; 32] {
	use rand::RngCore;
	let mut out = [0u8; 32];
	rand::thread_rng().fill_bytes(&mut out);
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deterministic_keypair() {
		let a = keypair_from_seed(b"alice");
		let b = keypair_from_seed(b"alice");
		assert_eq!(a.address(), b.address());
	}

	#[test]
	fn distinct_seeds_distinct_addresses() {
		let a = keypair_from_seed(b"alice");
		let b = keypair_from_seed(b"bob");
		assert_ne!(a.address(), b.address());
	}

	#[test]
	fn sign_is_deterministic() {
		let wallet = keypair_from_seed(b"alice");
		let sig1 = sign(&wallet, b"hello");
		let sig2 = sign(&wallet, b"hello");
		assert_eq!(sig1.0, sig2.0);
	}

	#[test]
	fn verify_roundtrip() {
		let wallet = keypair_from_seed(b"alice");
		let sig = sign(&wallet, b"payload");
		assert!(verify(&sig, b"payload", wallet.address()));
		assert!(!verify(&sig, b"tampered", wallet.address()));
	}

	#[test]
	fn verify_rejects_wrong_address() {
		let wallet = keypair_from_seed(b"alice");
		let other = keypair_from_seed(b"bob");
		let sig = sign(&wallet, b"payload");
		assert!(!verify(&sig, b"payload", other.address()));
	}

	#[test]
	fn hash_is_stable() {
		assert_eq!(hash(b"abc"), hash(b"abc"));
		assert_ne!(hash(b"abc"), hash(b"abd"));
	}

	#[test]
	fn address_hex_roundtrip() {
		let wallet = keypair_from_seed(b"alice");
		let addr = wallet.address();
		let s = addr.to_string();
		let parsed: Address = s.parse().unwrap();
		assert_eq!(addr, parsed);
	}
}
