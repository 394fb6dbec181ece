//! NIP-01: Basic protocol flow description.
//!
//! Event structure, the canonical serialization used for ids, Schnorr signing
//! (requires `full` feature) and kind classification.
//!
//! Relays care about two views of an event kind:
//! - [`KindClassification`]: the five NIP-01 ranges (regular, replaceable,
//!   ephemeral, addressable, unknown)
//! - [`KindClass`]: what a relay does with the event (append, replace, or
//!   only broadcast it)

#[cfg(feature = "full")]
use bitcoin::hashes::{Hash, sha256};
#[cfg(feature = "full")]
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
#[cfg(feature = "full")]
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`, if it has one.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

/// An event before it has an id and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl From<&Event> for UnsignedEvent {
    fn from(event: &Event) -> Self {
        Self {
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
        }
    }
}

/// Event fields supplied by the author; the pubkey comes from the signing key.
///
/// ```
/// use nostr::{EventTemplate, KIND_METADATA};
///
/// let template = EventTemplate {
///     created_at: 1_700_000_000,
///     kind: KIND_METADATA,
///     tags: vec![],
///     content: r#"{"name":"alice"}"#.to_string(),
/// };
/// assert_eq!(template.kind, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Kind ranges as laid out by NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Outside every range NIP-01 assigns
    Unknown,
}

/// Storage treatment of an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    /// Append-only history; many events per author are kept.
    Regular,
    /// A newer event with the same identity key supersedes the stored one.
    ReplaceableOrAddressable,
    /// Never persisted, only forwarded to live subscribers.
    BroadcastOnly,
}

impl From<KindClassification> for KindClass {
    fn from(classification: KindClassification) -> Self {
        match classification {
            KindClassification::Regular => KindClass::Regular,
            KindClassification::Replaceable | KindClassification::Addressable => {
                KindClass::ReplaceableOrAddressable
            }
            // Unknown kinds are never persisted.
            KindClassification::Ephemeral | KindClassification::Unknown => {
                KindClass::BroadcastOnly
            }
        }
    }
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_RECOMMEND_RELAY: u16 = 2;
pub const KIND_CONTACTS: u16 = 3;

/// Classify an event kind according to the NIP-01 ranges.
pub fn classify_kind_nip01(kind: u16) -> KindClassification {
    match kind {
        1 | 2 | 4..=44 | 1000..=9999 => KindClassification::Regular,
        0 | 3 | 10000..=19999 => KindClassification::Replaceable,
        20000..=29999 => KindClassification::Ephemeral,
        30000..=39999 => KindClassification::Addressable,
        _ => KindClassification::Unknown,
    }
}

/// Classify an event kind by how a relay stores it. Total and pure.
///
/// ```
/// use nostr::{KindClass, classify_kind};
///
/// assert_eq!(classify_kind(1), KindClass::Regular);
/// assert_eq!(classify_kind(30023), KindClass::ReplaceableOrAddressable);
/// assert_eq!(classify_kind(20001), KindClass::BroadcastOnly);
/// assert_eq!(classify_kind(500), KindClass::BroadcastOnly);
/// ```
pub fn classify_kind(kind: u16) -> KindClass {
    classify_kind_nip01(kind).into()
}

pub fn is_regular_kind(kind: u16) -> bool {
    classify_kind_nip01(kind) == KindClassification::Regular
}

pub fn is_replaceable_kind(kind: u16) -> bool {
    classify_kind_nip01(kind) == KindClassification::Replaceable
}

pub fn is_ephemeral_kind(kind: u16) -> bool {
    classify_kind_nip01(kind) == KindClassification::Ephemeral
}

pub fn is_addressable_kind(kind: u16) -> bool {
    classify_kind_nip01(kind) == KindClassification::Addressable
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Largest `created_at` a relay accepts; storage engines keep timestamps as
/// signed 64-bit integers.
pub const MAX_CREATED_AT: u64 = i64::MAX as u64;

/// Check the shape of a signed event: lowercase hex id (64), pubkey (64),
/// sig (128) and a `created_at` no larger than [`MAX_CREATED_AT`]. Does not
/// verify the signature.
pub fn validate_event_structure(event: &Event) -> Result<(), Nip01Error> {
    if !is_lower_hex(&event.id, 64) {
        return Err(Nip01Error::InvalidEvent(
            "id must be 64 lowercase hex characters".to_string(),
        ));
    }
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }
    if !is_lower_hex(&event.sig, 128) {
        return Err(Nip01Error::InvalidEvent(
            "sig must be 128 lowercase hex characters".to_string(),
        ));
    }
    if event.created_at > MAX_CREATED_AT {
        return Err(Nip01Error::InvalidEvent(format!(
            "created_at must not exceed {}",
            MAX_CREATED_AT
        )));
    }
    Ok(())
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "can't serialize event with invalid pubkey".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Sort events newest first, breaking ties by id ascending.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Generate a random 32-byte secret key.
#[cfg(feature = "full")]
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Hex x-only public key for a secret key.
#[cfg(feature = "full")]
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// Event id: sha256 of the canonical serialization.
#[cfg(feature = "full")]
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Sign a template, producing a complete event.
#[cfg(feature = "full")]
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();

    let unsigned = UnsignedEvent {
        pubkey: hex::encode(xonly.serialize()),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    let id = get_event_hash(&unsigned)?;

    let id_bytes = hex::decode(&id).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let message =
        Message::from_digest_slice(&id_bytes).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Verify an event's id and signature.
///
/// Returns `Ok(false)` for well-formed events that do not verify.
#[cfg(feature = "full")]
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if validate_event_structure(event).is_err() {
        return Ok(false);
    }
    if get_event_hash(&UnsignedEvent::from(event))? != event.id {
        return Ok(false);
    }

    let verify_err = |e: &dyn std::fmt::Display| Nip01Error::Verification(e.to_string());
    let id_bytes = hex::decode(&event.id).map_err(|e| verify_err(&e))?;
    let message = Message::from_digest_slice(&id_bytes).map_err(|e| verify_err(&e))?;
    let sig_bytes = hex::decode(&event.sig).map_err(|e| verify_err(&e))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes).map_err(|e| verify_err(&e))?;
    let pubkey_bytes = hex::decode(&event.pubkey).map_err(|e| verify_err(&e))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes).map_err(|e| verify_err(&e))?;

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}
