//! Nostr protocol types for the relay.
//!
//! This crate provides:
//! - NIP-01: Event structure, canonical serialization, signing and verification
//! - NIP-01: Kind classification (regular, replaceable, ephemeral, addressable)
//! - Addressable event identity (`d` tag, formerly NIP-33)
//!
//! # Features
//!
//! - `full` (default): key generation, event hashing, signing and verification
//! - without `full`: just the Event type, classification and serialization

mod nip01;
mod nip33;

pub use nip01::{
    Event, EventTemplate, KIND_CONTACTS, KIND_METADATA, KIND_RECOMMEND_RELAY,
    KIND_SHORT_TEXT_NOTE, KindClass, KindClassification, MAX_CREATED_AT, Nip01Error, UnsignedEvent, classify_kind,
    classify_kind_nip01, is_addressable_kind, is_ephemeral_kind, is_regular_kind,
    is_replaceable_kind, serialize_event, sort_events, validate_event_structure,
};

#[cfg(feature = "full")]
pub use nip01::{
    finalize_event, generate_secret_key, get_event_hash, get_public_key_hex, verify_event,
};

pub use nip33::{D_TAG, ReplaceKey, create_address, get_d_tag, replace_key};
