//! # local-kms
//!
//! A wire-compatible local emulator of a cloud key management service's
//! JSON-over-HTTP protocol: customer master key lifecycle, envelope
//! encryption, asymmetric sign/verify, and external key-material import,
//! all served from a single `POST /` endpoint dispatched by `X-Amz-Target`.
//!
//! ## Architecture
//!
//! - `config`: process configuration, read once from the environment
//! - `error`: the exception taxonomy and its wire representation
//! - `rand`: CSPRNG helpers used for key material and nonces
//! - `envelope`: the ciphertext envelope format shared by every symmetric CMK
//! - `cmk`: the four customer master key variants and their crypto
//! - `crypto`: the AES-256-GCM primitive the symmetric CMK builds on
//! - `store`: the persistent, ordered key-value store behind every CMK/alias/tag
//! - `auth`: request signature verification and simplified IAM authorization
//! - `api`: the wire protocol and its per-operation handlers
//! - `seed`: YAML pre-provisioning of keys and aliases at startup

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod cmk;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod rand;
pub mod seed;
pub mod store;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
