#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Signing identity management and package signing
//!
//! The identity is a process-wide, lazily created 2048-bit RSA key with a
//! self-signed certificate, persisted to a single keystore file and never
//! rotated automatically. Packages are signed with signature schemes v2
//! and v3; the legacy v1 whole-file scheme is not applied because it
//! conflicts with the zip alignment the repack stage performs.

mod block;
mod identity;
mod signer;

pub use identity::{SigningIdentity, SigningIdentityStore};
pub use signer::sign;
