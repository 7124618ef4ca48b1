//! emount - run commands against encrypted volumes
//!
//! Thin wrapper around the external `gocryptfs` engine: initialize an
//! encrypted volume, mount it, run a command against the decrypted view,
//! unmount. No cryptography is implemented here.

#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod exec;
pub mod passphrase;
pub mod unmount;
pub mod volume;
