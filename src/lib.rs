//! # osnma-core
//!
//! osnma-core is the navigation message authentication core of a Galileo
//! receiver. It implements the Galileo OSNMA (Open Service Navigation Message
//! Authentication) protocol, answering one question: is this navigation data,
//! observed at this time, from this satellite, genuine?
//!
//! The root key of a TESLA chain is authenticated with an ECDSA P-256 or
//! P-521 signature against a provisioned public key. Keys disclosed later are
//! traced back to the root with the one-way function of the chain, and the
//! MAC tags broadcast by the satellites are recomputed over the exact
//! navigation bits with the trusted keys.
//!
//! This library provides an [`Osnma`] struct that implements the
//! authentication as a black box. A user can feed navigation data, DSM blocks
//! and authentication frames into [`Osnma`] and then request authenticated
//! navigation data or the verdict of each record. [`SharedOsnma`] lets the
//! threads of several receiver channels feed the same engine. The lower level
//! pieces (key store, chain verifier, tag verifier, cryptographic primitives)
//! are accessible in case finer control is needed.
//!
//! RF acquisition, demodulation, page synchronization and the PVT solver are
//! outside the scope of this crate.
//!
//! ## Logging
//!
//! The osnma-core crate makes extensive use of the
//! [log](https://docs.rs/log/latest/log/) crate to log events related to the
//! processing of the messages and the cryptographic functions.
//!
//! ## Features
//!
//! * `cli` (default). Builds the `osnma-replay` tool, which runs a text log
//!   of navigation records, DSM blocks and authentication frames through the
//!   engine.

#![warn(missing_docs)]

pub mod bitfields;
pub mod chain;
pub mod config;
pub use config::Config;
pub mod crypto;
pub mod dsm;
pub mod error;
pub use error::{Error, Result};
mod gst;
pub use gst::{bytes_to_gst, compute_gst, gst_to_bytes, Gst, Tow, Wn};
pub mod helper;
pub mod keystore;
pub mod merkle_tree;
pub mod navmessage;
mod osnma;
pub use osnma::{AuthFrame, Osnma, RecordVerdict, SharedOsnma, TagEntry};
pub mod pubkey;
mod svn;
pub use svn::Svn;
pub mod tags;
pub mod tesla;
pub mod types;
pub use types::InavBand;
pub mod validation;

#[cfg(test)]
mod testing;
