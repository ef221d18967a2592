// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Delegated remote attestation through a local CMC service.
//!
//! Both drivers are thin relays: the prover forwards the verifier's
//! challenge to its CMC and the resulting report back; the verifier
//! hands the report to its own CMC for appraisal and forwards the
//! verdict.  Report contents stay opaque at this layer.

pub mod messages;
mod prover;
mod socket;
mod verifier;

pub use prover::{CmcProver, CmcProverConfig};
pub use socket::CmcSocket;
pub use verifier::{CmcVerifier, CmcVerifierConfig};

/// Identifier of this RA suite during suite negotiation.
pub const CMC_RA_ID: &str = "CMC";

/// Default TCP port of the local CMC service.
pub const CMC_PORT: u16 = 9955;

/// CMC challenge nonces are 20 bytes.
pub const CMC_NONCE_LEN: usize = 20;
