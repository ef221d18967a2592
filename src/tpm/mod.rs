// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 remote attestation drivers.
//!
//! The prover answers a nonce challenge with a quote obtained from the
//! local TPM daemon; the verifier validates the quote's certificate
//! chain, structure, channel binding and signature, then compares the
//! reported PCR registers against the golden values from the peer's DAT.

mod errors;
pub mod messages;
mod pcr;
mod prover;
pub mod quote;
mod socket;
mod verifier;

pub use errors::Error;
pub use pcr::PcrValues;
pub use prover::{TpmProver, TpmProverConfig};
pub use socket::TpmSocket;
pub use verifier::{TpmVerifier, TpmVerifierConfig};

/// Identifier of this RA suite during suite negotiation.
pub const TPM_RA_ID: &str = "TPM2D";

/// Default TCP port of the local TPM daemon.
pub const TPM_DAEMON_PORT: u16 = 9505;
