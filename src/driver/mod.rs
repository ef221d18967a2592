// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! The driver module defines the lifecycle contract every RA driver
//! implements, together with the shared plumbing: the inbound message
//! hand-off, the binding-hash computation and the framed transport stub
//! used to talk to local attestation backends.
//!
//! A driver instance is per-connection and single-use: it is constructed,
//! configured once, runs exactly one protocol instance and emits exactly
//! one terminal success/failure signal through its listener.

pub use self::errors::RaError;
pub use self::queue::DriverHandle;
pub use self::queue::InboundQueue;
pub use self::transport::FramedStream;
pub use self::transport::MAX_FRAME_LEN;

pub mod base64;
mod errors;
mod queue;
mod transport;
pub(crate) mod wire;

use openssl::hash::{Hasher, MessageDigest};
use openssl::rand::rand_bytes;
use openssl::x509::X509;

/// Listener interface through which a prover driver reports back to the
/// owning connection state machine.
pub trait RaProverListener: Send + Sync {
    /// An outbound RA message to be forwarded to the remote verifier.
    fn on_prover_message(&self, message: Vec<u8>);
    /// Terminal signal: the local platform was successfully attested.
    fn on_prover_ok(&self);
    /// Terminal signal: attestation failed or could not be carried out.
    fn on_prover_failed(&self);
    /// The remote peer's transport certificate, if the channel has one.
    fn remote_peer_certificate(&self) -> Option<X509>;
}

/// Listener interface through which a verifier driver reports back to the
/// owning connection state machine.
pub trait RaVerifierListener: Send + Sync {
    /// An outbound RA message to be forwarded to the remote prover.
    fn on_verifier_message(&self, message: Vec<u8>);
    /// Terminal signal: the remote platform is trusted.
    fn on_verifier_ok(&self);
    /// Terminal signal: the remote platform is not trusted.
    fn on_verifier_failed(&self);
    /// The remote peer's transport certificate, if the channel has one.
    fn remote_peer_certificate(&self) -> Option<X509>;
    /// The remote peer's dynamic attribute token, as validated upstream.
    fn remote_peer_dat(&self) -> Vec<u8>;
}

/// Contract for the prover side of one RA exchange.
///
/// `run` executes the fixed protocol sequence once and may block on the
/// inbound queue; `handle` returns the endpoint the connection state
/// machine uses to delegate peer messages and to cancel the driver from
/// another thread.
pub trait RaProverDriver: Send {
    type Config;

    fn set_config(&mut self, config: Self::Config);
    fn handle(&self) -> DriverHandle;
    fn run(&mut self) -> Result<(), RaError>;
}

/// Contract for the verifier side of one RA exchange, symmetric to
/// [`RaProverDriver`].
pub trait RaVerifierDriver: Send {
    type Config;

    fn set_config(&mut self, config: Self::Config);
    fn handle(&self) -> DriverHandle;
    fn run(&mut self) -> Result<(), RaError>;
}

/// The closed set of RA suites this crate implements, resolved during
/// suite negotiation by the surrounding connection state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaSuite {
    Tpm2d,
    SevSnp,
    Cmc,
}

impl RaSuite {
    /// The stable identifier exchanged during RA suite negotiation.
    pub fn id(&self) -> &'static str {
        match self {
            RaSuite::Tpm2d => crate::tpm::TPM_RA_ID,
            RaSuite::SevSnp => crate::snp::SNP_RA_ID,
            RaSuite::Cmc => crate::cmc::CMC_RA_ID,
        }
    }

    pub fn from_id(id: &str) -> Option<RaSuite> {
        match id {
            crate::tpm::TPM_RA_ID => Some(RaSuite::Tpm2d),
            crate::snp::SNP_RA_ID => Some(RaSuite::SevSnp),
            crate::cmc::CMC_RA_ID => Some(RaSuite::Cmc),
            _ => None,
        }
    }
}

impl std::fmt::Display for RaSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A cryptographically secure source of nonce bytes.  Verifier drivers
/// take their source at construction so that tests can inject a
/// deterministic one; production code uses [`OsRandom`].
pub trait NonceSource: Send {
    fn fill(&self, buf: &mut [u8]) -> Result<(), RaError>;
}

/// Default [`NonceSource`] backed by the OpenSSL CSPRNG.
pub struct OsRandom;

impl NonceSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), RaError> {
        rand_bytes(buf).map_err(RaError::from)
    }
}

/// Compute the digest binding an attestation exchange to this channel
/// instance: `md(nonce ‖ cert_1 ‖ … ‖ cert_n)` over the DER encodings of
/// the given certificates.  The concatenation order is part of the wire
/// contract of each backend and must match between prover and verifier.
pub fn calculate_binding_hash(
    md: MessageDigest,
    nonce: &[u8],
    certificates: &[&[u8]],
) -> Result<Vec<u8>, RaError> {
    let mut hasher = Hasher::new(md)?;
    hasher.update(nonce)?;
    for cert in certificates {
        hasher.update(cert)?;
    }
    Ok(hasher.finish()?.to_vec())
}
