// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by a driver's `run`.  The terminal OK/FAILED signal is
/// always delivered through the listener before one of these is returned;
/// the error value itself exists for logging and diagnostics.
#[derive(thiserror::Error, Debug)]
pub enum RaError {
    /// A received message did not carry the variant expected at the
    /// current protocol step, or was not decodable at all.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// I/O failure talking to the local attestation backend.  Single
    /// attempt, no retry.
    #[error("attestation backend I/O error: {0}")]
    Backend(#[from] std::io::Error),
    /// The peer's transport certificate is required for the binding hash
    /// but the channel did not provide one.
    #[error("peer transport certificate not available")]
    MissingPeerCertificate,
    /// Missing or malformed claims in the peer's DAT.
    #[error("DAT claim error: {0}")]
    Dat(#[from] crate::dat::Error),
    /// Cryptographic validation rejected the attestation evidence.
    #[error("attestation validation failed: {0}")]
    Validation(String),
    /// Internal crypto-library failure (hasher setup, RNG, DER encoding).
    #[error("crypto error: {0}")]
    Crypto(String),
    /// The driver was cancelled while blocked on its inbound queue.  No
    /// terminal signal is emitted on this path.
    #[error("driver cancelled while waiting for a peer message")]
    Cancelled,
}

impl From<openssl::error::ErrorStack> for RaError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        RaError::Crypto(e.to_string())
    }
}

impl From<super::wire::Error> for RaError {
    fn from(e: super::wire::Error) -> Self {
        RaError::Protocol(e.to_string())
    }
}
