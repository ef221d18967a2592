// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! SEV-SNP remote attestation drivers.
//!
//! Report retrieval and appraisal are both delegated to the local
//! snp-attestd service; the drivers contribute the challenge/response
//! sequencing and the channel binding of the report's REPORT_DATA field.

pub mod attestd;
pub mod messages;
mod policy;
mod prover;
mod verifier;

pub use attestd::AttestdSocket;
pub use policy::{assemble_policies, pad_report_data, REPORT_DATA_LEN};
pub use prover::SnpProver;
pub use verifier::SnpVerifier;

use openssl::x509::X509;

/// Identifier of this RA suite during suite negotiation.
pub const SNP_RA_ID: &str = "SEV-SNP";

/// Default TCP port of the local snp-attestd service.
pub const ATTESTD_PORT: u16 = 6778;

/// SNP challenge nonces are 32 bytes.
pub const SNP_NONCE_LEN: usize = 32;

/// Shared configuration of both SNP drivers: this endpoint's transport
/// certificate and the address of the local snp-attestd service.
#[derive(Clone, Debug)]
pub struct SnpConfig {
    pub local_certificate: X509,
    pub attestd_host: String,
    pub attestd_port: u16,
}

impl SnpConfig {
    pub fn new(local_certificate: X509) -> Self {
        SnpConfig {
            local_certificate,
            attestd_host: "127.0.0.1".to_string(),
            attestd_port: ATTESTD_PORT,
        }
    }
}
