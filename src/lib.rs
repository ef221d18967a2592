// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable remote attestation (RA) drivers for a secure-channel protocol.
//!
//! Each backend (TPM2, SEV-SNP, delegated CMC service) provides a paired
//! prover and verifier driver.  The surrounding connection state machine
//! starts one driver per role on its own thread, forwards received peer
//! messages to it via [`driver::DriverHandle::delegate`] and receives
//! outbound messages and the terminal attestation verdict through the
//! driver's listener interface.
//!
//! The API allows:
//! * Running the prover side of a challenge-response attestation exchange
//!   against a local trusted backend (TPM daemon, snp-attestd, CMC)
//! * Running the verifier side: nonce generation, challenge emission and
//!   cryptographic validation of the returned attestation report
//! * Extracting golden values and policy predicates from the peer's
//!   dynamic attribute token (DAT)

pub mod cmc;
pub mod dat;
pub mod driver;
pub mod snp;
pub mod tpm;
