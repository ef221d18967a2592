// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! JSON messages of the CMC attestation API.  The same documents travel
//! peer-to-peer and between a driver and its local CMC service; the
//! drivers forward them without looking inside the report blob.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::driver::wire::Error;

pub const ATTESTATION_REQUEST_TYPE: &str = "Attestation Report Request";
pub const ATTESTATION_RESPONSE_TYPE: &str = "Attestation Report Response";
pub const VERIFICATION_REQUEST_TYPE: &str = "Verification Request";
pub const VERIFICATION_RESULT_TYPE: &str = "Verification Result";

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8], expected_type: &str, kind: impl FnOnce(&T) -> bool) -> Result<T, Error> {
    let msg: T = serde_json::from_slice(raw)
        .map_err(|e| Error::Malformed(format!("undecodable {expected_type}: {e}")))?;
    if !kind(&msg) {
        return Err(Error::Malformed(format!("not a {expected_type}")));
    }
    Ok(msg)
}

fn encode<T: Serialize>(msg: &T) -> Vec<u8> {
    // the message types serialize infallibly
    serde_json::to_vec(msg).unwrap_or_default()
}

/// Challenge carrying a hex-encoded nonce; sent verifier → prover and
/// forwarded by the prover to its local CMC service.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct AttestationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
}

impl AttestationRequest {
    pub fn new(nonce: Vec<u8>) -> Self {
        AttestationRequest {
            kind: ATTESTATION_REQUEST_TYPE.to_string(),
            nonce,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        decode(raw, ATTESTATION_REQUEST_TYPE, |m: &Self| {
            m.kind == ATTESTATION_REQUEST_TYPE
        })
    }
}

/// Report produced by the CMC service; the report blob stays opaque.
#[derive(Serialize, Deserialize, Debug)]
pub struct AttestationResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "attestationReport")]
    pub attestation_report: Box<RawValue>,
}

impl AttestationResponse {
    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        decode(raw, ATTESTATION_RESPONSE_TYPE, |m: &Self| {
            m.kind == ATTESTATION_RESPONSE_TYPE
        })
    }
}

/// Appraisal request sent verifier → CMC service.
#[derive(Serialize, Deserialize, Debug)]
pub struct VerificationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "attestationReport")]
    pub attestation_report: Box<RawValue>,
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
}

impl VerificationRequest {
    pub fn new(attestation_report: Box<RawValue>, nonce: Vec<u8>) -> Self {
        VerificationRequest {
            kind: VERIFICATION_REQUEST_TYPE.to_string(),
            attestation_report,
            nonce,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }
}

/// Appraisal verdict; emitted by the CMC service and forwarded verbatim
/// to the prover as the terminal result message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "raSuccessful")]
    pub ra_successful: bool,
    #[serde(rename = "certificationLevel", default)]
    pub certification_level: u32,
    #[serde(default)]
    pub log: Vec<String>,
}

impl VerificationResult {
    pub fn failure(reason: String) -> Self {
        VerificationResult {
            kind: VERIFICATION_RESULT_TYPE.to_string(),
            ra_successful: false,
            certification_level: 0,
            log: vec![reason],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        decode(raw, VERIFICATION_RESULT_TYPE, |m: &Self| {
            m.kind == VERIFICATION_RESULT_TYPE
        })
    }
}
