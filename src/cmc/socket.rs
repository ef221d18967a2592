// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::debug;
use serde_json::value::RawValue;

use super::messages::{
    AttestationRequest, AttestationResponse, VerificationRequest, VerificationResult,
};
use crate::driver::{FramedStream, RaError};

/// Blocking client for the local CMC service.  One JSON document per
/// length-prefixed frame, one request/response exchange per call.
pub struct CmcSocket {
    stream: FramedStream,
}

impl CmcSocket {
    pub fn connect(host: &str, port: u16) -> Result<CmcSocket, RaError> {
        let stream = FramedStream::connect(host, port)?;
        Ok(CmcSocket { stream })
    }

    /// Ask the CMC service for an attestation report over the given nonce.
    pub fn request_attestation(
        &mut self,
        nonce: &[u8],
    ) -> Result<AttestationResponse, RaError> {
        debug!("requesting attestation report from CMC");
        let request = AttestationRequest::new(nonce.to_vec());
        let reply = self.stream.request(&request.encode())?;
        Ok(AttestationResponse::decode(&reply)?)
    }

    /// Submit a peer's report for appraisal.
    pub fn request_verification(
        &mut self,
        attestation_report: Box<RawValue>,
        nonce: &[u8],
    ) -> Result<VerificationResult, RaError> {
        debug!("submitting attestation report to CMC for appraisal");
        let request = VerificationRequest::new(attestation_report, nonce.to_vec());
        let reply = self.stream.request(&request.encode())?;
        Ok(VerificationResult::decode(&reply)?)
    }
}
