// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::debug;
use serde::{Deserialize, Serialize};

use crate::driver::base64::Bytes;
use crate::driver::{FramedStream, RaError};

/// One snp-attestd request, dispatched on the `method` field.
#[derive(Serialize, Debug)]
#[serde(tag = "method")]
enum AttestdRequest<'a> {
    GetReport {
        #[serde(rename = "reportData")]
        report_data: Bytes,
        #[serde(rename = "includeVcekCert")]
        include_vcek_cert: bool,
    },
    VerifyReport {
        report: Bytes,
        #[serde(rename = "vcekCert")]
        vcek_cert: Bytes,
        policies: &'a [serde_json::Value],
    },
}

#[derive(Deserialize, Debug)]
struct GetReportResponse {
    report: Bytes,
    #[serde(rename = "vcekCert", default)]
    vcek_cert: Bytes,
}

#[derive(Deserialize, Debug)]
struct VerifyReportResponse {
    ok: bool,
}

/// Blocking client for the snp-attestd service.  Requests and responses
/// are JSON documents in length-prefixed frames.
pub struct AttestdSocket {
    stream: FramedStream,
}

impl AttestdSocket {
    pub fn connect(host: &str, port: u16) -> Result<AttestdSocket, RaError> {
        let stream = FramedStream::connect(host, port)?;
        Ok(AttestdSocket { stream })
    }

    fn request<T: for<'de> Deserialize<'de>>(
        &mut self,
        request: &AttestdRequest<'_>,
    ) -> Result<T, RaError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| RaError::Protocol(format!("cannot encode attestd request: {e}")))?;
        let reply = self.stream.request(&payload)?;
        serde_json::from_slice(&reply)
            .map_err(|e| RaError::Protocol(format!("undecodable attestd response: {e}")))
    }

    /// Fetch an attestation report over the given report data, together
    /// with the VCEK certificate its signature chains to.
    pub fn get_report(&mut self, report_data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), RaError> {
        debug!("requesting SNP report from snp-attestd");
        let response: GetReportResponse = self.request(&AttestdRequest::GetReport {
            report_data: Bytes::from(report_data),
            include_vcek_cert: true,
        })?;
        Ok((response.report.into_vec(), response.vcek_cert.into_vec()))
    }

    /// Appraise a report against the given policies; every policy must
    /// hold for a positive verdict.
    pub fn verify_report(
        &mut self,
        report: &[u8],
        vcek_cert: &[u8],
        policies: &[serde_json::Value],
    ) -> Result<bool, RaError> {
        debug!("submitting SNP report to snp-attestd for appraisal");
        let response: VerifyReportResponse = self.request(&AttestdRequest::VerifyReport {
            report: Bytes::from(report),
            vcek_cert: Bytes::from(vcek_cert),
            policies,
        })?;
        Ok(response.ok)
    }
}
