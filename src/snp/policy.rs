// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use serde_json::{json, Value};

use crate::driver::base64::Bytes;

/// The REPORT_DATA field of an SNP report is 64 bytes; shorter binding
/// digests are zero-padded on the right.
pub const REPORT_DATA_LEN: usize = 64;

pub fn pad_report_data(digest: &[u8]) -> [u8; REPORT_DATA_LEN] {
    let mut out = [0u8; REPORT_DATA_LEN];
    let n = digest.len().min(REPORT_DATA_LEN);
    out[..n].copy_from_slice(&digest[..n]);
    out
}

/// The policy set submitted to snp-attestd: the golden-value policies
/// from the peer's DAT plus one synthetic equals policy pinning
/// REPORT_DATA to the channel binding digest.  The synthetic policy is
/// what makes the report fresh and bound to this channel instance, so it
/// is always appended regardless of what the DAT asks for.
pub fn assemble_policies(dat_policies: &[Value], report_data: &[u8; REPORT_DATA_LEN]) -> Vec<Value> {
    let mut policies = dat_policies.to_vec();
    policies.push(json!({
        "type": "equals",
        "id": "Report data matches the channel binding",
        "params": {
            "field": "REPORT_DATA",
            "referenceValue": Bytes::from(report_data.as_slice()),
        },
    }));
    policies
}
