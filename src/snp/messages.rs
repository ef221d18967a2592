// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Wire codec for the SEV-SNP RA message envelope.

use crate::driver::wire::{ByteReader, ByteWriter, Error};

const TAG_CHALLENGE: u8 = 0x01;
const TAG_RESPONSE: u8 = 0x02;
const TAG_RESULT: u8 = 0x03;

/// Challenge sent verifier → prover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnpChallenge {
    pub nonce: Vec<u8>,
}

/// Attestation report sent prover → verifier, opaque at this layer; the
/// verifier hands it to snp-attestd for appraisal together with the VCEK
/// certificate the report's signature chains to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnpResponse {
    pub report: Vec<u8>,
    pub vcek_cert: Vec<u8>,
}

/// Terminal verdict sent verifier → prover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnpResult {
    pub result: bool,
}

/// The tagged envelope delegated between the two SNP drivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnpMessage {
    Challenge(SnpChallenge),
    Response(SnpResponse),
    Result(SnpResult),
}

impl SnpMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            SnpMessage::Challenge(c) => {
                w.u8(TAG_CHALLENGE);
                w.vec32(&c.nonce);
            }
            SnpMessage::Response(r) => {
                w.u8(TAG_RESPONSE);
                w.vec32(&r.report);
                w.vec32(&r.vcek_cert);
            }
            SnpMessage::Result(res) => {
                w.u8(TAG_RESULT);
                w.u8(res.result as u8);
            }
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<SnpMessage, Error> {
        let mut r = ByteReader::new(buf);
        let msg = match r.u8("message tag")? {
            TAG_CHALLENGE => SnpMessage::Challenge(SnpChallenge {
                nonce: r.vec32("nonce")?,
            }),
            TAG_RESPONSE => SnpMessage::Response(SnpResponse {
                report: r.vec32("report")?,
                vcek_cert: r.vec32("vcek certificate")?,
            }),
            TAG_RESULT => SnpMessage::Result(SnpResult {
                result: match r.u8("result")? {
                    0 => false,
                    1 => true,
                    x => return Err(Error::Malformed(format!("bad result byte {x}"))),
                },
            }),
            x => return Err(Error::Malformed(format!("unknown message tag {x}"))),
        };
        r.expect_end("SNP message")?;
        Ok(msg)
    }
}
