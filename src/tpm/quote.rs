// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Parsers for the marshalled TPM 2.0 structures carried inside a quote
//! response: `TPMS_ATTEST` (the signed quote body) and `TPMT_SIGNATURE`.
//! Layouts per TPM 2.0 Library Specification Part 2 (big-endian, TPM2B
//! fields carry a u16 size).  Malformed bytes are a decode error which
//! callers treat as a verification failure, never a crash.

use crate::driver::wire::{ByteReader, Error};

pub const TPM_GENERATED: u32 = 0xff54_4347;
pub const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;

pub const TPM_ALG_SHA256: u16 = 0x000b;
pub const TPM_ALG_RSASSA: u16 = 0x0014;
pub const TPM_ALG_RSAPSS: u16 = 0x0016;

/// TPMS_CLOCK_INFO
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

/// One TPMS_PCR_SELECTION entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrSelection {
    pub hash_alg: u16,
    /// Bit `i` of byte `i / 8` selects PCR `i`.
    pub select: Vec<u8>,
}

impl PcrSelection {
    /// Selected register indices, ascending.
    pub fn indices(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for (byte_idx, byte) in self.select.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    out.push((byte_idx * 8 + bit) as u32);
                }
            }
        }
        out
    }
}

/// TPMS_ATTEST with `attested` restricted to the quote variant
/// (TPMS_QUOTE_INFO), the only one this protocol produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmsAttest {
    pub qualified_signer: Vec<u8>,
    /// Qualifying data the quote was requested over; carries the channel
    /// binding hash.
    pub extra_data: Vec<u8>,
    pub clock_info: ClockInfo,
    pub firmware_version: u64,
    pub pcr_select: Vec<PcrSelection>,
    pub pcr_digest: Vec<u8>,
}

impl TpmsAttest {
    pub fn from_tpm(buf: &[u8]) -> Result<TpmsAttest, Error> {
        let mut r = ByteReader::new(buf);

        let magic = r.u32("magic")?;
        if magic != TPM_GENERATED {
            return Err(Error::Malformed(format!(
                "bad TPMS_ATTEST magic {magic:#010x}"
            )));
        }
        let st = r.u16("attest type")?;
        if st != TPM_ST_ATTEST_QUOTE {
            return Err(Error::Malformed(format!(
                "unsupported attestation structure type {st:#06x}"
            )));
        }

        let qualified_signer = r.vec16("qualified signer")?;
        let extra_data = r.vec16("extra data")?;
        let clock_info = ClockInfo {
            clock: r.u64("clock")?,
            reset_count: r.u32("reset count")?,
            restart_count: r.u32("restart count")?,
            safe: r.u8("safe")? != 0,
        };
        let firmware_version = r.u64("firmware version")?;

        let count = r.u32("pcr selection count")?;
        if count > 16 {
            return Err(Error::Malformed(format!("{count} PCR selections")));
        }
        let mut pcr_select = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let hash_alg = r.u16("selection hash alg")?;
            let size = r.u8("sizeofSelect")? as usize;
            pcr_select.push(PcrSelection {
                hash_alg,
                select: r.bytes(size, "pcr select bits")?.to_vec(),
            });
        }
        let pcr_digest = r.vec16("pcr digest")?;
        r.expect_end("TPMS_ATTEST")?;

        Ok(TpmsAttest {
            qualified_signer,
            extra_data,
            clock_info,
            firmware_version,
            pcr_select,
            pcr_digest,
        })
    }
}

/// Signature scheme of a TPMT_SIGNATURE; only the two RSA schemes the TPM
/// daemon emits are accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    RsaSsa,
    RsaPss,
}

/// TPMT_SIGNATURE restricted to TPMS_SIGNATURE_RSASSA / _RSAPSS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmtSignature {
    pub scheme: SignatureScheme,
    /// TPM_ALG_ID of the hash the signature was produced over.
    pub hash_alg: u16,
    pub signature: Vec<u8>,
}

impl TpmtSignature {
    pub fn from_tpm(buf: &[u8]) -> Result<TpmtSignature, Error> {
        let mut r = ByteReader::new(buf);
        let scheme = match r.u16("signature alg")? {
            TPM_ALG_RSASSA => SignatureScheme::RsaSsa,
            TPM_ALG_RSAPSS => SignatureScheme::RsaPss,
            x => {
                return Err(Error::Malformed(format!(
                    "unknown or unimplemented signature scheme {x:#06x}"
                )))
            }
        };
        let hash_alg = r.u16("signature hash alg")?;
        let signature = r.vec16("signature")?;
        r.expect_end("TPMT_SIGNATURE")?;
        Ok(TpmtSignature {
            scheme,
            hash_alg,
            signature,
        })
    }
}
