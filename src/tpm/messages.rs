// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Wire codec for the TPM RA message envelope and for the request/response
//! pair exchanged with the local TPM daemon.  All integers are big-endian;
//! byte fields carry a u32 length prefix.

use crate::driver::wire::{ByteReader, ByteWriter, Error};

const TAG_CHALLENGE: u8 = 0x01;
const TAG_RESPONSE: u8 = 0x02;
const TAG_RESULT: u8 = 0x03;

/// Which PCR registers the verifier expects to be attested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttestationType {
    /// The first 12 registers.
    Basic,
    /// All 24 registers.
    All,
    /// Registers selected by an explicit bit mask.
    Advanced,
}

impl AttestationType {
    fn to_wire(self) -> u8 {
        match self {
            AttestationType::Basic => 0,
            AttestationType::All => 1,
            AttestationType::Advanced => 2,
        }
    }

    fn from_wire(v: u8) -> Result<Self, Error> {
        match v {
            0 => Ok(AttestationType::Basic),
            1 => Ok(AttestationType::All),
            2 => Ok(AttestationType::Advanced),
            x => Err(Error::Malformed(format!("unknown attestation type {x}"))),
        }
    }
}

/// One reported PCR register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pcr {
    pub index: u32,
    pub value: Vec<u8>,
}

/// Challenge sent verifier → prover.  Immutable once sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmChallenge {
    pub atype: AttestationType,
    pub nonce: Vec<u8>,
    pub pcr_mask: u32,
}

/// Attestation report sent prover → verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmResponse {
    pub atype: AttestationType,
    pub hash_alg: String,
    pub quoted: Vec<u8>,
    pub signature: Vec<u8>,
    pub certificate: Vec<u8>,
    pub pcr_values: Vec<Pcr>,
}

/// Terminal verdict sent verifier → prover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TpmResult {
    pub result: bool,
}

/// The tagged envelope delegated between the two TPM drivers.  Decoding
/// yields exactly one variant; the drivers reject an unexpected variant
/// for their current protocol step instead of guessing intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TpmMessage {
    Challenge(TpmChallenge),
    Response(TpmResponse),
    Result(TpmResult),
}

impl TpmMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            TpmMessage::Challenge(c) => {
                w.u8(TAG_CHALLENGE);
                w.u8(c.atype.to_wire());
                w.vec32(&c.nonce);
                w.u32(c.pcr_mask);
            }
            TpmMessage::Response(r) => {
                w.u8(TAG_RESPONSE);
                encode_report_fields(&mut w, r);
            }
            TpmMessage::Result(res) => {
                w.u8(TAG_RESULT);
                w.u8(res.result as u8);
            }
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<TpmMessage, Error> {
        let mut r = ByteReader::new(buf);
        let msg = match r.u8("message tag")? {
            TAG_CHALLENGE => TpmMessage::Challenge(TpmChallenge {
                atype: AttestationType::from_wire(r.u8("attestation type")?)?,
                nonce: r.vec32("nonce")?,
                pcr_mask: r.u32("pcr mask")?,
            }),
            TAG_RESPONSE => TpmMessage::Response(decode_report_fields(&mut r)?),
            TAG_RESULT => TpmMessage::Result(TpmResult {
                result: match r.u8("result")? {
                    0 => false,
                    1 => true,
                    x => return Err(Error::Malformed(format!("bad result byte {x}"))),
                },
            }),
            x => return Err(Error::Malformed(format!("unknown message tag {x}"))),
        };
        r.expect_end("TPM message")?;
        Ok(msg)
    }
}

fn encode_report_fields(w: &mut ByteWriter, r: &TpmResponse) {
    w.u8(r.atype.to_wire());
    w.string32(&r.hash_alg);
    w.vec32(&r.quoted);
    w.vec32(&r.signature);
    w.vec32(&r.certificate);
    w.u32(r.pcr_values.len() as u32);
    for pcr in &r.pcr_values {
        w.u32(pcr.index);
        w.vec32(&pcr.value);
    }
}

fn decode_report_fields(r: &mut ByteReader) -> Result<TpmResponse, Error> {
    let atype = AttestationType::from_wire(r.u8("attestation type")?)?;
    let hash_alg = r.string32("hash algorithm")?;
    let quoted = r.vec32("quoted")?;
    let signature = r.vec32("signature")?;
    let certificate = r.vec32("certificate")?;
    let count = r.u32("pcr count")?;
    if count > 24 {
        return Err(Error::Malformed(format!("{count} PCR entries in report")));
    }
    let mut pcr_values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        pcr_values.push(Pcr {
            index: r.u32("pcr index")?,
            value: r.vec32("pcr value")?,
        });
    }
    Ok(TpmResponse {
        atype,
        hash_alg,
        quoted,
        signature,
        certificate,
        pcr_values,
    })
}

pub mod daemon {
    //! The request/response pair of the TPM daemon socket protocol.

    use super::*;

    /// Request code: remote attestation quote request.
    pub const CODE_ATTESTATION_REQ: u8 = 0x00;

    /// Request sent to the local TPM daemon.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct RemoteToTpm {
        pub atype: AttestationType,
        pub qualifying_data: Vec<u8>,
        pub pcr_mask: u32,
        pub code: u8,
    }

    impl RemoteToTpm {
        pub fn attestation_request(
            atype: AttestationType,
            qualifying_data: &[u8],
            pcr_mask: u32,
        ) -> RemoteToTpm {
            RemoteToTpm {
                atype,
                qualifying_data: qualifying_data.to_vec(),
                pcr_mask,
                code: CODE_ATTESTATION_REQ,
            }
        }

        pub fn encode(&self) -> Vec<u8> {
            let mut w = ByteWriter::new();
            w.u8(self.atype.to_wire());
            w.vec32(&self.qualifying_data);
            w.u32(self.pcr_mask);
            w.u8(self.code);
            w.into_bytes()
        }

        pub fn decode(buf: &[u8]) -> Result<RemoteToTpm, Error> {
            let mut r = ByteReader::new(buf);
            let req = RemoteToTpm {
                atype: AttestationType::from_wire(r.u8("attestation type")?)?,
                qualifying_data: r.vec32("qualifying data")?,
                pcr_mask: r.u32("pcr mask")?,
                code: r.u8("request code")?,
            };
            r.expect_end("RemoteToTpm")?;
            Ok(req)
        }
    }

    /// Response from the local TPM daemon; carries the same report fields
    /// as the RA response envelope.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct TpmToRemote {
        pub atype: AttestationType,
        pub hash_alg: String,
        pub quoted: Vec<u8>,
        pub signature: Vec<u8>,
        pub certificate: Vec<u8>,
        pub pcr_values: Vec<Pcr>,
    }

    impl TpmToRemote {
        pub fn encode(&self) -> Vec<u8> {
            let mut w = ByteWriter::new();
            let fields = TpmResponse {
                atype: self.atype,
                hash_alg: self.hash_alg.clone(),
                quoted: self.quoted.clone(),
                signature: self.signature.clone(),
                certificate: self.certificate.clone(),
                pcr_values: self.pcr_values.clone(),
            };
            encode_report_fields(&mut w, &fields);
            w.into_bytes()
        }

        pub fn decode(buf: &[u8]) -> Result<TpmToRemote, Error> {
            let mut r = ByteReader::new(buf);
            let fields = decode_report_fields(&mut r)?;
            r.expect_end("TpmToRemote")?;
            Ok(TpmToRemote {
                atype: fields.atype,
                hash_alg: fields.hash_alg,
                quoted: fields.quoted,
                signature: fields.signature,
                certificate: fields.certificate,
                pcr_values: fields.pcr_values,
            })
        }
    }

    impl From<TpmToRemote> for TpmResponse {
        fn from(t: TpmToRemote) -> Self {
            TpmResponse {
                atype: t.atype,
                hash_alg: t.hash_alg,
                quoted: t.quoted,
                signature: t.signature,
                certificate: t.certificate,
                pcr_values: t.pcr_values,
            }
        }
    }
}
