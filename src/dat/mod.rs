// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Extraction of reference measurements from the peer's dynamic attribute
//! token (DAT).
//!
//! The DAT is a signed JWT, but its signature is deliberately NOT checked
//! here: that trust decision belongs to the DAPS component that issued
//! and validated the token upstream.  This module only reads the named
//! claims the RA verifiers need — `pcrGoldenValues` for the TPM path and
//! `snpPolicies` for the SEV-SNP path.  A missing or malformed claim is
//! an explicit error, never a silent empty default.

pub use self::errors::Error;

mod errors;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(rename = "pcrGoldenValues")]
    pcr_golden_values: Option<Vec<String>>,

    #[serde(rename = "snpPolicies")]
    snp_policies: Option<Vec<serde_json::Value>>,
}

/// The claim set of a peer DAT, decoded without signature verification.
#[derive(Debug)]
pub struct Dat {
    claims: RawClaims,
}

impl Dat {
    /// Decode the claim set from the raw token bytes.
    pub fn decode(dat: &[u8]) -> Result<Dat, Error> {
        let token = std::str::from_utf8(dat)
            .map_err(|_| Error::Syntax("DAT is not valid UTF-8".to_string()))?;

        // signature trust is established upstream; here the token is only
        // a claim carrier
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<RawClaims>(
            token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(|e| Error::Syntax(e.to_string()))?;

        Ok(Dat {
            claims: data.claims,
        })
    }

    /// The `pcrGoldenValues` claim: 24 base64url-encoded PCR digests.
    pub fn pcr_golden_values(&self) -> Result<&[String], Error> {
        self.claims
            .pcr_golden_values
            .as_deref()
            .ok_or_else(|| Error::MissingClaim("DAT does not contain golden values".to_string()))
    }

    /// The `snpPolicies` claim: SEV-SNP policy predicate objects, passed
    /// through opaquely to snp-attestd.
    pub fn snp_policies(&self) -> Result<&[serde_json::Value], Error> {
        self.claims
            .snp_policies
            .as_deref()
            .ok_or_else(|| Error::MissingClaim("DAT does not contain SEV-SNP policies".to_string()))
    }
}
