// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;

use log::{debug, error, warn};
use openssl::hash::{hash, MessageDigest};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use openssl::x509::X509;

use super::errors::Error;
use super::messages::{AttestationType, TpmChallenge, TpmMessage, TpmResponse, TpmResult};
use super::pcr::PcrValues;
use super::quote::{SignatureScheme, TpmsAttest, TpmtSignature, TPM_ALG_SHA256};
use crate::dat::Dat;
use crate::driver::{
    calculate_binding_hash, DriverHandle, InboundQueue, NonceSource, OsRandom, RaError,
    RaVerifierDriver, RaVerifierListener,
};

/// TPM challenge nonces are SHA-1 sized.
const NONCE_LEN: usize = 20;

/// Verifier-side policy and key material for one TPM RA exchange.
#[derive(Clone, Debug)]
pub struct TpmVerifierConfig {
    /// This endpoint's own transport certificate; the prover hashes the
    /// same certificate from its side of the channel.
    pub local_certificate: X509,
    /// Trust anchors for the prover's attestation key certificate.
    pub ca_certificates: Vec<X509>,
    pub expected_atype: AttestationType,
    /// Register bit mask, only consulted for [`AttestationType::Advanced`].
    pub expected_pcr_mask: u32,
}

/// Verifier side of the TPM RA exchange: issues a nonce challenge,
/// validates the returned quote (certificate chain, structure, channel
/// binding, signature) and the reported PCR values against the golden
/// values from the peer's DAT, then sends the verdict.
pub struct TpmVerifier<L> {
    listener: L,
    queue: InboundQueue,
    config: Option<TpmVerifierConfig>,
    nonce_source: Box<dyn NonceSource>,
}

impl<L: RaVerifierListener> TpmVerifier<L> {
    pub fn new(listener: L) -> Self {
        Self::with_nonce_source(listener, Box::new(OsRandom))
    }

    pub fn with_nonce_source(listener: L, nonce_source: Box<dyn NonceSource>) -> Self {
        TpmVerifier {
            listener,
            queue: InboundQueue::new(),
            config: None,
            nonce_source,
        }
    }

    fn wait_for_message(&self) -> Result<TpmMessage, RaError> {
        let Some(raw) = self.queue.take() else {
            if self.queue.is_running() {
                self.listener.on_verifier_failed();
                return Err(RaError::Protocol(
                    "message wait interrupted".to_string(),
                ));
            }
            return Err(RaError::Cancelled);
        };
        match TpmMessage::decode(&raw) {
            Ok(msg) => Ok(msg),
            Err(e) => {
                self.listener.on_verifier_failed();
                Err(RaError::Protocol(format!("undecodable peer message: {e}")))
            }
        }
    }

    /// Emit the terminal result message and the matching listener signal.
    fn send_result(&self, result: bool) {
        let msg = TpmMessage::Result(TpmResult { result });
        self.listener.on_verifier_message(msg.encode());
        if result {
            self.listener.on_verifier_ok();
        } else {
            self.listener.on_verifier_failed();
        }
    }

    /// Is the attestation key certificate in the response signed by one of
    /// the configured trust anchors?  Issuer match by name, then a direct
    /// signature check against that anchor's key.
    fn aik_is_trusted(aik: &X509, ca_certificates: &[X509]) -> bool {
        for ca in ca_certificates {
            let issuer_matches = matches!(
                aik.issuer_name().try_cmp(ca.subject_name()),
                Ok(Ordering::Equal)
            );
            if !issuer_matches {
                continue;
            }
            match ca.public_key() {
                Ok(key) => {
                    if aik.verify(&key).unwrap_or(false) {
                        return true;
                    }
                }
                Err(e) => warn!("cannot extract CA public key: {e}"),
            }
        }
        false
    }

    /// Validate the quote cryptographically: attestation key trust, binary
    /// structure, channel binding and signature.  Returns the verdict;
    /// `Err` is reserved for crypto-library failures.
    fn check_signature(
        response: &TpmResponse,
        expected_binding: &[u8],
        config: &TpmVerifierConfig,
    ) -> Result<bool, RaError> {
        if response.quoted.is_empty()
            || response.signature.is_empty()
            || response.certificate.is_empty()
        {
            warn!("TPM verifier: response with empty report fields");
            return Ok(false);
        }

        let aik = match X509::from_der(&response.certificate) {
            Ok(c) => c,
            Err(e) => {
                warn!("TPM verifier: undecodable attestation key certificate: {e}");
                return Ok(false);
            }
        };
        if !Self::aik_is_trusted(&aik, &config.ca_certificates) {
            warn!("TPM verifier: attestation key certificate is not signed by a trusted CA");
            return Ok(false);
        }

        let signature = match TpmtSignature::from_tpm(&response.signature) {
            Ok(s) => s,
            Err(e) => {
                warn!("TPM verifier: undecodable TPMT_SIGNATURE: {e}");
                return Ok(false);
            }
        };
        let attest = match TpmsAttest::from_tpm(&response.quoted) {
            Ok(a) => a,
            Err(e) => {
                warn!("TPM verifier: undecodable TPMS_ATTEST: {e}");
                return Ok(false);
            }
        };

        if attest.extra_data != expected_binding {
            warn!("TPM verifier: quote is not bound to this channel instance");
            return Ok(false);
        }
        if signature.hash_alg != TPM_ALG_SHA256 {
            warn!(
                "TPM verifier: unsupported signature hash algorithm {:#06x}",
                signature.hash_alg
            );
            return Ok(false);
        }

        let key = aik.public_key()?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
        if signature.scheme == SignatureScheme::RsaPss {
            verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
            verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        }
        verifier.update(&response.quoted)?;
        if !verifier.verify(&signature.signature)? {
            warn!("TPM verifier: quote signature does not verify");
            return Ok(false);
        }

        Self::audit_pcr_digest(&attest, response);
        Ok(true)
    }

    /// Recompute the quote's pcrDigest from the individually reported
    /// register values.  The individual values are what the policy check
    /// compares, so a mismatch here is logged but does not fail the
    /// exchange.
    fn audit_pcr_digest(attest: &TpmsAttest, response: &TpmResponse) {
        let Some(selection) = attest.pcr_select.first() else {
            warn!("TPM verifier: quote carries no PCR selection");
            return;
        };
        if selection.hash_alg != TPM_ALG_SHA256 {
            warn!(
                "TPM verifier: PCR bank {:#06x} not auditable",
                selection.hash_alg
            );
            return;
        }

        let mut concatenated = Vec::new();
        for index in selection.indices() {
            match response.pcr_values.iter().find(|p| p.index == index) {
                Some(pcr) => concatenated.extend_from_slice(&pcr.value),
                None => {
                    warn!("TPM verifier: selected PCR {index} missing from report");
                    return;
                }
            }
        }
        match hash(MessageDigest::sha256(), &concatenated) {
            Ok(digest) => {
                if digest.as_ref() != attest.pcr_digest.as_slice() {
                    warn!("TPM verifier: pcrDigest does not match reported register values");
                }
            }
            Err(e) => warn!("TPM verifier: pcrDigest recomputation failed: {e}"),
        }
    }

    /// Compare the reported register values against the golden values from
    /// the peer's DAT, restricted by the configured attestation type.
    fn check_pcr_values(
        &self,
        response: &TpmResponse,
        config: &TpmVerifierConfig,
    ) -> Result<bool, RaError> {
        let raw_dat = self.listener.remote_peer_dat();
        let dat = Dat::decode(&raw_dat)?;
        let golden =
            PcrValues::from_dat(&dat).map_err(|e: Error| RaError::Validation(e.to_string()))?;
        let reported = PcrValues::from_report(&response.pcr_values)
            .map_err(|e| RaError::Validation(e.to_string()))?;
        debug!("TPM verifier: reported {reported}");
        reported
            .is_trusted(&golden, config.expected_atype, config.expected_pcr_mask)
            .map_err(|e| RaError::Validation(e.to_string()))
    }
}

impl<L: RaVerifierListener> RaVerifierDriver for TpmVerifier<L> {
    type Config = TpmVerifierConfig;

    fn set_config(&mut self, config: TpmVerifierConfig) {
        self.config = Some(config);
    }

    fn handle(&self) -> DriverHandle {
        self.queue.handle()
    }

    fn run(&mut self) -> Result<(), RaError> {
        let config = self
            .config
            .take()
            .ok_or_else(|| RaError::Protocol("verifier started without configuration".to_string()))?;

        let mut nonce = vec![0u8; NONCE_LEN];
        self.nonce_source.fill(&mut nonce)?;

        let challenge = TpmMessage::Challenge(TpmChallenge {
            atype: config.expected_atype,
            nonce: nonce.clone(),
            pcr_mask: config.expected_pcr_mask,
        });
        self.listener.on_verifier_message(challenge.encode());
        debug!("TPM verifier: challenge sent, waiting for report");

        let response = match self.wait_for_message()? {
            TpmMessage::Response(r) => r,
            other => {
                self.listener.on_verifier_failed();
                return Err(RaError::Protocol(format!(
                    "expected response, got {other:?}"
                )));
            }
        };

        let expected_binding = calculate_binding_hash(
            MessageDigest::sha1(),
            &nonce,
            &[&config.local_certificate.to_der()?],
        )?;

        if !Self::check_signature(&response, &expected_binding, &config)? {
            self.send_result(false);
            return Err(RaError::Validation(
                "quote signature validation failed".to_string(),
            ));
        }

        let trusted = match self.check_pcr_values(&response, &config) {
            Ok(t) => t,
            Err(e) => {
                error!("TPM verifier: PCR policy check failed: {e}");
                false
            }
        };

        self.send_result(trusted);
        if trusted {
            debug!("TPM verifier: peer platform is trusted");
            Ok(())
        } else {
            Err(RaError::Validation(
                "reported PCR values do not match golden values".to_string(),
            ))
        }
    }
}
