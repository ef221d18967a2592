// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::{debug, error};
use openssl::hash::MessageDigest;

use super::attestd::AttestdSocket;
use super::messages::{SnpChallenge, SnpMessage, SnpResult};
use super::policy::{assemble_policies, pad_report_data};
use super::{SnpConfig, SNP_NONCE_LEN};
use crate::dat::Dat;
use crate::driver::{
    calculate_binding_hash, DriverHandle, InboundQueue, NonceSource, OsRandom, RaError,
    RaVerifierDriver, RaVerifierListener,
};

/// Verifier side of the SEV-SNP RA exchange: issues a nonce challenge
/// and delegates appraisal of the returned report to snp-attestd, using
/// the policy set from the peer's DAT plus the channel binding pin.
pub struct SnpVerifier<L> {
    listener: L,
    queue: InboundQueue,
    config: Option<SnpConfig>,
    nonce_source: Box<dyn NonceSource>,
}

impl<L: RaVerifierListener> SnpVerifier<L> {
    pub fn new(listener: L) -> Self {
        Self::with_nonce_source(listener, Box::new(OsRandom))
    }

    pub fn with_nonce_source(listener: L, nonce_source: Box<dyn NonceSource>) -> Self {
        SnpVerifier {
            listener,
            queue: InboundQueue::new(),
            config: None,
            nonce_source,
        }
    }

    fn wait_for_message(&self) -> Result<SnpMessage, RaError> {
        let Some(raw) = self.queue.take() else {
            if self.queue.is_running() {
                self.listener.on_verifier_failed();
                return Err(RaError::Protocol(
                    "message wait interrupted".to_string(),
                ));
            }
            return Err(RaError::Cancelled);
        };
        match SnpMessage::decode(&raw) {
            Ok(msg) => Ok(msg),
            Err(e) => {
                self.listener.on_verifier_failed();
                Err(RaError::Protocol(format!("undecodable peer message: {e}")))
            }
        }
    }

    fn send_result(&self, result: bool) {
        let msg = SnpMessage::Result(SnpResult { result });
        self.listener.on_verifier_message(msg.encode());
        if result {
            self.listener.on_verifier_ok();
        } else {
            self.listener.on_verifier_failed();
        }
    }
}

impl<L: RaVerifierListener> RaVerifierDriver for SnpVerifier<L> {
    type Config = SnpConfig;

    fn set_config(&mut self, config: SnpConfig) {
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

        let Some(prover_cert) = self.listener.remote_peer_certificate() else {
            self.listener.on_verifier_failed();
            return Err(RaError::MissingPeerCertificate);
        };

        let mut nonce = vec![0u8; SNP_NONCE_LEN];
        self.nonce_source.fill(&mut nonce)?;
        self.listener.on_verifier_message(
            SnpMessage::Challenge(SnpChallenge {
                nonce: nonce.clone(),
            })
            .encode(),
        );
        debug!("SNP verifier: challenge sent, waiting for report");

        let response = match self.wait_for_message()? {
            SnpMessage::Response(r) => r,
            other => {
                self.listener.on_verifier_failed();
                return Err(RaError::Protocol(format!(
                    "expected response, got {other:?}"
                )));
            }
        };

        let binding = calculate_binding_hash(
            MessageDigest::sha3_512(),
            &nonce,
            &[
                &config.local_certificate.to_der()?,
                &prover_cert.to_der()?,
            ],
        )?;
        let report_data = pad_report_data(&binding);

        let raw_dat = self.listener.remote_peer_dat();
        let dat_policies = match Dat::decode(&raw_dat).and_then(|dat| {
            dat.snp_policies().map(<[serde_json::Value]>::to_vec)
        }) {
            Ok(p) => p,
            Err(e) => {
                error!("SNP verifier: no usable policies in peer DAT: {e}");
                self.send_result(false);
                return Err(e.into());
            }
        };
        let policies = assemble_policies(&dat_policies, &report_data);

        let verdict = AttestdSocket::connect(&config.attestd_host, config.attestd_port)
            .and_then(|mut socket| {
                socket.verify_report(&response.report, &response.vcek_cert, &policies)
            });
        let verdict = match verdict {
            Ok(v) => v,
            Err(e) => {
                error!("SNP verifier: report appraisal unavailable: {e}");
                self.send_result(false);
                return Err(e);
            }
        };

        self.send_result(verdict);
        if verdict {
            debug!("SNP verifier: peer platform is trusted");
            Ok(())
        } else {
            Err(RaError::Validation(
                "snp-attestd rejected the report".to_string(),
            ))
        }
    }
}
