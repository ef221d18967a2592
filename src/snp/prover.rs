// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::{debug, warn};
use openssl::hash::MessageDigest;

use super::attestd::AttestdSocket;
use super::messages::{SnpMessage, SnpResponse};
use super::policy::pad_report_data;
use super::{SnpConfig, SNP_NONCE_LEN};
use crate::driver::{
    calculate_binding_hash, DriverHandle, InboundQueue, RaError, RaProverDriver,
    RaProverListener,
};

/// Prover side of the SEV-SNP RA exchange: binds the verifier's nonce to
/// both transport certificates with SHA3-512, fetches an attestation
/// report over that digest from the local snp-attestd service and
/// forwards it, then waits for the verdict.
pub struct SnpProver<L> {
    listener: L,
    queue: InboundQueue,
    config: Option<SnpConfig>,
}

impl<L: RaProverListener> SnpProver<L> {
    pub fn new(listener: L) -> Self {
        SnpProver {
            listener,
            queue: InboundQueue::new(),
            config: None,
        }
    }

    fn wait_for_message(&self) -> Result<SnpMessage, RaError> {
        let Some(raw) = self.queue.take() else {
            if self.queue.is_running() {
                self.listener.on_prover_failed();
                return Err(RaError::Protocol(
                    "message wait interrupted".to_string(),
                ));
            }
            return Err(RaError::Cancelled);
        };
        match SnpMessage::decode(&raw) {
            Ok(msg) => Ok(msg),
            Err(e) => {
                self.listener.on_prover_failed();
                Err(RaError::Protocol(format!("undecodable peer message: {e}")))
            }
        }
    }

    fn fail<T>(&self, err: RaError) -> Result<T, RaError> {
        self.listener.on_prover_failed();
        Err(err)
    }
}

impl<L: RaProverListener> RaProverDriver for SnpProver<L> {
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
            .ok_or_else(|| RaError::Protocol("prover started without configuration".to_string()))?;

        // both transport certificates enter the binding digest, so bail out
        // early if the channel cannot name its peer
        let Some(verifier_cert) = self.listener.remote_peer_certificate() else {
            return self.fail(RaError::MissingPeerCertificate);
        };

        debug!("SNP prover: waiting for challenge");
        let challenge = match self.wait_for_message()? {
            SnpMessage::Challenge(c) => c,
            other => {
                return self.fail(RaError::Protocol(format!(
                    "expected challenge, got {other:?}"
                )))
            }
        };
        if challenge.nonce.len() != SNP_NONCE_LEN {
            return self.fail(RaError::Protocol(format!(
                "challenge nonce of {} bytes",
                challenge.nonce.len()
            )));
        }

        let binding = calculate_binding_hash(
            MessageDigest::sha3_512(),
            &challenge.nonce,
            &[
                &verifier_cert.to_der()?,
                &config.local_certificate.to_der()?,
            ],
        )?;
        let report_data = pad_report_data(&binding);

        let report = AttestdSocket::connect(&config.attestd_host, config.attestd_port)
            .and_then(|mut socket| socket.get_report(&report_data));
        let (report, vcek_cert) = match report {
            Ok(r) => r,
            Err(e) => {
                warn!("SNP prover: could not obtain report: {e}");
                return self.fail(e);
            }
        };

        let response = SnpMessage::Response(SnpResponse { report, vcek_cert });
        self.listener.on_prover_message(response.encode());

        debug!("SNP prover: report sent, waiting for verdict");
        let verdict = match self.wait_for_message()? {
            SnpMessage::Result(r) => r,
            other => {
                return self.fail(RaError::Protocol(format!(
                    "expected result, got {other:?}"
                )))
            }
        };

        if verdict.result {
            debug!("SNP prover: attestation accepted");
            self.listener.on_prover_ok();
            Ok(())
        } else {
            self.fail(RaError::Validation(
                "attestation rejected by verifier".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::base64::Bytes;
    use crate::snp::messages::{SnpChallenge, SnpResult};
    use openssl::x509::X509;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    const TEST_TRANSPORT_CERT: &[u8; 829] = include_bytes!("../../testdata/transport.der");
    const TEST_AIK_CERT: &[u8; 724] = include_bytes!("../../testdata/aik.der");

    #[derive(Default)]
    struct ListenerState {
        messages: Mutex<Vec<Vec<u8>>>,
        oks: AtomicUsize,
        fails: AtomicUsize,
    }

    struct TestListener {
        state: Arc<ListenerState>,
        peer_cert: Option<X509>,
    }

    impl RaProverListener for TestListener {
        fn on_prover_message(&self, message: Vec<u8>) {
            self.state.messages.lock().unwrap().push(message);
        }
        fn on_prover_ok(&self) {
            self.state.oks.fetch_add(1, Ordering::SeqCst);
        }
        fn on_prover_failed(&self) {
            self.state.fails.fetch_add(1, Ordering::SeqCst);
        }
        fn remote_peer_certificate(&self) -> Option<X509> {
            self.peer_cert.clone()
        }
    }

    fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut payload).unwrap();
        payload
    }

    fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream.write_all(&(payload.len() as u32).to_be_bytes()).unwrap();
        stream.write_all(payload).unwrap();
    }

    /// One-shot snp-attestd stand-in answering a single GetReport.
    fn fake_attestd(report: Vec<u8>, vcek_cert: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: serde_json::Value =
                serde_json::from_slice(&read_frame(&mut stream)).unwrap();
            assert_eq!(request["method"], "GetReport");
            assert_eq!(request["includeVcekCert"], true);
            let reply = serde_json::json!({
                "report": Bytes::from(report),
                "vcekCert": Bytes::from(vcek_cert),
            });
            write_frame(&mut stream, &serde_json::to_vec(&reply).unwrap());
        });
        port
    }

    fn config_with_port(port: u16) -> SnpConfig {
        let mut config =
            SnpConfig::new(X509::from_der(TEST_AIK_CERT.as_slice()).unwrap());
        config.attestd_port = port;
        config
    }

    #[test]
    fn prover_forwards_report_and_accepts_verdict() {
        let report = vec![0xab; 1184];
        let vcek = vec![0x30, 0x82, 0x01, 0x00];
        let port = fake_attestd(report.clone(), vcek.clone());

        let state = Arc::new(ListenerState::default());
        let mut prover = SnpProver::new(TestListener {
            state: state.clone(),
            peer_cert: Some(X509::from_der(TEST_TRANSPORT_CERT.as_slice()).unwrap()),
        });
        prover.set_config(config_with_port(port));

        let handle = prover.handle();
        handle.delegate(
            SnpMessage::Challenge(SnpChallenge {
                nonce: vec![0u8; 32],
            })
            .encode(),
        );
        handle.delegate(SnpMessage::Result(SnpResult { result: true }).encode());

        assert!(prover.run().is_ok());
        assert_eq!(state.oks.load(Ordering::SeqCst), 1);
        assert_eq!(state.fails.load(Ordering::SeqCst), 0);

        let messages = state.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        match SnpMessage::decode(&messages[0]).unwrap() {
            SnpMessage::Response(r) => {
                assert_eq!(r.report, report);
                assert_eq!(r.vcek_cert, vcek);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn missing_peer_certificate_fails_before_the_challenge() {
        let state = Arc::new(ListenerState::default());
        let mut prover = SnpProver::new(TestListener {
            state: state.clone(),
            peer_cert: None,
        });
        prover.set_config(config_with_port(1));

        assert!(matches!(
            prover.run(),
            Err(RaError::MissingPeerCertificate)
        ));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_nonce_is_rejected() {
        let state = Arc::new(ListenerState::default());
        let mut prover = SnpProver::new(TestListener {
            state: state.clone(),
            peer_cert: Some(X509::from_der(TEST_TRANSPORT_CERT.as_slice()).unwrap()),
        });
        prover.set_config(config_with_port(1));
        prover.handle().delegate(
            SnpMessage::Challenge(SnpChallenge {
                nonce: vec![0u8; 20],
            })
            .encode(),
        );

        assert!(matches!(prover.run(), Err(RaError::Protocol(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn negative_verdict_fails_the_prover() {
        let port = fake_attestd(vec![0x01; 16], vec![]);

        let state = Arc::new(ListenerState::default());
        let mut prover = SnpProver::new(TestListener {
            state: state.clone(),
            peer_cert: Some(X509::from_der(TEST_TRANSPORT_CERT.as_slice()).unwrap()),
        });
        prover.set_config(config_with_port(port));

        let handle = prover.handle();
        handle.delegate(
            SnpMessage::Challenge(SnpChallenge {
                nonce: vec![0u8; 32],
            })
            .encode(),
        );
        handle.delegate(SnpMessage::Result(SnpResult { result: false }).encode());

        assert!(matches!(prover.run(), Err(RaError::Validation(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }
}
