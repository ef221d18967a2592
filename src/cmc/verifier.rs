// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::{debug, error};

use super::messages::{AttestationRequest, AttestationResponse, VerificationResult};
use super::socket::CmcSocket;
use super::CMC_NONCE_LEN;
use crate::driver::{
    DriverHandle, InboundQueue, NonceSource, OsRandom, RaError, RaVerifierDriver,
    RaVerifierListener,
};

/// Address of the local CMC service the verifier delegates appraisal to.
#[derive(Clone, Debug)]
pub struct CmcVerifierConfig {
    pub cmc_host: String,
    pub cmc_port: u16,
}

impl Default for CmcVerifierConfig {
    fn default() -> Self {
        CmcVerifierConfig {
            cmc_host: "127.0.0.1".to_string(),
            cmc_port: super::CMC_PORT,
        }
    }
}

/// Verifier side of the delegated CMC exchange: issues a nonce challenge,
/// hands the returned report to the local CMC service for appraisal and
/// forwards the service's verdict to the prover as the terminal message.
pub struct CmcVerifier<L> {
    listener: L,
    queue: InboundQueue,
    config: CmcVerifierConfig,
    nonce_source: Box<dyn NonceSource>,
}

impl<L: RaVerifierListener> CmcVerifier<L> {
    pub fn new(listener: L) -> Self {
        Self::with_nonce_source(listener, Box::new(OsRandom))
    }

    pub fn with_nonce_source(listener: L, nonce_source: Box<dyn NonceSource>) -> Self {
        CmcVerifier {
            listener,
            queue: InboundQueue::new(),
            config: CmcVerifierConfig::default(),
            nonce_source,
        }
    }

    fn wait_for_raw(&self) -> Result<Vec<u8>, RaError> {
        let Some(raw) = self.queue.take() else {
            if self.queue.is_running() {
                self.listener.on_verifier_failed();
                return Err(RaError::Protocol(
                    "message wait interrupted".to_string(),
                ));
            }
            return Err(RaError::Cancelled);
        };
        Ok(raw)
    }

    /// Forward the verdict to the prover and emit the matching terminal
    /// signal.
    fn send_result(&self, result: &VerificationResult) {
        self.listener.on_verifier_message(result.encode());
        if result.ra_successful {
            self.listener.on_verifier_ok();
        } else {
            self.listener.on_verifier_failed();
        }
    }
}

impl<L: RaVerifierListener> RaVerifierDriver for CmcVerifier<L> {
    type Config = CmcVerifierConfig;

    fn set_config(&mut self, config: CmcVerifierConfig) {
        self.config = config;
    }

    fn handle(&self) -> DriverHandle {
        self.queue.handle()
    }

    fn run(&mut self) -> Result<(), RaError> {
        let mut nonce = vec![0u8; CMC_NONCE_LEN];
        self.nonce_source.fill(&mut nonce)?;
        self.listener
            .on_verifier_message(AttestationRequest::new(nonce.clone()).encode());
        debug!("CMC verifier: challenge sent, waiting for report");

        let raw = self.wait_for_raw()?;
        let response = match AttestationResponse::decode(&raw) {
            Ok(r) => r,
            Err(e) => {
                self.listener.on_verifier_failed();
                return Err(RaError::Protocol(e.to_string()));
            }
        };

        let verdict = CmcSocket::connect(&self.config.cmc_host, self.config.cmc_port)
            .and_then(|mut socket| {
                socket.request_verification(response.attestation_report, &nonce)
            });
        let verdict = match verdict {
            Ok(v) => v,
            Err(e) => {
                error!("CMC verifier: report appraisal unavailable: {e}");
                self.send_result(&VerificationResult::failure(
                    "appraisal unavailable".to_string(),
                ));
                return Err(e);
            }
        };

        self.send_result(&verdict);
        if verdict.ra_successful {
            debug!("CMC verifier: peer platform is trusted");
            Ok(())
        } else {
            Err(RaError::Validation(
                "CMC rejected the attestation report".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmc::messages::{VerificationRequest, VERIFICATION_RESULT_TYPE};
    use openssl::x509::X509;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[derive(Default)]
    struct ListenerState {
        messages: Mutex<Vec<Vec<u8>>>,
        oks: AtomicUsize,
        fails: AtomicUsize,
    }

    struct TestListener(Arc<ListenerState>);

    impl RaVerifierListener for TestListener {
        fn on_verifier_message(&self, message: Vec<u8>) {
            self.0.messages.lock().unwrap().push(message);
        }
        fn on_verifier_ok(&self) {
            self.0.oks.fetch_add(1, Ordering::SeqCst);
        }
        fn on_verifier_failed(&self) {
            self.0.fails.fetch_add(1, Ordering::SeqCst);
        }
        fn remote_peer_certificate(&self) -> Option<X509> {
            None
        }
        fn remote_peer_dat(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    struct FixedNonce;

    impl NonceSource for FixedNonce {
        fn fill(&self, buf: &mut [u8]) -> Result<(), RaError> {
            buf.fill(0x77);
            Ok(())
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

    /// One-shot CMC stand-in answering a single verification request.
    fn fake_cmc(verdict: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: VerificationRequest =
                serde_json::from_slice(&read_frame(&mut stream)).unwrap();
            assert_eq!(request.nonce, vec![0x77; 20]);
            let reply = VerificationResult {
                kind: VERIFICATION_RESULT_TYPE.to_string(),
                ra_successful: verdict,
                certification_level: 3,
                log: if verdict {
                    vec![]
                } else {
                    vec!["measurement mismatch".to_string()]
                },
            };
            write_frame(&mut stream, &reply.encode());
        });
        port
    }

    fn run_with_report(verdict: bool) -> (Result<(), RaError>, Arc<ListenerState>) {
        let port = fake_cmc(verdict);
        let state = Arc::new(ListenerState::default());
        let mut verifier =
            CmcVerifier::with_nonce_source(TestListener(state.clone()), Box::new(FixedNonce));
        verifier.set_config(CmcVerifierConfig {
            cmc_host: "127.0.0.1".to_string(),
            cmc_port: port,
        });

        let report =
            br#"{"type": "Attestation Report Response", "attestationReport": {"ok": 1}}"#;
        verifier.handle().delegate(report.to_vec());

        let outcome = verifier.run();
        (outcome, state)
    }

    #[test]
    fn verdict_is_forwarded_to_the_prover() {
        let (outcome, state) = run_with_report(true);
        assert!(outcome.is_ok());
        assert_eq!(state.oks.load(Ordering::SeqCst), 1);

        let messages = state.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        let challenge = AttestationRequest::decode(&messages[0]).unwrap();
        assert_eq!(challenge.nonce, vec![0x77; 20]);

        let result = VerificationResult::decode(&messages[1]).unwrap();
        assert!(result.ra_successful);
        assert_eq!(result.certification_level, 3);
    }

    #[test]
    fn negative_verdict_is_forwarded_verbatim() {
        let (outcome, state) = run_with_report(false);
        assert!(matches!(outcome, Err(RaError::Validation(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);

        let messages = state.messages.lock().unwrap();
        let result = VerificationResult::decode(&messages[1]).unwrap();
        assert!(!result.ra_successful);
        assert_eq!(result.log, vec!["measurement mismatch".to_string()]);
    }

    #[test]
    fn undecodable_report_fails_the_exchange() {
        let state = Arc::new(ListenerState::default());
        let mut verifier =
            CmcVerifier::with_nonce_source(TestListener(state.clone()), Box::new(FixedNonce));
        verifier.handle().delegate(b"[]".to_vec());

        assert!(matches!(verifier.run(), Err(RaError::Protocol(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }
}
