// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::{debug, warn};

use super::messages::{AttestationRequest, VerificationResult};
use super::socket::CmcSocket;
use super::CMC_NONCE_LEN;
use crate::driver::{
    DriverHandle, InboundQueue, RaError, RaProverDriver, RaProverListener,
};

/// Address of the local CMC service the prover obtains its report from.
#[derive(Clone, Debug)]
pub struct CmcProverConfig {
    pub cmc_host: String,
    pub cmc_port: u16,
}

impl Default for CmcProverConfig {
    fn default() -> Self {
        CmcProverConfig {
            cmc_host: "127.0.0.1".to_string(),
            cmc_port: super::CMC_PORT,
        }
    }
}

/// Prover side of the delegated CMC exchange: forwards the verifier's
/// challenge to the local CMC service, relays the resulting report back
/// to the verifier and waits for the verdict.  Attestation semantics
/// live entirely inside the CMC services on both ends.
pub struct CmcProver<L> {
    listener: L,
    queue: InboundQueue,
    config: CmcProverConfig,
}

impl<L: RaProverListener> CmcProver<L> {
    pub fn new(listener: L) -> Self {
        CmcProver {
            listener,
            queue: InboundQueue::new(),
            config: CmcProverConfig::default(),
        }
    }

    fn wait_for_raw(&self) -> Result<Vec<u8>, RaError> {
        let Some(raw) = self.queue.take() else {
            if self.queue.is_running() {
                self.listener.on_prover_failed();
                return Err(RaError::Protocol(
                    "message wait interrupted".to_string(),
                ));
            }
            return Err(RaError::Cancelled);
        };
        Ok(raw)
    }

    fn fail<T>(&self, err: RaError) -> Result<T, RaError> {
        self.listener.on_prover_failed();
        Err(err)
    }
}

impl<L: RaProverListener> RaProverDriver for CmcProver<L> {
    type Config = CmcProverConfig;

    fn set_config(&mut self, config: CmcProverConfig) {
        self.config = config;
    }

    fn handle(&self) -> DriverHandle {
        self.queue.handle()
    }

    fn run(&mut self) -> Result<(), RaError> {
        debug!("CMC prover: waiting for challenge");
        let raw = self.wait_for_raw()?;
        let challenge = match AttestationRequest::decode(&raw) {
            Ok(c) => c,
            Err(e) => return self.fail(RaError::Protocol(e.to_string())),
        };
        if challenge.nonce.len() != CMC_NONCE_LEN {
            return self.fail(RaError::Protocol(format!(
                "challenge nonce of {} bytes",
                challenge.nonce.len()
            )));
        }

        let report = CmcSocket::connect(&self.config.cmc_host, self.config.cmc_port)
            .and_then(|mut socket| socket.request_attestation(&challenge.nonce));
        let report = match report {
            Ok(r) => r,
            Err(e) => {
                warn!("CMC prover: could not obtain report: {e}");
                return self.fail(e);
            }
        };
        self.listener.on_prover_message(report.encode());

        debug!("CMC prover: report sent, waiting for verdict");
        let raw = self.wait_for_raw()?;
        let verdict = match VerificationResult::decode(&raw) {
            Ok(v) => v,
            Err(e) => return self.fail(RaError::Protocol(e.to_string())),
        };

        if verdict.ra_successful {
            debug!("CMC prover: attestation accepted");
            self.listener.on_prover_ok();
            Ok(())
        } else {
            for line in &verdict.log {
                warn!("CMC prover: verifier log: {line}");
            }
            self.fail(RaError::Validation(
                "attestation rejected by verifier".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmc::messages::{AttestationResponse, ATTESTATION_RESPONSE_TYPE};
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

    impl RaProverListener for TestListener {
        fn on_prover_message(&self, message: Vec<u8>) {
            self.0.messages.lock().unwrap().push(message);
        }
        fn on_prover_ok(&self) {
            self.0.oks.fetch_add(1, Ordering::SeqCst);
        }
        fn on_prover_failed(&self) {
            self.0.fails.fetch_add(1, Ordering::SeqCst);
        }
        fn remote_peer_certificate(&self) -> Option<X509> {
            None
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

    /// One-shot CMC stand-in answering a single attestation request.
    fn fake_cmc(report_json: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = AttestationRequest::decode(&read_frame(&mut stream)).unwrap();
            assert_eq!(request.nonce.len(), CMC_NONCE_LEN);
            let reply = format!(
                r#"{{"type": "{ATTESTATION_RESPONSE_TYPE}", "attestationReport": {report_json}}}"#
            );
            write_frame(&mut stream, reply.as_bytes());
        });
        port
    }

    #[test]
    fn prover_relays_report_and_accepts_verdict() {
        let port = fake_cmc(r#"{"measurements": [0, 1]}"#);

        let state = Arc::new(ListenerState::default());
        let mut prover = CmcProver::new(TestListener(state.clone()));
        prover.set_config(CmcProverConfig {
            cmc_host: "127.0.0.1".to_string(),
            cmc_port: port,
        });

        let handle = prover.handle();
        handle.delegate(AttestationRequest::new(vec![0x11; 20]).encode());
        handle.delegate(
            VerificationResult {
                kind: "Verification Result".to_string(),
                ra_successful: true,
                certification_level: 2,
                log: vec![],
            }
            .encode(),
        );

        assert!(prover.run().is_ok());
        assert_eq!(state.oks.load(Ordering::SeqCst), 1);

        let messages = state.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let forwarded = AttestationResponse::decode(&messages[0]).unwrap();
        assert_eq!(
            forwarded.attestation_report.get(),
            r#"{"measurements": [0, 1]}"#
        );
    }

    #[test]
    fn negative_verdict_fails_the_prover() {
        let port = fake_cmc("{}");

        let state = Arc::new(ListenerState::default());
        let mut prover = CmcProver::new(TestListener(state.clone()));
        prover.set_config(CmcProverConfig {
            cmc_host: "127.0.0.1".to_string(),
            cmc_port: port,
        });

        let handle = prover.handle();
        handle.delegate(AttestationRequest::new(vec![0x11; 20]).encode());
        handle.delegate(VerificationResult::failure("bad PCRs".to_string()).encode());

        assert!(matches!(prover.run(), Err(RaError::Validation(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_challenge_fails_the_exchange() {
        let state = Arc::new(ListenerState::default());
        let mut prover = CmcProver::new(TestListener(state.clone()));
        prover.handle().delegate(b"not json".to_vec());

        assert!(matches!(prover.run(), Err(RaError::Protocol(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }
}
