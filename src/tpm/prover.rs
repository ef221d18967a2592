// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::{debug, warn};
use openssl::hash::MessageDigest;

use super::messages::{TpmMessage, TpmResponse};
use super::socket::TpmSocket;
use crate::driver::{
    calculate_binding_hash, DriverHandle, InboundQueue, RaError, RaProverDriver,
    RaProverListener,
};

/// Address of the local TPM daemon the prover obtains its quote from.
#[derive(Clone, Debug)]
pub struct TpmProverConfig {
    pub tpm_host: String,
    pub tpm_port: u16,
}

impl Default for TpmProverConfig {
    fn default() -> Self {
        TpmProverConfig {
            tpm_host: "127.0.0.1".to_string(),
            tpm_port: super::TPM_DAEMON_PORT,
        }
    }
}

/// Prover side of the TPM RA exchange: waits for the verifier's
/// challenge, binds it to the channel by hashing the nonce together with
/// the verifier's transport certificate, fetches a quote from the local
/// TPM daemon and forwards it, then waits for the verdict.
pub struct TpmProver<L> {
    listener: L,
    queue: InboundQueue,
    config: TpmProverConfig,
}

impl<L: RaProverListener> TpmProver<L> {
    pub fn new(listener: L) -> Self {
        TpmProver {
            listener,
            queue: InboundQueue::new(),
            config: TpmProverConfig::default(),
        }
    }

    /// Block until the next peer message decodes.  A cancelled wait maps
    /// to [`RaError::Cancelled`] without a terminal signal; anything else
    /// that cuts the wait short counts as failure.
    fn wait_for_message(&self) -> Result<TpmMessage, RaError> {
        let Some(raw) = self.queue.take() else {
            if self.queue.is_running() {
                self.listener.on_prover_failed();
                return Err(RaError::Protocol(
                    "message wait interrupted".to_string(),
                ));
            }
            return Err(RaError::Cancelled);
        };
        match TpmMessage::decode(&raw) {
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

impl<L: RaProverListener> RaProverDriver for TpmProver<L> {
    type Config = TpmProverConfig;

    fn set_config(&mut self, config: TpmProverConfig) {
        self.config = config;
    }

    fn handle(&self) -> DriverHandle {
        self.queue.handle()
    }

    fn run(&mut self) -> Result<(), RaError> {
        debug!("TPM prover: waiting for challenge");
        let challenge = match self.wait_for_message()? {
            TpmMessage::Challenge(c) => c,
            other => {
                return self.fail(RaError::Protocol(format!(
                    "expected challenge, got {other:?}"
                )))
            }
        };

        // the verifier hashed its own transport certificate, which on this
        // side of the channel is the remote peer's
        let verifier_cert = self
            .listener
            .remote_peer_certificate()
            .ok_or(RaError::MissingPeerCertificate)?;
        let qualifying_data = calculate_binding_hash(
            MessageDigest::sha1(),
            &challenge.nonce,
            &[&verifier_cert.to_der()?],
        )?;

        let report = TpmSocket::connect(&self.config.tpm_host, self.config.tpm_port)
            .and_then(|mut socket| {
                socket.attest(challenge.atype, &qualifying_data, challenge.pcr_mask)
            });
        let report = match report {
            Ok(r) => r,
            Err(e) => {
                warn!("TPM prover: could not obtain quote: {e}");
                return self.fail(e);
            }
        };

        let response = TpmMessage::Response(TpmResponse::from(report));
        self.listener.on_prover_message(response.encode());

        debug!("TPM prover: report sent, waiting for verdict");
        let verdict = match self.wait_for_message()? {
            TpmMessage::Result(r) => r,
            other => {
                return self.fail(RaError::Protocol(format!(
                    "expected result, got {other:?}"
                )))
            }
        };

        if verdict.result {
            debug!("TPM prover: attestation accepted");
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
    use crate::tpm::messages::daemon::{RemoteToTpm, TpmToRemote};
    use crate::tpm::messages::{AttestationType, Pcr, TpmChallenge, TpmResult};
    use hex_literal::hex;
    use openssl::x509::X509;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    const TEST_TRANSPORT_CERT: &[u8; 829] = include_bytes!("../../testdata/transport.der");
    const TEST_AIK_CERT: &[u8; 724] = include_bytes!("../../testdata/aik.der");
    const TEST_QUOTED: &[u8; 133] = include_bytes!("../../testdata/quoted.bin");
    const TEST_SIGNATURE: &[u8; 262] = include_bytes!("../../testdata/sig.bin");

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

    /// One-shot TPM daemon stand-in asserting the qualifying data carries
    /// the expected channel binding digest.
    fn fake_tpm_daemon() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = RemoteToTpm::decode(&read_frame(&mut stream)).unwrap();
            assert_eq!(request.atype, AttestationType::All);
            // sha1(nonce 00..13 ‖ verifier transport certificate)
            assert_eq!(
                request.qualifying_data,
                hex!("1ed835729820993a9ddaec041eb7c88d221523d7")
            );
            let reply = TpmToRemote {
                atype: request.atype,
                hash_alg: "SHA256".to_string(),
                quoted: TEST_QUOTED.to_vec(),
                signature: TEST_SIGNATURE.to_vec(),
                certificate: TEST_AIK_CERT.to_vec(),
                pcr_values: (0..24)
                    .map(|i| Pcr {
                        index: i,
                        value: vec![i as u8; 32],
                    })
                    .collect(),
            };
            write_frame(&mut stream, &reply.encode());
        });
        port
    }

    #[test]
    fn prover_quotes_over_the_binding_hash() {
        let port = fake_tpm_daemon();

        let state = Arc::new(ListenerState::default());
        let mut prover = TpmProver::new(TestListener {
            state: state.clone(),
            peer_cert: Some(X509::from_der(TEST_TRANSPORT_CERT.as_slice()).unwrap()),
        });
        prover.set_config(TpmProverConfig {
            tpm_host: "127.0.0.1".to_string(),
            tpm_port: port,
        });

        let handle = prover.handle();
        handle.delegate(
            TpmMessage::Challenge(TpmChallenge {
                atype: AttestationType::All,
                nonce: (0u8..20).collect(),
                pcr_mask: 0,
            })
            .encode(),
        );
        handle.delegate(TpmMessage::Result(TpmResult { result: true }).encode());

        assert!(prover.run().is_ok());
        assert_eq!(state.oks.load(Ordering::SeqCst), 1);
        assert_eq!(state.fails.load(Ordering::SeqCst), 0);

        let messages = state.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        match TpmMessage::decode(&messages[0]).unwrap() {
            TpmMessage::Response(r) => {
                assert_eq!(r.quoted, TEST_QUOTED.to_vec());
                assert_eq!(r.pcr_values.len(), 24);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn missing_peer_certificate_aborts_the_exchange() {
        let state = Arc::new(ListenerState::default());
        let mut prover = TpmProver::new(TestListener {
            state: state.clone(),
            peer_cert: None,
        });
        prover.handle().delegate(
            TpmMessage::Challenge(TpmChallenge {
                atype: AttestationType::Basic,
                nonce: vec![0u8; 20],
                pcr_mask: 0,
            })
            .encode(),
        );

        assert!(matches!(
            prover.run(),
            Err(RaError::MissingPeerCertificate)
        ));
    }

    #[test]
    fn negative_verdict_fails_the_prover() {
        let port = fake_tpm_daemon();

        let state = Arc::new(ListenerState::default());
        let mut prover = TpmProver::new(TestListener {
            state: state.clone(),
            peer_cert: Some(X509::from_der(TEST_TRANSPORT_CERT.as_slice()).unwrap()),
        });
        prover.set_config(TpmProverConfig {
            tpm_host: "127.0.0.1".to_string(),
            tpm_port: port,
        });

        let handle = prover.handle();
        handle.delegate(
            TpmMessage::Challenge(TpmChallenge {
                atype: AttestationType::All,
                nonce: (0u8..20).collect(),
                pcr_mask: 0,
            })
            .encode(),
        );
        handle.delegate(TpmMessage::Result(TpmResult { result: false }).encode());

        assert!(matches!(prover.run(), Err(RaError::Validation(_))));
        assert_eq!(state.fails.load(Ordering::SeqCst), 1);
    }
}
