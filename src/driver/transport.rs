// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Read, Write};
use std::net::TcpStream;

/// Upper bound on a single backend frame.  Attestation reports are a few
/// kilobytes; anything larger is a broken or hostile peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Minimal framed request/response client for the local attestation
/// backends (TPM daemon, snp-attestd, CMC).  Each frame is a 4-byte
/// big-endian length followed by the payload; every request is answered
/// by exactly one correlated response frame.
pub struct FramedStream {
    stream: TcpStream,
}

impl FramedStream {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        Ok(Self { stream })
    }

    /// Send one request frame and block for the response frame.
    pub fn request(&mut self, payload: &[u8]) -> io::Result<Vec<u8>> {
        self.write_frame(payload)?;
        self.read_frame()
    }

    fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(payload)?;
        self.stream.flush()
    }

    fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("backend frame of {len} bytes exceeds limit"),
            ));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    // serve one framed request with a canned reply, or an arbitrary raw
    // byte stream for malformed-frame cases
    fn one_shot_server(reply: Vec<u8>, raw: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut len = [0u8; 4];
            sock.read_exact(&mut len).unwrap();
            let mut req = vec![0u8; u32::from_be_bytes(len) as usize];
            sock.read_exact(&mut req).unwrap();
            if raw {
                sock.write_all(&reply).unwrap();
            } else {
                sock.write_all(&(reply.len() as u32).to_be_bytes()).unwrap();
                sock.write_all(&reply).unwrap();
            }
        });
        port
    }

    #[test]
    fn request_round_trip() {
        let port = one_shot_server(b"pong".to_vec(), false);
        let mut client = FramedStream::connect("127.0.0.1", port).unwrap();
        let reply = client.request(b"ping").unwrap();
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn oversized_frame_is_rejected() {
        // length header far above MAX_FRAME_LEN, no body
        let bogus = 0xffff_ffffu32.to_be_bytes().to_vec();
        let port = one_shot_server(bogus, true);
        let mut client = FramedStream::connect("127.0.0.1", port).unwrap();
        let err = client.request(b"ping").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
