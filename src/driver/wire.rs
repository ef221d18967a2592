// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

//! Cursor helpers for the explicit big-endian binary codecs used by the
//! RA wire envelopes and the TPM structure parsers.

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("truncated input reading {0}")]
    Truncated(&'static str),
    #[error("trailing bytes after {0}")]
    Trailing(&'static str),
    #[error("malformed field: {0}")]
    Malformed(String),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Truncated(e) | Error::Trailing(e) => write!(f, "{}", e),
            Error::Malformed(e) => write!(f, "{}", e),
        }
    }
}

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error::Truncated(what));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, Error> {
        Ok(self.bytes(1, what)?[0])
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, Error> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, Error> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64, Error> {
        let b = self.bytes(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// A TPM2B-style field: u16 length prefix followed by that many bytes.
    pub fn vec16(&mut self, what: &'static str) -> Result<Vec<u8>, Error> {
        let len = self.u16(what)? as usize;
        Ok(self.bytes(len, what)?.to_vec())
    }

    /// A u32-length-prefixed byte field.
    pub fn vec32(&mut self, what: &'static str) -> Result<Vec<u8>, Error> {
        let len = self.u32(what)? as usize;
        Ok(self.bytes(len, what)?.to_vec())
    }

    /// A u32-length-prefixed UTF-8 string field.
    pub fn string32(&mut self, what: &'static str) -> Result<String, Error> {
        let raw = self.vec32(what)?;
        String::from_utf8(raw).map_err(|_| Error::Malformed(format!("{what} is not UTF-8")))
    }

    pub fn expect_end(&self, what: &'static str) -> Result<(), Error> {
        if self.remaining() != 0 {
            return Err(Error::Trailing(what));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn vec32(&mut self, v: &[u8]) -> &mut Self {
        // field lengths are capped well below u32::MAX by the frame limit
        self.u32(v.len() as u32);
        self.raw(v)
    }

    pub fn string32(&mut self, v: &str) -> &mut Self {
        self.vec32(v.as_bytes())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
