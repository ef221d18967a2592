// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use log::debug;

use super::messages::daemon::{RemoteToTpm, TpmToRemote};
use super::messages::AttestationType;
use crate::driver::{FramedStream, RaError};

/// Blocking client for the local TPM daemon.  One request/response
/// exchange per [`attest`](TpmSocket::attest) call, frames are
/// length-prefixed on the wire.
pub struct TpmSocket {
    stream: FramedStream,
}

impl TpmSocket {
    pub fn connect(host: &str, port: u16) -> Result<TpmSocket, RaError> {
        let stream = FramedStream::connect(host, port)?;
        Ok(TpmSocket { stream })
    }

    /// Ask the daemon for a quote over `qualifying_data`, selecting
    /// registers according to the attestation type and mask.
    pub fn attest(
        &mut self,
        atype: AttestationType,
        qualifying_data: &[u8],
        pcr_mask: u32,
    ) -> Result<TpmToRemote, RaError> {
        let request = RemoteToTpm::attestation_request(atype, qualifying_data, pcr_mask);
        debug!("requesting TPM quote (type {atype:?}, mask {pcr_mask:#x})");
        let reply = self.stream.request(&request.encode())?;
        let response = TpmToRemote::decode(&reply)?;
        Ok(response)
    }
}
