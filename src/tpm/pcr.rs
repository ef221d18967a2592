// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use super::errors::Error;
use super::messages::{AttestationType, Pcr};
use crate::dat::Dat;
use crate::driver::base64;

/// There are 24 platform configuration registers.
const PCR_COUNT: u32 = 24;

/// Number of registers covered by a BASIC attestation.
const BASIC_PCR_COUNT: u32 = 12;

/// An ordered mapping from PCR register index to its digest, built either
/// from a live quote response or from the golden values embedded in the
/// peer's DAT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrValues {
    values: BTreeMap<u32, Vec<u8>>,
}

impl PcrValues {
    /// Build from the PCR list of a quote response.  At most 24 entries,
    /// each register index unique and below 24.
    pub fn from_report(pcrs: &[Pcr]) -> Result<PcrValues, Error> {
        if pcrs.len() > PCR_COUNT as usize {
            return Err(Error::Parse(
                "invalid number of PCR registers in response".to_string(),
            ));
        }
        let mut values = BTreeMap::new();
        for pcr in pcrs {
            if pcr.index >= PCR_COUNT {
                return Err(Error::Parse(format!("PCR index {} out of range", pcr.index)));
            }
            if values.insert(pcr.index, pcr.value.clone()).is_some() {
                return Err(Error::Parse(format!("duplicate PCR index {}", pcr.index)));
            }
        }
        Ok(PcrValues { values })
    }

    /// Build from the `pcrGoldenValues` claim of the peer DAT: exactly 24
    /// base64url digests, one per register.
    pub fn from_dat(dat: &Dat) -> Result<PcrValues, Error> {
        let golden = dat
            .pcr_golden_values()
            .map_err(|e| Error::Parse(e.to_string()))?;

        if golden.len() != PCR_COUNT as usize {
            return Err(Error::Parse("golden values are not complete".to_string()));
        }

        let mut values = BTreeMap::new();
        for (i, b64) in golden.iter().enumerate() {
            let bytes = base64::decode_str(b64)
                .map_err(|e| Error::Parse(format!("golden value {i}: {e}")))?;
            values.insert(i as u32, bytes);
        }
        Ok(PcrValues { values })
    }

    pub fn get(&self, index: u32) -> Option<&[u8]> {
        self.values.get(&index).map(Vec::as_slice)
    }

    /// Register indices to compare for the requested attestation type.
    /// For `Advanced` the mask is a bit mask over registers 0..23 and
    /// must be strictly positive.
    fn registers_to_check(atype: AttestationType, mask: u32) -> Result<Vec<u32>, Error> {
        let indices = match atype {
            AttestationType::Basic => (0..BASIC_PCR_COUNT).collect(),
            AttestationType::All => (0..PCR_COUNT).collect(),
            AttestationType::Advanced => {
                if mask == 0 {
                    return Err(Error::Policy(
                        "advanced PCR comparison requested with empty mask".to_string(),
                    ));
                }
                (0..PCR_COUNT).filter(|i| mask & (1 << i) != 0).collect()
            }
        };
        Ok(indices)
    }

    /// Index-wise comparison of these (reported) register values against
    /// the golden values, restricted to the registers selected by the
    /// attestation type and mask.  A register selected for comparison but
    /// absent from the report is a policy error, not a mismatch.
    pub fn is_trusted(
        &self,
        golden: &PcrValues,
        atype: AttestationType,
        mask: u32,
    ) -> Result<bool, Error> {
        for index in Self::registers_to_check(atype, mask)? {
            let reported = self.get(index).ok_or_else(|| {
                Error::Policy(format!("PCR {index} expected but not reported"))
            })?;
            let expected = golden.get(index).ok_or_else(|| {
                Error::Policy(format!("no golden value for PCR {index}"))
            })?;
            if reported != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Display for PcrValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PCR {{")?;
        for (index, value) in &self.values {
            writeln!(f, "\tpcr_{index}: {}", hex::encode(value))?;
        }
        write!(f, "}}")
    }
}
