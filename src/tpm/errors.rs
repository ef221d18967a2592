// Copyright 2024-2025 Contributors to the ra-drivers project.
// SPDX-License-Identifier: Apache-2.0

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("PCR policy error: {0}")]
    Policy(String),
    #[error("PCR parse error: {0}")]
    Parse(String),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Policy(e) | Error::Parse(e) => {
                write!(f, "{}", e)
            }
        }
    }
}
