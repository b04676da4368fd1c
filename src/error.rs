// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectFailed,
    SendFailed,
    ReceiveFailed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::SendFailed => write!(f, "send failed"),
            Self::ReceiveFailed => write!(f, "receive failed"),
        }
    }
}

/// Network-layer failure while talking to a destination.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({destination}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub destination: String,
    pub message: String,
}

impl TransportError {
    pub fn new(
        kind: TransportErrorKind,
        destination: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            destination: destination.to_string(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

#[derive(Debug, Error)]
pub enum FtwError {
    #[error("Bad test definition: {0}")]
    Definition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Transport error in stage {stage_id} of '{title}': {source}")]
    StageTransport {
        stage_id: String,
        title: String,
        #[source]
        source: TransportError,
    },

    #[error(
        "Can't find log marker for stage {stage_id} on {destination}. Am I reading the correct log? Log file: {}",
        .log_file.display()
    )]
    MarkerNotFound {
        stage_id: String,
        destination: String,
        log_file: PathBuf,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error in {file}: {source}")]
    Yaml {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl FtwError {
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport(e) | Self::StageTransport { source: e, .. } => Some(e.kind),
            _ => None,
        }
    }

    /// Attaches the stage id and test title to a bare transport error.
    pub fn in_stage(self, stage_id: &str, title: &str) -> Self {
        match self {
            Self::Transport(source) => Self::StageTransport {
                stage_id: stage_id.to_string(),
                title: title.to_string(),
                source,
            },
            other => other,
        }
    }
}

pub type FtwResult<T> = Result<T, FtwError>;
