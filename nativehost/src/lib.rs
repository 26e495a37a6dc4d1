pub mod manifests;
pub mod protocol;

use laserpresets_core::PresetError;
use native_messaging::host::{self, NmError};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::protocol::{IncomingMessage, OutgoingMessage};

#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Preset(#[from] PresetError),
    #[error("Native messaging error: {0}")]
    NativeMessaging(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<NmError> for HostError {
    fn from(e: NmError) -> Self {
        HostError::NativeMessaging(e.to_string())
    }
}

impl HostError {
    /// The input stream can no longer be trusted to sit on a frame boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HostError::Io(_) | HostError::NativeMessaging(_))
    }
}

/// Read one request. `Ok(None)` once the browser has closed the pipe.
pub fn read_native_message<R: Read>(input: &mut R) -> Result<Option<IncomingMessage>, HostError> {
    match host::decode_message_opt(input, host::MAX_FROM_BROWSER) {
        Ok(Some(json_str)) => Ok(Some(serde_json::from_str(&json_str)?)),
        Ok(None) | Err(NmError::Disconnected) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write_native_message<W: Write>(
    output: &mut W,
    msg: &OutgoingMessage,
) -> Result<(), HostError> {
    host::send_json(output, msg)?;
    Ok(())
}
