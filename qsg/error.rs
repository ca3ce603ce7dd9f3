use std::io::Error as IoError;
use thiserror::Error;
use zbus::Error as ZbusError;

#[derive(Error, Debug)]
pub enum App {
    #[error("I/O operation failed: {0}")]
    Io(#[from] IoError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Zbus error: {0}")]
    Zbus(#[from] ZbusError),
}

impl App {
    /// The daemon's own message for a failed call, without the D-Bus
    /// error name around it.
    pub fn detail(&self) -> String {
        match self {
            App::Zbus(ZbusError::MethodError(_, Some(detail), _)) => detail.clone(),
            other => other.to_string(),
        }
    }
}
