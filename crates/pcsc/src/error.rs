//! Error types for the PC/SC transport

use desfire_apdu_core::transport::TransportError;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// Error reported by the PC/SC stack
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),
}

impl From<PcscError> for TransportError {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::Pcsc(pcsc::Error::NoSmartcard)
            | PcscError::Pcsc(pcsc::Error::ResetCard)
            | PcscError::Pcsc(pcsc::Error::RemovedCard) => Self::Device,
            PcscError::Pcsc(pcsc::Error::Timeout) => Self::Timeout,
            PcscError::Pcsc(pcsc::Error::InsufficientBuffer) => Self::BufferTooSmall,
            PcscError::Pcsc(e) => Self::Other(format!("PC/SC error: {}", e)),
            PcscError::NoReadersAvailable | PcscError::ReaderNotFound(_) => Self::Connection,
            PcscError::NoCard(_) => Self::Device,
        }
    }
}
