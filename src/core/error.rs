use thiserror::Error;

#[derive(Error, Debug)]
pub enum NvmError {
    /// Magic, checksum or structural mismatch. The image cannot be decoded.
    #[error("Invalid NVM format: {0}")]
    InvalidFormat(String),

    /// Well-formed, but a version or layout this crate does not implement.
    ///
    /// `protocol_file_format` is set when the image is an NVM3 image whose
    /// protocol file format is newer than [`MAX_PROTOCOL_FILE_FORMAT`].
    ///
    /// [`MAX_PROTOCOL_FILE_FORMAT`]: crate::version::MAX_PROTOCOL_FILE_FORMAT
    #[error("Not supported: {reason}")]
    NotSupported {
        reason: String,
        protocol_file_format: Option<u8>,
    },

    #[error("Object {0:#07x} not found in NVM")]
    ObjectNotFound(u32),

    #[error("Out of space: not enough pages to store all objects")]
    NoSpace,

    #[error("Invalid NVM JSON: {0}")]
    InvalidJson(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NvmError {
    pub(crate) fn not_supported(reason: impl Into<String>) -> Self {
        NvmError::NotSupported {
            reason: reason.into(),
            protocol_file_format: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NvmError>;
