use thiserror::Error;

/// Flat status enumeration for the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    NotInitialized,
    AlreadyInitialized,
    InvalidArgument,
    NoDevice,
    DecodeFailed,
    InternalError,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("buffer size must be non-zero")]
    ZeroBufferSize,
    #[error("unknown deck id: {0}")]
    UnknownDeck(u8),
    #[error("value {value} out of range [{min}, {max}] for {field}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no output audio device available")]
    NoDeviceAvailable,
    #[error("failed to open output stream: {0}")]
    StreamOpenFailed(String),
    #[error("engine already initialized")]
    AlreadyInitialized,
    #[error("engine not initialized")]
    NotInitialized,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("symphonia probe/format error for '{path}': {source}")]
    Format {
        path: String,
        #[source]
        source: symphonia::core::errors::Error,
    },
    #[error("no suitable audio track in '{path}'")]
    NoSuitableTrack { path: String },
    #[error("sample rate missing in '{path}'")]
    MissingSampleRate { path: String },
    #[error("failed to create decoder for '{path}': {source}")]
    DecoderCreation {
        path: String,
        #[source]
        source: symphonia::core::errors::Error,
    },
    #[error("fatal decode error in '{path}': {source}")]
    FatalDecode {
        path: String,
        #[source]
        source: symphonia::core::errors::Error,
    },
    #[error("no samples decoded from '{path}'")]
    NoSamplesDecoded { path: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("allocation failed while loading track")]
    Resource,
}

impl From<&EngineError> for StatusCode {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Config(_) => StatusCode::InvalidArgument,
            EngineError::Device(DeviceError::NoDeviceAvailable) => StatusCode::NoDevice,
            EngineError::Device(DeviceError::AlreadyInitialized) => StatusCode::AlreadyInitialized,
            EngineError::Device(DeviceError::NotInitialized) => StatusCode::NotInitialized,
            EngineError::Device(DeviceError::StreamOpenFailed(_)) => StatusCode::NoDevice,
            EngineError::Decode(_) => StatusCode::DecodeFailed,
            EngineError::Resource => StatusCode::InternalError,
        }
    }
}

impl From<EngineError> for StatusCode {
    fn from(err: EngineError) -> Self {
        StatusCode::from(&err)
    }
}
