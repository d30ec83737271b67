use thiserror::Error;

/// Failures from encoding, decoding, or dispatching a packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet truncated")]
    Truncated,

    #[error("packet exceeds maximum frame size ({0} bytes)")]
    FrameTooLarge(u32),

    #[error("malformed messagepack payload: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] rmpv::encode::Error),

    #[error("packet does not match either envelope shape: {0}")]
    FromValue(#[from] rmpv::ext::Error),

    #[error("packet missing or invalid \"type\" field")]
    MissingType,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("handler failed: {0}")]
    Dispatch(String),
}

/// Code carried on a `RESPONSE` packet. Zero means success; anything else
/// is an application-level failure matching spec.md's error taxonomy.
pub type ResponseCode = i32;

pub const CODE_OK: ResponseCode = 0;
pub const CODE_ERROR: ResponseCode = -1;
