use thiserror::Error;

/// Failures at the codec boundary.
///
/// `Encode` means the caller handed over something unrepresentable (a caller
/// bug); `Decode` means the wire payload is corrupt or mismatched, which the
/// transport layer surfaces as a connection error.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot encode value: {0}")]
    Encode(String),
    #[error("malformed payload: {0}")]
    Decode(String),
    #[error("unexpected envelope: {0}")]
    Envelope(String),
}
