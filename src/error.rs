use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type used throughout the agent.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by the agent pipeline itself.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentError {
    #[error("unexpected agent failure")]
    Unexpected,
    #[error("message has no To recipients")]
    MissingTo,
    #[error("message has no From address")]
    MissingFrom,
    #[error("message content is missing")]
    MissingMessage,
    #[error("envelope has no recipients")]
    NoRecipients,
    #[error("envelope has no sender")]
    NoSender,
    #[error("no trusted recipients")]
    NoTrustedRecipients,
    #[error("message could not be decrypted by any recipient")]
    UntrustedMessage,
    #[error("message is not signed")]
    UnsignedMessage,
    #[error("sender has no usable private certificate")]
    UntrustedSender,
    #[error("recipient certificate could not be resolved")]
    UnknownRecipient,
}

/// Failures raised while enforcing trust policy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustError {
    #[error("sender is not trusted")]
    UntrustedSender,
    #[error("no recipients meet the minimum trust requirement")]
    NoTrustedRecipients,
    #[error("message carries no signature from the sender")]
    MissingSenderSignature,
    #[error("signature does not verify")]
    SignatureValidation,
}

/// Structural problems with MIME content.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeError {
    #[error("invalid MIME entity")]
    InvalidMimeEntity,
    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid body")]
    InvalidBody,
    #[error("missing body")]
    MissingBody,
    #[error("unexpected content type")]
    ContentTypeMismatch,
    #[error("multipart boundary missing or malformed")]
    InvalidBoundary,
}

/// Cryptographic primitive failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: no matching recipient or invalid ciphertext")]
    Decryption,
    #[error("signature verification failed")]
    SignatureVerification,
    #[error("certificate carries no private key")]
    MissingPrivateKey,
    #[error("no certificates supplied")]
    NoCertificates,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid encoding: {0}")]
    Encoding(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error("{kind}")]
    Mime {
        kind: MimeError,
        #[source]
        source: Option<BoxError>,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("certificate resolution failed for {address}: {reason}")]
    Resolver { address: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("event listener failed: {0}")]
    Listener(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn mime(kind: MimeError) -> Self {
        Error::Mime { kind, source: None }
    }

    pub fn mime_with<E>(kind: MimeError, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Mime {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Agent(AgentError::NoRecipients)
            | Error::Agent(AgentError::NoSender)
            | Error::Agent(AgentError::MissingTo)
            | Error::Agent(AgentError::MissingFrom)
            | Error::Agent(AgentError::MissingMessage)
            | Error::InvalidArgument(_) => ErrorCategory::InputValidation,
            Error::Trust(_) => ErrorCategory::Trust,
            Error::Agent(_) | Error::Certificate(_) | Error::Resolver { .. } => {
                ErrorCategory::Agent
            }
            Error::Mime { .. } => ErrorCategory::Mime,
            Error::Crypto(_) => ErrorCategory::Crypto,
            Error::Listener(_) | Error::Io(_) => ErrorCategory::Other,
        }
    }
}

impl From<mailparse::MailParseError> for Error {
    fn from(e: mailparse::MailParseError) -> Self {
        Error::mime_with(MimeError::InvalidMimeEntity, e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InputValidation,
    Trust,
    Agent,
    Mime,
    Crypto,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDirection::Incoming => write!(f, "incoming"),
            MessageDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// The single error type surfaced by the agent's process methods.
///
/// The original failure is kept as the error source so callers can
/// branch on [`ProcessingError::cause`] or [`ProcessingError::category`].
#[derive(Error, Debug)]
#[error("error processing {direction} message: {cause}")]
pub struct ProcessingError {
    direction: MessageDirection,
    #[source]
    cause: Error,
}

impl ProcessingError {
    pub fn new(direction: MessageDirection, cause: Error) -> Self {
        Self { direction, cause }
    }

    pub fn direction(&self) -> MessageDirection {
        self.direction
    }

    pub fn cause(&self) -> &Error {
        &self.cause
    }

    pub fn into_cause(self) -> Error {
        self.cause
    }

    pub fn category(&self) -> ErrorCategory {
        self.cause.category()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::from(AgentError::NoRecipients).category(),
            ErrorCategory::InputValidation
        );
        assert_eq!(
            Error::from(AgentError::UnsignedMessage).category(),
            ErrorCategory::Agent
        );
        assert_eq!(
            Error::from(TrustError::NoTrustedRecipients).category(),
            ErrorCategory::Trust
        );
        assert_eq!(
            Error::from(CryptoError::Decryption).category(),
            ErrorCategory::Crypto
        );
        assert_eq!(
            Error::mime(MimeError::InvalidBody).category(),
            ErrorCategory::Mime
        );
    }

    #[test]
    fn test_processing_error_keeps_cause() {
        let err = ProcessingError::new(
            MessageDirection::Outgoing,
            Error::from(AgentError::NoTrustedRecipients),
        );
        assert_eq!(err.direction(), MessageDirection::Outgoing);
        assert!(matches!(
            err.cause(),
            Error::Agent(AgentError::NoTrustedRecipients)
        ));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("outgoing"));
    }

    #[test]
    fn test_mime_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::mime_with(MimeError::InvalidBody, io);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "invalid body");
    }
}
