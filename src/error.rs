//! Error taxonomy for the KNX protocol core.
//!
//! Each category below is a small struct carrying a `kind` enum and a captured
//! backtrace, following the KNX codec modules' habit of keeping parse/protocol
//! failures distinguishable without resorting to string-only errors. The
//! top-level [`KnxError`] is the only type most callers need to name.

use std::backtrace::Backtrace;
use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, KnxError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingErrorKind {
    ComponentOutOfRange,
    MalformedLiteral,
    TooManyLevels,
}

/// Bad address literal or out-of-range component. Raised at construction time.
#[derive(Debug)]
pub struct AddressingError {
    kind: AddressingErrorKind,
    backtrace: Backtrace,
}

impl AddressingError {
    pub(crate) fn new(kind: AddressingErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        self.kind == AddressingErrorKind::ComponentOutOfRange
    }
}

impl fmt::Display for AddressingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse address: {:?}", self.kind)
    }
}

impl std::error::Error for AddressingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolErrorKind {
    UnknownApci,
    MalformedTrailer,
    InvalidTpci,
    InvalidControlField,
    WrongPayloadKind,
}

/// Malformed TPCI/APCI byte layout or unknown service code.
#[derive(Debug)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    backtrace: Backtrace,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conversion error: {:?}", self.kind)
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CemiErrorKind {
    BufferTooShort,
    UnknownMessageCode,
    LengthMismatch,
}

/// Decoder rejects a CEMI frame: unknown code, short buffer, length mismatch.
#[derive(Debug)]
pub struct UnsupportedCemiMessage {
    kind: CemiErrorKind,
    detail: &'static str,
    backtrace: Backtrace,
}

impl UnsupportedCemiMessage {
    pub(crate) fn new(kind: CemiErrorKind, detail: &'static str) -> Self {
        Self {
            kind,
            detail,
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for UnsupportedCemiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported CEMI message ({:?}): {}", self.kind, self.detail)
    }
}

impl std::error::Error for UnsupportedCemiMessage {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataSecureErrorKind {
    ReplayRejected,
    UnknownSender,
    MissingKey,
    MacMismatch,
    UnsupportedVariant,
    PointToPointUnsupported,
}

/// Replay, unknown sender, missing key, MAC mismatch, unsupported Secure variant.
#[derive(Debug)]
pub struct DataSecureError {
    kind: DataSecureErrorKind,
    backtrace: Backtrace,
}

impl DataSecureError {
    pub(crate) fn new(kind: DataSecureErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.kind == DataSecureErrorKind::ReplayRejected
    }
}

impl fmt::Display for DataSecureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data secure error: {:?}", self.kind)
    }
}

impl std::error::Error for DataSecureError {}

/// No `L_DATA.con` arrived within the confirmation deadline.
#[derive(Debug)]
pub struct ConfirmationError {
    backtrace: Backtrace,
}

impl ConfirmationError {
    pub(crate) fn new() -> Self {
        Self {
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for ConfirmationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_DATA.con confirmation timed out")
    }
}

impl std::error::Error for ConfirmationError {}

/// The underlying interface reported a send/connect failure.
///
/// `should_log` mirrors the source queue's suppression of noisy, expected
/// failures from the consumer task's warning log.
#[derive(Debug)]
pub struct CommunicationError {
    message: String,
    should_log: bool,
    backtrace: Backtrace,
}

impl CommunicationError {
    pub(crate) fn new(message: impl Into<String>, should_log: bool) -> Self {
        Self {
            message: message.into(),
            should_log,
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn should_log(&self) -> bool {
        self.should_log
    }
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "communication error: {}", self.message)
    }
}

impl std::error::Error for CommunicationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManagementErrorKind {
    Refused,
    Timeout,
    Nak,
    SequenceMismatch,
    UnexpectedPayload,
}

/// Protocol violation on a management (P2P) connection: NAK, sequence
/// mismatch, unexpected payload class, refusal, or timeout.
#[derive(Debug)]
pub struct ManagementError {
    kind: ManagementErrorKind,
    message: String,
    backtrace: Backtrace,
}

impl ManagementError {
    pub(crate) fn new(kind: ManagementErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn is_refused(&self) -> bool {
        self.kind == ManagementErrorKind::Refused
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == ManagementErrorKind::Timeout
    }
}

impl fmt::Display for ManagementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "management connection error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ManagementError {}

/// Top-level error type returned by this crate's public API.
#[derive(Debug)]
pub enum KnxError {
    Addressing(AddressingError),
    Protocol(ProtocolError),
    Cemi(UnsupportedCemiMessage),
    DataSecure(DataSecureError),
    Confirmation(ConfirmationError),
    Communication(CommunicationError),
    Management(ManagementError),
}

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addressing(e) => write!(f, "{e}"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::Cemi(e) => write!(f, "{e}"),
            Self::DataSecure(e) => write!(f, "{e}"),
            Self::Confirmation(e) => write!(f, "{e}"),
            Self::Communication(e) => write!(f, "{e}"),
            Self::Management(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for KnxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Addressing(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Cemi(e) => Some(e),
            Self::DataSecure(e) => Some(e),
            Self::Confirmation(e) => Some(e),
            Self::Communication(e) => Some(e),
            Self::Management(e) => Some(e),
        }
    }
}

impl KnxError {
    pub(crate) fn component_out_of_range() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::ComponentOutOfRange))
    }

    pub(crate) fn malformed_address_literal() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::MalformedLiteral))
    }

    pub(crate) fn too_many_filter_levels() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::TooManyLevels))
    }

    pub(crate) fn unknown_apci() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnknownApci))
    }

    pub(crate) fn malformed_trailer() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::MalformedTrailer))
    }

    pub(crate) fn invalid_tpci() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidTpci))
    }

    pub(crate) fn invalid_control_field() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidControlField))
    }

    pub(crate) fn wrong_payload_kind() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::WrongPayloadKind))
    }

    pub(crate) fn buffer_too_short(detail: &'static str) -> Self {
        Self::Cemi(UnsupportedCemiMessage::new(CemiErrorKind::BufferTooShort, detail))
    }

    pub(crate) fn unknown_message_code() -> Self {
        Self::Cemi(UnsupportedCemiMessage::new(
            CemiErrorKind::UnknownMessageCode,
            "message code not L_DATA_REQ/IND/CON",
        ))
    }

    pub(crate) fn length_mismatch(detail: &'static str) -> Self {
        Self::Cemi(UnsupportedCemiMessage::new(CemiErrorKind::LengthMismatch, detail))
    }

    pub(crate) fn replay_rejected() -> Self {
        Self::DataSecure(DataSecureError::new(DataSecureErrorKind::ReplayRejected))
    }

    pub(crate) fn unknown_sender() -> Self {
        Self::DataSecure(DataSecureError::new(DataSecureErrorKind::UnknownSender))
    }

    pub(crate) fn missing_key() -> Self {
        Self::DataSecure(DataSecureError::new(DataSecureErrorKind::MissingKey))
    }

    pub(crate) fn mac_mismatch() -> Self {
        Self::DataSecure(DataSecureError::new(DataSecureErrorKind::MacMismatch))
    }

    pub(crate) fn unsupported_secure_variant() -> Self {
        Self::DataSecure(DataSecureError::new(DataSecureErrorKind::UnsupportedVariant))
    }

    pub(crate) fn point_to_point_secure_unsupported() -> Self {
        Self::DataSecure(DataSecureError::new(DataSecureErrorKind::PointToPointUnsupported))
    }

    pub(crate) fn confirmation_timeout() -> Self {
        Self::Confirmation(ConfirmationError::new())
    }

    pub(crate) fn communication(message: impl Into<String>, should_log: bool) -> Self {
        Self::Communication(CommunicationError::new(message, should_log))
    }

    pub(crate) fn management_refused(message: impl Into<String>) -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::Refused, message))
    }

    pub(crate) fn management_timeout(message: impl Into<String>) -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::Timeout, message))
    }

    pub(crate) fn management_nak(message: impl Into<String>) -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::Nak, message))
    }

    pub(crate) fn management_sequence_mismatch(message: impl Into<String>) -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::SequenceMismatch, message))
    }

    pub(crate) fn management_unexpected_payload(message: impl Into<String>) -> Self {
        Self::Management(ManagementError::new(ManagementErrorKind::UnexpectedPayload, message))
    }

    /// Whether the underlying [`CommunicationError`], if any, asked to be logged.
    #[must_use]
    pub fn should_log(&self) -> bool {
        match self {
            Self::Communication(e) => e.should_log(),
            _ => true,
        }
    }

    /// Whether this is a rejected replay (a [`DataSecureError`] with
    /// `ReplayRejected`).
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::DataSecure(e) if e.is_replay())
    }

    /// Whether this is a refused management connection (peer disconnect or
    /// not-connected precondition).
    #[must_use]
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Management(e) if e.is_refused())
    }

    /// Whether this is a management ACK/response deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Management(e) if e.is_timeout())
    }

    /// Whether this is an out-of-range address component.
    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::Addressing(e) if e.is_out_of_range())
    }
}
