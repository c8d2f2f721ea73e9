
//! Error type definitions for reading and compositing Photoshop files.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::error;
use std::fmt;
use std::io::Error as IoError;

/// A result that may contain an error from this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains an error from this crate.
pub type UnitResult = Result<()>;


/// An error that may happen while reading or compositing a Photoshop file.
/// Distinguishes the failures a caller can react to:
/// signature problems are reported before anything is allocated,
/// pixel-level problems are recovered internally and only logged.
#[derive(Debug)]
pub enum Error {

    /// The first four bytes of the buffer are not the Photoshop signature.
    /// Contains the bytes that were found instead.
    InvalidSignature([u8; 4]),

    /// The buffer is a PDF document, not a Photoshop document.
    /// Reported separately from `InvalidSignature`
    /// so that a caller can point the user at the right tool.
    PdfSignature,

    /// The version field is neither 1 (PSD) nor 2 (PSB).
    UnsupportedVersion(u16),

    /// A read would run past the end of the buffer or its enclosing block.
    TruncatedData(&'static str),

    /// A PackBits run would overrun its scanline.
    MalformedRle(&'static str),

    /// A decompressed channel plane does not have the expected byte count.
    SizeMismatch {

        /// Number of bytes the plane dimensions require.
        expected: usize,

        /// Number of bytes that were actually produced.
        actual: usize
    },

    /// The compression tag of a channel is none of the four known methods.
    UnknownCompression(u16),

    /// The document-level structure is malformed beyond what lenient parsing tolerates.
    /// Aborts the current render stage and triggers the stage fallback.
    Invalid(Cow<'static, str>),

    /// All render stages have been exhausted. Terminal and user-facing.
    UnsupportedStructure,

    /// The operation was cancelled through its cancellation flag.
    Aborted,

    /// The file could not be read from the file system.
    Io(IoError),
}

impl Error {

    /// Create an error of the variant `Invalid`.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invalid(message.into())
    }

    /// Whether re-parsing the same buffer with a lower-fidelity stage cannot change the outcome.
    /// Signature and version rejections are deterministic per buffer, as is cancellation.
    pub(crate) fn is_stage_independent(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature(_)
                | Error::PdfSignature
                | Error::UnsupportedVersion(_)
                | Error::Aborted
                | Error::Io(_)
        )
    }
}

/// Enable using the `?` operator on `std::io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSignature(found) => write!(
                formatter, "not a Photoshop document (expected signature `8BPS`, found {:?})", found
            ),

            Error::PdfSignature => write!(
                formatter, "this is a PDF document, not a Photoshop document; open it with a PDF tool instead"
            ),

            Error::UnsupportedVersion(version) => write!(
                formatter, "unsupported file version {} (supported versions are 1 for PSD and 2 for PSB)", version
            ),

            Error::TruncatedData(location) => write!(
                formatter, "file ends unexpectedly while reading {}", location
            ),

            Error::MalformedRle(location) => write!(
                formatter, "malformed run-length-encoded data in {}", location
            ),

            Error::SizeMismatch { expected, actual } => write!(
                formatter, "channel plane has {} bytes where {} were expected", actual, expected
            ),

            Error::UnknownCompression(tag) => write!(
                formatter, "unknown channel compression method {}", tag
            ),

            Error::Invalid(message) => write!(
                formatter, "invalid file structure: {}", message
            ),

            Error::UnsupportedStructure => write!(
                formatter,
                "the document structure could not be rendered at any fidelity; \
                 re-exporting the file with maximum compatibility enabled usually fixes this"
            ),

            Error::Aborted => write!(formatter, "the rendering operation was cancelled"),

            Error::Io(error) => write!(formatter, "file system error: {}", error),
        }
    }
}


/// Convert a `u32` to `usize`. This will always succeed on the supported platforms.
pub(crate) fn u32_to_usize(value: u32) -> usize {
    usize::try_from(value).expect("(u32 as usize) failed")
}

/// Convert a `u64` to `usize`, returning a truncation error for values beyond the address space.
pub(crate) fn u64_to_usize(value: u64, location: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::TruncatedData(location))
}

/// Convert an `i32` to `usize`, returning an error for negative values.
pub(crate) fn i32_to_usize(value: i32, error_message: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid(error_message))
}
