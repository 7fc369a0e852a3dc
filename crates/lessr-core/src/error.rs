//! Error types for the lessr plugin bridge.

use thiserror::Error;

/// Result type alias using the lessr error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core error types for the plugin bridge.
///
/// The variants group into the failure kinds the bridge distinguishes:
/// codec errors (never recovered within the same buffer), shared-memory
/// resource errors (fail the single caller), runtime/transport errors
/// (fatal to the runtime instance), and plugin errors (surfaced with the
/// message captured from the scripting side).
#[derive(Debug, Error)]
pub enum Error {
    /// Buffer too small to hold the structure being read.
    #[error("Buffer too short: need {needed} bytes, have {have}")]
    ShortBuffer {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// The buffer does not start with the FlatAST magic.
    #[error("Bad magic: expected 0x4C455353, found {found:#010x}")]
    BadMagic {
        /// The value found in the magic slot.
        found: u32,
    },

    /// The buffer declares a format version this reader does not support.
    #[error("Unsupported format version {found} (supported: {supported})")]
    BadVersion {
        /// Version declared by the buffer.
        found: u32,
        /// Highest version this reader supports.
        supported: u32,
    },

    /// Internally inconsistent buffer (bad offsets, out-of-range indices).
    #[error("Corrupt buffer: {0}")]
    Corrupt(String),

    /// A node's property slice is not valid JSON.
    #[error("Malformed node properties: {0}")]
    BadProps(String),

    /// Shared-memory access outside the segment bounds.
    #[error("Out of bounds: offset {offset} + length {length} exceeds segment size {size}")]
    OutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Requested length.
        length: usize,
        /// Segment size.
        size: usize,
    },

    /// Operation on a segment that has been closed.
    #[error("Shared-memory segment is closed")]
    SegmentClosed,

    /// No attached buffer under the given key.
    #[error("Buffer not found: {0}")]
    BufferNotFound(String),

    /// The subprocess runtime is not running (stopped, or never started).
    #[error("Plugin runtime stopped")]
    RuntimeStopped,

    /// A request's reply was never delivered.
    #[error("Request lost: {0}")]
    RequestLost(String),

    /// A request deadline expired before the reply arrived.
    #[error("Request timed out")]
    Timeout,

    /// Transport failure: subprocess died, pipe closed, unwritable stdin.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol failure for a single request (unknown command, bad payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Plugin failure reported by the scripting side.
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// The plugin requires a newer host than this one.
    #[error("Plugin requires host version {required}, host is {actual}")]
    MinVersion {
        /// Version the plugin demands.
        required: String,
        /// Version the host declares.
        actual: String,
    },

    /// Resource error (temp directory, backing file).
    #[error("Resource error: {0}")]
    Resource(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a new corrupt-buffer error.
    #[must_use]
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create a new malformed-properties error.
    #[must_use]
    pub fn bad_props(msg: impl Into<String>) -> Self {
        Self::BadProps(msg.into())
    }

    /// Create a new transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new protocol error.
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new plugin error.
    #[must_use]
    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }

    /// Create a new resource error.
    #[must_use]
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Create a new serialization error.
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether this error is fatal to the runtime instance that produced it.
    ///
    /// Transport errors terminate the runtime; everything else fails only
    /// the single request that observed it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RuntimeStopped)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
