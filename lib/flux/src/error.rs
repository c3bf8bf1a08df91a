use std::io;

/// Error kinds shared by every crate in the workspace, matching the propagation policy described
/// for the messaging substrate: some kinds are fatal to a session, some are non-fatal, and a
/// couple are simple no-op returns at the send entry point.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("wire format error: {0}")]
    WireFormat(String),

    #[error("container parse error: {0}")]
    ContainerParse(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("handshake expired")]
    HandshakeExpired,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("file io error: {0}")]
    FileIo(String),

    #[error("illegal operation: {0}")]
    IllegalOperation(String),
}

impl Error {
    /// Returns true if encountering this error on an established session should terminate it.
    ///
    /// `FileIo` and `IllegalOperation` are deliberately excluded: the former is reported back to
    /// the peer via an empty-path file notification, the latter is a no-op return at the send
    /// entry point.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::WireFormat(_)
                | Error::ContainerParse(_)
                | Error::Crypto(_)
                | Error::Compression(_)
                | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
