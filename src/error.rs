use thiserror::Error as ThisError;

/// Everything a client call can fail with.
///
/// `Server` and `Protocol` leave the connection usable; `Connect` and
/// `Transport` mean the socket is gone (a reconnect may be scheduled);
/// `Usage` is a caller mistake caught before anything hit the wire.
#[derive(Debug, ThisError)]
pub enum Error {
    /// TCP connect failed or timed out.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The socket died mid-session, or a reply was expected from a closed
    /// connection.
    #[error("connection lost: {0}")]
    Transport(String),

    /// The server sent bytes that do not frame as RESP.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply.
    #[error("{0}")]
    Server(String),

    /// The call cannot be satisfied as made.
    #[error("invalid usage: {0}")]
    Usage(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Transport(err.to_string())
    }
}
