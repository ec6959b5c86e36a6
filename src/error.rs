//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Kadnode crate error enum.
pub enum Error {
    /// A textual or binary identifier did not decode to exactly
    /// [ID_SIZE](crate::ID_SIZE) bytes.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The network id in a message header disagrees with the local one.
    #[error("Network id mismatch: local {local:?}, remote {remote:?}")]
    NetworkMismatch { local: String, remote: String },

    /// Dialing, sending to or reading from a peer failed or timed out.
    #[error("Peer {address} is unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing value store failed. The serving node can not continue.
    #[error("Value store failure: {0}")]
    ValueStoreFailure(String),

    /// The remote peer answered with an error message.
    #[error("Remote error {code}: {description}")]
    Remote { code: i32, description: String },

    /// A decoded message is well formed bencode but violates the protocol.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),
}

impl Error {
    /// Returns `true` for errors after which a node must stop serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ValueStoreFailure(_))
    }

    pub(crate) fn unreachable(address: &str, source: std::io::Error) -> Self {
        Error::Unreachable {
            address: address.to_string(),
            source,
        }
    }
}

/// Alias for `Result<T, kadnode::Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
