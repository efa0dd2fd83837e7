use crate::ws::ConnectionId;

/// Rejections from the user directory. None of these are fatal: callers log
/// them and carry on, the sender is never told.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// First claim wins; a second connection may not take over an ID.
    #[error("user id {user_id:?} is already registered to connection {owner}")]
    IdentityTaken { user_id: String, owner: ConnectionId },

    #[error("connection {conn_id} is already registered as {existing:?}")]
    ConnectionAlreadyNamed {
        conn_id: ConnectionId,
        existing: String,
    },

    #[error("connection {0} is not in the active set")]
    UnknownConnection(ConnectionId),
}

/// Startup failures surfaced from `main`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl From<figment::Error> for ServerError {
    fn from(err: figment::Error) -> Self {
        ServerError::Config(Box::new(err))
    }
}
