use thiserror::Error;

/// The engine's external error taxonomy (spec §7). Every variant's
/// `.code()` is part of the wire contract and must never change.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("target rejected: {0}")]
    InvalidTarget(String),

    #[error("could not connect to nvr: {0}")]
    Connect(String),

    #[error("nvr did not respond in time")]
    Timeout,

    #[error("nvr responded with unexpected http status {0}")]
    HttpStatus(u16),

    #[error("nvr response was not valid json: {0}")]
    JsonParse(String),

    #[error("login rejected: {0}")]
    LoginRejected(String),

    #[error("rpc error: {0}")]
    RpcError(String),

    #[error("no active nvr credentials for this site")]
    NoCredentials,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// The verbatim `error_code` string propagated to callers.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::InvalidTarget(_) => "INVALID_TARGET",
            SyncError::Connect(_) => "CONNECT",
            SyncError::Timeout => "TIMEOUT",
            SyncError::HttpStatus(_) => "HTTP_STATUS",
            SyncError::JsonParse(_) => "JSON_PARSE",
            SyncError::LoginRejected(_) => "LOGIN_REJECTED",
            SyncError::RpcError(_) => "RPC_ERROR",
            SyncError::NoCredentials => "NO_CREDENTIALS",
            SyncError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(SyncError::InvalidTarget("x".into()).code(), "INVALID_TARGET");
        assert_eq!(SyncError::Connect("x".into()).code(), "CONNECT");
        assert_eq!(SyncError::Timeout.code(), "TIMEOUT");
        assert_eq!(SyncError::HttpStatus(500).code(), "HTTP_STATUS");
        assert_eq!(SyncError::JsonParse("x".into()).code(), "JSON_PARSE");
        assert_eq!(SyncError::LoginRejected("x".into()).code(), "LOGIN_REJECTED");
        assert_eq!(SyncError::RpcError("x".into()).code(), "RPC_ERROR");
        assert_eq!(SyncError::NoCredentials.code(), "NO_CREDENTIALS");
        assert_eq!(SyncError::Internal("x".into()).code(), "INTERNAL_ERROR");
    }
}
