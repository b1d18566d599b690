#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(&'static str, i64),
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            StoreError::Invalid(msg) => write!(f, "invalid: {msg}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
