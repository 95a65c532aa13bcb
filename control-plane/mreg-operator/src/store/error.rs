#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict writing {0}: the object has been modified")]
    Conflict(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("kubernetes api error: {0}")]
    Api(#[source] kube::Error),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
