use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid week range: {0}")]
    Validation(String),

    #[error("Upstream request failed{}: {message}", status_suffix(.status))]
    Upstream { status: Option<u16>, message: String },

    #[error("Unexpected upstream payload: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Upstream { .. })
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Store(Box::new(error))
    }
}
