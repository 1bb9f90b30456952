use crate::access::Action;

/// Errors surfaced by the achievement core.
///
/// Every variant is tagged with the action that produced it and renders as
/// `[action] message`, so the caller can show it verbatim.
#[derive(Debug, thiserror::Error)]
pub enum AchievementError {
    #[error("[{action}] {message}")]
    NotFound { action: Action, message: String },

    #[error("[{action}] {message}")]
    Forbidden { action: Action, message: String },

    #[error("[{action}] {message}")]
    InvalidRequest { action: Action, message: String },

    /// Data-integrity violations, e.g. level thresholds that do not increase.
    #[error("[{action}] {message}")]
    Conflict { action: Action, message: String },

    #[error("[{action}] database error: {source}")]
    Database {
        action: Action,
        #[source]
        source: rusqlite::Error,
    },
}

pub type AchievementResult<T> = Result<T, AchievementError>;

impl AchievementError {
    pub fn not_found(action: Action, message: impl Into<String>) -> Self {
        Self::NotFound { action, message: message.into() }
    }

    pub fn forbidden(action: Action, message: impl Into<String>) -> Self {
        Self::Forbidden { action, message: message.into() }
    }

    pub fn invalid(action: Action, message: impl Into<String>) -> Self {
        Self::InvalidRequest { action, message: message.into() }
    }

    pub fn conflict(action: Action, message: impl Into<String>) -> Self {
        Self::Conflict { action, message: message.into() }
    }

    pub fn database(action: Action, source: rusqlite::Error) -> Self {
        Self::Database { action, source }
    }

    pub fn action(&self) -> Action {
        match self {
            Self::NotFound { action, .. }
            | Self::Forbidden { action, .. }
            | Self::InvalidRequest { action, .. }
            | Self::Conflict { action, .. }
            | Self::Database { action, .. } => *action,
        }
    }
}

/// Tags storage errors with the action they interrupted.
pub trait ForAction<T> {
    fn for_action(self, action: Action) -> AchievementResult<T>;
}

impl<T> ForAction<T> for Result<T, rusqlite::Error> {
    fn for_action(self, action: Action) -> AchievementResult<T> {
        self.map_err(|source| AchievementError::database(action, source))
    }
}
