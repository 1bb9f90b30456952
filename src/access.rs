use crate::errors::{AchievementError, AchievementResult};

/// Operations a caller can request. Used for permission checks and to tag errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    SetAchieved,
    UpdateCount,
    UpdateScore,
    DefineAchievement,
    SetEnabled,
    DeleteAchievement,
    SetFavorite,
    /// A request whose action could not be determined.
    Unknown,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::SetAchieved => "setAchieved",
            Action::UpdateCount => "updateCount",
            Action::UpdateScore => "updateScore",
            Action::DefineAchievement => "defineAchievement",
            Action::SetEnabled => "setEnabled",
            Action::DeleteAchievement => "deleteAchievement",
            Action::SetFavorite => "setFavorite",
            Action::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Role {
    #[default]
    Member,
    Committee,
    Admin,
}

impl Role {
    /// Admin and committee members see disabled achievements and may edit progress.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Committee | Role::Admin)
    }

    pub fn permits(self, action: Action) -> bool {
        match action {
            Action::Read | Action::SetFavorite => true,
            Action::UpdateCount | Action::UpdateScore => self.is_privileged(),
            Action::SetAchieved
            | Action::DefineAchievement
            | Action::SetEnabled
            | Action::DeleteAchievement => self == Role::Admin,
            Action::Unknown => false,
        }
    }
}

/// Identity and role claims of whoever issued a request.
///
/// Both come from the identity provider; this crate only consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Caller {
    pub user_id: Option<String>,
    pub role: Role,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: Some(user_id.into()), role }
    }

    pub fn member(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Member)
    }

    pub fn committee(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Committee)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    /// Refuses with `Forbidden` unless the caller's role allows `action`.
    pub fn authorize(&self, action: Action) -> AchievementResult<()> {
        if self.role.permits(action) {
            return Ok(());
        }

        log::info!(
            "[authorize] {} ({:?}) refused for {action}",
            self.user_id.as_deref().unwrap_or("anonymous"),
            self.role
        );
        Err(AchievementError::forbidden(
            action,
            format!("{:?} role may not perform {action}", self.role),
        ))
    }
}
