//! Request payloads for the four core operations, as a tagged union.
//!
//! ```json
//! {"action": "updateCount", "achievementId": "regular", "targetUserId": "42", "countChange": -1}
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::access::{Action, Caller};
use crate::acdb::Database;
use crate::aggregate::AchievementAggregateReader;
use crate::errors::{AchievementError, AchievementResult};
use crate::models::{AchievementView, UserAchievementStatus};
use crate::progress::ProgressReconciler;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AchievementAction {
    Read,
    SetAchieved {
        achievement_id: String,
        target_user_id: String,
        achieved: bool,
    },
    UpdateCount {
        achievement_id: String,
        target_user_id: String,
        count_change: i64,
    },
    UpdateScore {
        achievement_id: String,
        target_user_id: String,
        #[serde(default)]
        score: Option<f64>,
    },
}

impl AchievementAction {
    pub fn kind(&self) -> Action {
        match self {
            AchievementAction::Read => Action::Read,
            AchievementAction::SetAchieved { .. } => Action::SetAchieved,
            AchievementAction::UpdateCount { .. } => Action::UpdateCount,
            AchievementAction::UpdateScore { .. } => Action::UpdateScore,
        }
    }

    /// Parses a JSON payload. Anything malformed is an `InvalidRequest`, tagged
    /// with the requested action when it can be told.
    pub fn from_json(payload: &str) -> AchievementResult<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|err| AchievementError::invalid(Action::Unknown, format!("malformed payload: {err}")))?;

        let kind = match value.get("action").and_then(Value::as_str) {
            Some("read") => Action::Read,
            Some("setAchieved") => Action::SetAchieved,
            Some("updateCount") => Action::UpdateCount,
            Some("updateScore") => Action::UpdateScore,
            Some(other) => {
                return Err(AchievementError::invalid(Action::Unknown, format!("unknown action '{other}'")));
            }
            None => return Err(AchievementError::invalid(Action::Unknown, "missing action")),
        };

        serde_json::from_value(value).map_err(|err| AchievementError::invalid(kind, err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Views(Vec<AchievementView>),
    Status(UserAchievementStatus),
}

/// Runs `action` on behalf of `caller`.
pub fn dispatch(db: &Database, caller: &Caller, action: AchievementAction) -> AchievementResult<ActionOutcome> {
    log::trace!("[dispatch] {} from {:?}", action.kind(), caller.user_id);
    let reconciler = ProgressReconciler::new(db);

    match action {
        AchievementAction::Read => AchievementAggregateReader::new(db)
            .list_for_user(caller)
            .map(ActionOutcome::Views),
        AchievementAction::SetAchieved { achievement_id, target_user_id, achieved } => reconciler
            .set_achieved(caller, &achievement_id, &target_user_id, achieved)
            .map(ActionOutcome::Status),
        AchievementAction::UpdateCount { achievement_id, target_user_id, count_change } => reconciler
            .update_count(caller, &achievement_id, &target_user_id, count_change)
            .map(ActionOutcome::Status),
        AchievementAction::UpdateScore { achievement_id, target_user_id, score } => reconciler
            .update_score(caller, &achievement_id, &target_user_id, score)
            .map(ActionOutcome::Status),
    }
}
