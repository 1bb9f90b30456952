//! Favourite achievements and the profile card skin they unlock.

use crate::access::{Action, Caller};
use crate::acdb::{Database, profiles, status};
use crate::errors::{AchievementError, AchievementResult, ForAction};
use crate::levels::{effective_achieved, resolve_level};
use crate::models::ProfileCard;
use crate::progress::{require_achievement, require_id};

/// Picks the caller's favourite achievement; `None` clears it.
///
/// Only achievements the caller currently holds can be picked. Disabled ones
/// do not exist as far as members are concerned.
pub fn set_favorite(db: &Database, caller: &Caller, achievement_id: Option<&str>) -> AchievementResult<()> {
    let action = Action::SetFavorite;
    caller.authorize(action)?;
    let user_id = caller
        .user_id
        .as_deref()
        .ok_or_else(|| AchievementError::forbidden(action, "anonymous callers have no profile"))?;

    let connection = db.connect().for_action(action)?;
    if let Some(achievement_id) = achievement_id {
        require_id(action, "achievementId", achievement_id)?;
        let achievement = require_achievement(&connection, action, achievement_id)?;
        if !achievement.is_enabled && !caller.is_privileged() {
            return Err(AchievementError::not_found(action, format!("no achievement with id '{achievement_id}'")));
        }

        let held = status::query_status(&connection, achievement_id, user_id)
            .for_action(action)?
            .is_some_and(|s| effective_achieved(&achievement, s.achieved, s.attendance_count));
        if !held {
            return Err(AchievementError::invalid(
                action,
                format!("'{achievement_id}' has not been achieved yet"),
            ));
        }
    }

    profiles::upsert_favorite(&connection, user_id, achievement_id).for_action(action)?;
    log::info!("{user_id} set favourite achievement to {achievement_id:?}");
    Ok(())
}

/// Resolves the profile card for `user_id`.
///
/// The card shows the favourite achievement's current-level skin, falling back
/// to the achievement's own skin. A favourite that is no longer held is ignored.
pub fn profile_card(db: &Database, user_id: &str) -> AchievementResult<ProfileCard> {
    let action = Action::Read;
    let connection = db.connect().for_action(action)?;
    let mut card = ProfileCard {
        user_id: user_id.to_string(),
        favorite_achievement_id: None,
        title: None,
        card_skin_image_url: None,
    };

    let Some(favorite) = profiles::query_favorite(&connection, user_id).for_action(action)? else {
        return Ok(card);
    };
    card.favorite_achievement_id = Some(favorite.clone());

    let achievement = require_achievement(&connection, action, &favorite)?;
    let Some(progress) = status::query_status(&connection, &favorite, user_id).for_action(action)? else {
        return Ok(card);
    };
    if !effective_achieved(&achievement, progress.achieved, progress.attendance_count) {
        log::debug!("[profile_card] {user_id} no longer holds favourite '{favorite}'");
        return Ok(card);
    }

    let details = resolve_level(&achievement, Some(progress.attendance_count)).override_details;
    card.title = Some(details.title);
    card.card_skin_image_url = details.card_skin_image_url;
    Ok(card)
}
