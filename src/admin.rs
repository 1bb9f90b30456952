//! Achievement catalog administration. Admin only.

use rusqlite::TransactionBehavior;

use crate::access::{Action, Caller};
use crate::acdb::{Database, catalog};
use crate::errors::{AchievementError, AchievementResult, ForAction};
use crate::levels::validate_levels;
use crate::models::AchievementDefinition;
use crate::progress::require_id;

/// Rejects definitions that would break level resolution.
pub fn validate_definition(achievement: &AchievementDefinition) -> AchievementResult<()> {
    let action = Action::DefineAchievement;
    require_id(action, "id", &achievement.id)?;
    require_id(action, "title", &achievement.title)?;

    if achievement.attendance_need == Some(0) {
        return Err(AchievementError::invalid(action, "attendanceNeed must be positive"));
    }

    validate_levels(&achievement.level_config).map_err(|message| {
        AchievementError::conflict(action, format!("invalid levels for '{}': {message}", achievement.id))
    })
}

/// Inserts `achievement`, or replaces the existing definition with the same id.
///
/// Returns `true` if it was newly created. Status rows are left as they are;
/// level-driven views re-derive against the new ladder on the next read.
pub fn define_achievement(
    db: &Database,
    caller: &Caller,
    achievement: &AchievementDefinition,
) -> AchievementResult<bool> {
    let action = Action::DefineAchievement;
    caller.authorize(action)?;
    validate_definition(achievement)?;

    let mut connection = db.connect().for_action(action)?;
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .for_action(action)?;
    let created = catalog::insert_achievement(&tx, achievement).for_action(action)?;
    if !created {
        catalog::update_achievement(&tx, achievement).for_action(action)?;
    }
    tx.commit().for_action(action)?;

    log::info!(
        "{} achievement '{}' ({} level(s))",
        if created { "Created" } else { "Updated" },
        achievement.id,
        achievement.level_config.len()
    );
    Ok(created)
}

pub fn set_enabled(db: &Database, caller: &Caller, achievement_id: &str, enabled: bool) -> AchievementResult<()> {
    let action = Action::SetEnabled;
    caller.authorize(action)?;
    require_id(action, "achievementId", achievement_id)?;

    let connection = db.connect().for_action(action)?;
    if !catalog::set_enabled(&connection, achievement_id, enabled).for_action(action)? {
        return Err(AchievementError::not_found(action, format!("no achievement with id '{achievement_id}'")));
    }

    log::info!("{} achievement '{achievement_id}'", if enabled { "Enabled" } else { "Disabled" });
    Ok(())
}

/// Deletes an achievement together with every user's progress on it.
pub fn delete_achievement(db: &Database, caller: &Caller, achievement_id: &str) -> AchievementResult<()> {
    let action = Action::DeleteAchievement;
    caller.authorize(action)?;
    require_id(action, "achievementId", achievement_id)?;

    let connection = db.connect().for_action(action)?;
    if !catalog::delete_achievement(&connection, achievement_id).for_action(action)? {
        return Err(AchievementError::not_found(action, format!("no achievement with id '{achievement_id}'")));
    }

    log::info!("Deleted achievement '{achievement_id}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acdb::status;
    use crate::models::LevelDefinition;
    use crate::progress::ProgressReconciler;
    use tempfile::tempdir;

    fn level(progress_needed: u32) -> LevelDefinition {
        LevelDefinition { progress_needed, ..Default::default() }
    }

    #[test]
    fn test_define_then_redefine() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let admin = Caller::admin("a1");

        let mut def = AchievementDefinition::new("regular", "Regular", "Events");
        assert!(define_achievement(&db, &admin, &def).unwrap());

        def.level_config = vec![level(3), level(8)];
        assert!(!define_achievement(&db, &admin, &def).unwrap());

        let stored = catalog::query_achievement(&db.connect().unwrap(), "regular").unwrap().unwrap();
        assert_eq!(stored.level_config.len(), 2);
    }

    #[test]
    fn test_rejects_bad_levels_and_fields() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let admin = Caller::admin("a1");

        let mut def = AchievementDefinition::new("regular", "Regular", "Events");
        def.level_config = vec![level(3), level(3)];
        let err = define_achievement(&db, &admin, &def).unwrap_err();
        assert!(matches!(err, AchievementError::Conflict { action: Action::DefineAchievement, .. }));

        let untitled = AchievementDefinition::new("x", "", "Events");
        let err = define_achievement(&db, &admin, &untitled).unwrap_err();
        assert!(matches!(err, AchievementError::InvalidRequest { .. }));

        let err = define_achievement(&db, &Caller::committee("c1"), &untitled).unwrap_err();
        assert!(matches!(err, AchievementError::Forbidden { .. }));

        assert!(catalog::query_catalog(&db.connect().unwrap(), true).unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_progress() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let admin = Caller::admin("a1");

        let def = AchievementDefinition::new("founder", "Founder", "Special");
        define_achievement(&db, &admin, &def).unwrap();
        ProgressReconciler::new(&db).set_achieved(&admin, "founder", "u1", true).unwrap();

        delete_achievement(&db, &admin, "founder").unwrap();
        assert!(status::query_all_statuses(&db.connect().unwrap()).unwrap().is_empty());

        let err = delete_achievement(&db, &admin, "founder").unwrap_err();
        assert!(matches!(err, AchievementError::NotFound { .. }));
        let err = set_enabled(&db, &admin, "founder", false).unwrap_err();
        assert!(matches!(err, AchievementError::NotFound { .. }));
    }
}
