//! Progress reconciliation.
//!
//! Every mutation of a (achievement, user) status row goes through
//! [`ProgressReconciler`]. Each call runs in one immediate transaction: the
//! upsert and the follow-up `achieved` reconciliation commit or roll back
//! together, and a concurrent writer waits on SQLite's write lock instead of
//! interleaving.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::access::{Action, Caller};
use crate::acdb::{Database, DBResult, catalog, status};
use crate::errors::{AchievementError, AchievementResult, ForAction};
use crate::models::{AchievementDefinition, UserAchievementStatus};

pub type Clock = fn() -> DateTime<Utc>;

/// What a count change does to the stored `achieved` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Progress crossed the threshold: set achieved and stamp the date.
    AutoGrant,
    /// Progress fell back below the threshold: clear achieved and its date.
    AutoRevoke,
    /// Still achieved but the date is missing.
    BackfillDate,
    Unchanged,
}

/// Count a grant jumps the user to: the top level, the counter's need, or 1.
pub fn grant_count(achievement: &AchievementDefinition) -> u32 {
    match achievement.max_level_threshold() {
        Some(max) => max,
        None if achievement.attendance_counter => achievement.counter_threshold(),
        None => 1,
    }
}

/// Whether `count` is enough to hold the achievement.
pub fn qualifies(achievement: &AchievementDefinition, count: u32) -> bool {
    match achievement.min_level_threshold() {
        Some(min) => count >= min,
        None => count >= achievement.counter_threshold(),
    }
}

pub fn reconcile(achievement: &AchievementDefinition, status: &UserAchievementStatus) -> Reconciliation {
    match (qualifies(achievement, status.attendance_count), status.achieved) {
        (true, false) => Reconciliation::AutoGrant,
        (false, true) => Reconciliation::AutoRevoke,
        (true, true) if status.achieved_date.is_none() => Reconciliation::BackfillDate,
        _ => Reconciliation::Unchanged,
    }
}

pub(crate) fn require_id(action: Action, field: &str, value: &str) -> AchievementResult<()> {
    if value.trim().is_empty() {
        return Err(AchievementError::invalid(action, format!("missing {field}")));
    }
    Ok(())
}

pub(crate) fn require_achievement(
    connection: &Connection,
    action: Action,
    achievement_id: &str,
) -> AchievementResult<AchievementDefinition> {
    catalog::query_achievement(connection, achievement_id)
        .for_action(action)?
        .ok_or_else(|| AchievementError::not_found(action, format!("no achievement with id '{achievement_id}'")))
}

fn begin(connection: &mut Connection) -> DBResult<Transaction<'_>> {
    connection.transaction_with_behavior(TransactionBehavior::Immediate)
}

pub struct ProgressReconciler<'a> {
    db: &'a Database,
    clock: Clock,
}

impl<'a> ProgressReconciler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, clock: Utc::now }
    }

    pub fn with_clock(db: &'a Database, clock: Clock) -> Self {
        Self { db, clock }
    }

    /// Grants (`achieved = true`) or revokes an achievement outright.
    ///
    /// A grant moves the count to [`grant_count`] and keeps the score; a revoke
    /// zeroes the count and clears the date and score.
    pub fn set_achieved(
        &self,
        caller: &Caller,
        achievement_id: &str,
        target_user_id: &str,
        achieved: bool,
    ) -> AchievementResult<UserAchievementStatus> {
        let action = Action::SetAchieved;
        caller.authorize(action)?;
        require_id(action, "achievementId", achievement_id)?;
        require_id(action, "targetUserId", target_user_id)?;

        let mut connection = self.db.connect().for_action(action)?;
        let tx = begin(&mut connection).for_action(action)?;
        let achievement = require_achievement(&tx, action, achievement_id)?;

        let status = if achieved {
            let count = grant_count(&achievement);
            let status = status::upsert_grant(&tx, achievement_id, target_user_id, count, (self.clock)()).for_action(action)?;
            log::info!("Granted '{achievement_id}' to {target_user_id} (count = {count})");
            status
        } else {
            let status = status::upsert_revoke(&tx, achievement_id, target_user_id).for_action(action)?;
            log::info!("Revoked '{achievement_id}' from {target_user_id}");
            status
        };

        tx.commit().for_action(action)?;
        Ok(status)
    }

    /// Adds `delta` (possibly negative) to the user's count, clamped at zero,
    /// then brings `achieved` back in line with the new count.
    pub fn update_count(
        &self,
        caller: &Caller,
        achievement_id: &str,
        target_user_id: &str,
        delta: i64,
    ) -> AchievementResult<UserAchievementStatus> {
        let action = Action::UpdateCount;
        caller.authorize(action)?;
        require_id(action, "achievementId", achievement_id)?;
        require_id(action, "targetUserId", target_user_id)?;

        let mut connection = self.db.connect().for_action(action)?;
        let tx = begin(&mut connection).for_action(action)?;
        let achievement = require_achievement(&tx, action, achievement_id)?;

        // The write lock is held, so this count is the one the upsert will see.
        let current = status::query_status(&tx, achievement_id, target_user_id)
            .for_action(action)?
            .map_or(0, |s| s.attendance_count);
        if i64::from(current).checked_add(delta).is_none_or(|next| next > i64::from(u32::MAX)) {
            return Err(AchievementError::invalid(
                action,
                format!("countChange {delta:+} takes the count of {current} out of range"),
            ));
        }

        let mut status = status::upsert_count_delta(&tx, achievement_id, target_user_id, delta).for_action(action)?;

        // A zero delta is a no-op, reconciliation included.
        if delta != 0 && achievement.attendance_counter {
            let now = (self.clock)();
            match reconcile(&achievement, &status) {
                Reconciliation::AutoGrant => {
                    status::update_achieved(&tx, achievement_id, target_user_id, true, Some(now)).for_action(action)?;
                    status.achieved = true;
                    status.achieved_date = Some(now);
                    log::info!(
                        "Auto-granted '{achievement_id}' to {target_user_id} at count {}",
                        status.attendance_count
                    );
                }
                Reconciliation::AutoRevoke => {
                    status::update_achieved(&tx, achievement_id, target_user_id, false, None).for_action(action)?;
                    status.achieved = false;
                    status.achieved_date = None;
                    log::info!(
                        "Auto-revoked '{achievement_id}' from {target_user_id} at count {}",
                        status.attendance_count
                    );
                }
                Reconciliation::BackfillDate => {
                    status::backfill_achieved_date(&tx, achievement_id, target_user_id, now).for_action(action)?;
                    status.achieved_date = Some(now);
                    log::warn!("Backfilled missing achieved date of '{achievement_id}' for {target_user_id}");
                }
                Reconciliation::Unchanged => {}
            }
        }

        tx.commit().for_action(action)?;
        Ok(status)
    }

    /// Sets the score verbatim. Rejected unless the achievement tracks scores.
    pub fn update_score(
        &self,
        caller: &Caller,
        achievement_id: &str,
        target_user_id: &str,
        score: Option<f64>,
    ) -> AchievementResult<UserAchievementStatus> {
        let action = Action::UpdateScore;
        caller.authorize(action)?;
        require_id(action, "achievementId", achievement_id)?;
        require_id(action, "targetUserId", target_user_id)?;
        if score.is_some_and(|s| !s.is_finite()) {
            return Err(AchievementError::invalid(action, "score must be a finite number"));
        }

        let mut connection = self.db.connect().for_action(action)?;
        let tx = begin(&mut connection).for_action(action)?;
        let achievement = require_achievement(&tx, action, achievement_id)?;
        if !achievement.on_score {
            return Err(AchievementError::invalid(
                action,
                format!("scoring is disabled for '{achievement_id}'"),
            ));
        }

        let status = status::upsert_score(&tx, achievement_id, target_user_id, score).for_action(action)?;
        tx.commit().for_action(action)?;

        log::info!("Set score of '{achievement_id}' for {target_user_id} to {score:?}");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LevelDefinition;
    use chrono::TimeZone;
    use tempfile::{TempDir, tempdir};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 19, 0, 0).unwrap()
    }

    fn level(progress_needed: u32) -> LevelDefinition {
        LevelDefinition { progress_needed, ..Default::default() }
    }

    fn leveled() -> AchievementDefinition {
        let mut def = AchievementDefinition::new("regular", "Regular", "Events");
        def.attendance_counter = true;
        def.level_config = vec![level(10), level(5)];
        def
    }

    fn counter(need: Option<u32>) -> AchievementDefinition {
        let mut def = AchievementDefinition::new("volunteer", "Volunteer", "Community");
        def.attendance_counter = true;
        def.attendance_need = need;
        def
    }

    fn simple() -> AchievementDefinition {
        let mut def = AchievementDefinition::new("founder", "Founder", "Special");
        def.on_score = true;
        def
    }

    fn setup(defs: &[AchievementDefinition]) -> (TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let connection = db.connect().unwrap();
        for def in defs {
            catalog::insert_achievement(&connection, def).unwrap();
        }
        (dir, db)
    }

    fn stored(db: &Database, achievement_id: &str, user_id: &str) -> UserAchievementStatus {
        status::query_status(&db.connect().unwrap(), achievement_id, user_id).unwrap().unwrap()
    }

    #[test]
    fn test_increment_past_first_level_auto_grants() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        let status = reconciler.update_count(&admin, "regular", "u1", 4).unwrap();
        assert!(!status.achieved);

        let status = reconciler.update_count(&admin, "regular", "u1", 1).unwrap();
        assert_eq!(status.attendance_count, 5);
        assert!(status.achieved);
        assert_eq!(status.achieved_date, Some(fixed_now()));
        assert_eq!(stored(&db, "regular", "u1"), status);

        let def = leveled();
        let resolution = crate::levels::resolve_level(&def, Some(status.attendance_count));
        assert_eq!(resolution.current_level.map(|l| l.progress_needed), Some(5));
    }

    #[test]
    fn test_decrement_below_threshold_auto_revokes() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let committee = Caller::committee("c1");

        reconciler.update_count(&committee, "regular", "u1", 5).unwrap();
        let status = reconciler.update_count(&committee, "regular", "u1", -1).unwrap();

        assert_eq!(status.attendance_count, 4);
        assert!(!status.achieved);
        assert_eq!(status.achieved_date, None);
        assert_eq!(stored(&db, "regular", "u1"), status);
    }

    #[test]
    fn test_zero_delta_changes_nothing() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        let before = reconciler.update_count(&admin, "regular", "u1", 7).unwrap();
        let after = reconciler.update_count(&admin, "regular", "u1", 0).unwrap();
        assert_eq!(before, after);

        // Even a row with a missing date is left alone.
        status::update_achieved(&db.connect().unwrap(), "regular", "u1", true, None).unwrap();
        let after = reconciler.update_count(&admin, "regular", "u1", 0).unwrap();
        assert_eq!(after.achieved_date, None);
    }

    #[test]
    fn test_count_never_negative() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        let status = reconciler.update_count(&admin, "regular", "u1", -1_000_000).unwrap();
        assert_eq!(status.attendance_count, 0);

        reconciler.update_count(&admin, "regular", "u1", 3).unwrap();
        let status = reconciler.update_count(&admin, "regular", "u1", i64::from(i32::MIN)).unwrap();
        assert_eq!(status.attendance_count, 0);
    }

    #[test]
    fn test_count_overflow_is_invalid_and_rolled_back() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");
        reconciler.update_count(&admin, "regular", "u1", 3).unwrap();

        for delta in [5_000_000_000, i64::MAX, i64::from(u32::MAX) - 2] {
            let err = reconciler.update_count(&admin, "regular", "u1", delta).unwrap_err();
            assert!(matches!(err, AchievementError::InvalidRequest { action: Action::UpdateCount, .. }));
        }
        assert_eq!(stored(&db, "regular", "u1").attendance_count, 3);

        let status = reconciler
            .update_count(&admin, "regular", "u1", i64::from(u32::MAX) - 3)
            .unwrap();
        assert_eq!(status.attendance_count, u32::MAX);
    }

    #[test]
    fn test_storage_errors_are_tagged() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        db.connect().unwrap().execute_batch("DROP TABLE UserAchievements").unwrap();

        let err = reconciler.update_count(&Caller::admin("a1"), "regular", "u1", 1).unwrap_err();
        assert!(matches!(err, AchievementError::Database { action: Action::UpdateCount, .. }));
        assert!(err.to_string().starts_with("[updateCount] database error:"));

        let err = reconciler.set_achieved(&Caller::admin("a1"), "regular", "u1", true).unwrap_err();
        assert_eq!(err.action(), Action::SetAchieved);
    }

    #[test]
    fn test_backfills_missing_date_on_change() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        reconciler.update_count(&admin, "regular", "u1", 6).unwrap();
        status::update_achieved(&db.connect().unwrap(), "regular", "u1", true, None).unwrap();

        let status = reconciler.update_count(&admin, "regular", "u1", 1).unwrap();
        assert!(status.achieved);
        assert_eq!(status.achieved_date, Some(fixed_now()));
    }

    #[test]
    fn test_plain_counter_uses_need() {
        let (_dir, db) = setup(&[counter(Some(3))]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        assert!(!reconciler.update_count(&admin, "volunteer", "u1", 2).unwrap().achieved);
        assert!(reconciler.update_count(&admin, "volunteer", "u1", 1).unwrap().achieved);
        assert!(!reconciler.update_count(&admin, "volunteer", "u1", -1).unwrap().achieved);
    }

    #[test]
    fn test_grant_jumps_to_max_level() {
        let (_dir, db) = setup(&[leveled(), counter(None), simple()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        let status = reconciler.set_achieved(&admin, "regular", "u1", true).unwrap();
        assert_eq!(status.attendance_count, 10);
        assert!(status.achieved);
        assert_eq!(status.achieved_date, Some(fixed_now()));

        let status = reconciler.set_achieved(&admin, "volunteer", "u1", true).unwrap();
        assert_eq!(status.attendance_count, 1);

        let status = reconciler.set_achieved(&admin, "founder", "u1", true).unwrap();
        assert_eq!(status.attendance_count, 1);
    }

    #[test]
    fn test_grant_then_revoke_resets_everything() {
        let (_dir, db) = setup(&[simple()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        reconciler.update_score(&admin, "founder", "u1", Some(88.0)).unwrap();
        let granted = reconciler.set_achieved(&admin, "founder", "u1", true).unwrap();
        assert_eq!(granted.score, Some(88.0));

        let revoked = reconciler.set_achieved(&admin, "founder", "u1", false).unwrap();
        assert!(!revoked.achieved);
        assert_eq!(revoked.attendance_count, 0);
        assert_eq!(revoked.achieved_date, None);
        assert_eq!(revoked.score, None);
    }

    #[test]
    fn test_score_rejected_when_scoring_disabled() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let admin = Caller::admin("a1");

        let before = reconciler.update_count(&admin, "regular", "u1", 5).unwrap();
        let err = reconciler.update_score(&admin, "regular", "u1", Some(3.0)).unwrap_err();
        assert!(matches!(err, AchievementError::InvalidRequest { action: Action::UpdateScore, .. }));
        assert_eq!(stored(&db, "regular", "u1"), before);
    }

    #[test]
    fn test_score_leaves_progress_alone() {
        let (_dir, db) = setup(&[simple()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);
        let committee = Caller::committee("c1");

        let status = reconciler.update_score(&committee, "founder", "u1", Some(12.5)).unwrap();
        assert_eq!(status.score, Some(12.5));
        assert!(!status.achieved);
        assert_eq!(status.attendance_count, 0);

        let status = reconciler.update_score(&committee, "founder", "u1", None).unwrap();
        assert_eq!(status.score, None);

        let err = reconciler.update_score(&committee, "founder", "u1", Some(f64::NAN)).unwrap_err();
        assert!(matches!(err, AchievementError::InvalidRequest { .. }));
    }

    #[test]
    fn test_refuses_unauthorized_and_unknown() {
        let (_dir, db) = setup(&[leveled()]);
        let reconciler = ProgressReconciler::with_clock(&db, fixed_now);

        let err = reconciler.set_achieved(&Caller::committee("c1"), "regular", "u1", true).unwrap_err();
        assert!(matches!(err, AchievementError::Forbidden { action: Action::SetAchieved, .. }));

        let err = reconciler.update_count(&Caller::member("m1"), "regular", "u1", 1).unwrap_err();
        assert!(matches!(err, AchievementError::Forbidden { .. }));

        let err = reconciler.update_count(&Caller::admin("a1"), "nope", "u1", 1).unwrap_err();
        assert!(matches!(err, AchievementError::NotFound { action: Action::UpdateCount, .. }));

        let err = reconciler.update_count(&Caller::admin("a1"), "regular", " ", 1).unwrap_err();
        assert!(matches!(err, AchievementError::InvalidRequest { .. }));

        assert!(status::query_status(&db.connect().unwrap(), "regular", "u1").unwrap().is_none());
    }

    #[test]
    fn test_reconcile_table() {
        let def = leveled();
        let row = |count, achieved, dated: bool| UserAchievementStatus {
            achievement_id: "regular".into(),
            user_id: "u1".into(),
            achieved,
            achieved_date: dated.then(fixed_now),
            attendance_count: count,
            score: None,
        };

        assert_eq!(reconcile(&def, &row(5, false, false)), Reconciliation::AutoGrant);
        assert_eq!(reconcile(&def, &row(4, true, true)), Reconciliation::AutoRevoke);
        assert_eq!(reconcile(&def, &row(6, true, false)), Reconciliation::BackfillDate);
        assert_eq!(reconcile(&def, &row(6, true, true)), Reconciliation::Unchanged);
        assert_eq!(reconcile(&def, &row(0, false, false)), Reconciliation::Unchanged);
    }
}
