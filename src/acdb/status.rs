//! Queries over `UserAchievements`, one row per (achievement, user).
//!
//! Writes are upserts keyed on the primary key and hand back the row as stored
//! (`RETURNING`), so callers never read-then-write.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::acdb::DBResult;
use crate::models::UserAchievementStatus;

const STATUS_COLUMNS: &str = "achievement_id, user_id, achieved, achieved_date, attendance_count, score";

/////*============== STATUS QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for UserAchievementStatus {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            achievement_id: row.get("achievement_id")?,
            user_id: row.get("user_id")?,
            achieved: row.get("achieved")?,
            achieved_date: row.get("achieved_date")?,
            attendance_count: row.get("attendance_count")?,
            score: row.get("score")?,
        })
    }
}

/// Returns the status row for (`achievement_id`, `user_id`), if one was ever created.
pub fn query_status(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
) -> DBResult<Option<UserAchievementStatus>> {
    log::trace!("[query_status] Querying '{achievement_id}' for {user_id}...");
    connection
        .prepare(&format!(
            "SELECT {STATUS_COLUMNS} FROM UserAchievements
             WHERE achievement_id = :achievement_id AND user_id = :user_id"
        ))?
        .query(rusqlite::named_params! { ":achievement_id": achievement_id, ":user_id": user_id })?
        .next()?
        .map(|row| row.try_into())
        .transpose()
}

/// Every status row, achievers first, then by score and date.
pub fn query_all_statuses(connection: &Connection) -> DBResult<Vec<UserAchievementStatus>> {
    log::trace!("[query_all_statuses] Querying every status row...");
    let mut stmt = connection.prepare(&format!(
        "SELECT {STATUS_COLUMNS} FROM UserAchievements
         ORDER BY achievement_id, achieved DESC, score DESC, achieved_date, user_id"
    ))?;

    let statuses = stmt
        .query_map([], |row| UserAchievementStatus::try_from(row))?
        .collect::<DBResult<Vec<UserAchievementStatus>>>()?;

    Ok(statuses)
}

/// Marks the pair achieved with `attendance_count`. An existing achieved date is kept.
pub fn upsert_grant(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
    attendance_count: u32,
    now: DateTime<Utc>,
) -> DBResult<UserAchievementStatus> {
    log::trace!("[upsert_grant] Granting '{achievement_id}' to {user_id} at count {attendance_count}...");
    let query_params = rusqlite::named_params! {
            ":achievement_id":   achievement_id,
            ":user_id":          user_id,
            ":attendance_count": attendance_count,
            ":now":              now,
    };

    connection
        .prepare(&format!(
            "INSERT INTO UserAchievements (achievement_id, user_id, achieved, achieved_date, attendance_count)
             VALUES (:achievement_id, :user_id, 1, :now, :attendance_count)
             ON CONFLICT (achievement_id, user_id) DO UPDATE SET
                achieved_date = CASE WHEN achieved = 1 AND achieved_date IS NOT NULL
                                     THEN achieved_date
                                     ELSE excluded.achieved_date END,
                achieved = 1,
                attendance_count = excluded.attendance_count
             RETURNING {STATUS_COLUMNS}"
        ))?
        .query_row(query_params, |row| UserAchievementStatus::try_from(row))
        .inspect_err(|err| log::error!("[upsert_grant] Could not grant '{achievement_id}': {err}"))
}

/// Resets the pair: not achieved, no date, zero count, no score.
pub fn upsert_revoke(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
) -> DBResult<UserAchievementStatus> {
    log::trace!("[upsert_revoke] Revoking '{achievement_id}' from {user_id}...");
    connection
        .prepare(&format!(
            "INSERT INTO UserAchievements (achievement_id, user_id, achieved, achieved_date, attendance_count, score)
             VALUES (:achievement_id, :user_id, 0, NULL, 0, NULL)
             ON CONFLICT (achievement_id, user_id) DO UPDATE SET
                achieved = 0,
                achieved_date = NULL,
                attendance_count = 0,
                score = NULL
             RETURNING {STATUS_COLUMNS}"
        ))?
        .query_row(
            rusqlite::named_params! { ":achievement_id": achievement_id, ":user_id": user_id },
            |row| UserAchievementStatus::try_from(row),
        )
        .inspect_err(|err| log::error!("[upsert_revoke] Could not revoke '{achievement_id}': {err}"))
}

/// Adds `delta` to the stored count in a single statement, clamping at zero.
/// Returns the row after the update.
pub fn upsert_count_delta(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
    delta: i64,
) -> DBResult<UserAchievementStatus> {
    log::trace!("[upsert_count_delta] Applying {delta:+} to '{achievement_id}' for {user_id}...");
    let query_params = rusqlite::named_params! {
            ":achievement_id": achievement_id,
            ":user_id":        user_id,
            ":delta":          delta,
    };

    connection
        .prepare(&format!(
            "INSERT INTO UserAchievements (achievement_id, user_id, attendance_count)
             VALUES (:achievement_id, :user_id, MAX(0, :delta))
             ON CONFLICT (achievement_id, user_id) DO UPDATE SET
                attendance_count = MAX(0, attendance_count + :delta)
             RETURNING {STATUS_COLUMNS}"
        ))?
        .query_row(query_params, |row| UserAchievementStatus::try_from(row))
        .inspect_err(|err| log::error!("[upsert_count_delta] Could not update count: {err}"))
}

/// Sets the score verbatim. Count and achieved state are untouched.
pub fn upsert_score(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
    score: Option<f64>,
) -> DBResult<UserAchievementStatus> {
    log::trace!("[upsert_score] Setting score {score:?} on '{achievement_id}' for {user_id}...");
    let query_params = rusqlite::named_params! {
            ":achievement_id": achievement_id,
            ":user_id":        user_id,
            ":score":          score,
    };

    connection
        .prepare(&format!(
            "INSERT INTO UserAchievements (achievement_id, user_id, score)
             VALUES (:achievement_id, :user_id, :score)
             ON CONFLICT (achievement_id, user_id) DO UPDATE SET
                score = excluded.score
             RETURNING {STATUS_COLUMNS}"
        ))?
        .query_row(query_params, |row| UserAchievementStatus::try_from(row))
        .inspect_err(|err| log::error!("[upsert_score] Could not set score: {err}"))
}

/// Overwrites the achieved flag and date of an existing row.
pub fn update_achieved(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
    achieved: bool,
    achieved_date: Option<DateTime<Utc>>,
) -> DBResult<()> {
    let query_params = rusqlite::named_params! {
            ":achievement_id": achievement_id,
            ":user_id":        user_id,
            ":achieved":       achieved,
            ":achieved_date":  achieved_date,
    };

    connection
        .prepare(
            "UPDATE UserAchievements SET
                achieved = :achieved,
                achieved_date = :achieved_date
             WHERE achievement_id = :achievement_id AND user_id = :user_id",
        )?
        .execute(query_params)
        .inspect_err(|err| log::error!("[update_achieved] Could not update achieved flag: {err}"))?;

    Ok(())
}

/// Fills in a missing achieved date. Never overwrites an existing one.
pub fn backfill_achieved_date(
    connection: &Connection,
    achievement_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> DBResult<bool> {
    let updated = connection
        .prepare(
            "UPDATE UserAchievements SET achieved_date = :now
             WHERE achievement_id = :achievement_id AND user_id = :user_id
               AND achieved_date IS NULL",
        )?
        .execute(rusqlite::named_params! {
            ":achievement_id": achievement_id,
            ":user_id": user_id,
            ":now": now,
        })?;

    Ok(updated > 0)
}
