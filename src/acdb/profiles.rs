use rusqlite::{Connection, OptionalExtension};

use crate::acdb::DBResult;

/////*============== PROFILE QUERIES ==============*/
/// Returns the user's favourite achievement id, if they picked one.
pub fn query_favorite(connection: &Connection, user_id: &str) -> DBResult<Option<String>> {
    log::trace!("[query_favorite] Querying favourite for {user_id}...");
    connection
        .prepare("SELECT favorite_achievement_id FROM UserProfiles WHERE user_id = :user_id")?
        .query_row(rusqlite::named_params! { ":user_id": user_id }, |row| {
            row.get::<_, Option<String>>("favorite_achievement_id")
        })
        .optional()
        .map(Option::flatten)
}

/// Sets (or with `None`, clears) the user's favourite achievement.
pub fn upsert_favorite(connection: &Connection, user_id: &str, achievement_id: Option<&str>) -> DBResult<()> {
    log::trace!("[upsert_favorite] Setting favourite of {user_id} to {achievement_id:?}...");
    connection
        .prepare(
            "INSERT INTO UserProfiles (user_id, favorite_achievement_id)
             VALUES (:user_id, :achievement_id)
             ON CONFLICT (user_id) DO UPDATE SET
                favorite_achievement_id = excluded.favorite_achievement_id",
        )?
        .execute(rusqlite::named_params! { ":user_id": user_id, ":achievement_id": achievement_id })
        .inspect_err(|err| log::error!("[upsert_favorite] Could not set favourite: {err}"))?;

    Ok(())
}
