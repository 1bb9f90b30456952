use rusqlite::Connection;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};

use crate::acdb::{DBResult, swallow_constraint_violation};
use crate::models::{AchievementDefinition, LevelDefinition};

/////*============== ACHIEVEMENT CATALOG QUERIES ==============*/
/// The `level_config` column: a JSON array of levels.
struct LevelConfigColumn(Vec<LevelDefinition>);

impl FromSql for LevelConfigColumn {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        if raw.trim().is_empty() {
            return Ok(Self(Vec::new()));
        }
        serde_json::from_str(raw)
            .map(Self)
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

fn level_config_json(levels: &[LevelDefinition]) -> DBResult<String> {
    serde_json::to_string(levels).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

impl<'a> TryFrom<&'a rusqlite::Row<'a>> for AchievementDefinition {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            category: row.get("category")?,

            image_url: row.get("image_url")?,
            description: row.get("description")?,
            achieved_description: row.get("achieved_description")?,
            silhouette_color: row.get("silhouette_color")?,

            is_enabled: row.get("is_enabled")?,
            attendance_counter: row.get("attendance_counter")?,
            attendance_need: row.get("attendance_need")?,
            on_score: row.get("on_score")?,

            card_skin_image_url: row.get("card_skin_image_url")?,
            level_config: row.get::<_, LevelConfigColumn>("level_config")?.0,
        })
    }
}

/// Returns the achievement with `id`, if it exists.
pub fn query_achievement(connection: &Connection, id: &str) -> DBResult<Option<AchievementDefinition>> {
    log::trace!("[query_achievement] Querying achievement '{id}'...");
    connection
        .prepare("SELECT * FROM Achievements WHERE id = :id")?
        .query(rusqlite::named_params! { ":id": id })?
        .next()?
        .map(|row| row.try_into())
        .transpose()
}

/// Returns the catalog ordered by category, then title.
pub fn query_catalog(connection: &Connection, include_disabled: bool) -> DBResult<Vec<AchievementDefinition>> {
    log::trace!("[query_catalog] Querying catalog (include_disabled = {include_disabled})...");
    let mut stmt = connection.prepare(
        "SELECT * FROM Achievements
         WHERE is_enabled = 1 OR :include_disabled
         ORDER BY category, title",
    )?;

    let catalog = stmt
        .query_map(rusqlite::named_params! { ":include_disabled": include_disabled }, |row| {
            AchievementDefinition::try_from(row)
        })?
        .collect::<DBResult<Vec<AchievementDefinition>>>()?;

    Ok(catalog)
}

/// Inserts a new achievement.
/// Returns `true` if it was newly added, `false` if the id was already taken.
pub fn insert_achievement(connection: &Connection, achievement: &AchievementDefinition) -> DBResult<bool> {
    log::trace!("[insert_achievement] Inserting achievement '{}'...", achievement.id);

    let level_config = level_config_json(&achievement.level_config)?;
    let query_params = rusqlite::named_params! {
            ":id":                   achievement.id,
            ":title":                achievement.title,
            ":category":             achievement.category,
            ":image_url":            achievement.image_url,
            ":description":          achievement.description,
            ":achieved_description": achievement.achieved_description,
            ":silhouette_color":     achievement.silhouette_color,
            ":is_enabled":           achievement.is_enabled,
            ":attendance_counter":   achievement.attendance_counter,
            ":attendance_need":      achievement.attendance_need,
            ":on_score":             achievement.on_score,
            ":card_skin_image_url":  achievement.card_skin_image_url,
            ":level_config":         level_config,
    };

    connection
        .prepare(
            "INSERT INTO Achievements
                ( id,  title,  category,  image_url,  description,  achieved_description,
                  silhouette_color,  is_enabled,  attendance_counter,  attendance_need,
                  on_score,  card_skin_image_url,  level_config)
             VALUES
                (:id, :title, :category, :image_url, :description, :achieved_description,
                 :silhouette_color, :is_enabled, :attendance_counter, :attendance_need,
                 :on_score, :card_skin_image_url, :level_config)",
        )?
        .execute(query_params)
        .map_or_else(swallow_constraint_violation, |_| Ok(true))
}

/// Overwrites every field of an existing achievement.
/// Returns `true` if a row was updated.
pub fn update_achievement(connection: &Connection, achievement: &AchievementDefinition) -> DBResult<bool> {
    log::trace!("[update_achievement] Updating achievement '{}'...", achievement.id);

    let level_config = level_config_json(&achievement.level_config)?;
    let query_params = rusqlite::named_params! {
            ":id":                   achievement.id,
            ":title":                achievement.title,
            ":category":             achievement.category,
            ":image_url":            achievement.image_url,
            ":description":          achievement.description,
            ":achieved_description": achievement.achieved_description,
            ":silhouette_color":     achievement.silhouette_color,
            ":is_enabled":           achievement.is_enabled,
            ":attendance_counter":   achievement.attendance_counter,
            ":attendance_need":      achievement.attendance_need,
            ":on_score":             achievement.on_score,
            ":card_skin_image_url":  achievement.card_skin_image_url,
            ":level_config":         level_config,
    };

    let updated = connection
        .prepare(
            "UPDATE Achievements SET
                title = :title,
                category = :category,
                image_url = :image_url,
                description = :description,
                achieved_description = :achieved_description,
                silhouette_color = :silhouette_color,
                is_enabled = :is_enabled,
                attendance_counter = :attendance_counter,
                attendance_need = :attendance_need,
                on_score = :on_score,
                card_skin_image_url = :card_skin_image_url,
                level_config = :level_config
             WHERE id = :id",
        )?
        .execute(query_params)
        .inspect_err(|err| log::error!("[update_achievement] Could not update '{}': {err}", achievement.id))?;

    Ok(updated > 0)
}

/// Returns `true` if the achievement exists.
pub fn set_enabled(connection: &Connection, id: &str, enabled: bool) -> DBResult<bool> {
    let updated = connection
        .prepare("UPDATE Achievements SET is_enabled = :enabled WHERE id = :id")?
        .execute(rusqlite::named_params! { ":id": id, ":enabled": enabled })?;

    Ok(updated > 0)
}

/// Deletes an achievement; its status rows go with it.
/// Returns `true` if the achievement existed.
pub fn delete_achievement(connection: &Connection, id: &str) -> DBResult<bool> {
    log::trace!("[delete_achievement] Deleting achievement '{id}'...");
    let deleted = connection
        .prepare("DELETE FROM Achievements WHERE id = :id")?
        .execute(rusqlite::named_params! { ":id": id })?;

    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acdb::Database;
    use tempfile::tempdir;

    fn sample(id: &str, category: &str, title: &str) -> AchievementDefinition {
        let mut def = AchievementDefinition::new(id, title, category);
        def.attendance_counter = true;
        def.level_config = vec![
            LevelDefinition { progress_needed: 3, level_title: Some("Bronze".into()), ..Default::default() },
            LevelDefinition { progress_needed: 9, level_title: Some("Silver".into()), ..Default::default() },
        ];
        def
    }

    #[test]
    fn test_insert_and_query_achievement() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let connection = db.connect().unwrap();

        let def = sample("regular", "Events", "Regular");
        assert!(insert_achievement(&connection, &def).unwrap());
        assert!(!insert_achievement(&connection, &def).unwrap());

        let stored = query_achievement(&connection, "regular").unwrap().unwrap();
        assert_eq!(stored, def);
        assert!(query_achievement(&connection, "missing").unwrap().is_none());
    }

    #[test]
    fn test_catalog_order_and_visibility() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let connection = db.connect().unwrap();

        insert_achievement(&connection, &sample("b", "Socials", "Bowling")).unwrap();
        insert_achievement(&connection, &sample("z", "Events", "Zoo trip")).unwrap();
        insert_achievement(&connection, &sample("a", "Events", "Archery")).unwrap();
        set_enabled(&connection, "z", false).unwrap();

        let ids = |list: Vec<AchievementDefinition>| list.into_iter().map(|d| d.id).collect::<Vec<_>>();
        assert_eq!(ids(query_catalog(&connection, true).unwrap()), ["a", "z", "b"]);
        assert_eq!(ids(query_catalog(&connection, false).unwrap()), ["a", "b"]);
    }

    #[test]
    fn test_update_and_delete() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let connection = db.connect().unwrap();

        let mut def = sample("regular", "Events", "Regular");
        assert!(!update_achievement(&connection, &def).unwrap());
        insert_achievement(&connection, &def).unwrap();

        def.title = "Very Regular".to_string();
        def.level_config.clear();
        assert!(update_achievement(&connection, &def).unwrap());
        assert_eq!(query_achievement(&connection, "regular").unwrap().unwrap(), def);

        assert!(delete_achievement(&connection, "regular").unwrap());
        assert!(!delete_achievement(&connection, "regular").unwrap());
    }
}
