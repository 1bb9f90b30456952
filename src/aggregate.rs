//! Read side: the achievement list as one user sees it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::access::{Action, Caller};
use crate::acdb::{DBResult, Database, status};
use crate::errors::{AchievementResult, ForAction};
use crate::levels::resolve_level;
use crate::models::{AchievementDefinition, AchievementView, AchieverEntry};

/// The requesting user's own row, if any, joined onto a catalog row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProgress {
    pub achieved: bool,
    pub achieved_date: Option<DateTime<Utc>>,
    pub attendance_count: u32,
    pub score: Option<f64>,
}

/// Catalog-wide figures for one achievement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    pub total_achievers: u32,
    pub highest_score: Option<f64>,
}

struct CatalogRow {
    achievement: AchievementDefinition,
    progress: Option<UserProgress>,
    aggregates: Aggregates,
}

impl<'a> TryFrom<&'a rusqlite::Row<'a>> for CatalogRow {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let progress = match row.get::<_, Option<bool>>("user_achieved")? {
            Some(achieved) => Some(UserProgress {
                achieved,
                achieved_date: row.get("user_achieved_date")?,
                attendance_count: row.get("user_attendance_count")?,
                score: row.get("user_score")?,
            }),
            None => None,
        };

        Ok(Self {
            achievement: AchievementDefinition::try_from(row)?,
            progress,
            aggregates: Aggregates {
                total_achievers: row.get("total_achievers")?,
                highest_score: row.get("highest_score")?,
            },
        })
    }
}

fn query_catalog_for_user(
    connection: &rusqlite::Connection,
    user_id: Option<&str>,
    include_disabled: bool,
) -> DBResult<Vec<CatalogRow>> {
    log::trace!("[query_catalog_for_user] Querying catalog for {user_id:?}...");
    let mut stmt = connection.prepare(
        "SELECT a.*,
                s.achieved         AS user_achieved,
                s.achieved_date    AS user_achieved_date,
                s.attendance_count AS user_attendance_count,
                s.score            AS user_score,
                (SELECT COUNT(DISTINCT t.user_id) FROM UserAchievements t
                  WHERE t.achievement_id = a.id AND t.achieved = 1) AS total_achievers,
                (SELECT MAX(t.score) FROM UserAchievements t
                  WHERE t.achievement_id = a.id AND t.achieved = 1) AS highest_score
         FROM Achievements a
         LEFT JOIN UserAchievements s ON s.achievement_id = a.id AND s.user_id = :user_id
         WHERE a.is_enabled = 1 OR :include_disabled
         ORDER BY a.category, a.title",
    )?;

    let query_params = rusqlite::named_params! {
            ":user_id": user_id,
            ":include_disabled": include_disabled,
    };

    let rows = stmt
        .query_map(query_params, |row| CatalogRow::try_from(row))?
        .collect::<DBResult<Vec<CatalogRow>>>()?;

    Ok(rows)
}

/// Builds the user-facing view of one achievement.
///
/// Level-driven achievements get `current_user_achieved` re-derived from the
/// count; others use the stored flag.
pub fn build_view(
    achievement: &AchievementDefinition,
    progress: Option<&UserProgress>,
    aggregates: &Aggregates,
    achievers: Vec<AchieverEntry>,
    privileged: bool,
) -> AchievementView {
    let count = progress.map(|p| p.attendance_count);
    let resolution = resolve_level(achievement, Some(count.unwrap_or(0)));

    let current_user_achieved = if achievement.is_level_driven() {
        resolution.is_achieved_based_on_levels
    } else {
        progress.is_some_and(|p| p.achieved)
    };

    let details = &resolution.override_details;
    AchievementView {
        id: achievement.id.clone(),
        category: achievement.category.clone(),

        title: details.title.clone(),
        image_url: details.image_url.clone(),
        description: details.description.clone(),
        achieved_description: details.achieved_description.clone(),
        card_skin_image_url: details.card_skin_image_url.clone(),
        silhouette_color: achievement.silhouette_color.clone(),

        is_enabled: achievement.is_enabled,
        attendance_counter: achievement.attendance_counter,
        on_score: achievement.on_score,
        attendance_need: resolution.progress_needed_for_next_display,

        current_user_achieved,
        current_user_achieved_date: progress.and_then(|p| p.achieved_date),
        current_user_progress: count.unwrap_or(0),
        current_user_score: progress.and_then(|p| p.score),

        current_level: resolution.current_summary(),
        next_level: resolution.next_summary(),
        is_max_level: resolution.is_max_level,
        level_count: resolution.level_count,

        total_achievers: aggregates.total_achievers,
        highest_score: aggregates.highest_score,
        achievers,

        base: privileged.then(|| achievement.clone()),
    }
}

pub struct AchievementAggregateReader<'a> {
    db: &'a Database,
}

impl<'a> AchievementAggregateReader<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Lists the catalog (category, then title) as `caller` sees it.
    ///
    /// Disabled achievements, the per-user roster and the raw definition are
    /// only shown to privileged callers.
    pub fn list_for_user(&self, caller: &Caller) -> AchievementResult<Vec<AchievementView>> {
        let action = Action::Read;
        caller.authorize(action)?;
        let privileged = caller.is_privileged();

        let mut connection = self.db.connect().for_action(action)?;
        // Both reads come from the same snapshot.
        let tx = connection.transaction().for_action(action)?;
        let rows = query_catalog_for_user(&tx, caller.user_id.as_deref(), privileged).for_action(action)?;
        let statuses = if privileged {
            status::query_all_statuses(&tx).for_action(action)?
        } else {
            Vec::new()
        };
        let mut rosters: HashMap<String, Vec<AchieverEntry>> = statuses
            .into_iter()
            .into_group_map_by(|s| s.achievement_id.clone())
            .into_iter()
            .map(|(id, statuses)| (id, statuses.into_iter().map(AchieverEntry::from).collect()))
            .collect();
        tx.commit().for_action(action)?;

        let views = rows
            .into_iter()
            .map(|row| {
                let achievers = rosters.remove(&row.achievement.id).unwrap_or_default();
                build_view(&row.achievement, row.progress.as_ref(), &row.aggregates, achievers, privileged)
            })
            .collect::<Vec<_>>();

        log::trace!("[list_for_user] {} achievement(s) for {:?}", views.len(), caller.user_id);
        Ok(views)
    }

    /// The view of a single achievement, or `None` if it is missing or hidden from `caller`.
    pub fn view_for_user(&self, caller: &Caller, achievement_id: &str) -> AchievementResult<Option<AchievementView>> {
        Ok(self.list_for_user(caller)?.into_iter().find(|v| v.id == achievement_id))
    }
}
