//! Level resolution for achievements.
//!
//! Maps a raw progress counter onto an achievement's level ladder: which level
//! is held, which one comes next, and which title/image/description to show.

use itertools::Itertools;

use crate::models::{AchievementDefinition, LevelDefinition, LevelSummary};

/// Display fields after applying level overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideDetails {
    pub title: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub achieved_description: Option<String>,
    pub card_skin_image_url: Option<String>,
}

impl OverrideDetails {
    fn base(achievement: &AchievementDefinition) -> Self {
        Self {
            title: achievement.title.clone(),
            image_url: achievement.image_url.clone(),
            description: achievement.description.clone(),
            achieved_description: achievement.achieved_description.clone(),
            card_skin_image_url: achievement.card_skin_image_url.clone(),
        }
    }

    /// Fields for a level the user holds.
    fn held(achievement: &AchievementDefinition, level: &LevelDefinition) -> Self {
        Self {
            title: non_empty(&level.level_title).unwrap_or(achievement.title.as_str()).to_string(),
            image_url: or_base(&level.level_img_url, &achievement.image_url),
            description: or_base(&level.level_description, &achievement.description),
            achieved_description: non_empty(&level.level_achieve_description)
                .or(non_empty(&level.level_description))
                .map(str::to_string)
                .or_else(|| achievement.achieved_description.clone()),
            card_skin_image_url: or_base(&level.level_skin_url, &achievement.card_skin_image_url),
        }
    }

    /// Locked preview of the first level. Nothing is achieved yet, so the
    /// achieved description is the plain base description.
    fn preview(achievement: &AchievementDefinition, level: &LevelDefinition) -> Self {
        Self {
            title: non_empty(&level.level_title).unwrap_or(achievement.title.as_str()).to_string(),
            image_url: or_base(&level.level_img_url, &achievement.image_url),
            description: or_base(&level.level_description, &achievement.description),
            achieved_description: achievement.description.clone(),
            card_skin_image_url: achievement.card_skin_image_url.clone(),
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

fn or_base(field: &Option<String>, base: &Option<String>) -> Option<String> {
    non_empty(field).map(str::to_string).or_else(|| base.clone())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelResolution<'a> {
    pub current_level: Option<&'a LevelDefinition>,
    /// 1-based position of `current_level` in threshold order.
    pub current_level_number: Option<usize>,
    pub next_level: Option<&'a LevelDefinition>,
    pub is_max_level: bool,
    pub progress_needed_for_next_display: Option<u32>,
    pub override_details: OverrideDetails,
    pub is_achieved_based_on_levels: bool,
    pub level_count: usize,
}

impl LevelResolution<'_> {
    pub fn current_summary(&self) -> Option<LevelSummary> {
        self.current_level.zip(self.current_level_number).map(|(level, number)| LevelSummary {
            number,
            progress_needed: level.progress_needed,
            title: level.level_title.clone(),
        })
    }

    pub fn next_summary(&self) -> Option<LevelSummary> {
        let number = self.current_level_number.map_or(1, |n| n + 1);
        self.next_level.map(|level| LevelSummary {
            number,
            progress_needed: level.progress_needed,
            title: level.level_title.clone(),
        })
    }
}

/// Levels in ascending threshold order, ties broken by `level_order`.
pub fn sorted_levels(levels: &[LevelDefinition]) -> Vec<&LevelDefinition> {
    levels
        .iter()
        .sorted_by_key(|l| (l.progress_needed, l.level_order.unwrap_or(u32::MAX)))
        .collect()
}

/// Resolves which level `progress` reaches on `achievement`'s ladder.
///
/// Total over any input; a missing progress value behaves like an achievement
/// without levels.
pub fn resolve_level(
    achievement: &AchievementDefinition,
    progress: Option<u32>,
) -> LevelResolution<'_> {
    let level_count = achievement.level_config.len();

    let Some(progress) = progress.filter(|_| achievement.has_levels()) else {
        return LevelResolution {
            current_level: None,
            current_level_number: None,
            next_level: None,
            is_max_level: false,
            progress_needed_for_next_display: achievement.attendance_need,
            override_details: OverrideDetails::base(achievement),
            is_achieved_based_on_levels: false,
            level_count,
        };
    };

    let sorted = sorted_levels(&achievement.level_config);
    let current_index = sorted.iter().rposition(|l| l.progress_needed <= progress);

    let current_level = current_index.map(|i| sorted[i]);
    let next_level = match current_index {
        Some(i) => sorted.get(i + 1).copied(),
        None => sorted.first().copied(),
    };
    let is_max_level = current_index.is_some_and(|i| i + 1 == sorted.len());

    let progress_needed_for_next_display = match (next_level, current_level) {
        (Some(next), _) => Some(next.progress_needed),
        (None, Some(current)) => Some(current.progress_needed),
        (None, None) => achievement.attendance_need,
    };

    let override_details = match (current_level, next_level) {
        (Some(current), _) => OverrideDetails::held(achievement, current),
        (None, Some(next)) => OverrideDetails::preview(achievement, next),
        (None, None) => OverrideDetails::base(achievement),
    };

    LevelResolution {
        current_level,
        current_level_number: current_index.map(|i| i + 1),
        next_level,
        is_max_level,
        progress_needed_for_next_display,
        override_details,
        is_achieved_based_on_levels: current_level.is_some(),
        level_count,
    }
}

/// Whether the user holds the achievement, as the read path sees it.
///
/// Level-driven achievements are re-derived from progress; everything else
/// trusts the stored flag.
pub fn effective_achieved(achievement: &AchievementDefinition, stored: bool, progress: u32) -> bool {
    if achievement.is_level_driven() {
        resolve_level(achievement, Some(progress)).is_achieved_based_on_levels
    } else {
        stored
    }
}

/// Checks that a level ladder has positive, unique thresholds.
///
/// Returns a message describing the first problem found.
pub fn validate_levels(levels: &[LevelDefinition]) -> Result<(), String> {
    if let Some(level) = levels.iter().find(|l| l.progress_needed == 0) {
        return Err(format!(
            "level {:?} needs a positive progressNeeded",
            level.level_title.as_deref().unwrap_or("<untitled>")
        ));
    }

    let sorted = sorted_levels(levels);
    if let Some((a, _)) = sorted
        .iter()
        .tuple_windows()
        .find(|(a, b)| a.progress_needed >= b.progress_needed)
    {
        return Err(format!(
            "progressNeeded {} is used by more than one level; thresholds must strictly increase",
            a.progress_needed
        ));
    }

    Ok(())
}
