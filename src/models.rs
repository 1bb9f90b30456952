use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step of a leveled achievement.
///
/// Every display field is optional; an empty or missing field falls back to the
/// parent achievement's field when this level is shown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDefinition {
    pub progress_needed: u32,

    /// Display / tie-break index. `progress_needed` decides thresholds.
    #[serde(default)]
    pub level_order: Option<u32>,

    #[serde(default)]
    pub level_title: Option<String>,
    #[serde(default)]
    pub level_img_url: Option<String>,
    #[serde(default)]
    pub level_description: Option<String>,
    #[serde(default)]
    pub level_achieve_description: Option<String>,
    #[serde(default)]
    pub level_skin_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub achieved_description: Option<String>,
    #[serde(default)]
    pub silhouette_color: Option<String>,

    #[serde(default = "default_enabled")]
    pub is_enabled: bool,

    #[serde(default)]
    pub attendance_counter: bool,
    #[serde(default)]
    pub attendance_need: Option<u32>,
    #[serde(default)]
    pub on_score: bool,

    #[serde(default)]
    pub card_skin_image_url: Option<String>,

    #[serde(default)]
    pub level_config: Vec<LevelDefinition>,
}

fn default_enabled() -> bool {
    true
}

impl AchievementDefinition {
    /// A bare, enabled achievement with no counter, score or levels.
    pub fn new(id: impl Into<String>, title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: category.into(),
            image_url: None,
            description: None,
            achieved_description: None,
            silhouette_color: None,
            is_enabled: true,
            attendance_counter: false,
            attendance_need: None,
            on_score: false,
            card_skin_image_url: None,
            level_config: Vec::new(),
        }
    }

    pub fn has_levels(&self) -> bool {
        !self.level_config.is_empty()
    }

    /// Whether the read path should re-derive `achieved` from progress and levels
    /// instead of trusting the stored flag.
    pub fn is_level_driven(&self) -> bool {
        self.attendance_counter && self.has_levels()
    }

    /// Threshold for a plain counter. An unset need counts as 1.
    pub fn counter_threshold(&self) -> u32 {
        self.attendance_need.unwrap_or(1)
    }

    pub fn min_level_threshold(&self) -> Option<u32> {
        self.level_config.iter().map(|l| l.progress_needed).min()
    }

    pub fn max_level_threshold(&self) -> Option<u32> {
        self.level_config.iter().map(|l| l.progress_needed).max()
    }
}

/// The per-(achievement, user) status row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievementStatus {
    pub achievement_id: String,
    pub user_id: String,

    pub achieved: bool,
    pub achieved_date: Option<DateTime<Utc>>,
    pub attendance_count: u32,
    pub score: Option<f64>,
}

/// One entry of the "who has this" roster attached to every view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchieverEntry {
    pub user_id: String,
    pub achieved: bool,
    pub attendance_count: u32,
    pub score: Option<f64>,
    pub achieved_date: Option<DateTime<Utc>>,
}

impl From<UserAchievementStatus> for AchieverEntry {
    fn from(status: UserAchievementStatus) -> Self {
        Self {
            user_id: status.user_id,
            achieved: status.achieved,
            attendance_count: status.attendance_count,
            score: status.score,
            achieved_date: status.achieved_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummary {
    /// 1-based position in threshold order.
    pub number: usize,
    pub progress_needed: u32,
    pub title: Option<String>,
}

/// What a user sees for a single achievement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementView {
    pub id: String,
    pub category: String,

    pub title: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub achieved_description: Option<String>,
    pub card_skin_image_url: Option<String>,
    pub silhouette_color: Option<String>,

    pub is_enabled: bool,
    pub attendance_counter: bool,
    pub on_score: bool,
    /// Next threshold to display (pinned to the top threshold at max level).
    pub attendance_need: Option<u32>,

    pub current_user_achieved: bool,
    pub current_user_achieved_date: Option<DateTime<Utc>>,
    pub current_user_progress: u32,
    pub current_user_score: Option<f64>,

    pub current_level: Option<LevelSummary>,
    pub next_level: Option<LevelSummary>,
    pub is_max_level: bool,
    pub level_count: usize,

    pub total_achievers: u32,
    pub highest_score: Option<f64>,
    pub achievers: Vec<AchieverEntry>,

    /// Raw definition, only filled in for privileged callers (edit forms).
    pub base: Option<AchievementDefinition>,
}

impl std::fmt::Display for AchievementView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.current_user_achieved { "🏅" } else { "🔒" };
        write!(f, "{mark} **{}** `{}` ({})", self.title, self.id, self.category)?;

        if let Some(level) = &self.current_level {
            write!(f, " | Level {}/{}", level.number, self.level_count)?;
        }
        if self.attendance_counter {
            match self.attendance_need {
                Some(need) if self.is_max_level => {
                    write!(f, " | {}/{need} (max)", self.current_user_progress)?
                }
                Some(need) => write!(f, " | {}/{need}", self.current_user_progress)?,
                None => write!(f, " | {}", self.current_user_progress)?,
            }
        }
        if let Some(score) = self.current_user_score {
            write!(f, " | score {score}")?;
        }
        if !self.is_enabled {
            write!(f, " | *disabled*")?;
        }
        write!(f, " | {} achiever(s)", self.total_achievers)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCard {
    pub user_id: String,
    pub favorite_achievement_id: Option<String>,
    pub title: Option<String>,
    pub card_skin_image_url: Option<String>,
}

impl std::fmt::Display for ProfileCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.title, &self.card_skin_image_url) {
            (Some(title), Some(skin)) => write!(f, "**Profile card**: {title}\n{skin}"),
            (Some(title), None) => write!(f, "**Profile card**: {title} (default skin)"),
            _ => write!(f, "**Profile card**: default"),
        }
    }
}
