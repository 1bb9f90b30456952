pub const ACHIEVEMENTS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Achievements (
        id                   TEXT        PRIMARY KEY,
        title                TEXT        NOT NULL,
        category             TEXT        NOT NULL    DEFAULT '',

        image_url            TEXT,
        description          TEXT,
        achieved_description TEXT,
        silhouette_color     TEXT,

        is_enabled           BOOLEAN     NOT NULL    DEFAULT 1,
        attendance_counter   BOOLEAN     NOT NULL    DEFAULT 0,
        attendance_need      INTEGER,
        on_score             BOOLEAN     NOT NULL    DEFAULT 0,

        card_skin_image_url  TEXT,
        level_config         TEXT        NOT NULL    DEFAULT '[]'
    )";

pub const USER_ACHIEVEMENTS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS UserAchievements (
        achievement_id   TEXT        NOT NULL    REFERENCES Achievements(id) ON DELETE CASCADE,
        user_id          TEXT        NOT NULL,

        achieved         BOOLEAN     NOT NULL    DEFAULT 0,
        achieved_date    TIMESTAMP,
        attendance_count INTEGER     NOT NULL    DEFAULT 0    CHECK (attendance_count >= 0),
        score            REAL,

        PRIMARY KEY (achievement_id, user_id)
    )";

pub const USER_PROFILES_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS UserProfiles (
        user_id                  TEXT    PRIMARY KEY,
        favorite_achievement_id  TEXT    REFERENCES Achievements(id) ON DELETE SET NULL
    )";

pub const TABLES: [(&str, &str); 3] = [
    ("Achievements", ACHIEVEMENTS_SCHEMA),
    ("UserAchievements", USER_ACHIEVEMENTS_SCHEMA),
    ("UserProfiles", USER_PROFILES_SCHEMA),
];

pub const INDEXES: &str =
    "CREATE INDEX IF NOT EXISTS idx_user_achievements_user ON UserAchievements(user_id);
     CREATE INDEX IF NOT EXISTS idx_achievements_order ON Achievements(category, title);";
