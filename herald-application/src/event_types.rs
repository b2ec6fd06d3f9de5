//! 事件类型目录
//!
//! 统一以 `<领域>.<动作>` 命名，生产者与处理器共用这些常量以避免拼写漂移。
//!

// 用户
pub const USER_REGISTERED: &str = "user.registered";
pub const USER_LOGGED_IN: &str = "user.logged_in";
pub const USER_LOGGED_OUT: &str = "user.logged_out";
pub const USER_PROFILE_UPDATED: &str = "user.profile_updated";
pub const USER_PASSWORD_CHANGED: &str = "user.password_changed";
pub const USER_DEACTIVATED: &str = "user.deactivated";

// 预测
pub const PREDICTION_CREATED: &str = "prediction.created";
pub const PREDICTION_UPDATED: &str = "prediction.updated";
pub const PREDICTION_DELETED: &str = "prediction.deleted";
pub const PREDICTION_VIEWED: &str = "prediction.viewed";

// 投票
pub const VOTE_CAST: &str = "vote.cast";
pub const VOTE_REMOVED: &str = "vote.removed";
pub const VOTE_CHANGED: &str = "vote.changed";

// 比赛
pub const MATCH_VIEWED: &str = "match.viewed";
pub const MATCH_SUBSCRIBED: &str = "match.subscribed";
pub const MATCH_UNSUBSCRIBED: &str = "match.unsubscribed";

// 排行榜
pub const LEADERBOARD_VIEWED: &str = "leaderboard.viewed";
pub const RANKING_CHANGED: &str = "ranking.changed";

// 页面 / 功能 / 错误
pub const PAGE_VIEWED: &str = "page.viewed";
pub const FEATURE_USED: &str = "feature.used";
pub const ERROR_ENCOUNTERED: &str = "error.encountered";
pub const SEARCH_PERFORMED: &str = "search.performed";

/// 目录中的全部事件类型
pub const ALL: &[&str] = &[
    USER_REGISTERED,
    USER_LOGGED_IN,
    USER_LOGGED_OUT,
    USER_PROFILE_UPDATED,
    USER_PASSWORD_CHANGED,
    USER_DEACTIVATED,
    PREDICTION_CREATED,
    PREDICTION_UPDATED,
    PREDICTION_DELETED,
    PREDICTION_VIEWED,
    VOTE_CAST,
    VOTE_REMOVED,
    VOTE_CHANGED,
    MATCH_VIEWED,
    MATCH_SUBSCRIBED,
    MATCH_UNSUBSCRIBED,
    LEADERBOARD_VIEWED,
    RANKING_CHANGED,
    PAGE_VIEWED,
    FEATURE_USED,
    ERROR_ENCOUNTERED,
    SEARCH_PERFORMED,
];

pub fn is_known(event_type: &str) -> bool {
    ALL.contains(&event_type)
}
