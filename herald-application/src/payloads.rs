//! 强类型事件载荷
//!
//! 每个载荷绑定一个目录中的事件类型（`EventPayload::EVENT_TYPE`），
//! 通过 `EventManager::publish_payload` 序列化为事件载荷发布。
//! 用户相关载荷都携带 `user_id`，存储层据此建立用户索引。
//!
use crate::event_types;
use herald_domain::error::EventResult;
use herald_domain::event::Event;
use herald_domain::serde_ext::duration_ms;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// 可发布的强类型载荷
pub trait EventPayload: Serialize + Send + Sync + Sized {
    const EVENT_TYPE: &'static str;

    fn to_event(&self) -> EventResult<Event> {
        Event::from_payload(Self::EVENT_TYPE, self)
    }
}

macro_rules! bind_event_type {
    ($($payload:ty => $event_type:expr),+ $(,)?) => {
        $(
            impl EventPayload for $payload {
                const EVENT_TYPE: &'static str = $event_type;
            }
        )+
    };
}

// --- 用户 ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: u64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub registration_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoggedIn {
    pub user_id: u64,
    pub username: String,
    pub login_method: String,
    pub login_source: String,
    pub login_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLoggedOut {
    pub user_id: u64,
    pub username: String,
    #[serde(with = "duration_ms")]
    pub session_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfileUpdated {
    pub user_id: u64,
    pub username: String,
    pub updated_fields: Vec<String>,
    #[serde(default)]
    pub old_values: Map<String, Value>,
    #[serde(default)]
    pub new_values: Map<String, Value>,
}

// --- 预测 ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionCreated {
    pub prediction_id: u64,
    pub user_id: u64,
    pub match_id: u64,
    pub predicted_winner: String,
    pub predicted_score_a: i32,
    pub predicted_score_b: i32,
    pub tournament: String,
    #[serde(with = "duration_ms")]
    pub time_to_match_start: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionUpdated {
    pub prediction_id: u64,
    pub user_id: u64,
    pub match_id: u64,
    pub old_winner: String,
    pub new_winner: String,
    pub old_score_a: i32,
    pub new_score_a: i32,
    pub old_score_b: i32,
    pub new_score_b: i32,
    pub modification_count: u32,
    #[serde(with = "duration_ms")]
    pub time_to_match_start: Duration,
}

// --- 投票 ---

/// `user_id` 为投票者，`author_id` 为被投票预测的作者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteCast {
    pub vote_id: u64,
    pub user_id: u64,
    pub author_id: u64,
    pub prediction_id: u64,
    pub match_id: u64,
    pub new_vote_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRemoved {
    pub user_id: u64,
    pub author_id: u64,
    pub prediction_id: u64,
    pub match_id: u64,
    pub new_vote_count: u32,
}

// --- 比赛 / 排行榜 ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchViewed {
    pub match_id: u64,
    pub user_id: u64,
    pub team_a: String,
    pub team_b: String,
    pub tournament: String,
    pub status: String,
    #[serde(with = "duration_ms")]
    pub view_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardViewed {
    pub user_id: u64,
    pub tournament: String,
    pub user_rank: u32,
    pub user_points: i64,
    #[serde(with = "duration_ms")]
    pub view_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingChanged {
    pub user_id: u64,
    pub username: String,
    pub tournament: String,
    pub old_rank: u32,
    pub new_rank: u32,
    pub old_points: i64,
    pub new_points: i64,
}

impl RankingChanged {
    /// 名次提升为正
    pub fn rank_change(&self) -> i64 {
        i64::from(self.old_rank) - i64::from(self.new_rank)
    }
}

// --- 页面 / 功能 / 错误 / 搜索 ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewed {
    pub user_id: u64,
    pub page_path: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(with = "duration_ms")]
    pub view_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureUsed {
    pub user_id: u64,
    pub feature_name: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub success: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEncountered {
    pub user_id: u64,
    pub error_type: String,
    pub error_code: String,
    pub error_message: String,
    pub severity: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPerformed {
    pub user_id: u64,
    pub search_query: String,
    pub search_type: String,
    pub result_count: u32,
    #[serde(with = "duration_ms")]
    pub search_duration: Duration,
}

bind_event_type! {
    UserRegistered => event_types::USER_REGISTERED,
    UserLoggedIn => event_types::USER_LOGGED_IN,
    UserLoggedOut => event_types::USER_LOGGED_OUT,
    UserProfileUpdated => event_types::USER_PROFILE_UPDATED,
    PredictionCreated => event_types::PREDICTION_CREATED,
    PredictionUpdated => event_types::PREDICTION_UPDATED,
    VoteCast => event_types::VOTE_CAST,
    VoteRemoved => event_types::VOTE_REMOVED,
    MatchViewed => event_types::MATCH_VIEWED,
    LeaderboardViewed => event_types::LEADERBOARD_VIEWED,
    RankingChanged => event_types::RANKING_CHANGED,
    PageViewed => event_types::PAGE_VIEWED,
    FeatureUsed => event_types::FEATURE_USED,
    ErrorEncountered => event_types::ERROR_ENCOUNTERED,
    SearchPerformed => event_types::SEARCH_PERFORMED,
}
