//! 事件重放（replay）
//!
//! 在时间窗口、批次大小与事件数量的约束下，将事件存储中的历史事件
//! 重新注入事件总线；支持演练（dry run）与中途取消。
//!
mod options;
mod replayer;

pub use options::{
    DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MAX_REPLAY_EVENTS, MAX_REPLAY_WINDOW, MIN_BATCH_SIZE,
    ReplayOptions, STATUS_LOOKBACK, USER_REPLAY_BATCH_SIZE,
};
pub use replayer::{EventReplayer, ReplayError, ReplayOutcome, ReplayResult, ReplayStatus};
