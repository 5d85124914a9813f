//! SQLite storage for users, settings and topic schedules.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{
    DueRow, NewSchedule, NewUser, SchedulePatch, SettingsPatch, TopicSchedule, User, UserSetting,
};
