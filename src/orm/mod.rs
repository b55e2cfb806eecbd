pub mod comments;
pub mod moderation_logs;
pub mod otcs;
pub mod posts;
pub mod site_config;
pub mod suspension_lifts;
pub mod suspensions;
pub mod user_interactions;
pub mod users;
pub mod votes;
