pub mod exchange;
pub mod failures;
pub mod leaderboard;
pub mod types;
