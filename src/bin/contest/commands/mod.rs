pub mod competitions;
pub mod hacktoberfest;
pub mod health;
pub mod stats;
