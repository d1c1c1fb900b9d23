//! CLI command implementations.

pub mod health;
pub mod inspect;
pub mod run;
pub mod sync_bans;
