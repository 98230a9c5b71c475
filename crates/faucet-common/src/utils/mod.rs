//! Utility functions and helpers

mod money;
mod time;

pub use money::referer_share;
pub use time::day_of;
