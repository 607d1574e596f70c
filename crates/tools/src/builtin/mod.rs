//! Tools shipped with the platform.

mod echo;
mod time;

pub use echo::echo_provider;
pub use time::time_provider;
