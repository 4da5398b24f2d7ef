pub mod debounce;
pub mod json;
pub mod logging;
pub mod time;

pub use debounce::Debouncer;
pub use json::is_truthy;
pub use logging::init_logging;
pub use time::now_millis;
