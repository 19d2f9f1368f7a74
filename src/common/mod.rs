pub mod buffer;
pub mod cancel;
pub mod constants;
pub mod error;
pub mod logger;
pub mod time;
