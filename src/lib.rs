pub mod application;
pub mod common;
pub mod http;
