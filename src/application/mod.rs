pub mod cgi;
pub mod config;
pub mod dispatcher;
pub mod server;
