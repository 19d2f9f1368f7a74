pub mod cgi_env;
pub mod cgi_executor;
pub mod cgi_io;
pub mod cgi_process;
pub mod cgi_response;
pub mod cgi_supervisor;
pub mod script_resolver;

pub use cgi_env::{CgiEnvironment, EnvironmentBuilder, ServerIdentity};
pub use cgi_executor::{CapturedOutput, CgiExecutor, Invocation};
pub use cgi_process::CgiProcess;
pub use cgi_response::{CgiResponse, ResponseParseError, ResponseParser};
pub use cgi_supervisor::{Supervision, TimeoutSupervisor};
pub use script_resolver::{ResolvedScript, ScriptResolver};
