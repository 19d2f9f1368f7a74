pub mod headers;
pub mod method;
pub mod parser;
pub mod request;
pub mod response;
pub mod serializer;
pub mod status;
pub mod version;

pub use headers::{names as header_names, Headers};
pub use method::Method;
pub use request::Request;
pub use response::Response;
pub use status::StatusCode;
pub use version::Version;
