pub mod admission;
#[allow(clippy::module_inception)]
pub mod dispatcher;

pub use admission::{AdmissionControl, Permit};
pub use dispatcher::{AbortReason, DispatchReport, DispatchState, RequestDispatcher};
