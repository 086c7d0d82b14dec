pub mod logging;
pub mod timeout;

pub use logging::{request_logging, RequestId, REQUEST_ID_HEADER};
pub use timeout::TimeoutMiddleware;
