pub mod error_handler;
pub mod logging;
pub mod real_ip;

pub use error_handler::{DefaultErrorHandler, ErrorHandler, HttpError};
pub use logging::{LoggedBody, RequestLogEntry, RequestLogLayer, RequestLogService};
pub use real_ip::IpExtractor;
