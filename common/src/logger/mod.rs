pub mod init;
pub mod macros;
pub mod trace_id;

pub use init::init_logger;
pub use macros::{child_span, correlated_span, root_span};
pub use trace_id::TraceId;
