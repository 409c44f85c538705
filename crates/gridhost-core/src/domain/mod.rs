//! Domain model.
//!
//! - **method**: `(service, method, shape)` の記述子
//! - **report**: InnerResult / ResultReport の組み立て

pub mod method;
pub mod report;

pub use self::method::MethodDescriptor;
pub use self::report::{ReportBuilder, failure_result, success_result};
