pub mod dialect;
pub mod process;

pub use dialect::{CcpDialect, PlainDialect, ToolDialect, XdsDialect};
pub use process::{DriverState, ProcessDriver};
