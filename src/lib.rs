//! Transaction reports to PDF, optionally rendered chunk by chunk on a
//! background execution context so the caller stays responsive.

pub mod chunk_plan;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod protocol;
pub mod render;
pub mod report;
pub mod sanitize;
pub mod util;

pub use config::{Config, Mode};
pub use coordinator::{Coordinator, JobOptions};
pub use error::{GenerateError, Result};
pub use report::{Cell, ReportData};
