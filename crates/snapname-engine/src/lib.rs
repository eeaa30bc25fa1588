pub mod batch;
pub mod dryrun;
pub mod error;
pub mod folder;
pub mod gemini;
pub mod images;
pub mod naming;
pub mod oracle;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod retry;

#[cfg(test)]
mod testing;

pub use error::{FileFailure, ImageLoadError, OracleCallError, RenameError, RenameStage};
pub use oracle::{DeadlineOracle, LabelResult, NamingOracle, OracleImage, SingleLabel};
pub use orchestrator::{CancelFlag, Orchestrator, RunHandle};
pub use registry::OracleRegistry;
