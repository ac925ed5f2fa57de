// wasabi-scan-pipeline - Orchestrates scan -> dispatch -> upload, plus the
// local-directory reconciliation variant
//
// Ties the scanner, worker pool, and the external processing callback
// together into a supervised background loop, and hosts the
// reconciliation scanner that runs independently on its own timer.

mod external_command;
mod process;
mod reconciliation;
mod supervisor;

pub use external_command::CommandProcessFile;
pub use process::{PipelineProcess, ProcessError, ProcessFile};
pub use reconciliation::ReconciliationScanner;
pub use supervisor::{ScanLoopConfig, Supervisor};
