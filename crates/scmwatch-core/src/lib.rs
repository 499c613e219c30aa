//! scmwatch core
//!
//! The backend-independent half of scmwatch: the canonical [`Modification`]
//! record, the [`SourceControl`] contract a CI scheduler drives, and the
//! policies that make connectors safe to call on every integration cycle.
//!
//! # Modules
//!
//! - [`modification`]: `Modification`, `last_change_number`, the canonical diff
//! - [`parser`]: `HistoryParser` and the record-level `RecordPolicy`
//! - [`process`]: command lines and the timeout-enforcing executor
//! - [`runner`]: `ProcessRunner`, the process-backed helper connectors embed
//! - [`retry`]: fixed-delay `RetryPolicy`
//! - [`label`]: label-before-get rollback bookkeeping
//! - [`session`]: reference-counted shared sessions
//! - [`restamp`]: differential label re-stamping
//! - [`urls`], [`filter`]: post-processors
//! - [`connector`]: `SourceControl` and `SourceControlPipeline`

pub mod connector;
pub mod error;
pub mod fakes;
pub mod filter;
pub mod label;
pub mod metrics;
pub mod modification;
pub mod obs;
pub mod parser;
pub mod process;
pub mod restamp;
pub mod result;
pub mod retry;
pub mod runner;
pub mod session;
pub mod timestamp;
pub mod urls;
pub mod working_copy;

pub use connector::{SourceControl, SourceControlPipeline};
pub use error::{Result, ScmError};
pub use filter::{
    build_filter_set, ActionFilter, CommentFilter, FilterConfig, FilterSet, ModificationFilter,
    PathFilter, UserFilter,
};
pub use label::LabelTracker;
pub use metrics::METRICS;
pub use modification::{
    diff_modifications, last_change_number, normalize_path, split_path, strip_folder_root,
    Modification, ModificationKind,
};
pub use parser::{HistoryParser, RecordPolicy};
pub use process::{
    CommandExecutor, ProcessArgumentBuilder, ProcessExecutor, ProcessInfo, ProcessOutput,
    DEFAULT_TIMEOUT_SECS,
};
pub use restamp::DifferentialRestamper;
pub use result::{IntegrationResult, IntegrationStatus, ProjectContext};
pub use retry::RetryPolicy;
pub use runner::ProcessRunner;
pub use session::{SessionRegistries, SessionRegistry};
pub use timestamp::{within_window, ParsedTimestamp};
pub use urls::{
    ChangeNumberUrlBuilder, CompositeUrlBuilder, DefaultIssueTracker, FileUrlBuilder,
    ModificationUrlBuilder, RegexIssueTracker, UrlBuilderConfig,
};
pub use working_copy::Checkout;

/// scmwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
