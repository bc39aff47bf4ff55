//! Sweep-style experiment management: parameter-space expansion, job
//! lifecycle tracking from marker files, and parsing of raw job output back
//! into queryable tables.

pub mod config;
pub mod epoch;
pub mod error;
pub mod expand;
pub mod experiment;
pub mod expr;
pub mod extract;
pub mod generate;
pub mod layout;
pub mod machine;
pub mod parse;
pub mod stats;
pub mod status;
pub mod submit;
pub mod table;

pub use config::{load_defaults, sweep_home, Defaults};
pub use epoch::{list_epochs, remove_epoch, resolve_epoch, resolve_reference};
pub use error::{ErrorCategory, SweepError, SweepResult};
pub use expand::{determine_queue, expand, CommandInstance, JobSpec, ResultMetadata};
pub use experiment::{load_experiment, parse_experiment, Experiment};
pub use extract::{extractor_by_name, LineExtractor, ParsedLine};
pub use generate::{generate, Generated};
pub use layout::{Layout, Marker};
pub use machine::{machine_by_name, JobScript, Machine};
pub use parse::{dump_report, parse_epoch, parse_file, FailureKind, ParseFailure, ParseOptions, ParseReport};
pub use status::{epoch_status, summary, ActivityStream, EpochStatus, JobState, TimeoutPolicy};
pub use submit::{kill_epoch, plan_submission, submit_epoch, SubmitOptions};
pub use table::{render, OutputFormat, Query, Table};
