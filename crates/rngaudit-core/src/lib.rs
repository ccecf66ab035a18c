//! # rngaudit-core
//!
//! **Is this generator's output distinguishable from randomness?**
//!
//! `rngaudit-core` runs a battery of statistical tests (NIST SP 800-22 and
//! Diehard-style) over a bit sequence captured from a candidate random number
//! generator, estimates its entropy, and returns a frozen
//! [`ValidationSession`] with a compliance verdict.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rand::rngs::StdRng;
//! use rngaudit_core::{GeneratorSource, SessionController, NIST_SP800_22_BASIC};
//!
//! let controller = SessionController::default();
//! let mut source = GeneratorSource::<StdRng>::seeded("stdrng", 42);
//! let session = controller.run(&mut source, NIST_SP800_22_BASIC).unwrap();
//! println!("{}: {:?}", session.verdict(), session.rationale());
//! ```
//!
//! ## Architecture
//!
//! Source → Executor (tests + entropy, in parallel) → Aggregator → Session
//!
//! - [`BitSource`] implementations hand out bits: files, buffers, streams,
//!   callbacks and `rand` generators.
//! - [`BatteryRegistry`] holds the test catalog and the named batteries.
//! - The executor runs one task per (entry, sequence) on a fixed worker pool,
//!   with a timeout and a [`CancellationToken`].
//! - The aggregator turns outcomes into a [`Verdict`] with rationale lines.

/// Crate version, recorded in every session.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod aggregate;
pub mod battery;
pub mod config;
pub mod controller;
pub mod entropy;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod session;
pub mod source;

pub use aggregate::{Aggregate, SecondOrderCheck, TestAssessment, Verdict, aggregate};
pub use battery::{
    BatteryDefinition, BatteryEntry, BatteryRegistry, DIEHARD, DependencyMode, NIST_SP800_22,
    NIST_SP800_22_BASIC, standard_batteries,
};
pub use config::ValidationConfig;
pub use controller::SessionController;
pub use entropy::{EntropyEstimate, EntropyReport, Estimator, OmittedEstimator, estimate_entropy};
pub use error::{SourceError, ValidationError};
pub use executor::{
    CancellationToken, ExecutionPlan, ExecutionReport, ExecutorConfig, PlannedEntry, TaskState,
    Termination, execute,
};
pub use outcome::{TestOutcome, TestStatus, per_value_alpha};
pub use session::{OpenSession, Timestamps, ValidationSession};
pub use source::{
    BitBuffer, BitSource, BufferSource, CallbackSource, FileSource, GeneratorSource, Pull,
    SourceKind, StreamSource, read_bits,
};
pub use rngaudit_tests::{StatisticalTest, Strategy, TestParams};
