//! The Rust SDK for Featurevisor, a feature flag and experimentation management tool.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that evaluates features against a [`Context`], the
//! attributes describing the user, device or session being evaluated. Rules come from a datafile:
//! an immutable JSON snapshot of attributes, segments and features produced by the Featurevisor
//! build step.
//!
//! Three kinds of evaluation are available:
//!
//! - flags: is the feature enabled ([`Client::is_enabled`]),
//! - variations: which variation of an experiment applies ([`Client::get_variation`]),
//! - variables: which value a feature variable takes ([`Client::get_variable`] and typed variants).
//!
//! Every result is backed by an [`Evaluation`] carrying an [`EvaluationReason`] explaining how it
//! was produced. Use the `evaluate_*` methods to get the full record.
//!
//! Bucketing is deterministic: the same context always lands in the same bucket across all
//! Featurevisor SDKs.
//!
//! # Error Handling
//!
//! Evaluation never fails. Missing features, segments and variables are reported through
//! [`EvaluationReason`]. Errors are represented by the [`Error`] enum and only come from client
//! construction and datafile fetching.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `featurevisor` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into SDK operations.
//!
//! # Examples
//!
//! ```
//! # use featurevisor::{ClientConfig, Context, DatafileContent};
//! let datafile: DatafileContent = serde_json::from_str(r#"{
//!   "schemaVersion": "1",
//!   "revision": "1",
//!   "features": [{
//!     "key": "checkout",
//!     "bucketBy": "userId",
//!     "traffic": [{"key": "everyone", "segments": "*", "percentage": 100000}]
//!   }]
//! }"#).unwrap();
//!
//! let client = ClientConfig::from_datafile(datafile).to_client().unwrap();
//!
//! let context: Context = [("userId".to_owned(), "user-1".into())].into_iter().collect();
//! assert!(client.is_enabled("checkout", &context));
//! ```
//!
//! A runnable example can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod bucketer;
mod client;
pub mod conditions;
mod config;
mod context;
pub mod datafile;
mod datafile_fetcher;
mod datafile_reader;
mod datafile_store;
mod error;
mod evaluation;
mod evaluator;
mod events;
mod poller;
pub mod segments;
mod traffic;

pub use client::Client;
pub use config::ClientConfig;
pub use context::{AttributeValue, Context};
pub use datafile::{DatafileContent, VariableValue};
pub use datafile_fetcher::{DatafileFetcher, HttpDatafileFetcher};
pub use datafile_reader::Datafile;
pub use datafile_store::DatafileStore;
pub use error::{Error, Result};
pub use evaluation::{
    Evaluation, EvaluationReason, InitialFeatures, OverrideFeature, StickyFeatures,
};
pub use evaluator::{
    ConfigureBucketKey, ConfigureBucketValue, EvaluationHooks, Evaluator, InterceptContext,
};
pub use events::{ActivationEvent, EventListener, ReadyEvent, RefreshEvent, UpdateEvent};
pub use poller::{PollerThread, PollerThreadConfig};
pub use traffic::{find_force, find_matched_traffic};
