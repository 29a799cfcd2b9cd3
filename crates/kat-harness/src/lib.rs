//! Kubernetes Acceptance Test harness
//!
//! Execution engine for declarative gateway acceptance tests. A test suite
//! is a set of root [`ClassDescriptor`]s; the harness
//!
//! 1. expands every class into its concrete [`Variant`]s over the registered
//!    [`Universe`] of service types and options,
//! 2. builds one [`NodeTree`] per root variant,
//! 3. aggregates every node's configuration and manifest fragments into one
//!    [`DeploymentBundle`] and hands it to a [`DeploymentDriver`],
//! 4. waits for readiness, then dispatches every node's queries phase by
//!    phase through a [`Transport`],
//! 5. correlates results back to `(node, query index)` and runs each node's
//!    check, producing a [`RunReport`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let universe = Universe::builder()
//!     .service(ServiceType::http())
//!     .option(OptionClass::new("cors", |_| Arc::new(Cors)))
//!     .build();
//!
//! let root = ClassDescriptor::gateway("plain", |_| Arc::new(Plain))
//!     .child(ClassDescriptor::mapping("simplemapping", |_| Arc::new(SimpleMapping)).axis(Axis::Options));
//!
//! let report = kat_harness::run(HarnessConfig::from_env()?, universe, &[root]).await?;
//! assert!(report.is_success(), "{report}");
//! ```

pub mod aggregate;
pub mod assertions;
pub mod builder;
pub mod config;
pub mod correlator;
pub mod deploy;
pub mod errors;
pub mod eventual;
pub mod node;
pub mod query;
pub mod report;
pub mod result;
pub mod runner;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod template;
pub mod transport;
pub mod variant;

pub use aggregate::{ConfigFragment, DeploymentBundle};
pub use assertions::{CheckFailure, Violation};
pub use config::HarnessConfig;
pub use deploy::{Deployment, DeploymentDriver, Endpoints, KubectlDriver, StaticDriver};
pub use errors::HarnessError;
pub use node::{NodeContext, NodeId, NodeRole, NodeTree, ServiceType, TestNode};
pub use query::{Query, Requirement};
pub use report::{Outcome, RunReport};
pub use result::{BackendRecord, QueryResult};
pub use runner::{run, Runner};
pub use runtime::CheckContext;
pub use transport::{HttpTransport, Transport};
pub use variant::{Axis, ClassDescriptor, OptionClass, OptionInstance, Universe, Variant};
