//! Terrace resource graph engine
//!
//! This crate declares cloud resources as nodes of a dependency graph and
//! realizes them against a provider adapter. Node inputs may reference
//! output attributes of other nodes that are only known once those nodes
//! exist (deferred values); the references define the graph edges.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  terrace CLI                     │
//! │          (plan / apply / destroy)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                terrace-cloud                     │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ GraphBuilder │─▶│DependencyGraph│            │
//! │  └──────────────┘  └──────┬───────┘             │
//! │  ┌──────────────┐  ┌──────▼───────┐             │
//! │  │  StackState  │◀─│   Resolver   │             │
//! │  └──────────────┘  └──────┬───────┘             │
//! └───────────────────────────┼─────────────────────┘
//!                             │ trait ProviderAdapter
//!            ┌────────────────┼────────────────┐
//!    ┌───────▼───────┐ ┌──────▼──────┐  ┌──────▼──────┐
//!    │ MockProvider  │ │   Router    │  │   process   │
//!    └───────────────┘ └─────────────┘  └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use terrace_cloud::{GraphBuilder, Inputs, MockProvider, Resolver};
//!
//! # async fn demo() -> terrace_cloud::Result<()> {
//! let mut builder = GraphBuilder::new();
//! let net = builder.declare("test:network", "net", Inputs::new())?;
//! builder.declare("test:vm", "vm", Inputs::new().with("netId", net.output("id")))?;
//!
//! let mut graph = builder.finalize()?;
//! let provider = MockProvider::new();
//! let report = Resolver::new(&provider).run(&mut graph).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod deferred;
pub mod destroy;
pub mod error;
pub mod export;
pub mod graph;
pub mod mock;
pub mod planner;
pub mod provider;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod state;
pub mod value;

// Re-exports
pub use action::{Action, ActionResult, ActionType, ApplyResult, Plan, PlanSummary};
pub use deferred::{Deferred, NoOutputs, OutputSource};
pub use destroy::{destroy, prune};
pub use error::{CloudError, Result};
pub use export::{ExportEntry, ExportTable};
pub use graph::{DependencyGraph, NodeState};
pub use mock::{MockCall, MockOperation, MockProvider};
pub use planner::plan;
pub use provider::{AuthStatus, ProviderAdapter, ProviderRouter};
pub use registry::{GraphBuilder, NodeDecl, NodeKey, NodeRef, NodeRole};
pub use report::{NodeOutcome, NodeReport, RunReport, RunSummary};
pub use resolver::{
    CancelToken, DEFAULT_PARALLELISM, DEFAULT_TIMEOUT, Resolver, RunOptions, restore, run,
};
pub use state::{ResourceState, StackState, StateLock, StateManager};
pub use value::{Input, Inputs, Properties, REDACTED};
