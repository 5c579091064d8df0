//! # Forgeops - Declarative Host Configuration
//!
//! Forgeops converges machines toward a desired state described in a small
//! declarative plan language. Plans declare hosts and tasks; tasks declare
//! resources (files, packages, services, users, cron jobs, kernel
//! parameters, timezones, ssh keys, guarded commands) that the engine
//! applies idempotently, in dependency order, with optional conditional
//! branches and automatic rollback of resources dropped from the plan.
//!
//! ## Core Concepts
//!
//! - **Plan**: the parsed desired-state document (hosts + tasks)
//! - **DSL**: the `node`/`task`/resource plan language; TOML is accepted as
//!   an alternate front end
//! - **Operations**: units of work keyed by kind, built per action from its
//!   configuration and applied through an executor
//! - **Executor**: the boundary for all system side effects, honoring
//!   dry-run mode
//! - **State store**: remembers created resources between runs and destroys
//!   the ones a newer plan no longer declares
//!
//! ## Pipeline
//!
//! ```text
//! plan file ──► loader (extension dispatch, includes)
//!                  │
//!                  ▼
//!            DSL parser / TOML ──► Plan
//!                  │
//!                  ▼
//!            TaskRunner (dependency order, branching)
//!                  │
//!        ┌─────────┴──────────┐
//!        ▼                    ▼
//!   OperationRegistry    StateStore (record + finalize)
//!        │
//!        ▼
//!    Executor (local; dry-run aware)
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use forgeops::loader::load_plan;
//! use forgeops::ops::OperationRegistry;
//! use forgeops::runner::TaskRunner;
//!
//! fn main() -> forgeops::error::Result<()> {
//!     let plan = load_plan(std::path::Path::new("site.fops"))?;
//!     let registry = OperationRegistry::with_builtins();
//!     let results = TaskRunner::new(&plan, &registry).dry_run(true).run()?;
//!     for result in &results {
//!         println!("{}", forgeops::output::format_result(result));
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deps;
pub mod dsl;
pub mod error;
pub mod executor;
pub mod loader;
pub mod ops;
pub mod output;
pub mod plan;
pub mod runner;
pub mod state;

pub use error::{Error, Result};
pub use plan::{Action, Host, Plan, Task};

/// Crate version, from the build metadata.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
