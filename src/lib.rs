//! rigcheck: a guided hardware acceptance test orchestrator.
//!
//! An operator walks a remote unit under test through a fixed plan of test
//! categories (lighting, buttons, motors, ...), each holding items that are
//! dispatched to the unit and confirmed either automatically or by eye. The
//! orchestrator tracks every verdict, races automated confirmations against
//! a timeout, advances through the plan as categories complete, and compiles
//! a final acceptance report.
//!
//! The crate is transport-agnostic: commands, condition queries, report
//! rendering and category-scoped connections are all behind traits in
//! [`core`], so benches, simulators and real production lines wire in their
//! own collaborators.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rigcheck::config::RigConfig;
//! use rigcheck::collaborators::mock::{MockCompiler, MockGateway, MockLinkFactory, MockOracle, LinkLog};
//! use rigcheck::core::{CategorySpec, ConnectionTarget, ItemSpec, SessionInfo, TestPlan};
//! use rigcheck::{Collaborators, Orchestrator};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RigConfig::load()?;
//! let plan = TestPlan::new(vec![CategorySpec::new(
//!     "light",
//!     "Lighting",
//!     vec![ItemSpec::automatic("front", "Front light")],
//! )])?;
//! let orchestrator = Orchestrator::new(
//!     plan,
//!     config.orchestrator,
//!     ConnectionTarget::new("unit-01.local"),
//!     SessionInfo::default(),
//!     Collaborators {
//!         gateway: Arc::new(MockGateway::new()),
//!         oracle: Arc::new(MockOracle::new()),
//!         compiler: Arc::new(MockCompiler::new()),
//!         links: Arc::new(MockLinkFactory::new(LinkLog::new())),
//!     },
//! );
//! orchestrator.start_test().await?;
//! orchestrator.begin_test("light", "front", None)?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod timers;
pub mod verdicts;

pub use error::{AppResult, RigError};
pub use session::{Collaborators, Orchestrator};
