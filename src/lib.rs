//! # Procurement Agent
//!
//! A research orchestrator that turns a vague product category into a
//! comparison report.
//!
//! This library provides:
//! - An HTTP API for task submission, status and clarification
//! - A phase-driven orchestrator with concurrent refinement and enrichment
//! - LLM (OpenRouter) and search (Exa) backed research agents
//!
//! ## Task Flow
//! 1. Receive a query via API
//! 2. Clarify it, pausing for user input when it is ambiguous
//! 3. Discover candidate products and extract their factors
//! 4. Refine every value, then enrich each product from one authoritative source
//! 5. Render a CSV report
//!
//! ## Modules
//! - `orchestrator`: phase driver and fan-out reconciliation
//! - `task`: task lifecycle, store and status projection
//! - `agents`: collaborators driven by the orchestrator
//! - `factors`: factor definitions and tagged values

pub mod agents;
pub mod api;
pub mod config;
pub mod factors;
pub mod llm;
pub mod orchestrator;
pub mod search;
pub mod task;

pub use config::Config;
pub use orchestrator::{Orchestrator, PhaseError, RunOutcome, UnitOutcome};
pub use task::{Task, TaskError, TaskId, TaskState, TaskStore};
