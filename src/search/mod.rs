//! Search and research provider client.
//!
//! Discovery runs a provider research task with a JSON output schema;
//! enrichment uses keyword search plus page contents.

mod exa;

pub use exa::{ExaClient, PageContent, ResearchPoll, SearchResult};
