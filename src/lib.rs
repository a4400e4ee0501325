pub mod castle;
pub mod classifier;
pub mod cli;
pub mod conduit;
pub mod config;
pub mod dashboard;
pub mod diff;
pub mod error;
pub mod git;
pub mod github;
pub mod lock;
pub mod materialize;
pub mod process;
pub mod review_store;
