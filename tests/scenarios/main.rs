//! Scenario-based tests for orchestra

mod helpers;

mod backend_unavailable;
mod build_errors;
mod caching;
mod cancellation;
mod concurrency;
mod failure_handling;
mod max_retries;
mod scheduling;
mod success_chain;
