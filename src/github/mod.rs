//! Remote API access.
//!
//! This module provides:
//! - Resolution of the API root (public or Enterprise Server)
//! - Credential handling (token or app installation)
//! - The `GithubApi` trait consumed by every fetcher, and its
//!   `reqwest`-based implementation
//!
//! Nothing outside this module builds URLs or touches HTTP.

pub mod api;
pub mod auth;
pub mod client;
pub mod endpoint;
pub mod models;

pub use api::{GithubApi, RunnerScope};
pub use client::GithubClient;

#[cfg(test)]
pub mod fake;
