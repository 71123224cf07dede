//! Places Proxy Library
//!
//! Exposes the cache, rate limiter, upstream client and request pipeline for
//! the binary and for integration tests.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod http;
pub mod limiter;
pub mod pipeline;
pub mod sweeper;
