//! Request-routing core of an HTTP gateway.
//!
//! For each incoming request the mux selects at most one downstream pipeline
//! or short-circuits with a terminal status, honoring host rules, path
//! predicates, and layered IP filters; the whole rule table hot-reloads
//! atomically under traffic.

pub mod acme;
pub mod config;
pub mod ipfilter;
pub mod metrics;
pub mod mux;
pub mod pipeline;
pub mod realip;
pub mod server;

pub use config::Config;
pub use mux::{Mux, MuxInstance, Verdict};
pub use server::EdgeServer;
