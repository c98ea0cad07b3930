#![cfg_attr(docsrs, feature(doc_cfg))]
//! Trellis is a Rust library for building AI agents as typed, composable
//! async step pipelines.
//!
//! An agent author declares a tree of [`Step`](step::Step)s — pure or
//! effectful async transformations — and the engine executes that tree
//! correctly under concurrency: ambient context (session, event bus,
//! guardrails) flows through per-task dynamic scopes, failures are
//! supervised (timeout, retry, error mapping), and side-effectful
//! [`Tool`](tool::Tool)s are gated through a middleware pipeline enforcing
//! permission and sandbox policy.

// Core substrate
pub mod context;
pub mod error;
pub mod event;
pub mod memory;

// Steps and composition
pub mod step;

// Sessions and persistence
pub mod session;

// Tools and policy
pub mod guardrail;
pub mod tool;

// Runtime
pub mod agent;
pub mod prelude;

pub use error::{Error, Result};
