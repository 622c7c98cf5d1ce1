#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
//! Concord: weighted-vote aggregation and leave-one-out influence analysis for
//! multi-label model ensembles.
//!
//! The crate is split the same way the data flows:
//!
//! - [`adapter`] turns one model's probability matrix into a binary ballot.
//! - [`weights`], [`assemble`], [`vote`] and [`diagnostics`] form the aggregator.
//! - [`engine`] composes the two into a single pure function.
//! - [`config`], [`io`], [`report`] and [`pipeline`] are the file-backed boundary used by
//!   the CLI.
pub mod adapter;
pub mod assemble;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod io;
pub mod memory;
pub mod pipeline;
pub mod report;
pub mod types;
pub mod vote;
pub mod weights;
