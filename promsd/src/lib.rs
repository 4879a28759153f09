//! The promsd metric scrape pipeline.
//!
//! This library scrapes a Prometheus text exposition endpoint, parses the
//! result into metric families, normalizes them and reconciles them against a
//! cache of metric descriptors. Exporting the families is left to the caller;
//! the promsd binary found elsewhere in this project is one such caller.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod descriptor;
pub mod exposition;
pub mod fetch;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod transform;
