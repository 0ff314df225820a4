// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Discover behavioral patterns of a timed-automata model.
//!
//! A pattern is a sequence of observable actions, each with a clock interval,
//! that some run of the model exhibits while following given input and
//! observation signals. Patterns are found by adding signal and monitor
//! templates to the model (see [`monitor`]), asking `verifyta` reachability
//! queries about them and reading back its witnesses; see
//! [`search::PatternSearch`].

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod monitor;
pub mod query;
pub mod search;
pub mod verdict;

pub use monitor::{Instrument, Instrumentation, XmlModel};
pub use query::Query;
pub use search::{
    find_all_patterns, find_all_patterns_with_query, find_pattern, find_pattern_with_query,
    Discovered, PatternRequest, PatternSearch, SearchError, SearchOptions,
};
pub use verdict::Verdict;
