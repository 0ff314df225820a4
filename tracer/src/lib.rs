// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Read `verifyta` witnesses as timed traces.
//!
//! A witness comes in one of two dialects, picked by its file extension:
//! verbose `.xml` documents are parsed directly, while compact `.xtr` files
//! are first rendered readable with UPPAAL's `tracer`. Both end up as a
//! [`actions::VerificationTrace`]: the synchronizing transitions of the
//! witness, each with the interval of a reference clock at which it happens.

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod extract;
mod raw;
mod text;
mod xml;

pub use extract::{get_timed_trace, parse_witness, Extractor, TraceError};
