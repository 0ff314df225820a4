// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Timed action sequences and the verification traces they are read from.
//!
//! A [`TimedActions`] is the currency of the pattern search: inputs,
//! observations and discovered patterns are all sequences of action labels,
//! each optionally constrained to an interval of a reference clock. A
//! [`VerificationTrace`] is the normalized form of a verifier witness, from
//! which discovered patterns are built.

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod sequence;
pub mod trace;

pub use sequence::{GuardedAction, ShapeMismatchError, TimedActions, DEFAULT_CLOCK, UNCONSTRAINED};
pub use trace::{ClockInterval, EdgeStep, TraceOrderError, Transition, VerificationTrace};
