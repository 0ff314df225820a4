// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Low-level interface to the UPPAAL `verifyta` binary.
//!
//! Every interaction is a separate run of an external program: a
//! [`conf::VerifierCmd`] is launched by the runner in [`proc`], and batches of
//! commands go through [`dispatch`], sequentially or on a process or thread
//! pool. The only verifier-specific configuration is [`conf::VerifierConf`].

// configure clippy
#![allow(clippy::needless_return)]
#![allow(clippy::type_complexity)]
#![deny(clippy::uninlined_format_args)]
// documentation-related lints (only checked when running rustdoc)
#![warn(missing_docs)]
#![allow(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod artifacts;
pub mod conf;
pub mod dispatch;
pub mod proc;
pub mod verify;

pub use conf::{DiagnosticTrace, TraceFormat, VerifierCmd, VerifierConf};
pub use dispatch::{run_commands, ExecutionMode};
pub use proc::{run_command, CommandOutput, CommandResult, VerifierError};
pub use verify::verify;
