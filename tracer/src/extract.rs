// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Read a witness written by `verifyta` back as a [`VerificationTrace`].

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use actions::{VerificationTrace, DEFAULT_CLOCK};
use thiserror::Error;
use verifyta::{artifacts::Artifacts, proc, TraceFormat, VerifierConf, VerifierError};

use crate::{text, xml};

#[derive(Error, Debug)]
/// An error from reading a witness
pub enum TraceError {
    /// The witness could not be understood
    #[error("malformed trace {}: {reason}", .path.display())]
    Malformed {
        /// The witness file (or `-` for text given directly)
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },
    /// Compiling the model or rendering the witness failed
    #[error(transparent)]
    Verifier(#[from] VerifierError),
    /// I/O went wrong
    #[error("some I/O went wrong: {0}")]
    Io(#[from] io::Error),
}

impl TraceError {
    fn malformed<P: AsRef<Path>>(path: P, reason: String) -> Self {
        Self::Malformed {
            path: path.as_ref().to_path_buf(),
            reason,
        }
    }
}

/// Parse the text of a witness. For [`TraceFormat::Xml`] this is the
/// document itself; for [`TraceFormat::Xtr`] it is the readable rendering
/// produced by `tracer`, since the compact file cannot be read directly.
pub fn parse_witness(
    text: &str,
    format: TraceFormat,
    clock: &str,
) -> Result<VerificationTrace, TraceError> {
    let raw = match format {
        TraceFormat::Xml => xml::parse(text),
        TraceFormat::Xtr => text::parse(text),
    }
    .map_err(|reason| TraceError::malformed("-", reason))?;
    raw.normalize(clock)
        .map_err(|reason| TraceError::malformed("-", reason))
}

/// Converts witnesses to timed traces against one reference clock.
#[derive(Debug, Clone)]
pub struct Extractor<'a> {
    conf: &'a VerifierConf,
    clock: String,
    hold: bool,
}

impl<'a> Extractor<'a> {
    /// An extractor using [`DEFAULT_CLOCK`] that cleans up after itself.
    pub fn new(conf: &'a VerifierConf) -> Self {
        Self {
            conf,
            clock: DEFAULT_CLOCK.to_string(),
            hold: false,
        }
    }

    /// Read intervals from `clock` instead.
    pub fn clock(mut self, clock: &str) -> Self {
        self.clock = clock.to_string();
        self
    }

    /// Keep the intermediate `.if` and `.txt` files next to the trace.
    pub fn hold(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    /// Read the witness at `trace`, produced by checking `model`.
    pub fn extract(&self, model: &Path, trace: &Path) -> Result<VerificationTrace, TraceError> {
        let format = TraceFormat::from_path(trace).ok_or_else(|| {
            TraceError::malformed(trace, "expected a .xtr or .xml extension".to_string())
        })?;
        let text = match format {
            TraceFormat::Xml => fs::read_to_string(trace)?,
            TraceFormat::Xtr => self.render(model, trace)?,
        };
        parse_witness(&text, format, &self.clock).map_err(|err| match err {
            TraceError::Malformed { reason, .. } => TraceError::malformed(trace, reason),
            err => err,
        })
    }

    /// Render a compact witness readable: compile the model, then run
    /// `tracer` on the compiled model and the witness.
    fn render(&self, model: &Path, trace: &Path) -> Result<String, TraceError> {
        let dir = match trace.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let stem = trace
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "trace".to_string());
        let artifacts = Artifacts::new(self.hold, dir, &stem)?;

        let compile = self.conf.compile_command(model);
        let compiled = proc::run(&compile, self.conf.timeout())?.check(&compile.cmdline())?;
        let compiled_path = artifacts.file("if");
        artifacts.write(&compiled_path, &compiled.stdout)?;

        let render = self.conf.tracer_command(&compiled_path, trace);
        let rendered = proc::run(&render, self.conf.timeout())?.check(&render.cmdline())?;
        let rendered_path = artifacts.file("txt");
        artifacts.write(&rendered_path, &rendered.stdout)?;

        if artifacts.is_held() {
            log::info!(
                "kept {} and {}",
                compiled_path.display(),
                rendered_path.display()
            );
        }
        Ok(rendered.stdout)
    }
}

/// Read the witness at `trace` (checked from `model`) as a timed trace over
/// [`DEFAULT_CLOCK`]. With `hold`, intermediate files are kept next to the
/// trace.
pub fn get_timed_trace<P: AsRef<Path>, Q: AsRef<Path>>(
    conf: &VerifierConf,
    model: P,
    trace: Q,
    hold: bool,
) -> Result<VerificationTrace, TraceError> {
    Extractor::new(conf)
        .hold(hold)
        .extract(model.as_ref(), trace.as_ref())
}
