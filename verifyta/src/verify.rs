// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Check models and save one diagnostic trace per model.

use std::{fs, path::Path};

use itertools::Itertools;

use crate::{
    conf::{DiagnosticTrace, TraceFormat, VerifierConf},
    dispatch::{run_commands, ExecutionMode},
    proc::{CommandResult, VerifierError},
};

/// Run `verifyta` on each model in `models` (with the queries embedded in the
/// model), saving the shortest witness to the matching path in `traces`.
///
/// The trace path's extension (`.xtr` or `.xml`) selects the witness format.
/// Successful runs have their witness moved to the requested path; every
/// run's result is returned in order. A witness that cannot be moved turns
/// that run's result into an I/O error without affecting the others.
pub fn verify<P, Q>(
    conf: &VerifierConf,
    models: &[P],
    traces: &[Q],
    mode: ExecutionMode,
    pool_size: Option<usize>,
) -> Result<Vec<CommandResult>, VerifierError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    if models.len() != traces.len() {
        return Err(VerifierError::Mismatched {
            models: models.len(),
            traces: traces.len(),
        });
    }
    let mut cmds = vec![];
    let mut witnesses = vec![];
    for (model, trace) in models.iter().zip_eq(traces) {
        let trace = trace.as_ref();
        let format = TraceFormat::from_path(trace).ok_or_else(|| {
            VerifierError::BadCommand(format!(
                "trace {} should end in .xtr or .xml",
                trace.display()
            ))
        })?;
        let prefix = trace.with_extension("");
        let mut cmd = conf.command(["-t", DiagnosticTrace::Shortest.flag_value(), format.flag()]);
        cmd.arg(&prefix).arg(model.as_ref());
        cmds.push(cmd);
        witnesses.push((format.witness_path(&prefix), trace));
    }
    let mut results = run_commands(&cmds, mode, pool_size, conf.timeout());
    for (result, (witness, trace)) in results.iter_mut().zip_eq(witnesses) {
        if !result.success() {
            continue;
        }
        if witness.exists() {
            if let Err(err) = fs::rename(&witness, trace) {
                log::warn!(
                    "could not move {} to {}: {err}",
                    witness.display(),
                    trace.display()
                );
                result.outcome = Err(err.into());
            }
        } else {
            log::warn!(
                "`{}` succeeded but wrote no witness to {}",
                result.command,
                witness.display()
            );
        }
    }
    Ok(results)
}
