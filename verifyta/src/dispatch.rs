// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Run a batch of independent commands and collect their results in
//! submission order.
//!
//! Results are index-aligned with the input: a command that fails to launch,
//! times out, or exits with an error is reported in its own slot and never
//! aborts the rest of the batch.

use std::{collections::BTreeMap, thread, time::Duration};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    conf::VerifierCmd,
    proc::{CommandResult, RunningCmd, POLL_INTERVAL},
};

/// How a batch of commands is executed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// One command after another
    #[default]
    Sequential,
    /// Up to `pool_size` child processes alive at once, supervised from the
    /// calling thread
    ProcessPool,
    /// A pool of `pool_size` worker threads, each blocking on one command
    ThreadPool,
}

impl ExecutionMode {
    /// Pool size used when the caller does not give one: the number of cores
    /// for processes, twice that for threads (which mostly wait).
    pub fn default_pool_size(&self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::ProcessPool => parallelism(),
            ExecutionMode::ThreadPool => 2 * parallelism(),
        }
    }
}

/// Available parallelism.
pub fn parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Run every command in `cmds` under `mode`, returning one result per
/// command in the same order.
///
/// `pool_size` defaults to [`ExecutionMode::default_pool_size`]; 0 is treated
/// as 1. Each command gets its own `timeout`.
pub fn run_commands(
    cmds: &[VerifierCmd],
    mode: ExecutionMode,
    pool_size: Option<usize>,
    timeout: Option<Duration>,
) -> Vec<CommandResult> {
    let pool_size = pool_size.unwrap_or_else(|| mode.default_pool_size()).max(1);
    if pool_size == 1 && mode != ExecutionMode::Sequential {
        log::debug!("{mode:?} with a single worker is slower than sequential execution");
    }
    log::debug!(
        "dispatching {} commands ({mode:?}, pool size {pool_size})",
        cmds.len()
    );
    match mode {
        ExecutionMode::Sequential => run_sequential(cmds, timeout),
        ExecutionMode::ProcessPool => run_process_pool(cmds, pool_size, timeout),
        ExecutionMode::ThreadPool => run_thread_pool(cmds, pool_size, timeout),
    }
}

fn run_sequential(cmds: &[VerifierCmd], timeout: Option<Duration>) -> Vec<CommandResult> {
    cmds.iter()
        .map(|cmd| CommandResult::of(cmd, timeout))
        .collect()
}

fn run_thread_pool(
    cmds: &[VerifierCmd],
    pool_size: usize,
    timeout: Option<Duration>,
) -> Vec<CommandResult> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .thread_name(|i| format!("verifyta-worker-{i}"))
        .build()
    {
        Ok(pool) => pool.install(|| {
            cmds.par_iter()
                .map(|cmd| CommandResult::of(cmd, timeout))
                .collect()
        }),
        Err(err) => {
            log::warn!("could not build thread pool ({err}), running sequentially");
            run_sequential(cmds, timeout)
        }
    }
}

fn run_process_pool(
    cmds: &[VerifierCmd],
    pool_size: usize,
    timeout: Option<Duration>,
) -> Vec<CommandResult> {
    let mut results = BTreeMap::new();
    let mut pending = cmds.iter().enumerate();
    let mut running: Vec<(usize, RunningCmd)> = vec![];
    loop {
        while running.len() < pool_size {
            let Some((i, cmd)) = pending.next() else {
                break;
            };
            match RunningCmd::spawn(cmd, timeout) {
                Ok(child) => running.push((i, child)),
                Err(err) => {
                    results.insert(
                        i,
                        CommandResult {
                            command: cmd.cmdline(),
                            outcome: Err(err),
                        },
                    );
                }
            }
        }
        if running.is_empty() {
            break;
        }
        let before = running.len();
        let mut still_running = vec![];
        for (i, mut child) in running.drain(..) {
            match child.try_finish() {
                Ok(None) => still_running.push((i, child)),
                Ok(Some(out)) => {
                    results.insert(
                        i,
                        CommandResult {
                            command: child.cmdline().to_string(),
                            outcome: Ok(out),
                        },
                    );
                }
                Err(err) => {
                    results.insert(
                        i,
                        CommandResult {
                            command: child.cmdline().to_string(),
                            outcome: Err(err),
                        },
                    );
                }
            }
        }
        running = still_running;
        if running.len() == before {
            thread::sleep(POLL_INTERVAL);
        }
    }
    assert_eq!(results.len(), cmds.len(), "every command has a result");
    results.into_values().collect()
}
