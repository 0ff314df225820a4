// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Classify what `verifyta` said about a query.

use lazy_static::lazy_static;
use regex::Regex;
use verifyta::{CommandOutput, CommandResult, VerifierError};

/// The outcome of checking one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The property holds and a witness was written
    Satisfied,
    /// The property does not hold (or only "may be" satisfied, which is not
    /// enough to produce a witness)
    NotSatisfied,
    /// The verifier did not give an answer
    Failure(String),
}

lazy_static! {
    static ref VERDICT_RE: Regex =
        Regex::new(r"Formula (is NOT|is|may be) satisfied").unwrap();
}

/// Read the verdict from a finished `verifyta` run.
pub fn classify_output(out: &CommandOutput) -> Verdict {
    if out.timed_out {
        return Verdict::Failure(format!("timed out after {:?}", out.elapsed));
    }
    if out.status != Some(0) {
        let message = match out.stderr.trim() {
            "" => out.stdout.trim(),
            stderr => stderr,
        };
        return Verdict::Failure(message.to_string());
    }
    match VERDICT_RE
        .captures(&out.stdout)
        .or_else(|| VERDICT_RE.captures(&out.stderr))
    {
        Some(cs) => match &cs[1] {
            "is" => Verdict::Satisfied,
            _ => Verdict::NotSatisfied,
        },
        None => Verdict::Failure(format!("no verdict in output:\n{}", out.combined().trim())),
    }
}

/// Read the verdict from a dispatched command, which may not have run at all.
pub fn classify(result: &CommandResult) -> Verdict {
    match &result.outcome {
        Ok(out) => classify_output(out),
        Err(err) => Verdict::Failure(err.to_string()),
    }
}

/// The error to report for a failed run of `result`.
pub(crate) fn failure_error(result: CommandResult, message: String) -> VerifierError {
    match result.outcome {
        Err(err) => err,
        Ok(out) => VerifierError::VerifierFailure {
            cmd: result.command,
            status: out.status,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn output(status: Option<i32>, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_verdicts() {
        let check = "Verifying formula 1 at /tmp/q.q:1\n";
        assert_eq!(
            classify_output(&output(
                Some(0),
                &format!("{check} -- Formula is satisfied.\n"),
                ""
            )),
            Verdict::Satisfied
        );
        assert_eq!(
            classify_output(&output(
                Some(0),
                &format!("{check} -- Formula is NOT satisfied.\n"),
                ""
            )),
            Verdict::NotSatisfied
        );
        assert_eq!(
            classify_output(&output(Some(0), " -- Formula may be satisfied.\n", "")),
            Verdict::NotSatisfied
        );
    }

    #[test]
    fn test_failures() {
        assert_eq!(
            classify_output(&output(
                Some(1),
                "",
                "/tmp/q.q:1: [error] syntax error, unexpected T_ID.\n"
            )),
            Verdict::Failure("/tmp/q.q:1: [error] syntax error, unexpected T_ID.".to_string())
        );
        assert!(matches!(
            classify_output(&output(Some(0), "Options for the verification:\n", "")),
            Verdict::Failure(_)
        ));
        let mut timed_out = output(None, " -- Formula is satisfied.\n", "");
        timed_out.timed_out = true;
        assert!(matches!(classify_output(&timed_out), Verdict::Failure(_)));
    }

    #[test]
    fn test_unlaunched_command() {
        let result = CommandResult {
            command: "verifyta".to_string(),
            outcome: Err(VerifierError::BadCommand("empty command".to_string())),
        };
        assert_eq!(
            classify(&result),
            Verdict::Failure("bad command: empty command".to_string())
        );
        assert!(matches!(
            failure_error(result, String::new()),
            VerifierError::BadCommand(_)
        ));
    }
}
