//! Log inspection for units.
//!
//! The redbackup binaries log through `env_logger`, which prefixes every
//! record with its level. A unit whose output contains an `ERROR` or `WARN`
//! record is treated as failed even if it exited with code 0. The exit
//! code itself is checked separately by the caller.

use tracing::error;

use crate::error::{HarnessError, Result};

/// Line prefixes that mark a problem.
pub const PROBLEM_MARKERS: [&str; 2] = ["ERROR", "WARN"];

/// Return every line of `output` that starts with a problem marker.
pub fn find_problems(output: &str) -> Vec<String> {
    output
        .split('\n')
        .filter(|line| PROBLEM_MARKERS.iter().any(|m| line.starts_with(m)))
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

/// Check a unit's output for problems.
///
/// Succeeds silently on clean output. Otherwise every offending line is
/// reported and returned in [`HarnessError::LogProblems`].
pub fn check_log_for_errors(unit: &str, output: &str) -> Result<()> {
    let problems = find_problems(output);
    if problems.is_empty() {
        return Ok(());
    }

    error!(unit, count = problems.len(), "problems found during execution");
    for problem in &problems {
        error!(unit, "{}", problem);
    }

    Err(HarnessError::LogProblems {
        unit: unit.to_string(),
        lines: problems,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_output_passes() {
        let logs = "INFO:redbackup_node: listening on 0.0.0.0:8080\n\
                    DEBUG:redbackup_node::service: accepted connection\n";
        assert!(check_log_for_errors("NodeA", logs).is_ok());
    }

    #[test]
    fn empty_output_passes() {
        assert!(check_log_for_errors("NodeA", "").is_ok());
    }

    #[test]
    fn every_problem_line_is_reported() {
        let logs = "INFO:redbackup_node: started\n\
                    WARN:redbackup_node: could not resolve NodeB\n\
                    INFO:redbackup_node: retrying\n\
                    ERROR:redbackup_node: replication failed\n";

        let err = check_log_for_errors("NodeA", logs).unwrap_err();
        match err {
            HarnessError::LogProblems { unit, lines } => {
                assert_eq!(unit, "NodeA");
                assert_eq!(
                    lines,
                    vec![
                        "WARN:redbackup_node: could not resolve NodeB",
                        "ERROR:redbackup_node: replication failed",
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn markers_only_count_at_line_start() {
        let logs = "INFO: no ERROR here\nINFO: nor WARN here\n  ERROR indented\n";
        assert!(find_problems(logs).is_empty());
    }

    #[test]
    fn error_message_contains_offending_lines() {
        let err = check_log_for_errors("client1", "ERROR: chunk upload failed\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("client1"));
        assert!(message.contains("ERROR: chunk upload failed"));
    }

    #[test]
    fn crlf_line_endings_are_trimmed() {
        assert_eq!(find_problems("WARN: slow\r\nINFO: ok\r\n"), vec!["WARN: slow"]);
    }
}
