//! User-facing explanations for failures to drive the target program.

use crate::io::process::{SpawnCause, SpawnError};

/// Shown by `lockstep check` when the default target does not exist yet.
pub const FIRST_RUN_HELP: &str = "\
lockstep can't find your program!

Your first step is to write a console-mode program (one that does
absolutely nothing) and tell lockstep where to find it.

This is configured under [target] in your .lockstep.toml file, but you
can also try a command before adding it there:

    lockstep check [/path/to/your-program] [arguments]

The default path is \"./my-program\". Use `-c` as the first argument to run
the rest through the shell.

Once lockstep is able to launch your program, `lockstep next` fetches the
first test.";

/// Specific advice for a spawn failure; unknown causes get the bug-report text.
pub fn spawn_guidance(err: &SpawnError) -> Vec<String> {
    let program = &err.program;
    let mut lines = vec![err.source.to_string()];
    match err.cause {
        SpawnCause::NotFound => {
            lines.push(format!("Couldn't find program or command: {program}"));
            lines.push("Check the path, and that it is installed or on your PATH.".to_string());
        }
        SpawnCause::PermissionDenied => {
            lines.push(format!("Couldn't run {program:?} due to a permission error."));
            lines.push("Mark the file executable (chmod +x).".to_string());
        }
        SpawnCause::BrokenPipe => {
            lines.push(format!("{program:?} quit before reading its input."));
            lines.push(
                "Make it read commands from standard input; don't expect arguments.".to_string(),
            );
        }
        SpawnCause::Other => return unexpected(&format!("{err:?}")),
    }
    lines
}

/// Full diagnostic plus a request to file a bug report.
pub fn unexpected(diagnostic: &str) -> Vec<String> {
    let rule = "-".repeat(50);
    let mut lines = vec![rule.clone()];
    lines.extend(diagnostic.lines().map(str::to_string));
    lines.push(rule);
    lines.extend(
        [
            "Oh no! lockstep ran into an unexpected problem while attempting",
            "to run your program. Please file a bug report with the details",
            "above so we can give a better message in the future.",
        ]
        .map(str::to_string),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn spawn_error(kind: io::ErrorKind) -> SpawnError {
        let source = io::Error::from(kind);
        SpawnError {
            cause: SpawnCause::classify(&source),
            program: "./my-program".to_string(),
            source,
        }
    }

    #[test]
    fn permission_tells_learner_to_mark_executable() {
        let lines = spawn_guidance(&spawn_error(io::ErrorKind::PermissionDenied));
        assert!(lines.iter().any(|l| l.contains("Mark the file executable")));
    }

    #[test]
    fn not_found_tells_learner_to_check_path() {
        let lines = spawn_guidance(&spawn_error(io::ErrorKind::NotFound));
        assert!(lines.iter().any(|l| l.contains("Check the path")));
    }

    #[test]
    fn broken_pipe_points_at_standard_input() {
        let lines = spawn_guidance(&spawn_error(io::ErrorKind::BrokenPipe));
        assert!(lines.iter().any(|l| l.contains("standard input")));
    }

    #[test]
    fn other_causes_ask_for_a_bug_report() {
        let lines = spawn_guidance(&spawn_error(io::ErrorKind::OutOfMemory));
        assert!(lines.iter().any(|l| l.contains("bug report")));
        assert!(lines.iter().any(|l| l.contains("unexpected problem")));
    }
}
