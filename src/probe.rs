//! Running the host commands platform detection reads.

use std::process::Command;
use tracing::debug;

/// A source of answers to the external queries platform detection relies on.
///
/// Each query is a single command invocation; the detector only ever sees the
/// captured text, so tests can substitute canned output for real commands.
pub trait Probe {
    /// Runs `program` with `args` and returns everything it printed.
    ///
    /// Returns `None` when the program could not be started or printed nothing.
    fn query(&self, program: &str, args: &[&str]) -> Option<String>;
}

/// Runs queries as real, blocking child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn query(&self, program: &str, args: &[&str]) -> Option<String> {
        let output = match Command::new(program).args(args).output() {
            Ok(output) => output,
            Err(err) => {
                debug!(program, ?args, %err, "probe could not be started");
                return None;
            }
        };
        // some tools (musl's ldd) answer on stderr with a failing status
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!(program, ?args, status = %output.status, "probe finished");
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_system_probe_captures_stdout() {
        let out = SystemProbe.query("echo", &["hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_system_probe_missing_program() {
        assert!(SystemProbe.query("prebin-no-such-program-12345", &[]).is_none());
    }
}
