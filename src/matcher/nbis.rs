use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use super::{parse_quality, Extractor, MatcherError, Scorer, EXTRACT_TIMEOUT, MATCH_TIMEOUT};

fn binary_exists(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Runs `cmd` to completion, killing it if it outlives `timeout`. Returns
/// `None` on timeout, spawn failure, or any other I/O error — the caller
/// maps that to the documented "any failure" fallback.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<std::process::Output> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .ok()?;

    let start = std::time::Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => return None,
        }
    }
}

/// Wraps `mindtct`: extracts minutiae and a quality estimate from a
/// fingerprint image. `mindtct` writes its own `<stem>.xyt` sibling file
/// next to its output prefix, so `output_xyt_path`'s parent/stem are passed
/// as the tool's output prefix and the produced file is then checked for.
pub struct NbisExtractor {
    binary: PathBuf,
}

impl NbisExtractor {
    /// Verifies the configured `mindtct` path exists before the daemon ever
    /// relies on it, rather than discovering a bad path on the first punch.
    pub fn verified(binary: PathBuf) -> Result<Self, MatcherError> {
        if !binary_exists(&binary) {
            return Err(MatcherError::ToolMissing(binary.display().to_string()));
        }
        Ok(Self { binary })
    }
}

impl Extractor for NbisExtractor {
    fn extract_features(&self, image_path: &Path, output_xyt_path: &Path) -> (bool, i64) {
        let prefix = output_xyt_path.with_extension("");
        let cmd = {
            let mut c = Command::new(&self.binary);
            c.arg(image_path).arg(&prefix);
            c
        };
        let Some(output) = run_with_timeout(cmd, EXTRACT_TIMEOUT) else {
            return (false, 0);
        };
        if !output.status.success() || !output_xyt_path.exists() {
            return (false, 0);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        (true, parse_quality(&stdout))
    }
}

/// Wraps `bozorth3`: scores one probe template against one candidate.
pub struct NbisScorer {
    binary: PathBuf,
}

impl NbisScorer {
    /// Verifies the configured `bozorth3` path exists before the daemon ever
    /// relies on it, rather than discovering a bad path on the first punch.
    pub fn verified(binary: PathBuf) -> Result<Self, MatcherError> {
        if !binary_exists(&binary) {
            return Err(MatcherError::ToolMissing(binary.display().to_string()));
        }
        Ok(Self { binary })
    }
}

impl Scorer for NbisScorer {
    fn score(&self, probe_xyt: &Path, candidate_xyt: &Path) -> i64 {
        let cmd = {
            let mut c = Command::new(&self.binary);
            c.arg(probe_xyt).arg(candidate_xyt);
            c
        };
        let Some(output) = run_with_timeout(cmd, MATCH_TIMEOUT) else {
            return 0;
        };
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i64>()
            .unwrap_or(0)
    }
}
