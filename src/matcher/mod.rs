mod nbis;

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub use nbis::{NbisExtractor, NbisScorer};

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("required tool not found: {0}")]
    ToolMissing(String),
}

/// A single gallery candidate as handed to [`identify`].
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub template_id: i64,
    pub xyt_path: String,
}

/// Turns a captured image into an opaque minutiae template plus a quality
/// score. Implemented over `mindtct` in production; faked in tests.
pub trait Extractor: Send + Sync {
    /// Extracts features from `image_path`, writing the template to
    /// `output_xyt_path`. Returns `(success, quality)`. Never returns an
    /// `Err` — every failure mode (missing binary output aside, which is
    /// checked at construction) collapses to `(false, 0)` per the documented
    /// contract: the caller only cares whether a usable template exists.
    fn extract_features(&self, image_path: &Path, output_xyt_path: &Path) -> (bool, i64);
}

/// Scores two XYT templates against each other. Implemented over `bozorth3`
/// in production; faked in tests.
pub trait Scorer: Send + Sync {
    /// Returns a match score (higher is better). Any subprocess failure
    /// (non-zero exit, timeout, unreadable output) collapses to `0`.
    fn score(&self, probe_xyt: &Path, candidate_xyt: &Path) -> i64;
}

pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps an [`Extractor`] and a [`Scorer`] behind the identification policy:
/// quality-sorted gallery argmax with deterministic tie-breaking.
pub struct Matcher {
    extractor: Box<dyn Extractor>,
    scorer: Box<dyn Scorer>,
    match_threshold: i64,
}

impl Matcher {
    /// Constructs a production matcher backed by the real NBIS tools at the
    /// configured paths. Verifies both exist up front — a missing tool is a
    /// startup failure, never discovered mid-shift.
    pub fn new_nbis(
        mindtct_path: std::path::PathBuf,
        bozorth3_path: std::path::PathBuf,
        match_threshold: i64,
    ) -> Result<Self, MatcherError> {
        Self::new(
            Box::new(NbisExtractor::verified(mindtct_path)?),
            Box::new(NbisScorer::verified(bozorth3_path)?),
            match_threshold,
        )
    }

    pub fn new(
        extractor: Box<dyn Extractor>,
        scorer: Box<dyn Scorer>,
        match_threshold: i64,
    ) -> Result<Self, MatcherError> {
        Ok(Self {
            extractor,
            scorer,
            match_threshold,
        })
    }

    pub fn extract_features(&self, image_path: &Path, output_xyt_path: &Path) -> (bool, i64) {
        self.extractor.extract_features(image_path, output_xyt_path)
    }

    /// 1:N identification. `gallery` should already be sorted by descending
    /// quality (the Store's `get_all_templates` guarantees this) — the
    /// ordering determines which template wins a tied score.
    ///
    /// Every gallery entry is scored; there is no early exit on a "good
    /// enough" score, so the returned best is always a true argmax.
    pub fn identify(&self, probe_xyt: &Path, gallery: &[GalleryEntry]) -> Option<(i64, i64)> {
        let mut best: Option<(i64, i64)> = None;
        for entry in gallery {
            let score = self.scorer.score(probe_xyt, Path::new(&entry.xyt_path));
            let better = match best {
                None => true,
                Some((_, best_score)) => score > best_score,
            };
            if better {
                best = Some((entry.template_id, score));
            }
        }
        best.filter(|(_, score)| *score >= self.match_threshold)
    }
}

/// Scans extractor stdout for a quality value. Looks for a line containing
/// "Quality" or "NFIQ" and takes the first integer token on that line;
/// falls back to 50 if no such line parses. This mirrors the exact fallback
/// behavior of the tool this wraps, sharp edge and all: an unparseable
/// quality line passes the default `min_quality_score` gate of 20.
pub fn parse_quality(stdout: &str) -> i64 {
    for line in stdout.lines() {
        if line.contains("Quality") || line.contains("NFIQ") {
            if let Some(value) = line
                .split(|c: char| !c.is_ascii_digit() && c != '-')
                .find_map(|tok| tok.parse::<i64>().ok())
            {
                return value;
            }
        }
    }
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct FakeExtractor {
        quality: i64,
        succeeds: bool,
    }

    impl Extractor for FakeExtractor {
        fn extract_features(&self, _image_path: &Path, _output_xyt_path: &Path) -> (bool, i64) {
            (self.succeeds, self.quality)
        }
    }

    struct FakeScorer {
        scores: Mutex<std::collections::HashMap<String, i64>>,
        calls: AtomicI64,
    }

    impl FakeScorer {
        fn new(scores: &[(&str, i64)]) -> Self {
            Self {
                scores: Mutex::new(scores.iter().map(|(k, v)| (k.to_string(), *v)).collect()),
                calls: AtomicI64::new(0),
            }
        }
    }

    impl Scorer for FakeScorer {
        fn score(&self, _probe_xyt: &Path, candidate_xyt: &Path) -> i64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = candidate_xyt.to_string_lossy().to_string();
            *self.scores.lock().unwrap().get(&key).unwrap_or(&0)
        }
    }

    fn gallery(entries: &[(i64, &str)]) -> Vec<GalleryEntry> {
        entries
            .iter()
            .map(|(id, path)| GalleryEntry {
                template_id: *id,
                xyt_path: path.to_string(),
            })
            .collect()
    }

    #[test]
    fn identify_returns_highest_scoring_candidate_above_threshold() {
        let scorer = FakeScorer::new(&[("a.xyt", 30), ("b.xyt", 85), ("c.xyt", 50)]);
        let matcher = Matcher::new(
            Box::new(FakeExtractor { quality: 80, succeeds: true }),
            Box::new(scorer),
            40,
        )
        .unwrap();
        let gallery = gallery(&[(1, "a.xyt"), (2, "b.xyt"), (3, "c.xyt")]);
        let result = matcher.identify(Path::new("probe.xyt"), &gallery);
        assert_eq!(result, Some((2, 85)));
    }

    #[test]
    fn identify_returns_none_when_best_score_below_threshold() {
        let scorer = FakeScorer::new(&[("a.xyt", 10), ("b.xyt", 20)]);
        let matcher = Matcher::new(
            Box::new(FakeExtractor { quality: 80, succeeds: true }),
            Box::new(scorer),
            40,
        )
        .unwrap();
        let gallery = gallery(&[(1, "a.xyt"), (2, "b.xyt")]);
        assert_eq!(matcher.identify(Path::new("probe.xyt"), &gallery), None);
    }

    #[test]
    fn identify_on_empty_gallery_returns_none() {
        let scorer = FakeScorer::new(&[]);
        let matcher = Matcher::new(
            Box::new(FakeExtractor { quality: 80, succeeds: true }),
            Box::new(scorer),
            40,
        )
        .unwrap();
        assert_eq!(matcher.identify(Path::new("probe.xyt"), &[]), None);
    }

    #[test]
    fn identify_ties_keep_first_highest_quality_entry() {
        // Both candidates score 60; gallery order (quality-descending) puts
        // template 1 first, so it must win even though template 2 is scored
        // after and produces the same value.
        let scorer = FakeScorer::new(&[("a.xyt", 60), ("b.xyt", 60)]);
        let matcher = Matcher::new(
            Box::new(FakeExtractor { quality: 80, succeeds: true }),
            Box::new(scorer),
            40,
        )
        .unwrap();
        let gallery = gallery(&[(1, "a.xyt"), (2, "b.xyt")]);
        assert_eq!(matcher.identify(Path::new("probe.xyt"), &gallery), Some((1, 60)));
    }

    #[test]
    fn identify_scores_every_entry_no_short_circuit() {
        let scorer = FakeScorer::new(&[("a.xyt", 99), ("b.xyt", 5), ("c.xyt", 5)]);
        let matcher = Matcher::new(
            Box::new(FakeExtractor { quality: 80, succeeds: true }),
            Box::new(scorer),
            40,
        )
        .unwrap();
        let gallery = gallery(&[(1, "a.xyt"), (2, "b.xyt"), (3, "c.xyt")]);
        let result = matcher.identify(Path::new("probe.xyt"), &gallery);
        assert_eq!(result, Some((1, 99)));
    }

    #[test]
    fn parse_quality_reads_first_integer_on_quality_line() {
        let stdout = "Image quality computed\nQuality: 72\nOther output";
        assert_eq!(parse_quality(stdout), 72);
    }

    #[test]
    fn parse_quality_recognizes_nfiq_label() {
        let stdout = "NFIQ 3\n";
        assert_eq!(parse_quality(stdout), 3);
    }

    #[test]
    fn parse_quality_falls_back_to_fifty_when_unparseable() {
        let stdout = "no useful output here";
        assert_eq!(parse_quality(stdout), 50);
    }
}
