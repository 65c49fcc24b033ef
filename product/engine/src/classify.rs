use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

pub const MEDIA_EXTENSIONS: [&str; 9] = [
    "mp4", "mkv", "webm", "mp3", "m4a", "opus", "aac", "flac", "wav",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineLevel {
    Error,
    Debug,
    Progress,
    Info,
}

impl LineLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineLevel::Error => "error",
            LineLevel::Debug => "debug",
            LineLevel::Progress => "progress",
            LineLevel::Info => "info",
        }
    }
}

fn error_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\[error\]|error:").expect("valid error regex"))
}

fn debug_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\[debug\]").expect("valid debug regex"))
}

fn progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\[download\]|\bETA\b|\d%|\b\d+(?:\.\d+)?\s*(?:KiB|MiB|GiB)\b")
            .expect("valid progress regex")
    })
}

pub fn classify(line: &str) -> LineLevel {
    let line = line.trim();
    if error_token_re().is_match(line) {
        LineLevel::Error
    } else if debug_prefix_re().is_match(line) {
        LineLevel::Debug
    } else if progress_re().is_match(line) {
        LineLevel::Progress
    } else {
        LineLevel::Info
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePolicy {
    pub debug: bool,
}

impl LinePolicy {
    pub fn relays(&self, level: LineLevel) -> bool {
        self.debug || level != LineLevel::Debug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    /// A bare absolute path ending in a media extension, as printed by
    /// `--print after_move:filepath`.
    SavedFile,
    Destination,
    MovingTo,
}

impl PathPattern {
    pub const ORDERED: [PathPattern; 3] = [
        PathPattern::SavedFile,
        PathPattern::Destination,
        PathPattern::MovingTo,
    ];

    pub fn match_line(&self, line: &str) -> Option<PathBuf> {
        let line = line.trim();
        let captured = match self {
            PathPattern::SavedFile => saved_file_re().is_match(line).then_some(line),
            PathPattern::Destination => destination_re()
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str()),
            PathPattern::MovingTo => moving_to_re()
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str()),
        }?;
        let cleaned = captured.trim().trim_matches('"').trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(PathBuf::from(cleaned))
        }
    }
}

fn saved_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"(?i)^(?:[a-z]:\\|/)\S.*\.(?:{})$",
            MEDIA_EXTENSIONS.join("|")
        );
        Regex::new(&pattern).expect("valid saved-file regex")
    })
}

fn destination_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bDestination:\s*(.+)$").expect("valid destination regex"))
}

fn moving_to_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bmoving\b.*?\bto:?\s+"?([^"]+?)"?\s*$"#).expect("valid moving regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub pattern: PathPattern,
    pub path: PathBuf,
}

pub fn extract_output_path(line: &str) -> Option<PathMatch> {
    PathPattern::ORDERED.iter().find_map(|pattern| {
        pattern.match_line(line).map(|path| PathMatch {
            pattern: *pattern,
            path,
        })
    })
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactTracker {
    latest: Option<PathMatch>,
}

impl ArtifactTracker {
    pub fn observe(&mut self, line: &str) -> Option<&PathMatch> {
        let found = extract_output_path(line)?;
        self.latest = Some(found);
        self.latest.as_ref()
    }

    pub fn latest(&self) -> Option<&PathMatch> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_detected_by_prefix_or_token() {
        assert_eq!(classify("[error] boom"), LineLevel::Error);
        assert_eq!(classify("[ERROR] boom"), LineLevel::Error);
        assert_eq!(classify("ERROR: [youtube] abc: Video unavailable"), LineLevel::Error);
        assert_eq!(classify("  something error: happened"), LineLevel::Error);
    }

    #[test]
    fn debug_lines_are_detected() {
        assert_eq!(classify("[debug] Command-line config: []"), LineLevel::Debug);
        assert_eq!(classify("[DEBUG] x"), LineLevel::Debug);
    }

    #[test]
    fn progress_lines_are_detected() {
        assert_eq!(
            classify("[download]  12.5% of ~ 3.40MiB at 1.2MiB/s ETA 00:02"),
            LineLevel::Progress
        );
        assert_eq!(classify("[download] Destination: /tmp/a.webm"), LineLevel::Progress);
        assert_eq!(classify("frame= 10 size= 512KiB"), LineLevel::Progress);
        assert_eq!(classify("done 100%"), LineLevel::Progress);
    }

    #[test]
    fn other_lines_are_info() {
        assert_eq!(classify("[youtube] Extracting URL: https://x"), LineLevel::Info);
        assert_eq!(classify("Deleting original file /tmp/a.webm"), LineLevel::Info);
        assert_eq!(classify(""), LineLevel::Info);
    }

    #[test]
    fn classification_is_stable() {
        let line = "[download] 50.0% of 10.00MiB";
        assert_eq!(classify(line), classify(line));
    }

    #[test]
    fn policy_suppresses_debug_only_without_debug_mode() {
        let quiet = LinePolicy { debug: false };
        let verbose = LinePolicy { debug: true };
        assert!(!quiet.relays(LineLevel::Debug));
        assert!(quiet.relays(LineLevel::Error));
        assert!(quiet.relays(LineLevel::Progress));
        assert!(verbose.relays(LineLevel::Debug));
    }

    #[test]
    fn saved_file_matches_absolute_media_paths() {
        let m = extract_output_path("/home/me/Music/Song Title.m4a").expect("match");
        assert_eq!(m.pattern, PathPattern::SavedFile);
        assert_eq!(m.path, PathBuf::from("/home/me/Music/Song Title.m4a"));

        let m = extract_output_path(r"C:\Users\me\Downloads\clip.WEBM").expect("match");
        assert_eq!(m.pattern, PathPattern::SavedFile);

        assert!(extract_output_path("relative/song.m4a").is_none());
        assert!(extract_output_path("/tmp/notes.txt").is_none());
    }

    #[test]
    fn destination_pattern_extracts_path() {
        let m = extract_output_path("[download] Destination: /tmp/out/Track.webm").expect("match");
        assert_eq!(m.pattern, PathPattern::Destination);
        assert_eq!(m.path, PathBuf::from("/tmp/out/Track.webm"));

        let m = extract_output_path("[ExtractAudio] Destination: /tmp/out/Track.m4a").expect("match");
        assert_eq!(m.path, PathBuf::from("/tmp/out/Track.m4a"));
    }

    #[test]
    fn moving_pattern_extracts_target() {
        let m = extract_output_path("Moving to: /tmp/out/final.opus").expect("match");
        assert_eq!(m.pattern, PathPattern::MovingTo);
        assert_eq!(m.path, PathBuf::from("/tmp/out/final.opus"));

        let m = extract_output_path(
            r#"[MoveFiles] Moving file "/tmp/Back to school.webm.part" to "/tmp/Back to school.webm""#,
        )
        .expect("match");
        assert_eq!(m.path, PathBuf::from("/tmp/Back to school.webm"));
    }

    #[test]
    fn unmatched_lines_yield_none() {
        assert!(extract_output_path("[youtube] abc: Downloading webpage").is_none());
        assert!(extract_output_path("").is_none());
        assert!(extract_output_path("Destination:   ").is_none());
    }

    #[test]
    fn tracker_keeps_last_match() {
        let lines = [
            "[youtube] abc: Downloading webpage",
            "[download] Destination: /tmp/a.webm",
            "[download] 100% of 3.00MiB",
            "Moving to: /tmp/b.webm",
            "[info] nothing here",
            "/tmp/c.m4a",
            "Deleting original file",
        ];
        let mut tracker = ArtifactTracker::default();
        for line in lines {
            tracker.observe(line);
        }
        assert_eq!(tracker.latest().map(|m| m.pattern), Some(PathPattern::SavedFile));
        assert_eq!(
            tracker.latest().map(|m| m.path.clone()),
            Some(PathBuf::from("/tmp/c.m4a"))
        );
    }

    #[test]
    fn tracker_without_matches_is_empty() {
        let mut tracker = ArtifactTracker::default();
        assert!(tracker.observe("[info] hello").is_none());
        assert!(tracker.latest().is_none());
    }
}
