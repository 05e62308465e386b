//! Parser for ytarchive's console output.
//!
//! Sample output:
//!
//! ```text
//! ytarchive 0.3.1-15663af
//! Stream starts at 2022-03-14T14:00:00+00:00 in 11075 seconds. Waiting for this time to elapse...
//! Stream is 30 seconds late...
//! Selected quality: 1080p60 (h264)
//! Video Fragments: 1215; Audio Fragments: 1215; Total Downloaded: 133.12MiB
//! Download Finished
//! Muxing final file...
//! Final file: /path/to/output.mp4
//! ```
//!
//! Newer releases prefix every line with a `YYYY/MM/DD HH:MM:SS ` timestamp.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::trace;

use crate::task::TaskStep;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x1b\x9b][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]").unwrap()
});

const ERROR_MARKERS: &[&str] = &[
    "Livestream has been processed",
    "Livestream has ended and is being processed",
    "use yt-dlp to download it",
    "Error retrieving player response",
    "unable to retrieve",
    "error writing the muxcmd file",
    "Something must have gone wrong with ffmpeg",
    "At least one error occurred",
];

const INTERRUPT_MARKER: &str = "User Interrupt";

/// Where the capture tool currently is, as inferred from its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    /// Waiting for the stream, with the announced start time when known.
    Waiting(Option<DateTime<Utc>>),
    Recording,
    Muxing,
    Finished,
    Interrupted,
    Errored,
}

impl RecorderState {
    /// Registry step mirroring this state, if any.
    pub fn task_step(&self) -> Option<TaskStep> {
        match self {
            Self::Idle => None,
            Self::Waiting(_) => Some(TaskStep::WaitingForLive),
            Self::Recording => Some(TaskStep::Recording),
            Self::Muxing => Some(TaskStep::Muxing),
            Self::Finished => Some(TaskStep::Muxed),
            Self::Interrupted => Some(TaskStep::Cancelled),
            Self::Errored => Some(TaskStep::Errored),
        }
    }
}

/// Stateful line parser. Feed it every output record in order.
#[derive(Debug, Clone, Default)]
pub struct OutputParser {
    pub state: RecorderState,
    pub version: Option<String>,
    pub video_quality: Option<String>,
    pub video_fragments: Option<u64>,
    pub audio_fragments: Option<u64>,
    pub total_size: Option<String>,
    pub output_file: Option<String>,
    pub last_output: Option<String>,
}

pub fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").into_owned()
}

/// Drops the `YYYY/MM/DD HH:MM:SS ` prefix newer releases add.
fn strip_timestamp(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() > 20 && bytes[4] == b'/' && bytes[7] == b'/' && line.is_char_boundary(20) {
        line[20..].trim_start()
    } else {
        line
    }
}

/// Splits `Key: value; Key: value` into trimmed values.
fn counter_values(line: &str) -> impl Iterator<Item = &str> {
    line.split(';')
        .map(|part| part.split_once(':').map_or("", |(_, v)| v.trim()))
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(&mut self, raw: &str) {
        let cleaned = strip_ansi(raw);
        let line = strip_timestamp(cleaned.trim());
        self.last_output = Some(line.to_string());
        trace!(line, "ytarchive output");

        if line.starts_with("Video Fragments: ") {
            self.state = RecorderState::Recording;
            let mut values = counter_values(line);
            self.video_fragments = values.next().and_then(|v| v.parse().ok());
            self.audio_fragments = values.next().and_then(|v| v.parse().ok());
            if let Some(size) = values.next() {
                self.total_size = Some(size.to_string());
            }
        } else if line.starts_with("Audio Fragments: ") {
            self.state = RecorderState::Recording;
            let mut values = counter_values(line);
            self.audio_fragments = values.next().and_then(|v| v.parse().ok());
            if let Some(size) = values.next() {
                self.total_size = Some(size.to_string());
            }
        } else if let Some(version) = line.strip_prefix("ytarchive ") {
            if self.version.is_none() {
                self.version = Some(version.trim().to_string());
            }
        } else if let Some(quality) = line.strip_prefix("Selected quality: ") {
            self.state = RecorderState::Recording;
            self.video_quality = Some(quality.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Stream starts at ") {
            let start = rest
                .split_whitespace()
                .next()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|d| d.with_timezone(&Utc));
            self.state = RecorderState::Waiting(start);
        } else if line.starts_with("Stream is ") || line.starts_with("Waiting for stream") {
            self.state = RecorderState::Waiting(None);
        } else if line.starts_with("Muxing final file") {
            self.state = RecorderState::Muxing;
        } else if let Some(path) = line.strip_prefix("Final file: ") {
            self.state = RecorderState::Finished;
            self.output_file = Some(path.trim().to_string());
        } else if line.contains(INTERRUPT_MARKER) {
            self.state = RecorderState::Interrupted;
        } else if ERROR_MARKERS.iter().any(|m| line.contains(m)) {
            self.state = RecorderState::Errored;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_capture_sequence() {
        let mut parser = OutputParser::new();
        let mut states = vec![parser.state];
        for line in [
            "Selected quality: 1080p60 (h264)",
            "Video Fragments: 10; Audio Fragments: 10; Total Downloaded: 12.3MiB",
            "Muxing final file...",
            "Final file: /tmp/x/out.mp4",
        ] {
            parser.parse_line(line);
            states.push(parser.state);
        }

        assert_eq!(
            states,
            vec![
                RecorderState::Idle,
                RecorderState::Recording,
                RecorderState::Recording,
                RecorderState::Muxing,
                RecorderState::Finished,
            ]
        );
        assert_eq!(parser.output_file.as_deref(), Some("/tmp/x/out.mp4"));
        assert_eq!(parser.video_quality.as_deref(), Some("1080p60 (h264)"));
        assert_eq!(parser.video_fragments, Some(10));
        assert_eq!(parser.audio_fragments, Some(10));
        assert_eq!(parser.total_size.as_deref(), Some("12.3MiB"));
    }

    #[rstest]
    #[case("Stream is 30 seconds late...", RecorderState::Waiting(None))]
    #[case("Waiting for stream, retrying in 60 seconds...", RecorderState::Waiting(None))]
    #[case("Muxing final file...", RecorderState::Muxing)]
    #[case("Final file: out.mp4", RecorderState::Finished)]
    #[case("Caught signal. User Interrupt, exiting", RecorderState::Interrupted)]
    #[case("Livestream has been processed, use yt-dlp instead.", RecorderState::Errored)]
    #[case("Livestream has ended and is being processed.", RecorderState::Errored)]
    #[case("Error retrieving player response: 404", RecorderState::Errored)]
    #[case("ERROR: unable to retrieve fragment", RecorderState::Errored)]
    #[case("Something must have gone wrong with ffmpeg", RecorderState::Errored)]
    #[case("At least one error occurred", RecorderState::Errored)]
    #[case("Audio Fragments: 5; Total Downloaded: 1.0MiB", RecorderState::Recording)]
    #[case("Loaded cookie file cookies.txt", RecorderState::Idle)]
    #[case("Video Title: something", RecorderState::Idle)]
    fn test_single_line_state(#[case] line: &str, #[case] expected: RecorderState) {
        let mut parser = OutputParser::new();
        parser.parse_line(line);
        assert_eq!(parser.state, expected);
        assert_eq!(parser.last_output.as_deref(), Some(line));
    }

    #[test]
    fn test_stream_start_time() {
        let mut parser = OutputParser::new();
        parser.parse_line(
            "Stream starts at 2022-03-14T14:00:00+00:00 in 11075 seconds. Waiting for this time to elapse...",
        );
        let expected = DateTime::parse_from_rfc3339("2022-03-14T14:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parser.state, RecorderState::Waiting(Some(expected)));
    }

    #[test]
    fn test_version_recorded_once() {
        let mut parser = OutputParser::new();
        parser.parse_line("ytarchive 0.3.1-15663af");
        parser.parse_line("ytarchive 9.9.9");
        assert_eq!(parser.version.as_deref(), Some("0.3.1-15663af"));
        assert_eq!(parser.state, RecorderState::Idle);
    }

    #[test]
    fn test_timestamp_prefix_and_ansi_are_stripped() {
        let mut parser = OutputParser::new();
        parser.parse_line("2023/01/02 03:04:05 \x1b[32mSelected quality: 720p\x1b[0m");
        assert_eq!(parser.state, RecorderState::Recording);
        assert_eq!(parser.video_quality.as_deref(), Some("720p"));

        parser.parse_line("\x1b[2KVideo Fragments: 3; Audio Fragments: 4; Total Downloaded: \x1b[1m2.5MiB");
        assert_eq!(parser.video_fragments, Some(3));
        assert_eq!(parser.total_size.as_deref(), Some("2.5MiB"));
    }

    #[test]
    fn test_unknown_line_keeps_state() {
        let mut parser = OutputParser::new();
        parser.parse_line("Muxing final file...");
        parser.parse_line("some ffmpeg chatter");
        assert_eq!(parser.state, RecorderState::Muxing);
        assert_eq!(parser.last_output.as_deref(), Some("some ffmpeg chatter"));
    }

    #[test]
    fn test_state_to_step() {
        assert_eq!(RecorderState::Idle.task_step(), None);
        assert_eq!(RecorderState::Finished.task_step(), Some(TaskStep::Muxed));
        assert_eq!(RecorderState::Interrupted.task_step(), Some(TaskStep::Cancelled));
    }
}
