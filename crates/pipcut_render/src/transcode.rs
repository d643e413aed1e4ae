use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::{RenderError, Result};
use crate::plan::{build_ffmpeg_args, RenderPlan};

/// Number of stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 12;

/// External tools the render pipeline shells out to, with what they are for.
pub const REQUIRED_TOOLS: [(&str, &str); 2] = [
    ("ffmpeg", "video rendering/export"),
    ("ffprobe", "media file analysis"),
];

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Progress update during rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderProgress {
    pub percent: f64,
    pub frame: u64,
    pub fps: f64,
    pub speed: String,
    pub eta_seconds: Option<f64>,
}

/// Runs a compiled plan to completion.
///
/// Implementations write `plan.output_path`, publish progress on `progress`
/// and must stop with [`RenderError::Cancelled`] once `cancel` turns true.
pub trait Transcoder: Send + Sync {
    fn transcode<'a>(
        &'a self,
        plan: &'a RenderPlan,
        progress: watch::Sender<RenderProgress>,
        cancel: watch::Receiver<bool>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Transcoder backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(
        &self,
        plan: &RenderPlan,
        progress: watch::Sender<RenderProgress>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let args = build_ffmpeg_args(plan);
        tracing::debug!(binary = %self.binary.display(), ?args, "spawning ffmpeg");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::FfmpegNotFound
                } else {
                    RenderError::Io(e)
                }
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RenderError::FfmpegFailed("stderr was not captured".into()))?;

        let total_secs = plan.duration.as_seconds();
        let mut tail = StderrTail::default();
        let mut buf = [0u8; 4096];
        let mut watching_cancel = true;

        if *cancel.borrow() {
            child.kill().await?;
            return Err(RenderError::Cancelled);
        }

        loop {
            tokio::select! {
                read = stderr.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    for line in tail.push(&buf[..n]) {
                        if let Some(update) = parse_progress(&line, total_secs) {
                            let _ = progress.send(update);
                        }
                    }
                }
                changed = cancel.changed(), if watching_cancel => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            tracing::info!("cancelling ffmpeg");
                            child.kill().await?;
                            return Err(RenderError::Cancelled);
                        }
                        Ok(()) => {}
                        // Nobody can cancel any more.
                        Err(_) => watching_cancel = false,
                    }
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(RenderError::FfmpegFailed(format!(
                "ffmpeg exited with {status}: {}",
                tail.joined()
            )));
        }

        progress.send_modify(|p| {
            p.percent = 100.0;
            p.eta_seconds = None;
        });
        Ok(())
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode<'a>(
        &'a self,
        plan: &'a RenderPlan,
        progress: watch::Sender<RenderProgress>,
        cancel: watch::Receiver<bool>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run(plan, progress, cancel))
    }
}

/// Splits ffmpeg stderr into lines on `\r` or `\n` and remembers the last few.
#[derive(Debug, Default)]
struct StderrTail {
    pending: String,
    lines: VecDeque<String>,
}

impl StderrTail {
    /// Feed raw bytes and return the lines they completed.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut done = Vec::new();
        while let Some(pos) = self.pending.find(['\r', '\n']) {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line.trim().is_empty() {
                continue;
            }
            if self.lines.len() == STDERR_TAIL_LINES {
                self.lines.pop_front();
            }
            self.lines.push_back(line.clone());
            done.push(line);
        }
        done
    }

    fn joined(&self) -> String {
        let mut lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        if !self.pending.trim().is_empty() {
            lines.push(self.pending.trim());
        }
        lines.join("\n")
    }
}

/// First line of `<bin> -version`, or `None` if it cannot be run.
pub fn tool_version(bin: &str) -> Option<String> {
    let output = std::process::Command::new(bin)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
}

/// Parse an ffmpeg stderr progress line.
///
/// Example line: `frame=  123 fps= 60 ... time=00:01:02.05 speed=1.50x`
pub fn parse_progress(line: &str, total_secs: f64) -> Option<RenderProgress> {
    if !line.contains("time=") {
        return None;
    }

    let frame = extract_value(line, "frame=")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = extract_value(line, "fps=")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    let speed_str = extract_value(line, "speed=").unwrap_or_default();

    let time_secs = extract_value(line, "time=")
        .and_then(|v| parse_time_str(&v))
        .unwrap_or(0.0);

    let percent = if total_secs > 0.0 {
        (time_secs / total_secs * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let speed_factor = speed_str
        .trim_end_matches('x')
        .parse::<f64>()
        .unwrap_or(0.0);

    let eta_seconds = if speed_factor > 0.0 && total_secs > time_secs {
        Some((total_secs - time_secs) / speed_factor)
    } else {
        None
    };

    Some(RenderProgress {
        percent,
        frame,
        fps,
        speed: speed_str,
        eta_seconds,
    })
}

/// Extract a value from an ffmpeg key=value progress line.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let trimmed = rest.trim_start();
    let end = trimmed
        .find(|c: char| c.is_whitespace())
        .unwrap_or(trimmed.len());
    let val = trimmed[..end].to_string();
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Parse an ffmpeg time string like "00:01:02.05" into seconds.
///
/// ffmpeg prints `N/A` before the first frame is muxed.
fn parse_time_str(s: &str) -> Option<f64> {
    let mut parts = s.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let mins: f64 = parts.next()?.parse().ok()?;
    let secs: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + mins * 60.0 + secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pipcut_core::types::TimeUs;

    #[test]
    fn parse_progress_extracts_time_and_calculates_percent() {
        let line =
            "frame=  150 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 200.0kbits/s speed=1.50x";

        let progress = parse_progress(line, 10.0).unwrap();

        assert_eq!(progress.frame, 150);
        assert!((progress.fps - 30.0).abs() < 0.01);
        assert!((progress.percent - 50.0).abs() < 0.1);
        assert_eq!(progress.speed, "1.50x");
        // (10 - 5) / 1.5
        assert!((progress.eta_seconds.unwrap() - 3.33).abs() < 0.1);
    }

    #[test]
    fn parse_progress_returns_none_for_non_progress_lines() {
        assert!(parse_progress("Input #0, mov,mp4...", 10.0).is_none());
        assert!(parse_progress("Stream #0:0: Video: h264", 10.0).is_none());
        assert!(parse_progress("", 10.0).is_none());
    }

    #[test]
    fn parse_progress_handles_zero_total_and_unknown_time() {
        let line = "frame=  10 fps= 30 time=00:00:01.00 speed=1.00x";
        assert!((parse_progress(line, 0.0).unwrap().percent).abs() < 0.01);

        let early = parse_progress("frame=    0 fps=0.0 time=N/A speed=N/A", 10.0).unwrap();
        assert_eq!(early.percent, 0.0);
        assert!(early.eta_seconds.is_none());
    }

    #[test]
    fn parse_progress_caps_at_one_hundred() {
        let line = "frame=  400 fps= 30 time=00:00:12.00 speed=2.00x";
        let progress = parse_progress(line, 10.0).unwrap();
        assert_eq!(progress.percent, 100.0);
        assert!(progress.eta_seconds.is_none());
    }

    #[test]
    fn parse_time_str_valid_and_invalid() {
        assert!((parse_time_str("00:01:02.05").unwrap() - 62.05).abs() < 0.001);
        assert!((parse_time_str("01:00:00.00").unwrap() - 3600.0).abs() < 0.001);
        assert!(parse_time_str("invalid").is_none());
        assert!(parse_time_str("00:00").is_none());
        assert!(parse_time_str("N/A").is_none());
    }

    #[test]
    fn extract_value_works() {
        let line = "frame=  150 fps= 30.0 time=00:00:05.00 speed=1.50x";
        assert_eq!(extract_value(line, "frame=").unwrap(), "150");
        assert_eq!(extract_value(line, "fps=").unwrap(), "30.0");
        assert_eq!(extract_value(line, "time=").unwrap(), "00:00:05.00");
        assert_eq!(extract_value(line, "speed=").unwrap(), "1.50x");
        assert!(extract_value(line, "missing=").is_none());
    }

    #[test]
    fn stderr_tail_splits_carriage_returns_across_chunks() {
        let mut tail = StderrTail::default();
        assert!(tail.push(b"frame=  1 time=00:00:00.03").is_empty());
        let lines = tail.push(b"\rframe=  2 time=00:00:00.06\rError opening");
        assert_eq!(
            lines,
            vec!["frame=  1 time=00:00:00.03", "frame=  2 time=00:00:00.06"]
        );
        assert!(tail.joined().ends_with("Error opening"));
    }

    #[test]
    fn stderr_tail_keeps_only_recent_lines() {
        let mut tail = StderrTail::default();
        for i in 0..(STDERR_TAIL_LINES + 5) {
            tail.push(format!("line {i}\n").as_bytes());
        }
        assert_eq!(tail.lines.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.lines.front().unwrap(), "line 5");
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let plan = RenderPlan {
            inputs: vec![],
            filter_graph: String::new(),
            output_args: vec![],
            output_path: PathBuf::from("/tmp/never.mp4"),
            duration: TimeUs::from_seconds(1.0),
        };
        let transcoder = FfmpegTranscoder::new("/nonexistent/pipcut-ffmpeg");
        let (progress_tx, _progress_rx) = watch::channel(RenderProgress::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = transcoder
            .transcode(&plan, progress_tx, cancel_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::FfmpegNotFound));
    }

    #[test]
    fn tool_version_of_missing_tool_is_none() {
        assert!(tool_version("/nonexistent/pipcut-ffprobe").is_none());
    }
}
