use crate::common::{KioskError, Result};
use crate::core::engine::{KioskEngine, TickReport};
use crate::core::session::Phase;
use crate::core::traits::{FaceDetector, FaceEmbedder, IdentityStore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Complete the transaction once a session has been active this many ticks.
    pub complete_after: Option<u32>,
    /// One JSON object per tick instead of a summary line.
    pub json: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub frames: usize,
    pub failed_ticks: usize,
    pub enrolled: usize,
    pub recognized: usize,
    pub transactions: usize,
}

/// Image files in `dir`, sorted by file name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Feeds every frame through `detector` and `engine` in order, writing one
/// line per tick to `out`. Tick errors are reported and the replay carries on.
pub fn replay<D, E, S, W>(
    frames: &[PathBuf],
    detector: &D,
    engine: &mut KioskEngine<E, S>,
    options: &ReplayOptions,
    out: &mut W,
) -> Result<ReplaySummary>
where
    D: FaceDetector,
    E: FaceEmbedder,
    S: IdentityStore,
    W: Write,
{
    let mut summary = ReplaySummary::default();
    let mut active_ticks = 0u32;

    for (index, path) in frames.iter().enumerate() {
        summary.frames += 1;

        let outcome = image::open(path)
            .map_err(KioskError::from)
            .and_then(|frame| {
                let observation = detector.detect(&frame)?;
                engine.tick(&frame, &observation)
            });
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Tick {} ({:?}) failed: {}", index, path, e);
                summary.failed_ticks += 1;
                write_error(out, index, &e, options.json)?;
                continue;
            }
        };

        if report.enrolled.is_some() {
            summary.enrolled += 1;
        }
        if report.match_result.as_ref().map_or(false, |m| m.found) {
            summary.recognized += 1;
        }

        write_report(out, index, &report, options.json)?;

        if report.phase == Phase::Active {
            active_ticks += 1;
        } else {
            active_ticks = 0;
        }

        if let (Some(limit), Some(identity_id)) = (options.complete_after, report.session.identity_id.as_ref()) {
            if active_ticks >= limit && engine.complete_transaction(identity_id)? {
                summary.transactions += 1;
                active_ticks = 0;
                if let (false, Some(line)) = (options.json, engine.status_log().latest()) {
                    writeln!(out, "{:>5}  {}", index, line)?;
                }
            }
        }
    }

    Ok(summary)
}

fn write_error<W: Write>(out: &mut W, index: usize, error: &KioskError, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({ "tick": index, "error": error.to_string() });
        writeln!(out, "{}", line)?;
    } else {
        writeln!(out, "{:>5}  error: {}", index, error)?;
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, index: usize, report: &TickReport, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(report)
            .map_err(|e| KioskError::Other(e.into()))?;
        writeln!(out, "{}", line)?;
        return Ok(());
    }

    let identity = report
        .session
        .identity_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    write!(out, "{:>5}  {:<10}  {:<8}", index, format!("{:?}", report.phase), identity)?;
    if let Some(rejection) = &report.rejection {
        write!(out, "  rejected: {}", rejection)?;
    }
    if let Some(line) = &report.status_line {
        write!(out, "  {}", line)?;
    }
    writeln!(out)?;
    Ok(())
}
