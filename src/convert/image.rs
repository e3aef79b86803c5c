//! Image and animation conversions.

use std::io::Cursor;
use std::process::Command;

use image::ImageFormat;
use tracing::warn;

use super::ConversionError;
use crate::models::{Artifact, PipelineWarning};

/// BMP is decoded in-process; no tool dependency needed.
pub fn bmp_to_png(name: &str, content: &[u8]) -> Result<Artifact, ConversionError> {
    let img = image::load_from_memory_with_format(content, ImageFormat::Bmp).map_err(|e| {
        ConversionError::ToolFailed {
            tool: "image".to_string(),
            detail: e.to_string(),
        }
    })?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ConversionError::ToolFailed {
            tool: "image".to_string(),
            detail: e.to_string(),
        })?;
    Ok(Artifact {
        name: format!("{name}.png"),
        content_type: "image/png".to_string(),
        bytes: out.into_inner(),
    })
}

/// Formats the `image` crate does not cover (tiff with exotic compression,
/// svg) go through ImageMagick.
pub fn magick_to_png(name: &str, ext: &str, content: &[u8]) -> Result<Artifact, ConversionError> {
    let convert = which::which("convert")
        .or_else(|_| which::which("magick"))
        .map_err(|_| {
            ConversionError::ToolUnavailable("ImageMagick not found in PATH".to_string())
        })?;

    let dir = tempfile::tempdir()?;
    let input = dir.path().join(format!("input.{ext}"));
    let output_path = dir.path().join("output.png");
    std::fs::write(&input, content)?;

    let output = Command::new(convert).arg(&input).arg(&output_path).output()?;
    if !output.status.success() {
        return Err(ConversionError::ToolFailed {
            tool: "convert".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(Artifact {
        name: format!("{name}.png"),
        content_type: "image/png".to_string(),
        bytes: std::fs::read(&output_path)?,
    })
}

/// Animated GIFs become MP4 via ffmpeg so the motion survives. When ffmpeg
/// is unavailable or fails, the first frame is salvaged as a PNG, flagged
/// as a partial conversion.
pub fn gif_to_video(
    name: &str,
    content: &[u8],
) -> Result<(Artifact, Option<PipelineWarning>, bool), ConversionError> {
    match ffmpeg_gif_to_mp4(name, content) {
        Ok(artifact) => Ok((artifact, None, false)),
        Err(e) => {
            warn!("ffmpeg conversion of '{}' failed ({}), keeping first frame only", name, e);
            let img = image::load_from_memory_with_format(content, ImageFormat::Gif).map_err(
                |e| ConversionError::ToolFailed {
                    tool: "image".to_string(),
                    detail: e.to_string(),
                },
            )?;
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png)
                .map_err(|e| ConversionError::ToolFailed {
                    tool: "image".to_string(),
                    detail: e.to_string(),
                })?;
            Ok((
                Artifact {
                    name: format!("{name}.png"),
                    content_type: "image/png".to_string(),
                    bytes: out.into_inner(),
                },
                Some(PipelineWarning::PartialConversion {
                    file_name: name.to_string(),
                }),
                true,
            ))
        }
    }
}

fn ffmpeg_gif_to_mp4(name: &str, content: &[u8]) -> Result<Artifact, ConversionError> {
    let ffmpeg = which::which("ffmpeg")
        .map_err(|_| ConversionError::ToolUnavailable("ffmpeg not found in PATH".to_string()))?;

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.gif");
    let output_path = dir.path().join("output.mp4");
    std::fs::write(&input, content)?;

    // yuv420p requires even dimensions, hence the scale filter
    let output = Command::new(ffmpeg)
        .args(["-y", "-i"])
        .arg(&input)
        .args([
            "-movflags",
            "faststart",
            "-pix_fmt",
            "yuv420p",
            "-vf",
            "scale=trunc(iw/2)*2:trunc(ih/2)*2",
        ])
        .arg(&output_path)
        .output()?;
    if !output.status.success() {
        return Err(ConversionError::ToolFailed {
            tool: "ffmpeg".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(Artifact {
        name: format!("{name}.mp4"),
        content_type: "video/mp4".to_string(),
        bytes: std::fs::read(&output_path)?,
    })
}
