//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Builder for FFmpeg commands.
///
/// Supports any number of inputs, each with its own pre-`-i` arguments
/// (`-loop`, `-t`, `-f lavfi`, `-stream_loop`, ...).
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs as (args-before-`-i`, source)
    inputs: Vec<(Vec<String>, String)>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (between inputs and output path)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a plain file input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path.as_ref().to_string_lossy())
    }

    /// Add an input with arguments placed before its `-i`.
    pub fn input_with_args<I, S>(mut self, args: I, source: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs
            .push((args.into_iter().map(Into::into).collect(), source.into()));
        self
    }

    /// Add a lavfi source input (e.g. `color=black:s=1080x1920`).
    pub fn lavfi_input(self, spec: impl Into<String>) -> Self {
        self.input_with_args(["-f".to_string(), "lavfi".to_string()], spec)
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set audio filter.
    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream into the output.
    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set encoder preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set video bitrate.
    pub fn bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:v").output_arg(bitrate)
    }

    /// Set frame rate.
    pub fn fps(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    /// Set encoder thread count.
    pub fn threads(self, threads: usize) -> Self {
        self.output_arg("-threads").output_arg(threads.to_string())
    }

    /// Extract a single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Apply a full encoding profile (codec, preset, crf, bitrate, threads, fps).
    pub fn encoding_profile(self, profile: &reel_models::EncodingProfile) -> Self {
        self.video_codec(&profile.codec)
            .preset(&profile.preset)
            .crf(profile.crf)
            .bitrate(&profile.bitrate)
            .threads(profile.threads)
            .fps(profile.fps)
            .output_arg("-pix_fmt")
            .output_arg("yuv420p")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the full argument list.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for (input_args, source) in &self.inputs {
            args.extend(input_args.clone());
            args.push("-i".to_string());
            args.push(source.clone());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with an optional timeout.
#[derive(Debug, Default)]
pub struct FfmpegRunner {
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Kill the encoder after this many seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr concurrently so a chatty encoder can never fill the
        // pipe buffer and stall.
        let stderr = child.stderr.take();
        let capture = tokio::spawn(async move {
            let mut captured = String::new();
            if let Some(mut pipe) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = pipe.read_to_string(&mut captured).await;
            }
            captured
        });

        let status = if let Some(timeout_secs) = self.timeout_secs {
            let waited =
                tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), child.wait())
                    .await;
            match waited {
                Ok(status) => status?,
                Err(_) => {
                    warn!(timeout_secs, "FFmpeg timed out, killing process");
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(timeout_secs));
                }
            }
        } else {
            child.wait().await?
        };

        let captured = capture.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            let tail: String = captured
                .lines()
                .rev()
                .take(8)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(tail),
                status.code(),
            ))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_single_input() {
        let cmd = FfmpegCommand::new("output.mp4")
            .input("input.mp4")
            .duration(30.0)
            .video_codec("libx264")
            .crf(18);

        let args = cmd.build_args();
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"input.mp4".to_string()));
        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"30.000".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_input_args_precede_their_input() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input_with_args(["-loop", "1", "-t", "5"], "image.png")
            .input("audio.mp3");

        let args = cmd.build_args();
        let loop_pos = args.iter().position(|a| a == "-loop").unwrap();
        let img_pos = args.iter().position(|a| a == "image.png").unwrap();
        let audio_pos = args.iter().position(|a| a == "audio.mp3").unwrap();
        assert!(loop_pos < img_pos);
        assert!(img_pos < audio_pos);
    }

    #[test]
    fn test_lavfi_input() {
        let cmd = FfmpegCommand::new("out.mp4").lavfi_input("color=black:s=1080x1920");
        let args = cmd.build_args();
        assert!(args.contains(&"lavfi".to_string()));
        assert!(args.contains(&"color=black:s=1080x1920".to_string()));
    }

    #[test]
    fn test_encoding_profile() {
        let profile = reel_models::EncodingProfile::scene_default();
        let cmd = FfmpegCommand::new("out.mp4").input("in.mp4").encoding_profile(&profile);
        let args = cmd.build_args();
        assert!(args.contains(&"ultrafast".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(args.contains(&"24".to_string()));
    }
}
