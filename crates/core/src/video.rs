//! Video probing and decoding via FFmpeg subprocesses.
//!
//! ffprobe reports the stream geometry; ffmpeg decodes to raw frames over a
//! pipe (`gray` for single-channel sources, `rgb24` otherwise). Stderr is
//! drained in a background thread to prevent pipe deadlock; the child is
//! killed on [`Drop`].

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::types::Frame;

// ffprobe JSON model (serde)
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug)]
pub struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize, Debug)]
struct FfprobeStream {
    index: usize,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    #[serde(default)]
    disposition: std::collections::HashMap<String, serde_json::Value>,
}

fn disposition_flag(stream: &FfprobeStream, key: &str) -> bool {
    stream
        .disposition
        .get(key)
        .and_then(|value| {
            value
                .as_bool()
                .or_else(|| value.as_i64().map(|n| n != 0))
                .or_else(|| value.as_str().map(|s| s != "0"))
        })
        .unwrap_or(false)
}

fn select_primary_video_stream(streams: &[FfprobeStream]) -> Option<&FfprobeStream> {
    streams
        .iter()
        .filter(|stream| stream.codec_type.as_deref() == Some("video"))
        .min_by_key(|stream| {
            let is_attached_picture = disposition_flag(stream, "attached_pic");
            let is_default = disposition_flag(stream, "default");
            (is_attached_picture, !is_default, stream.index)
        })
}

fn is_grayscale(pix_fmt: &str) -> bool {
    // "graya*" formats carry an alpha plane and are not single-channel
    match pix_fmt.strip_prefix("gray") {
        Some(rest) => !rest.starts_with('a'),
        None => false,
    }
}

pub fn run_ffprobe(path: &Path) -> Result<FfprobeOutput> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to execute ffprobe — is FFmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        );
    }

    parse_ffprobe_json(&output.stdout)
}

pub fn parse_ffprobe_json(json: &[u8]) -> Result<FfprobeOutput> {
    serde_json::from_slice(json).context("failed to parse ffprobe JSON")
}

#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    pub grayscale: bool,
}

pub fn extract_stream_info(probe: &FfprobeOutput) -> Result<VideoStreamInfo> {
    let video_stream = select_primary_video_stream(&probe.streams)
        .ok_or_else(|| anyhow!("no video stream found"))?;

    let width = video_stream
        .width
        .ok_or_else(|| anyhow!("video stream missing width"))?;
    let height = video_stream
        .height
        .ok_or_else(|| anyhow!("video stream missing height"))?;
    if width == 0 || height == 0 {
        bail!("video stream has zero dimension: {width}x{height}");
    }

    let grayscale = video_stream
        .pix_fmt
        .as_deref()
        .map(is_grayscale)
        .unwrap_or(false);

    Ok(VideoStreamInfo {
        stream_index: video_stream.index,
        width,
        height,
        grayscale,
    })
}

// Decoder
// ---------------------------------------------------------------------------

/// Decodes video to raw frames via FFmpeg subprocess, yielding one frame at
/// a time.
pub struct VideoDecoder {
    child: Child,
    width: u32,
    height: u32,
    grayscale: bool,
    frame_size: usize,
    _stderr_thread: Option<thread::JoinHandle<()>>,
    buf: Vec<u8>,
    done: bool,
}

fn build_decoder_args(path: &Path, pix_fmt: &str, stream_index: usize) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-map".to_string(),
        format!("0:{stream_index}"),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        pix_fmt.to_string(),
        "-vsync".to_string(),
        "cfr".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "pipe:1".to_string(),
    ]
}

impl VideoDecoder {
    pub fn new(path: &Path, info: &VideoStreamInfo) -> Result<Self> {
        let (pix_fmt, bytes_per_pixel) = if info.grayscale {
            ("gray", 1usize)
        } else {
            ("rgb24", 3usize)
        };
        let frame_size = info.width as usize * info.height as usize * bytes_per_pixel;

        let decode_args = build_decoder_args(path, pix_fmt, info.stream_index);

        let mut child = Command::new("ffmpeg")
            .args(&decode_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to launch ffmpeg — is it installed?")?;

        let stderr = child.stderr.take().expect("stderr should be piped");
        let stderr_thread = thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) if !line.is_empty() => {
                        debug!(target: "ffmpeg_stderr", "{}", line);
                    }
                    Err(e) => {
                        debug!(target: "ffmpeg_stderr", "read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            child,
            width: info.width,
            height: info.height,
            grayscale: info.grayscale,
            frame_size,
            _stderr_thread: Some(stderr_thread),
            buf: vec![0u8; frame_size],
            done: false,
        })
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg stdout not available"))?;

        let mut total_read = 0;
        while total_read < self.frame_size {
            match stdout.read(&mut self.buf[total_read..self.frame_size]) {
                Ok(0) => {
                    if total_read == 0 {
                        return Ok(None);
                    }
                    warn!(
                        "partial frame at EOF ({total_read}/{} bytes), discarding",
                        self.frame_size
                    );
                    return Ok(None);
                }
                Ok(n) => {
                    total_read += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    return Err(e).context("failed to read frame from ffmpeg stdout");
                }
            }
        }

        let data = self.buf[..self.frame_size].to_vec();
        let frame = if self.grayscale {
            Frame::Gray {
                data,
                width: self.width,
                height: self.height,
            }
        } else {
            Frame::Rgb {
                data,
                width: self.width,
                height: self.height,
            }
        };
        Ok(Some(frame))
    }
}

impl Iterator for VideoDecoder {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self._stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Probe and fully decode one video into an ordered frame sequence.
///
/// An unopenable file or a zero-frame result is a decode error: the caller
/// skips the video and moves on.
pub fn decode_all_frames(path: &Path) -> Result<Vec<Frame>> {
    let probe = run_ffprobe(path)
        .context(ErrorKind::Decode)
        .with_context(|| format!("cannot probe video: {}", path.display()))?;
    let info = extract_stream_info(&probe)
        .context(ErrorKind::Decode)
        .with_context(|| format!("cannot select video stream: {}", path.display()))?;

    debug!(
        width = info.width,
        height = info.height,
        grayscale = info.grayscale,
        "decoding video"
    );

    let decoder = VideoDecoder::new(path, &info)
        .context(ErrorKind::Decode)
        .with_context(|| format!("cannot decode video: {}", path.display()))?;

    let frames = decoder
        .collect::<Result<Vec<Frame>>>()
        .context(ErrorKind::Decode)
        .with_context(|| format!("decode failed mid-stream: {}", path.display()))?;

    if frames.is_empty() {
        return Err(anyhow::Error::new(ErrorKind::Decode))
            .with_context(|| format!("video yielded no readable frames: {}", path.display()));
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FFPROBE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "mjpeg",
                "codec_type": "video",
                "width": 120,
                "height": 90,
                "pix_fmt": "yuvj420p",
                "disposition": { "attached_pic": 1 }
            },
            {
                "index": 1,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 340,
                "height": 256,
                "pix_fmt": "yuv420p",
                "disposition": { "default": 1 }
            },
            {
                "index": 2,
                "codec_name": "aac",
                "codec_type": "audio",
                "disposition": {}
            }
        ]
    }"#;

    #[test]
    fn test_parse_ffprobe_json() {
        let probe = parse_ffprobe_json(SAMPLE_FFPROBE_JSON.as_bytes()).unwrap();
        assert_eq!(probe.streams.len(), 3);
    }

    #[test]
    fn test_primary_stream_skips_attached_picture() {
        let probe = parse_ffprobe_json(SAMPLE_FFPROBE_JSON.as_bytes()).unwrap();
        let info = extract_stream_info(&probe).unwrap();
        assert_eq!(info.stream_index, 1);
        assert_eq!(info.width, 340);
        assert_eq!(info.height, 256);
        assert!(!info.grayscale);
    }

    #[test]
    fn test_grayscale_pix_fmt_detection() {
        assert!(is_grayscale("gray"));
        assert!(is_grayscale("gray16le"));
        assert!(!is_grayscale("graya8"));
        assert!(!is_grayscale("yuv420p"));
        assert!(!is_grayscale("rgb24"));
    }

    #[test]
    fn test_no_video_stream_is_an_error() {
        let audio_only = r#"{"streams": [{"index": 0, "codec_type": "audio", "disposition": {}}]}"#;
        let probe = parse_ffprobe_json(audio_only.as_bytes()).unwrap();
        assert!(extract_stream_info(&probe).is_err());
    }

    #[test]
    fn test_decoder_args_request_rawvideo_pipe() {
        let args = build_decoder_args(Path::new("clip.mp4"), "rgb24", 1);
        assert!(args.contains(&"rawvideo".to_string()));
        assert!(args.contains(&"0:1".to_string()));
        assert!(args.contains(&"pipe:1".to_string()));
        assert_eq!(args.first().map(String::as_str), Some("-nostdin"));
    }

    #[test]
    fn test_decode_all_frames_missing_file_is_decode_error() {
        let err = decode_all_frames(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), Some(ErrorKind::Decode));
    }
}
