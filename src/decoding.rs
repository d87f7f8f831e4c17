use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::errors::CodedError;
use crate::source::{FrameSource, SourceFrame, SourceKind};

/// Decoded frames buffered between the decoder thread and the renderer. The decoder blocks when
/// the queue is full.
pub const DECODE_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    /// Displayed width, after the stream's rotation is applied.
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub frames: Option<u64>,
    /// Display rotation in degrees, one of 0, 90, 180, 270.
    pub rotation: u32,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    #[serde(default)]
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    #[serde(default)]
    rotate: Option<String>,
}

pub fn probe_video(path: &Path) -> Result<VideoProbe> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_streams")
        .arg("-print_format")
        .arg("json")
        .arg(path)
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                CodedError::source_unavailable(
                    "ffprobe was not found on PATH. Install ffmpeg to play video sources",
                )
            } else {
                CodedError::source_unavailable(format!(
                    "failed to spawn ffprobe for {}: {error}",
                    path.display()
                ))
            }
        })?;

    if !output.status.success() {
        return Err(CodedError::source_unavailable(format!(
            "ffprobe could not read {} (exit status: {}): {}",
            path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
        .into());
    }

    parse_probe_output(&output.stdout)
        .map_err(|error| {
            CodedError::source_unavailable(format!("{}: {error:#}", path.display())).into()
        })
}

pub fn parse_probe_output(json: &[u8]) -> Result<VideoProbe> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(json).context("failed to parse ffprobe JSON")?;

    let stream = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("no video stream found"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        _ => return Err(anyhow!("video stream has no usable dimensions")),
    };

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_frame_rate));
    let frames = stream
        .nb_frames
        .as_deref()
        .and_then(|value| value.trim().parse::<u64>().ok());

    // ffmpeg autorotates on decode, so quarter turns swap the output frame's axes.
    let rotation = stream
        .side_data_list
        .iter()
        .find_map(|side_data| side_data.rotation)
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|tags| tags.rotate.as_deref())
                .and_then(|value| value.trim().parse::<f64>().ok())
        })
        .map(normalize_rotation)
        .unwrap_or(0);
    let (width, height) = if rotation % 180 == 90 {
        (height, width)
    } else {
        (width, height)
    };

    Ok(VideoProbe {
        width,
        height,
        fps,
        frames,
        rotation,
    })
}

fn normalize_rotation(degrees: f64) -> u32 {
    let degrees = (degrees.round() as i64).rem_euclid(360);
    (((degrees + 45) / 90 % 4) * 90) as u32
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (numerator, denominator) = match raw.split_once('/') {
        Some((numerator, denominator)) => (
            numerator.trim().parse::<f64>().ok()?,
            denominator.trim().parse::<f64>().ok()?,
        ),
        None => (raw.trim().parse::<f64>().ok()?, 1.0),
    };
    if denominator == 0.0 {
        return None;
    }
    let rate = numerator / denominator;
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Video frames decoded by an `ffmpeg` child process into raw `rgb24`.
pub struct VideoSource {
    path: PathBuf,
    probe: VideoProbe,
    receiver: Option<mpsc::Receiver<Result<Vec<u8>>>>,
    worker: Option<JoinHandle<()>>,
    child: Option<Child>,
    pending: Option<SourceFrame>,
    frames_decoded: u64,
}

impl VideoSource {
    /// Probes `path`, starts the decoder and waits for its first frame, so a stream ffprobe
    /// accepts but ffmpeg cannot decode fails here rather than mid-run.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CodedError::source_unavailable(format!(
                "video '{}' does not exist or is not a file",
                path.display()
            ))
            .into());
        }
        let probe = probe_video(path)?;
        if probe.rotation != 0 {
            log::debug!("{} is rotated {} degrees", path.display(), probe.rotation);
        }
        let command = decoder_command(path, &probe);
        let source = Self::start(path, probe, command)?;

        log::info!(
            "opened video {} ({}x{}, {} fps, {} frames)",
            path.display(),
            source.probe.width,
            source.probe.height,
            source
                .probe
                .fps
                .map(|fps| format!("{fps:.2}"))
                .unwrap_or_else(|| "unknown".to_owned()),
            source
                .probe
                .frames
                .map(|frames| frames.to_string())
                .unwrap_or_else(|| "unknown".to_owned()),
        );
        Ok(source)
    }

    pub fn probe(&self) -> &VideoProbe {
        &self.probe
    }

    /// Spawns `command`, which must write `probe`-sized `rgb24` frames to stdout, and receives
    /// the first frame.
    fn start(path: &Path, probe: VideoProbe, mut command: Command) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    CodedError::source_unavailable(format!(
                        "{program} was not found on PATH. Install ffmpeg to play video sources"
                    ))
                } else {
                    CodedError::source_unavailable(format!(
                        "failed to spawn {program} decoder for {}: {error}",
                        path.display()
                    ))
                }
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!("failed to capture {program} stdout"));
            }
        };
        let frame_size = probe.width as usize * probe.height as usize * 3;
        let (sender, receiver) = mpsc::sync_channel::<Result<Vec<u8>>>(DECODE_QUEUE_DEPTH);

        let mut source = Self {
            path: path.to_path_buf(),
            probe,
            receiver: Some(receiver),
            worker: None,
            child: Some(child),
            pending: None,
            frames_decoded: 0,
        };
        let worker = thread::Builder::new()
            .name("glyphcast-ffmpeg-decoder".to_owned())
            .spawn(move || read_frames(stdout, frame_size, sender))
            .context("failed to spawn ffmpeg reader thread")?;
        source.worker = Some(worker);

        source.pending = source.receive().map_err(|error| {
            anyhow::Error::from(CodedError::source_unavailable(format!(
                "cannot decode {}: {error:#}",
                path.display()
            )))
        })?;
        Ok(source)
    }

    fn receive(&mut self) -> Result<Option<SourceFrame>> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(None);
        };
        match receiver.recv() {
            Ok(Ok(bytes)) => {
                let frame = SourceFrame::from_rgb_bytes(self.probe.width, self.probe.height, &bytes)
                    .map_err(|error| CodedError::decode_failure(format!("{error:#}")))?;
                self.frames_decoded += 1;
                Ok(Some(frame))
            }
            Ok(Err(error)) => Err(CodedError::decode_failure(format!(
                "frame {} of {}: {error:#}",
                self.frames_decoded + 1,
                self.path.display()
            ))
            .into()),
            Err(mpsc::RecvError) => {
                self.receiver = None;
                self.finish_stream()
            }
        }
    }

    /// Called once the reader thread has hung up: a clean ffmpeg exit is end of stream.
    fn finish_stream(&mut self) -> Result<Option<SourceFrame>> {
        self.join_worker();
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status = child
            .wait()
            .context("failed waiting for ffmpeg decoder to exit")?;
        if status.success() {
            log::info!(
                "end of stream after {} frame(s): {}",
                self.frames_decoded,
                self.path.display()
            );
            Ok(None)
        } else {
            Err(CodedError::decode_failure(format!(
                "ffmpeg exited with {status} after {} frame(s) of {}",
                self.frames_decoded,
                self.path.display()
            ))
            .into())
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("ffmpeg reader thread panicked");
            }
        }
    }
}

/// ffmpeg invocation producing raw `rgb24` frames of exactly the probed (displayed) size.
fn decoder_command(path: &Path, probe: &VideoProbe) -> Command {
    let mut command = Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-nostdin")
        .arg("-i")
        .arg(path)
        .arg("-map")
        .arg("0:v:0")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-s")
        .arg(format!("{}x{}", probe.width, probe.height))
        .arg("-");
    command
}

fn read_frames(
    mut stdout: impl Read,
    frame_size: usize,
    sender: mpsc::SyncSender<Result<Vec<u8>>>,
) {
    loop {
        let mut buffer = vec![0_u8; frame_size];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                if sender.send(Ok(buffer)).is_err() {
                    break;
                }
            }
            // A trailing partial frame is dropped like any truncated write at EOF.
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => break,
            Err(error) => {
                let _ = sender.send(Err(anyhow!("failed to read from ffmpeg: {error}")));
                break;
            }
        }
    }
}

impl FrameSource for VideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Stream
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.probe.width, self.probe.height)
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.receive()
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the receiver unblocks a reader waiting on a full queue.
        self.receiver = None;
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            child
                .wait()
                .context("failed waiting for ffmpeg decoder to terminate")?;
        }
        self.join_worker();
        Ok(())
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::warn!("failed to release video source: {error:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};
    use std::path::Path;
    use std::sync::mpsc;

    use super::{
        decoder_command, parse_frame_rate, parse_probe_output, read_frames, VideoProbe,
        VideoSource,
    };
    use crate::errors::{error_kind, CodedErrorKind};
    use crate::source::FrameSource;

    #[test]
    fn probe_output_reads_first_video_stream() {
        let json = br#"{
            "streams": [
                { "codec_type": "audio" },
                { "codec_type": "video", "width": 640, "height": 360,
                  "r_frame_rate": "30000/1001", "nb_frames": "240" }
            ]
        }"#;
        let probe = parse_probe_output(json).expect("probe should parse");
        assert_eq!((probe.width, probe.height), (640, 360));
        assert_eq!(probe.frames, Some(240));
        let fps = probe.fps.expect("fps");
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn quarter_turn_rotation_swaps_reported_dimensions() {
        let json = br#"{
            "streams": [
                { "codec_type": "video", "width": 1920, "height": 1080,
                  "r_frame_rate": "30/1",
                  "side_data_list": [
                      { "side_data_type": "Display Matrix", "rotation": -90 }
                  ] }
            ]
        }"#;
        let probe = parse_probe_output(json).expect("probe should parse");
        assert_eq!(probe.rotation, 270);
        assert_eq!((probe.width, probe.height), (1080, 1920));

        let legacy = br#"{ "streams": [ { "codec_type": "video", "width": 640,
            "height": 480, "tags": { "rotate": "90" } } ] }"#;
        let probe = parse_probe_output(legacy).expect("probe should parse");
        assert_eq!(probe.rotation, 90);
        assert_eq!((probe.width, probe.height), (480, 640));

        let upside_down = br#"{ "streams": [ { "codec_type": "video", "width": 640,
            "height": 480, "side_data_list": [ { "rotation": 180 } ] } ] }"#;
        let probe = parse_probe_output(upside_down).expect("probe should parse");
        assert_eq!(probe.rotation, 180);
        assert_eq!((probe.width, probe.height), (640, 480));
    }

    #[test]
    fn decoder_requests_the_probed_frame_size() {
        let probe = VideoProbe {
            width: 1080,
            height: 1920,
            fps: None,
            frames: None,
            rotation: 270,
        };
        let command = decoder_command(Path::new("clip.mp4"), &probe);
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let size = args
            .iter()
            .position(|arg| arg == "-s")
            .expect("size flag should be passed");
        assert_eq!(args[size + 1], "1080x1920");
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn probe_without_video_stream_fails() {
        let json = br#"{ "streams": [ { "codec_type": "audio" } ] }"#;
        assert!(parse_probe_output(json).is_err());
        assert!(parse_probe_output(b"{ not json").is_err());
    }

    #[test]
    fn frame_rate_parsing_rejects_zero_denominator() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn missing_video_is_source_unavailable() {
        let error = VideoSource::open(Path::new("/no/such/output.mp4"))
            .err()
            .expect("missing file should fail");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::SourceUnavailable));
    }

    #[test]
    fn reader_splits_exact_frames_and_drops_trailing_partial() {
        let (sender, receiver) = mpsc::sync_channel(8);
        read_frames(Cursor::new(vec![1_u8; 7]), 3, sender);
        let frames = receiver.iter().collect::<Vec<_>>();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.as_ref().unwrap().len() == 3));
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn reader_forwards_io_errors() {
        let (sender, receiver) = mpsc::sync_channel(1);
        read_frames(BrokenPipe, 3, sender);
        let first = receiver.recv().expect("error should be forwarded");
        assert!(first.is_err());
        assert!(receiver.recv().is_err());
    }

    #[cfg(unix)]
    fn shell_source(script: &str) -> anyhow::Result<VideoSource> {
        let probe = VideoProbe {
            width: 1,
            height: 1,
            fps: None,
            frames: None,
            rotation: 0,
        };
        let mut command = std::process::Command::new("sh");
        command.arg("-c").arg(script);
        VideoSource::start(Path::new("clip.mp4"), probe, command)
    }

    #[cfg(unix)]
    #[test]
    fn decoder_failing_before_first_frame_is_source_unavailable() {
        let error = shell_source("exit 1")
            .err()
            .expect("undecodable stream should fail to open");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::SourceUnavailable));
    }

    #[cfg(unix)]
    #[test]
    fn decoder_failing_mid_stream_is_decode_failure() {
        let mut source = shell_source("printf 'abcdef'; exit 1").expect("first frame decodes");
        let first = source.next_frame().expect("frame").expect("first frame");
        assert_eq!(first.color_at(0, 0), [b'a', b'b', b'c']);
        assert!(source.next_frame().expect("frame").is_some());
        let error = source.next_frame().expect_err("exit status should surface");
        assert_eq!(error_kind(&error), Some(CodedErrorKind::DecodeFailure));
        source.close().expect("close");
    }

    #[cfg(unix)]
    #[test]
    fn clean_decoder_exit_is_end_of_stream() {
        let mut source = shell_source("printf 'abcdef'").expect("source should open");
        assert!(source.next_frame().expect("frame").is_some());
        assert!(source.next_frame().expect("frame").is_some());
        assert!(source.next_frame().expect("end of stream").is_none());
        assert!(source.next_frame().expect("still ended").is_none());

        let mut empty = shell_source("exit 0").expect("empty stream opens");
        assert!(empty.next_frame().expect("end of stream").is_none());
    }
}
