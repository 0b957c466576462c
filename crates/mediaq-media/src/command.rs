//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress, TailBuffer};

/// Captured bytes kept per output stream.
pub const MAX_CAPTURED_BYTES: usize = 64 * 1024;

/// Default time a terminated tool gets to exit before SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input path or URI
    input: String,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
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

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Drop audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Drop video streams.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostdin".to_string());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.clone());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Outcome of a tool invocation that exited successfully.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    /// Tail of stdout
    pub stdout: String,
    /// Tail of stderr, without `-progress` lines
    pub stderr: String,
    /// Wall-clock duration
    pub duration: Duration,
}

enum Completion {
    Exited(ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

/// Runner for FFmpeg commands with progress tracking, timeout and cancellation.
///
/// The child runs in its own process group so that termination reaches any
/// helper processes it forks. Every exit path reaps the child; dropping the
/// future kills it through `kill_on_drop`.
pub struct FfmpegRunner {
    /// Tool executable
    program: PathBuf,
    /// Arguments placed before the generated ones
    leading_args: Vec<String>,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
    kill_grace: Duration,
}

impl FfmpegRunner {
    /// Create a new runner for the given executable.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            leading_args: Vec::new(),
            cancel_rx: None,
            timeout: None,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the grace period between SIGTERM and SIGKILL.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<ProcessResult> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<ProcessResult>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let program = check_tool(&self.program)?;

        let mut args = self.leading_args.clone();
        args.extend(cmd.build_args());
        debug!("Running tool: {} {}", program.display(), args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::execution_failed(&program, e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        let stdout_handle = tokio::spawn(collect_tail(stdout));
        let stderr_handle = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut tail = TailBuffer::new(MAX_CAPTURED_BYTES);

            let (current_ref, tail_ref) = (&mut current, &mut tail);
            read_lines(BufReader::new(stderr), move |line| {
                if is_progress_line(&line) {
                    if let Some(progress) = parse_progress_line(&line, current_ref) {
                        progress_callback(progress);
                    }
                } else if !line.trim().is_empty() {
                    tail_ref.push(line);
                }
            })
            .await;
            tail.into_string()
        });

        let completion = self.wait_for_completion(&mut child).await;

        // Pipes close once the process group is gone; bound the wait anyway
        let stdout = join_capture(stdout_handle, self.kill_grace).await;
        let stderr = join_capture(stderr_handle, self.kill_grace).await;
        let duration = started.elapsed();

        match completion? {
            Completion::Exited(status) if status.success() => Ok(ProcessResult {
                exit_code: status.code(),
                stdout,
                stderr,
                duration,
            }),
            Completion::Exited(status) => Err(MediaError::NonZeroExit {
                exit_code: status.code(),
                stderr,
            }),
            Completion::TimedOut(limit) => Err(MediaError::Timeout {
                secs: limit.as_secs(),
                stderr,
            }),
            Completion::Cancelled => Err(MediaError::Cancelled),
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<Completion> {
        let mut cancel_rx = self.cancel_rx.clone();
        let cancelled = async {
            match cancel_rx.as_mut() {
                Some(rx) => loop {
                    if *rx.borrow_and_update() {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        // Sender gone: cancellation can no longer arrive
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        let timeout = self.timeout;
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // `Child::id` is gone once the child has been reaped
        let pid = child.id();
        let completion = tokio::select! {
            status = child.wait() => Completion::Exited(status?),
            _ = deadline => Completion::TimedOut(timeout.unwrap_or_default()),
            _ = cancelled => Completion::Cancelled,
        };

        match &completion {
            Completion::TimedOut(limit) => {
                warn!(
                    "Tool timed out after {} seconds, terminating process",
                    limit.as_secs()
                );
                self.terminate(child).await;
            }
            Completion::Cancelled => {
                info!("Tool cancelled, terminating process");
                self.terminate(child).await;
            }
            Completion::Exited(_) => {
                // Helpers forked into the group must not outlive the job
                if let Some(pid) = pid {
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
            }
        }

        Ok(completion)
    }

    /// SIGTERM the process group, escalate to SIGKILL after the grace
    /// period, and reap the child.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let group = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(group, Signal::SIGTERM) {
                debug!("SIGTERM to process group {} failed: {}", pid, e);
            }

            match tokio::time::timeout(self.kill_grace, child.wait()).await {
                Ok(Ok(_)) => {
                    // Leader is gone; make sure no helper outlives it
                    let _ = killpg(group, Signal::SIGKILL);
                    return;
                }
                Ok(Err(e)) => warn!("Failed waiting for tool {}: {}", pid, e),
                Err(_) => warn!(
                    "Tool {} ignored SIGTERM for {:?}, sending SIGKILL",
                    pid, self.kill_grace
                ),
            }
            let _ = killpg(group, Signal::SIGKILL);
        }

        if let Err(e) = child.kill().await {
            debug!("Final kill/reap returned: {}", e);
        }
    }
}

async fn collect_tail<R>(stream: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(MAX_CAPTURED_BYTES);
    read_lines(BufReader::new(stream), |line| tail.push(line)).await;
    tail.into_string()
}

/// Feed each line of `reader` to `on_line` until EOF.
///
/// Bytes are decoded lossily so a stray non-UTF-8 byte never stops the
/// drain; a reader that stops early leaves the tool to die of SIGPIPE.
/// Lines longer than `MAX_CAPTURED_BYTES` keep only their first
/// `MAX_CAPTURED_BYTES` bytes.
async fn read_lines<R, F>(mut reader: R, mut on_line: F)
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String),
{
    let mut line: Vec<u8> = Vec::new();
    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Output stream read failed: {}", e);
                break;
            }
        };
        if chunk.is_empty() {
            if !line.is_empty() {
                on_line(decode_line(&line));
            }
            break;
        }

        let (consumed, content, complete) = match chunk.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, i, true),
            None => (chunk.len(), chunk.len(), false),
        };
        let room = MAX_CAPTURED_BYTES.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..content.min(room)]);
        reader.consume(consumed);

        if complete {
            on_line(decode_line(&line));
            line.clear();
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

async fn join_capture(handle: tokio::task::JoinHandle<String>, limit: Duration) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            debug!("Output capture task failed: {}", e);
            String::new()
        }
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Check that the tool exists and is executable.
pub fn check_tool(path: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let path = path.as_ref();
    which::which(path).map_err(|e| MediaError::execution_failed(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_runner(script: &str) -> FfmpegRunner {
        FfmpegRunner::new("/bin/sh").with_leading_args(vec![
            "-c".to_string(),
            script.to_string(),
            "ffmpeg".to_string(),
        ])
    }

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .duration(30.0)
            .video_codec("libx264")
            .crf(18);

        let args = cmd.build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert_eq!(args.last().map(String::as_str), Some("output.mp4"));

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert!(ss < input && input < codec);
        assert_eq!(args[ss + 1], "10.000");
        assert_eq!(args[codec + 1], "libx264");
    }

    #[tokio::test]
    async fn test_successful_run_captures_output() {
        let runner = sh_runner("echo hello; echo 'progress=end' >&2; echo oops >&2");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let result = runner.run(&cmd).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "oops");
    }

    #[tokio::test]
    async fn test_progress_callback_receives_blocks() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runner = sh_runner("printf 'frame=10\\nprogress=continue\\nframe=20\\nprogress=end\\n' >&2");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        runner
            .run_with_progress(&cmd, move |p| {
                let _ = tx.send(p);
            })
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.frame, 10);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.frame, 20);
        assert!(last.is_complete);
    }

    #[tokio::test]
    async fn test_non_utf8_output_does_not_break_capture() {
        let runner = sh_runner(
            "printf 'bad \\377 byte\\n' >&2; printf '\\376\\n'; sleep 0.2; \
             echo 'later diag' >&2; echo done",
        );
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let result = runner.run(&cmd).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stderr, "bad \u{FFFD} byte\nlater diag");
        assert_eq!(result.stdout, "\u{FFFD}\ndone");
    }

    #[tokio::test]
    async fn test_oversized_line_is_bounded() {
        let runner = sh_runner(
            "head -c 200000 /dev/zero | tr '\\0' a >&2; echo >&2; echo 'final' >&2",
        );
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let result = runner.run(&cmd).await.unwrap();
        assert!(result.stderr.len() <= MAX_CAPTURED_BYTES);
        assert!(result.stderr.ends_with("final"));
    }

    #[tokio::test]
    async fn test_background_helpers_are_killed_on_exit() {
        let runner = sh_runner("sleep 30 & echo started").with_kill_grace(Duration::from_secs(10));
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let started = Instant::now();
        let result = runner.run(&cmd).await.unwrap();
        assert_eq!(result.stdout, "started");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_read_lines_strips_line_endings() {
        let mut lines = Vec::new();
        read_lines(&b"one\r\ntwo\n\nlast"[..], |line| lines.push(line)).await;
        assert_eq!(lines, vec!["one", "two", "", "last"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = sh_runner("echo 'Invalid data found' >&2; exit 3");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        match runner.run(&cmd).await {
            Err(MediaError::NonZeroExit { exit_code, stderr }) => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("Invalid data found"));
            }
            other => panic!("expected NonZeroExit, got {:?}", other.map(|r| r.exit_code)),
        }
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let runner = FfmpegRunner::new("/nonexistent/bin/ffmpeg");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = sh_runner("sleep 30")
            .with_timeout(Duration::from_millis(200))
            .with_kill_grace(Duration::from_secs(1));
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let started = Instant::now();
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_escalates_when_sigterm_ignored() {
        let runner = sh_runner("trap '' TERM; while true; do sleep 1; done")
            .with_timeout(Duration::from_millis(200))
            .with_kill_grace(Duration::from_millis(300));
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        let started = Instant::now();
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = sh_runner("sleep 30").with_cancel(cancel_rx);
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = cancel_tx.send(true);
        });

        let started = Instant::now();
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
