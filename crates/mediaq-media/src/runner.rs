//! Job-level process runner.
//!
//! Turns a [`Job`] into a tool invocation, writes the output into the work
//! directory and publishes it into the artifact directory on success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use mediaq_models::Job;

use crate::command::{check_tool, FfmpegCommand, FfmpegRunner, ProcessResult, DEFAULT_KILL_GRACE};
use crate::error::MediaResult;
use crate::fs_utils::{move_file, PartialOutput};
use crate::progress::FfmpegProgress;

/// Settings the runner needs for every invocation.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Absolute path of the tool executable
    pub tool_path: PathBuf,
    /// Arguments placed before the generated ones
    pub tool_args: Vec<String>,
    /// Per-job timeout
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// Scratch directory the tool writes into
    pub work_dir: PathBuf,
    /// Directory finished artifacts are moved into
    pub artifact_dir: PathBuf,
}

impl RunnerConfig {
    pub fn new(tool_path: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        let artifact_dir = artifact_dir.into();
        Self {
            tool_path: tool_path.into(),
            tool_args: Vec::new(),
            timeout: Duration::from_secs(3600),
            kill_grace: DEFAULT_KILL_GRACE,
            work_dir: artifact_dir.join(".work"),
            artifact_dir,
        }
    }
}

/// Successful job execution.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub result: ProcessResult,
    /// Final artifact location, if the tool produced a file
    pub artifact: Option<PathBuf>,
}

/// Runs one job's tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Create the work and artifact directories.
    pub async fn prepare_dirs(&self) -> MediaResult<()> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        tokio::fs::create_dir_all(&self.config.artifact_dir).await?;
        Ok(())
    }

    /// Whether the configured tool is present and executable.
    pub fn tool_available(&self) -> bool {
        check_tool(&self.config.tool_path).is_ok()
    }

    fn output_name(job: &Job) -> String {
        format!("{}.{}", job.id, job.params.output_format)
    }

    /// Where the tool writes while running.
    pub fn work_path(&self, job: &Job) -> PathBuf {
        self.config.work_dir.join(Self::output_name(job))
    }

    /// Where the finished artifact is published.
    pub fn artifact_path(&self, job: &Job) -> PathBuf {
        self.config.artifact_dir.join(Self::output_name(job))
    }

    /// Translate job parameters into tool arguments.
    pub fn build_command(&self, job: &Job) -> FfmpegCommand {
        build_command(job, &self.work_path(job))
    }

    /// Run the tool for `job`.
    ///
    /// Any partial output is removed on every failure path.
    pub async fn run<F>(
        &self,
        job: &Job,
        cancel_rx: watch::Receiver<bool>,
        on_progress: F,
    ) -> MediaResult<JobOutput>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let work_path = self.work_path(job);
        let partial = PartialOutput::new(&work_path);

        let cmd = self.build_command(job);
        let runner = FfmpegRunner::new(&self.config.tool_path)
            .with_leading_args(self.config.tool_args.clone())
            .with_cancel(cancel_rx)
            .with_timeout(self.config.timeout)
            .with_kill_grace(self.config.kill_grace);

        let result = runner.run_with_progress(&cmd, on_progress).await?;

        let artifact = if tokio::fs::try_exists(&work_path).await? {
            let dst = self.artifact_path(job);
            move_file(&work_path, &dst).await?;
            debug!(job_id = %job.id, "Published artifact {}", dst.display());
            Some(dst)
        } else {
            warn!(job_id = %job.id, "Tool succeeded without producing an output file");
            None
        };
        partial.disarm();

        Ok(JobOutput { result, artifact })
    }
}

fn build_command(job: &Job, output: &Path) -> FfmpegCommand {
    let params = &job.params;
    let mut cmd = FfmpegCommand::new(job.input.clone(), output);

    if let Some(seek) = params.seek {
        cmd = cmd.seek(seek);
    }
    if let Some(duration) = params.duration {
        cmd = cmd.duration(duration);
    }
    if let Some(codec) = &params.video_codec {
        cmd = cmd.video_codec(codec);
    }
    if let Some(codec) = &params.audio_codec {
        cmd = cmd.audio_codec(codec);
    }
    if let Some(crf) = params.crf {
        cmd = cmd.crf(crf);
    }
    if let Some(preset) = &params.preset {
        cmd = cmd.preset(preset);
    }
    if let Some(bitrate) = &params.audio_bitrate {
        cmd = cmd.audio_bitrate(bitrate);
    }
    if let Some(filter) = &params.video_filter {
        cmd = cmd.video_filter(filter);
    }
    if params.no_audio {
        cmd = cmd.no_audio();
    }
    if params.no_video {
        cmd = cmd.no_video();
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_models::JobParams;
    use tempfile::TempDir;

    use crate::error::MediaError;

    /// `sh -c <script> ffmpeg <generated args...>`; the last positional
    /// argument is the output path.
    fn sh_config(dir: &TempDir, script: &str) -> RunnerConfig {
        let mut config = RunnerConfig::new("/bin/sh", dir.path().join("artifacts"));
        config.tool_args = vec!["-c".to_string(), script.to_string(), "ffmpeg".to_string()];
        config.timeout = Duration::from_secs(10);
        config.kill_grace = Duration::from_secs(1);
        config
    }

    const WRITE_OUTPUT: &str = r#"for last; do :; done; echo data > "$last""#;

    #[test]
    fn test_build_command_maps_params() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::new(sh_config(&dir, "true"));
        let job = Job::new(
            "/in/a.mov",
            JobParams {
                output_format: "webm".to_string(),
                video_codec: Some("libvpx-vp9".to_string()),
                crf: Some(30),
                no_audio: true,
                ..Default::default()
            },
        );

        let args = runner.build_command(&job).build_args();
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/in/a.mov"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libvpx-vp9"));
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "30"));
        assert!(args.contains(&"-an".to_string()));
        assert!(args.last().unwrap().ends_with(&format!("{}.webm", job.id)));
    }

    #[tokio::test]
    async fn test_run_publishes_artifact() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::new(sh_config(&dir, WRITE_OUTPUT));
        runner.prepare_dirs().await.unwrap();
        let job = Job::new("/in/a.mov", JobParams::default());

        let (_tx, rx) = watch::channel(false);
        let output = runner.run(&job, rx, |_| {}).await.unwrap();

        let artifact = output.artifact.expect("artifact produced");
        assert_eq!(artifact, runner.artifact_path(&job));
        assert_eq!(tokio::fs::read_to_string(&artifact).await.unwrap(), "data\n");
        assert!(!runner.work_path(&job).exists());
    }

    #[tokio::test]
    async fn test_run_without_output_file() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::new(sh_config(&dir, "exit 0"));
        runner.prepare_dirs().await.unwrap();
        let job = Job::new("/in/a.mov", JobParams::default());

        let (_tx, rx) = watch::channel(false);
        let output = runner.run(&job, rx, |_| {}).await.unwrap();
        assert!(output.artifact.is_none());
    }

    #[tokio::test]
    async fn test_failure_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let script = r#"for last; do :; done; echo half > "$last"; exit 1"#;
        let runner = ProcessRunner::new(sh_config(&dir, script));
        runner.prepare_dirs().await.unwrap();
        let job = Job::new("/in/a.mov", JobParams::default());

        let (_tx, rx) = watch::channel(false);
        let err = runner.run(&job, rx, |_| {}).await.unwrap_err();
        assert!(matches!(err, MediaError::NonZeroExit { .. }));
        assert!(!runner.work_path(&job).exists());
        assert!(!runner.artifact_path(&job).exists());
    }

    #[tokio::test]
    async fn test_tool_available() {
        let dir = TempDir::new().unwrap();
        assert!(ProcessRunner::new(sh_config(&dir, "true")).tool_available());

        let missing = RunnerConfig::new("/nonexistent/ffmpeg", dir.path());
        assert!(!ProcessRunner::new(missing).tool_available());
    }
}
