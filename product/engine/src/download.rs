use crate::classify::{self, ArtifactTracker, LineLevel, LinePolicy, MEDIA_EXTENSIONS};
use crate::config::EngineSettings;
use crate::events::{CompletionEvent, EventBus, LogEvent};
use crate::ffmpeg;
use crate::history::{FinishedDownload, HistoryStore, StartedDownload};
use crate::host;
use crate::jobs::{now_ms, JobOutcome, JobPhase, JobRecord, JobRegistry, LogLine};
use crate::runner::{CommandSpec, OutputLine, ProcessRunner, RunError, RunOutput};
use crate::tools::{ResolvedTools, ToolLocator, DOWNLOADER_MODULE, INTERPRETER_CANDIDATES};
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::SystemTime;

pub const INVALID_URL_MESSAGE: &str = "Please enter a valid URL.";
pub const MISSING_OUTPUT_DIR_MESSAGE: &str = "Please choose an output folder.";
pub const INTERPRETER_MISSING_MESSAGE: &str =
    "Python not found. Please install Python 3 or provide a bundled yt-dlp.";
pub const TRANSCODE_FAILED_MESSAGE: &str =
    "Audio conversion to m4a failed. The downloaded file was kept.";

pub const AUDIO_FORMAT_SELECTOR: &str = "bestaudio[ext=m4a]/bestaudio";
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub url: String,
    pub output_directory: String,
    /// Falls back to [`EngineSettings::debug`] when absent.
    #[serde(default)]
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartJobResponse {
    pub fn accepted(id: String) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub debug: bool,
}

impl JobOptions {
    pub fn line_policy(&self) -> LinePolicy {
        LinePolicy { debug: self.debug }
    }
}

pub fn normalize_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(url.to_string())
    } else {
        Some(format!("https://{url}"))
    }
}

pub fn downloader_args(
    url: &str,
    output_dir: &Path,
    debug: bool,
    transcoder: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = ["-m", DOWNLOADER_MODULE, "--newline", "--no-color", "--ignore-config"]
        .into_iter()
        .map(String::from)
        .collect();
    if debug {
        args.push("-v".to_string());
    }
    args.extend(
        [
            "-f",
            AUDIO_FORMAT_SELECTOR,
            "--no-write-info-json",
            "--no-write-description",
            "--no-write-annotations",
            "--no-write-thumbnail",
            "--no-write-playlist-metafiles",
            "--no-write-comments",
            "--print",
            "after_move:filepath",
        ]
        .into_iter()
        .map(String::from),
    );
    if let Some(transcoder) = transcoder {
        args.push("--ffmpeg-location".to_string());
        args.push(transcoder.to_string_lossy().to_string());
        args.push("--prefer-ffmpeg".to_string());
    }
    args.push(url.to_string());
    args.push("-P".to_string());
    args.push(output_dir.to_string_lossy().to_string());
    args.push("-o".to_string());
    args.push(OUTPUT_TEMPLATE.to_string());
    args
}

/// Arguments for a standalone downloader executable: the leading
/// `-m yt_dlp` pair is dropped, nothing else.
pub fn strip_module_flags(args: &[String]) -> Vec<String> {
    match args {
        [flag, module, rest @ ..] if flag == "-m" && module == DOWNLOADER_MODULE => rest.to_vec(),
        _ => args.to_vec(),
    }
}

fn failure_detail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)error|traceback|exception").expect("valid detail regex"))
}

pub fn failure_message(output: &RunOutput) -> String {
    let detail = output
        .stderr
        .lines()
        .chain(output.stdout.lines())
        .map(str::trim)
        .find(|line| failure_detail_re().is_match(line));

    let head = match output.code {
        Some(code) => format!("yt-dlp exited with code {code}."),
        None => "yt-dlp terminated without an exit code.".to_string(),
    };
    match detail {
        Some(detail) => format!("{head} {detail}"),
        None => head,
    }
}

/// Most recently modified media file directly inside `dir`. Equal
/// modification times resolve to the lexicographically smallest path.
pub fn newest_media_file(dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if !has_media_extension(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let Ok(modified) = meta.modified() else { continue };
        let better = match &best {
            None => true,
            Some((t, p)) => modified > *t || (modified == *t && path < *p),
        };
        if better {
            best = Some((modified, path));
        }
    }
    best.map(|(_, p)| p)
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

fn prefixed_search_path(dir: &Path) -> OsString {
    let mut parts = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        parts.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(parts).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

struct Shared {
    settings: EngineSettings,
    locator: ToolLocator,
    runner: Arc<dyn ProcessRunner>,
    history: Arc<dyn HistoryStore>,
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
}

#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        settings: EngineSettings,
        locator: ToolLocator,
        runner: Arc<dyn ProcessRunner>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                locator,
                runner,
                history,
                registry: Arc::new(JobRegistry::new()),
                bus: Arc::new(EventBus::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.shared.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    pub fn default_output_directory(&self) -> String {
        host::default_output_directory(&self.shared.settings)
    }

    /// Validates and submits a job. Returns as soon as the pipeline thread
    /// has been started.
    pub fn start_job(&self, request: &StartJobRequest) -> StartJobResponse {
        let Some(url) = normalize_url(&request.url) else {
            return StartJobResponse::rejected(INVALID_URL_MESSAGE);
        };
        let output_dir = request.output_directory.trim();
        if output_dir.is_empty() {
            return StartJobResponse::rejected(MISSING_OUTPUT_DIR_MESSAGE);
        }

        let options = JobOptions {
            debug: request.debug.unwrap_or(self.shared.settings.debug),
        };
        let id = uuid::Uuid::new_v4().to_string();
        let record = JobRecord::new(id.clone(), url, output_dir.to_string(), options.debug);

        if let Err(err) = self.shared.registry.insert(record.clone()) {
            return StartJobResponse::rejected(err.to_string());
        }
        report_best_effort(
            &id,
            "history insert",
            self.shared.history.record_started(&StartedDownload {
                id: &id,
                url: &record.url,
                output_dir: &record.output_directory,
                started_at_ms: record.started_at,
            }),
        );
        tracing::info!(job_id = %id, url = %record.url, debug = options.debug, "job submitted");

        let pipeline = Pipeline {
            log: JobLog {
                shared: self.shared.clone(),
                id: id.clone(),
                policy: options.line_policy(),
            },
            url: record.url,
            output_dir: PathBuf::from(record.output_directory),
            options,
            tracker: ArtifactTracker::default(),
        };
        let spawned = thread::Builder::new()
            .name(format!("job-{}", &id[..8]))
            .spawn(move || pipeline.run());

        match spawned {
            Ok(handle) => self.shared.registry.attach_handle(&id, handle),
            Err(err) => {
                tracing::warn!(job_id = %id, error = %err, "could not start job thread");
                finish_job(
                    &self.shared,
                    &id,
                    JobOutcome::Failed {
                        error: format!("Could not start download: {err}"),
                    },
                );
            }
        }

        StartJobResponse::accepted(id)
    }
}

struct JobLog {
    shared: Arc<Shared>,
    id: String,
    policy: LinePolicy,
}

impl JobLog {
    fn tool_line(&self, text: String) {
        let level = classify::classify(&text);
        if self.policy.relays(level) {
            self.relay(text, level);
        }
    }

    fn diagnostic(&self, text: String) {
        self.relay(text, LineLevel::Debug);
    }

    fn relay(&self, text: String, level: LineLevel) {
        let timestamp = now_ms();
        report_best_effort(
            &self.id,
            "history log append",
            self.shared
                .history
                .append_log(&self.id, timestamp, Some(level), &text),
        );
        self.shared.registry.push_log(LogLine {
            job_id: self.id.clone(),
            timestamp,
            level: Some(level),
            text: text.clone(),
        });
        self.shared.bus.publish_log(LogEvent {
            job_id: self.id.clone(),
            line: text,
            level,
        });
    }
}

struct Pipeline {
    log: JobLog,
    url: String,
    output_dir: PathBuf,
    options: JobOptions,
    tracker: ArtifactTracker,
}

enum Launch {
    Vendored(PathBuf),
    Interpreter,
}

impl Pipeline {
    fn run(mut self) {
        let outcome = self.execute();
        finish_job(&self.log.shared, &self.log.id, outcome);
    }

    fn execute(&mut self) -> JobOutcome {
        self.log.shared.registry.set_phase(&self.log.id, JobPhase::Starting);

        if let Err(err) = std::fs::create_dir_all(&self.output_dir) {
            return JobOutcome::Failed {
                error: format!(
                    "Could not create output folder {}: {err}",
                    self.output_dir.display()
                ),
            };
        }

        let tools = self.log.shared.locator.resolve();
        let output = match self.download(&tools) {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };

        if !output.success() {
            return JobOutcome::Failed {
                error: failure_message(&output),
            };
        }

        let artifact = self
            .tracker
            .latest()
            .map(|m| m.path.clone())
            .map(|p| if p.is_relative() { self.output_dir.join(p) } else { p })
            .or_else(|| newest_media_file(&self.output_dir));

        match artifact {
            None => JobOutcome::Completed {
                path: String::new(),
            },
            Some(path) if ffmpeg::is_accepted_audio(&path) => JobOutcome::Completed {
                path: path.to_string_lossy().to_string(),
            },
            Some(path) => self.transcode(&path),
        }
    }

    /// Runs the downloader. `Err` carries the job's terminal outcome when the
    /// process never produced an exit status.
    fn download(&mut self, tools: &ResolvedTools) -> std::result::Result<RunOutput, JobOutcome> {
        let module_args = downloader_args(
            &self.url,
            &self.output_dir,
            self.options.debug,
            tools.transcoder.as_deref(),
        );

        if self.options.debug {
            self.log.diagnostic("[debug] Debug mode ON".to_string());
            for line in tools.debug_lines() {
                self.log.diagnostic(line);
            }
            self.log.diagnostic(format!("[debug] outputDir={}", self.output_dir.display()));
            self.log.diagnostic(format!("[debug] args={}", json_list(&module_args)));
        }

        let launch = if tools.downloader_present {
            Launch::Vendored(tools.downloader.clone())
        } else {
            Launch::Interpreter
        };

        let attempts: Vec<(PathBuf, Vec<String>)> = match &launch {
            Launch::Vendored(exe) => {
                let exe_args = strip_module_flags(&module_args);
                if self.options.debug {
                    self.log.diagnostic("[debug] Using vendored yt-dlp executable".to_string());
                    self.log.diagnostic(format!("[debug] exeArgs={}", json_list(&exe_args)));
                }
                vec![(exe.clone(), exe_args)]
            }
            Launch::Interpreter => {
                if self.options.debug {
                    self.log.diagnostic(
                        "[debug] vendored yt-dlp not found. Falling back to python -m yt_dlp"
                            .to_string(),
                    );
                }
                INTERPRETER_CANDIDATES
                    .iter()
                    .map(|c| (PathBuf::from(c), module_args.clone()))
                    .collect()
            }
        };

        self.log.shared.registry.set_phase(&self.log.id, JobPhase::Downloading);
        let runner = self.log.shared.runner.clone();
        let search_path = prefixed_search_path(&tools.search_path_dir);
        let mut last_spawn_error = None;

        for (program, args) in attempts {
            if self.options.debug && matches!(launch, Launch::Interpreter) {
                self.log.diagnostic(format!(
                    "[debug] Launching {} -m {DOWNLOADER_MODULE}",
                    program.display()
                ));
            }
            let spec = CommandSpec::new(&program)
                .args(args)
                .env("PYTHONPATH", tools.module_root.as_os_str())
                .env("PATH", search_path.clone());

            let result = runner.run(&spec, &mut |line: OutputLine| self.handle_line(line.text));
            match result {
                Ok(output) => return Ok(output),
                Err(RunError::Spawn(err)) => {
                    tracing::debug!(job_id = %self.log.id, program = %program.display(), error = %err, "downloader did not start");
                    last_spawn_error = Some(err);
                }
                Err(RunError::Wait(err)) => {
                    self.log.relay(format!("[error] {err}"), LineLevel::Error);
                    return Err(JobOutcome::Failed {
                        error: format!("yt-dlp stopped unexpectedly: {err}"),
                    });
                }
            }
        }

        let error = match (launch, last_spawn_error) {
            (Launch::Vendored(_), Some(err)) => {
                self.log.relay(format!("[error] {err}"), LineLevel::Error);
                format!("Could not start yt-dlp: {err}")
            }
            _ => INTERPRETER_MISSING_MESSAGE.to_string(),
        };
        Err(JobOutcome::Failed { error })
    }

    fn transcode(&self, source: &Path) -> JobOutcome {
        self.log.shared.registry.set_phase(&self.log.id, JobPhase::Transcoding);
        self.log.relay(
            format!("[transcode] Converting {} to m4a", source.display()),
            LineLevel::Info,
        );

        let shared = self.log.shared.clone();
        let debug = self.options.debug;
        let log = &self.log;
        let result = ffmpeg::transcode_to_m4a(
            shared.runner.as_ref(),
            &shared.locator,
            source,
            &mut |spec: &CommandSpec| {
                if debug {
                    log.diagnostic(format!(
                        "[debug] ffmpeg={} args={}",
                        spec.program.display(),
                        json_list(&spec.args)
                    ));
                }
            },
            &mut |line: OutputLine| log.tool_line(line.text),
        );

        match result {
            Ok(target) => {
                if let Err(err) = std::fs::remove_file(source) {
                    tracing::warn!(job_id = %self.log.id, path = %source.display(), error = %err, "source cleanup failed");
                    self.log.relay(
                        format!(
                            "[warning] Could not delete original file {}: {err}",
                            source.display()
                        ),
                        LineLevel::Info,
                    );
                }
                JobOutcome::Completed {
                    path: target.to_string_lossy().to_string(),
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %self.log.id, error = %err, "transcode failed");
                self.log.relay(format!("[error] {err}"), LineLevel::Error);
                JobOutcome::Failed {
                    error: TRANSCODE_FAILED_MESSAGE.to_string(),
                }
            }
        }
    }

    fn handle_line(&mut self, text: String) {
        self.tracker.observe(&text);
        self.log.tool_line(text);
    }
}

fn finish_job(shared: &Shared, id: &str, outcome: JobOutcome) {
    let completed_at = shared.registry.finish(id, &outcome).unwrap_or_else(now_ms);
    let (status, event) = match &outcome {
        JobOutcome::Completed { path } => (
            JobPhase::Completed.status(),
            CompletionEvent::succeeded(id, path.clone()),
        ),
        JobOutcome::Failed { error } => (
            JobPhase::Failed.status(),
            CompletionEvent::failed(id, error.clone()),
        ),
    };
    report_best_effort(
        id,
        "history completion update",
        shared.history.record_finished(&FinishedDownload {
            id,
            status,
            completed_at_ms: completed_at,
            file_path: event.path.as_deref(),
            error: event.error.as_deref(),
        }),
    );
    match &outcome {
        JobOutcome::Completed { path } => tracing::info!(job_id = %id, path = %path, "job completed"),
        JobOutcome::Failed { error } => tracing::info!(job_id = %id, error = %error, "job failed"),
    }
    shared.bus.publish_completion(event);
}

fn report_best_effort(job_id: &str, what: &str, result: Result<()>) {
    if let Err(err) = result {
        tracing::warn!(job_id = %job_id, error = %err, "{what} failed");
    }
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}
