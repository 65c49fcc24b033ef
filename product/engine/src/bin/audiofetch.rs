use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use audiofetch_engine::download::{Orchestrator, StartJobRequest};
use audiofetch_engine::events::CompletionEvent;
use audiofetch_engine::history::{self, SqliteHistory};
use audiofetch_engine::host::{self, FolderPicker};
use audiofetch_engine::paths::AppPaths;
use audiofetch_engine::runner::SystemRunner;
use audiofetch_engine::tools::ToolLocator;
use audiofetch_engine::{config, logging};

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut output_dir: Option<String> = None;
    let mut pick = false;
    let mut debug: Option<bool> = None;
    let mut verbose = false;
    let mut history_limit: Option<usize> = None;
    let mut logs_for: Option<String> = None;
    let mut urls: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                base_dir = Some(PathBuf::from(v));
            }
            "-o" | "--output" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--output requires a value".to_string())?;
                output_dir = Some(v.to_string());
            }
            "--pick" => pick = true,
            "--debug" => debug = Some(true),
            "--no-debug" => debug = Some(false),
            "-v" | "--verbose" => verbose = true,
            "--history" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--history requires a count".to_string())?;
                let n = v
                    .parse::<usize>()
                    .map_err(|_| format!("--history expects a number, got {v}"))?;
                history_limit = Some(n);
            }
            "--logs" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--logs requires a job id".to_string())?;
                logs_for = Some(v.to_string());
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown arg: {other} (try --help)"))
            }
            url => urls.push(url.to_string()),
        }
        i += 1;
    }

    logging::init(verbose);

    let base_dir = base_dir
        .or_else(default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;
    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs().map_err(|e| e.to_string())?;
    let settings = config::load_settings(&paths).map_err(|e| e.to_string())?;

    if history_limit.is_some() || logs_for.is_some() {
        return print_history(&paths, history_limit, logs_for.as_deref());
    }

    if urls.is_empty() {
        return Err("nothing to do (pass one or more URLs, or --help)".to_string());
    }

    let orchestrator = Orchestrator::new(
        settings.clone(),
        ToolLocator::from_settings(&settings),
        Arc::new(SystemRunner),
        history::open_or_disabled(&paths),
    );

    let output_dir = match output_dir {
        Some(dir) => dir,
        None if pick => host::picked_directory(&StdinPicker),
        None => orchestrator.default_output_directory(),
    };

    let logs = orchestrator.events().subscribe_logs();
    let completions = orchestrator.events().subscribe_completions();

    let mut pending: HashSet<String> = HashSet::new();
    let mut failed = 0usize;
    for url in urls {
        let response = orchestrator.start_job(&StartJobRequest {
            url: url.clone(),
            output_directory: output_dir.clone(),
            debug,
        });
        match (response.success, response.id, response.error) {
            (true, Some(id), _) => {
                println!("{} started: {url}", short_id(&id));
                pending.insert(id);
            }
            (_, _, error) => {
                eprintln!("{url}: {}", error.unwrap_or_default());
                failed += 1;
            }
        }
    }

    while !pending.is_empty() {
        crossbeam_channel::select! {
            recv(logs) -> event => {
                match event {
                    Ok(event) => println!("{} {}", short_id(&event.job_id), event.line),
                    Err(_) => pending.clear(),
                }
            }
            recv(completions) -> event => {
                match event {
                    Ok(event) => {
                        // A job's log lines are all published before its completion.
                        for line in logs.try_iter() {
                            println!("{} {}", short_id(&line.job_id), line.line);
                        }
                        if pending.remove(&event.id) && !report_completion(&event) {
                            failed += 1;
                        }
                    }
                    Err(_) => pending.clear(),
                }
            }
        }
    }

    orchestrator.registry().join_all();

    if failed > 0 {
        return Err(format!("{failed} download(s) failed"));
    }
    Ok(())
}

fn print_history(paths: &AppPaths, limit: Option<usize>, logs_for: Option<&str>) -> Result<(), String> {
    let store = SqliteHistory::open(paths).map_err(|e| e.to_string())?;
    if let Some(limit) = limit {
        for row in store.recent_downloads(limit).map_err(|e| e.to_string())? {
            let json = serde_json::to_string(&row).map_err(|e| e.to_string())?;
            println!("{json}");
        }
    }
    if let Some(id) = logs_for {
        for row in store.logs_for(id).map_err(|e| e.to_string())? {
            println!(
                "{} [{}] {}",
                row.ts,
                row.level.as_deref().unwrap_or("-"),
                row.line
            );
        }
    }
    Ok(())
}

/// Reads the folder from stdin. An empty line counts as cancelled.
struct StdinPicker;

impl FolderPicker for StdinPicker {
    fn pick_folder(&self) -> Option<PathBuf> {
        eprint!("Output folder: ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        let t = line.trim();
        if t.is_empty() {
            None
        } else {
            Some(PathBuf::from(t))
        }
    }
}

fn report_completion(event: &CompletionEvent) -> bool {
    if event.success {
        println!(
            "{} done: {}",
            short_id(&event.id),
            event.path.as_deref().unwrap_or("")
        );
    } else {
        println!(
            "{} failed: {}",
            short_id(&event.id),
            event.error.as_deref().unwrap_or("")
        );
    }
    event.success
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("AUDIOFETCH_BASE_DIR") {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }
    AppPaths::platform_default().map(|p| p.base_dir)
}

fn print_help() {
    println!(
        r#"audiofetch

Downloads the audio track of one or more media URLs with yt-dlp and converts
it to .m4a when needed.

Usage:
  audiofetch [options] <url>...
  audiofetch --history 20
  audiofetch --logs <job-id>

Options:
  --base-dir <path>    App data dir (default: $AUDIOFETCH_BASE_DIR, then the platform data dir)
  -o, --output <dir>   Output folder (default: the OS downloads folder)
  --pick               Read the output folder from stdin
  --debug              Verbose yt-dlp output and path diagnostics for these jobs
  --no-debug           Override a debug default from settings.json
  -v, --verbose        Engine diagnostics on stderr (RUST_LOG also works)
  --history <n>        Print the n most recent downloads as JSON lines
  --logs <job-id>      Print the stored log of one download
"#
    );
}
