use crate::runner::{CommandSpec, OutputLine, ProcessRunner, RunError};
use crate::tools::{ToolLocator, TRANSCODER_STEM};
use crate::{EngineError, Result};
use std::path::{Path, PathBuf};

pub const ACCEPTED_AUDIO_EXTENSIONS: [&str; 2] = ["m4a", "aac"];

pub const TARGET_EXTENSION: &str = "m4a";

pub fn is_accepted_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            ACCEPTED_AUDIO_EXTENSIONS
                .iter()
                .any(|ok| e.eq_ignore_ascii_case(ok))
        })
        .unwrap_or(false)
}

pub fn transcode_target(input: &Path) -> PathBuf {
    input.with_extension(TARGET_EXTENSION)
}

pub fn transcode_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-q:a".to_string(),
        "2".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Re-encodes `input` to AAC in an `.m4a` sibling and returns the new path.
///
/// Each command from [`ToolLocator::transcoder_commands`] is tried once; the
/// next one is only used when the previous could not be spawned. `on_attempt`
/// sees every command right before it is spawned. The input file is left
/// untouched.
pub fn transcode_to_m4a(
    runner: &dyn ProcessRunner,
    locator: &ToolLocator,
    input: &Path,
    on_attempt: &mut dyn FnMut(&CommandSpec),
    on_line: &mut dyn FnMut(OutputLine),
) -> Result<PathBuf> {
    let output = transcode_target(input);
    let args = transcode_args(input, &output);

    for program in locator.transcoder_commands() {
        let spec = CommandSpec::new(&program).args(args.iter().cloned());
        on_attempt(&spec);
        let run = match runner.run(&spec, on_line) {
            Ok(run) => run,
            Err(RunError::Spawn(err)) => {
                tracing::debug!(program = %program.display(), error = %err, "transcoder did not start");
                continue;
            }
            Err(RunError::Wait(err)) => return Err(EngineError::Io(err)),
        };

        if !run.success() {
            return Err(EngineError::ExternalToolFailed {
                tool: TRANSCODER_STEM.to_string(),
                code: run.code,
                stderr: run.stderr.trim().to_string(),
            });
        }
        if !output.is_file() {
            return Err(EngineError::ExternalToolFailed {
                tool: TRANSCODER_STEM.to_string(),
                code: run.code,
                stderr: format!("no output written to {}", output.display()),
            });
        }
        return Ok(output);
    }

    Err(EngineError::ExternalToolMissing {
        tool: TRANSCODER_STEM.to_string(),
    })
}
