//! Post-completion commands.
//!
//! After a track (or, for `a:` commands, an album) finishes, each configured
//! command runs in order with placeholders filled from the track. Later
//! commands can see the exit code and output of the previous and the first
//! command. A `u:` command may rewrite the track's state and path from its
//! standard output (`state;path`).

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::OnCompleteCommand;
use crate::error::{Error, Result};
use crate::types::{Track, TrackState};

use super::{BatchDownloader, TrackSlot};

/// Output of the commands run so far
#[derive(Debug)]
struct HookContext {
    exit_code: i32,
    first_exit_code: i32,
    stdout: Option<String>,
    stderr: Option<String>,
    first_stdout: Option<String>,
    first_stderr: Option<String>,
}

impl Default for HookContext {
    fn default() -> Self {
        Self {
            exit_code: -1,
            first_exit_code: -1,
            stdout: None,
            stderr: None,
            first_stdout: None,
            first_stderr: None,
        }
    }
}

/// Result of one command
#[derive(Debug)]
struct CommandOutcome {
    exit_code: i32,
    stdout: Option<String>,
    stderr: Option<String>,
}

fn or_null(value: &Option<String>) -> &str {
    match value.as_deref() {
        Some(s) if !s.trim().is_empty() => s,
        _ => "null",
    }
}

/// Fill the placeholders of a command line
fn expand_placeholders(
    template: &str,
    track: &Track,
    item_name: Option<&str>,
    ctx: &HookContext,
) -> String {
    let path = track
        .download_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let replacements: [(&str, String); 13] = [
        ("{title}", track.title.clone()),
        ("{artist}", track.artist.clone()),
        ("{album}", track.album.clone()),
        ("{path}", path),
        ("{state}", format!("{:?}", track.state())),
        ("{failure-reason}", track.failure_reason().to_string()),
        ("{item-name}", item_name.unwrap_or_default().to_string()),
        ("{exitcode}", ctx.exit_code.to_string()),
        ("{first-exitcode}", ctx.first_exit_code.to_string()),
        ("{stdout}", or_null(&ctx.stdout).to_string()),
        ("{stderr}", or_null(&ctx.stderr).to_string()),
        ("{first-stdout}", or_null(&ctx.first_stdout).to_string()),
        ("{first-stderr}", or_null(&ctx.first_stderr).to_string()),
    ];

    replacements
        .iter()
        .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value))
        .trim()
        .to_string()
}

/// Split a command line into program and argument string
///
/// A program path in double quotes may contain spaces.
fn split_program(line: &str) -> (String, String) {
    if let Some(rest) = line.strip_prefix('"') {
        return match rest.find('"') {
            Some(end) if end > 0 => (rest[..end].to_string(), rest[end + 1..].trim().to_string()),
            _ => (line.trim_matches('"').to_string(), String::new()),
        };
    }
    match line.split_once(' ') {
        Some((program, args)) => (program.to_string(), args.trim().to_string()),
        None => (line.to_string(), String::new()),
    }
}

/// Split an argument string on whitespace, keeping double-quoted runs together
fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut started = false;

    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    out.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        out.push(current);
    }
    out
}

/// Parse `state;path` output of a `u:` command
fn parse_update(stdout: &str) -> Option<(TrackState, Option<PathBuf>)> {
    let (state, path) = match stdout.split_once(';') {
        Some((state, path)) => (state, Some(PathBuf::from(path))),
        None => (stdout, None),
    };
    let state = TrackState::from_i32(state.trim().parse().ok()?)?;
    Some((state, path))
}

fn clean_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim()
        .trim_matches('"')
        .to_string()
}

fn build_command(line: &str, shell: bool) -> Command {
    if shell {
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        command.arg(line);
        return command;
    }

    let (program, args) = split_program(line);
    let mut command = Command::new(program);
    command.args(split_args(&args));
    command
}

async fn run_command(line: &str, cmd: &OnCompleteCommand) -> Result<CommandOutcome> {
    let mut command = build_command(line, cmd.shell);
    command.stdin(Stdio::null());

    #[cfg(windows)]
    if cmd.hidden {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    if cmd.captures_output() {
        let output = command
            .output()
            .await
            .map_err(|e| Error::Hook(format!("failed to run '{}': {}", line, e)))?;
        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: Some(clean_output(&output.stdout)),
            stderr: Some(clean_output(&output.stderr)),
        })
    } else {
        let status = command
            .status()
            .await
            .map_err(|e| Error::Hook(format!("failed to run '{}': {}", line, e)))?;
        Ok(CommandOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout: None,
            stderr: None,
        })
    }
}

impl BatchDownloader {
    /// Run the post-completion commands for a track or an album source
    ///
    /// A command requiring a different state ends the run of commands. A
    /// command that cannot be started is logged and ends it too; the download
    /// itself is never affected.
    pub(crate) async fn on_complete(&self, slot: TrackSlot, album_level: bool) {
        if !self.config.has_on_complete() {
            return;
        }

        let (mut track, item_name) = {
            let lists = self.lists.lock().await;
            let Some(track) = slot.get(&lists) else {
                return;
            };
            (
                track.clone(),
                lists
                    .entries
                    .get(slot.entry())
                    .and_then(|e| e.item_name.clone()),
            )
        };

        let mut ctx = HookContext::default();
        let mut need_update = false;

        for (i, cmd) in self.config.on_complete.iter().enumerate() {
            if cmd.command.trim().is_empty() {
                continue;
            }
            if let Some(required) = cmd.required_state
                && i32::from(required) != track.state().to_i32()
            {
                return;
            }
            if cmd.album_level != album_level {
                continue;
            }

            let line = expand_placeholders(&cmd.command, &track, item_name.as_deref(), &ctx);
            tracing::debug!(command = %line, shell = cmd.shell, "Running on-complete command");

            let outcome = match run_command(&line, cmd).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "On-complete command failed");
                    return;
                }
            };

            if cmd.captures_output() {
                ctx.stdout = outcome.stdout;
                ctx.stderr = outcome.stderr;
                if i == 0 {
                    ctx.first_stdout = ctx.stdout.clone();
                    ctx.first_stderr = ctx.stderr.clone();
                }
            }

            if cmd.update_from_output
                && let Some(stdout) = ctx.stdout.as_deref().filter(|s| !s.trim().is_empty())
                && let Some((state, path)) = parse_update(stdout)
            {
                tracing::info!(track = %track, ?state, path = ?path, "On-complete command updated track");
                track.override_state(state, path.clone());
                let mut lists = self.lists.lock().await;
                if let Some(stored) = slot.get_mut(&mut lists) {
                    stored.override_state(state, path);
                }
                need_update = true;
            }

            ctx.exit_code = outcome.exit_code;
            if i == 0 {
                ctx.first_exit_code = outcome.exit_code;
            }
        }

        if need_update {
            self.update_index(slot.entry()).await;
        }
    }
}
