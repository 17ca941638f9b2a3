//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Logger initialization
//! - Folder structure initialization
//! - Detection/tagging script availability check

use anstyle::{AnsiColor, Style};
use anyhow::{Context, Result};
use env_logger::{Builder, WriteStyle};
use log::kv::Key;
use log::{error, info};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::utils::fs_utils::clear_directory;

// ────────────────────────────────────────────────────────────────
// Script Check
// ────────────────────────────────────────────────────────────────

/// Logs whether the program of each configured script command can be found.
pub fn check_scripts(config: &AppConfig) {
    for (step, command) in [
        ("detection", &config.detect_command),
        ("tagging", &config.tag_command),
    ] {
        let Some(program) = command.first() else {
            error!("The {} command is empty. Please configure it before submitting jobs.", step);
            continue;
        };
        match resolve_program(program, &config.script_dir) {
            Some(path) => info!("{} command `{}` uses {}", step, command.join(" "), path.display()),
            None => error!(
                "`{}` ({} step) is not installed or not available in PATH. Please install it before submitting jobs.",
                program, step
            ),
        }
    }
}

fn resolve_program(program: &str, script_dir: &Path) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            script_dir.join(candidate)
        };
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

/// Creates the data root and empties the jobs directory. Jobs are kept in
/// memory only, so directories left by a previous run have no owner.
pub fn initialize_folder(config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_root)
        .with_context(|| format!("Failed to create {}", config.data_root.display()))?;
    clear_directory(config.jobs_root())?;
    info!("Cleared job directories under {}", config.jobs_root().display());
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

/// Initialize the logger. `RUST_LOG` overrides the default filters.
pub fn initialize_logger() {
    let dark_grey = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));
    let cyan = Style::new().fg_color(Some(AnsiColor::Cyan.into()));

    Builder::new()
        .write_style(WriteStyle::Auto)
        .format(move |buf, record| {
            let ts = buf.timestamp().to_string();

            let level_style = buf.default_level_style(record.level());

            // Extract raw duration and format to 2 decimal places
            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| {
                    let s = format!("{}", v);
                    if let Some(idx) = s.find(|c: char| c.is_alphabetic()) {
                        let (num, unit) = (&s[..idx], &s[idx..]);
                        if let Ok(val) = num.parse::<f32>() {
                            return format!("{:.2} {}", val, unit);
                        }
                    }
                    s
                })
                .unwrap_or_default();

            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{}{:>10}{}", cyan.render(), dur_raw, cyan.render_reset())
            };

            writeln!(
                buf,
                "{}{}{} {}{}{} {}{}{}",
                dark_grey.render(),
                ts,
                dark_grey.render_reset(),
                level_style.render(),
                record.level(),
                level_style.render_reset(),
                dark_grey.render(),
                record.target(),
                dark_grey.render_reset(),
            )?;

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();

            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }

            Ok(())
        })
        .filter(None, log::LevelFilter::Info)
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}
