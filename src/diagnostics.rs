//! System diagnostics and dependency checking.
//!
//! Verifies that the caption and synthesis programs can be found, the model
//! files exist, and both artifact directories are writable.

use crate::config::Config;
use std::path::{Path, PathBuf};

/// Result of a dependency check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Everything in place
    Ok,
    /// Required item is missing
    NotFound,
    /// Present but unusable, or missing and optional
    Warning(String),
}

/// Locate `program` the way the OS would when spawning it.
///
/// Names containing a path separator are checked as-is; bare names are
/// looked up in `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}

fn check_program(program: &str) -> CheckResult {
    match find_program(program) {
        Some(_) => CheckResult::Ok,
        None => CheckResult::NotFound,
    }
}

fn check_file(path: &Path) -> CheckResult {
    if path.is_file() {
        CheckResult::Ok
    } else if path.exists() {
        CheckResult::Warning(format!("{} is not a regular file", path.display()))
    } else {
        CheckResult::NotFound
    }
}

/// Create the directory if needed and prove it accepts writes.
///
/// The probe file has a unique name and is the only file removed.
fn check_writable_dir(dir: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::Warning(format!("cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(format!(".picvoice-check-{}", uuid::Uuid::new_v4()));
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(&probe) {
                return CheckResult::Warning(format!(
                    "wrote {} but could not remove it: {}",
                    probe.display(),
                    e
                ));
            }
            CheckResult::Ok
        }
        Err(e) => CheckResult::Warning(format!("{} is not writable: {}", dir.display(), e)),
    }
}

fn report(label: &str, result: &CheckResult, hint: Option<&str>) -> bool {
    use owo_colors::OwoColorize;

    print!("{label}: ");
    match result {
        CheckResult::Ok => {
            println!("{}", "✓ OK".green());
            true
        }
        CheckResult::NotFound => {
            println!("{}", "✗ NOT FOUND".red());
            if let Some(hint) = hint {
                println!("  {hint}");
            }
            false
        }
        CheckResult::Warning(msg) => {
            println!("{} {}", "⚠ WARNING:".yellow(), msg);
            false
        }
    }
}

/// Run all checks and print results. Returns true when the service can start.
pub fn check_dependencies(config: &Config) -> bool {
    println!("Checking picvoice dependencies...\n");

    let mut ok = true;

    ok &= report(
        &format!("Caption program ({})", config.caption.program),
        &check_program(&config.caption.program),
        Some("Set [caption] program in the config file"),
    );
    ok &= report(
        &format!("Synthesis program ({})", config.synthesis.program),
        &check_program(&config.synthesis.program),
        Some("Set [synthesis] program in the config file"),
    );

    // Model files are only required when the args reference them.
    let uses = |placeholder: &str| {
        config
            .synthesis
            .args
            .iter()
            .any(|arg| arg.contains(placeholder))
    };
    if uses("{checkpoint}") {
        ok &= report(
            &format!("TTS checkpoint ({})", config.synthesis.checkpoint.display()),
            &check_file(&config.synthesis.checkpoint),
            Some("Set [synthesis] checkpoint to the model file"),
        );
    }
    if uses("{config}") {
        ok &= report(
            &format!("TTS config ({})", config.synthesis.config.display()),
            &check_file(&config.synthesis.config),
            Some("Set [synthesis] config to the model config file"),
        );
    }

    ok &= report(
        &format!("Staging directory ({})", config.storage.staging_dir.display()),
        &check_writable_dir(&config.storage.staging_dir),
        None,
    );
    ok &= report(
        &format!("Output directory ({})", config.storage.output_dir.display()),
        &check_writable_dir(&config.storage.output_dir),
        None,
    );

    println!();
    println!(
        "Caption device: {} (configured: {})",
        config.caption.device.resolve().as_str(),
        config.caption.device.as_str()
    );
    println!(
        "Synthesis device: {} (configured: {})",
        config.synthesis.device.resolve().as_str(),
        config.synthesis.device.as_str()
    );
    println!();

    if ok {
        println!("✓ Ready to serve on {}:{}.", config.server.host, config.server.port);
    } else {
        println!("✗ Some checks failed; requests will fail until they are fixed.");
    }
    ok
}
