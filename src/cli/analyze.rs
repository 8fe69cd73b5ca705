//! Analyze command: run the error doctor once

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use termsage::config::Config;
use termsage::doctor::ErrorDoctor;
use termsage::memory::ErrorMemory;
use termsage::{AnalyzeRequest, ErrorContext};

pub struct AnalyzeArgs {
    pub text: Option<String>,
    pub file: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub json: bool,
}

/// Error text from the argument, a file, or stdin, in that order
fn read_error_text(args: &AnalyzeArgs) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read error text from stdin")?;
    Ok(text)
}

fn node_version() -> Option<String> {
    let output = std::process::Command::new("node")
        .arg("--version")
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|v| !v.is_empty())
}

fn build_request(text: String, cwd: &Path) -> AnalyzeRequest {
    let has_package_json = cwd.join("package.json").is_file();
    AnalyzeRequest {
        error_text: text,
        context: ErrorContext {
            working_directory: Some(cwd.display().to_string()),
            has_package_json,
            node_runtime_version: if has_package_json { node_version() } else { None },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn analyze_command(config: &Config, args: AnalyzeArgs) -> Result<()> {
    let text = read_error_text(&args)?;
    if text.trim().is_empty() {
        bail!("No error text given (pass it as an argument, with --file, or on stdin)");
    }

    let cwd = match &args.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    // Fixes this machine has already seen work are shown alongside the analysis
    let learned = ErrorMemory::open_optional(&config.memory)
        .and_then(|memory| memory.solutions_for(&text).ok().flatten());

    let doctor = ErrorDoctor::new(&config.doctor);
    let result = doctor.analyze(&build_request(text, &cwd)).await;

    if args.json {
        let value = serde_json::json!({ "analysis": result, "learned": learned });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if let Some(pattern) = learned.as_ref().filter(|p| !p.solutions.is_empty()) {
        println!(
            "Seen before ({}x, confidence {:.2}):",
            pattern.match_count, pattern.confidence
        );
        for solution in &pattern.solutions {
            println!("  $ {}", solution.fix_text.lines().next().unwrap_or("").trim());
        }
        println!();
    }

    if !result.success {
        if let Some(explanation) = &result.explanation {
            println!("{}", explanation);
        }
        if let Some(error) = &result.error {
            println!("({})", error);
        }
        return Ok(());
    }

    println!(
        "Source: {} (confidence {:.2})",
        serde_json::to_value(result.source)?
            .as_str()
            .unwrap_or("unknown"),
        result.confidence
    );
    if let Some(explanation) = &result.explanation {
        println!("{}\n", explanation);
    }
    for (i, fix) in result.fixes.iter().enumerate() {
        println!("{}. {} ({:.2})", i + 1, fix.title, fix.confidence);
        println!("   {}", fix.description);
        if let Some(command) = &fix.command {
            println!("   $ {}", command);
        }
        if fix.requires_file_edit {
            println!("   (requires editing a file)");
        }
    }

    Ok(())
}
