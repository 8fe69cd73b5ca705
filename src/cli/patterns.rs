//! Patterns command: inspect the learned error patterns

use anyhow::{Context, Result};

use termsage::config::Config;
use termsage::memory::ErrorMemory;

pub async fn patterns_command(config: &Config, limit: usize, stats: bool, json: bool) -> Result<()> {
    let memory = ErrorMemory::open(&config.memory).context("Failed to open pattern store")?;

    if stats {
        let stats = memory.stats()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("Patterns:        {}", stats.patterns);
            println!("Solutions:       {}", stats.solutions);
            println!("Open errors:     {}", stats.open_errors);
            println!("Resolved errors: {}", stats.resolved_errors);
        }
        return Ok(());
    }

    let patterns = memory.list_patterns(limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&patterns)?);
        return Ok(());
    }

    if patterns.is_empty() {
        println!("No patterns learned yet.");
        return Ok(());
    }

    println!("Patterns ({}):\n", patterns.len());
    for pattern in patterns {
        println!(
            "  #{} [{}] seen {}x, confidence {:.2}",
            pattern.id, pattern.category, pattern.match_count, pattern.confidence
        );
        println!("    {}", pattern.signature);
        for solution in &pattern.solutions {
            let first_line = solution.fix_text.lines().next().unwrap_or("").trim();
            println!("    -> {} ({:.2})", first_line, solution.confidence);
        }
        println!();
    }

    Ok(())
}
