//! Extract Command Handler
//!
//! Handles the `extract` subcommand: validates the job, confirms overwrites,
//! runs the engine in the background and renders its event stream.

use crate::config::TapeImgrConfig;
use crate::engine::{self, ImagerSettings, RunOutcome, SessionStatus, Termination};
use crate::error::{Result, TapeImgrError};
use crate::events::{Event, EventLevel};
use crate::job::{RawJob, ValidationWarning};
use crate::tape::{MtTape, SimulatedTape, TapeDevice, TapeLayout};
use crate::utils;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Command line overrides for one extraction
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub dir_out: PathBuf,
    pub device: Option<String>,
    pub block_size: Option<String>,
    pub sessions: String,
    pub prefix: Option<String>,
    pub extension: Option<String>,
    pub fill_blocks: bool,
    pub force: bool,
    pub simulate: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

impl ExtractOptions {
    /// Raw job from configuration defaults with command line values on top
    pub fn raw_job(&self, config: &TapeImgrConfig) -> RawJob {
        let mut raw = RawJob::from_config(self.dir_out.to_string_lossy(), config);
        if let Some(device) = &self.device {
            raw.tape_device = device.clone();
        }
        if let Some(block_size) = &self.block_size {
            raw.init_block_size = block_size.clone();
        }
        if let Some(prefix) = &self.prefix {
            raw.prefix = prefix.clone();
        }
        if let Some(extension) = &self.extension {
            raw.extension = extension.clone();
        }
        raw.sessions = self.sessions.clone();
        raw.fill_blocks = raw.fill_blocks || self.fill_blocks;
        raw
    }
}

pub async fn execute(config: &TapeImgrConfig, options: ExtractOptions) -> Result<()> {
    info!("Starting extract operation: {:?}", options.dir_out);

    let validated = match options.raw_job(config).validate() {
        Ok(validated) => validated,
        Err(errors) => {
            for failure in errors.failures() {
                println!("❌ {}", failure);
            }
            return Err(errors.into());
        }
    };

    for warning in &validated.warnings {
        match warning {
            ValidationWarning::OutputExists { .. } if !options.force => {
                println!("⚠️  {}", warning);
                if !confirm("Continue and overwrite? [y/N] ")? {
                    println!("Aborted, nothing written");
                    return Ok(());
                }
            }
            _ => warn!("{}", warning),
        }
    }

    let job = validated.job;
    let device: Box<dyn TapeDevice> = match &options.simulate {
        Some(layout_path) => {
            let layout = TapeLayout::from_file(layout_path)?;
            println!(
                "🔧 Using simulated tape with {} session(s) from {}",
                layout.sessions.len(),
                layout_path.display()
            );
            Box::new(SimulatedTape::new(&layout))
        }
        None => Box::new(MtTape::new(job.tape_device())),
    };

    println!("\n🚀 Starting Tape Extraction");
    println!("  Device: {}", device.name());
    println!("  Output: {}", job.dir_out().display());
    if job.sessions().is_empty() {
        println!("  Sessions: all");
    } else {
        let list: Vec<String> = job.sessions().iter().map(|s| s.to_string()).collect();
        println!("  Sessions: {}", list.join(","));
    }
    if job.fill_blocks() {
        println!("  Options: fill unreadable blocks with zeros");
    }

    let settings = ImagerSettings::from_config(config);
    let start = std::time::Instant::now();
    let handle = engine::spawn(job, settings, device)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                handle.cancel();
                spinner.println("⚠️  Cancellation requested, stopping after the current block");
            }
        }

        for event in handle.poll_events() {
            render_event(&spinner, &event);
        }

        if handle.is_finished() {
            break;
        }
    }

    for event in handle.poll_events() {
        render_event(&spinner, &event);
    }
    spinner.finish_and_clear();

    let outcome = handle.join().await?;
    print_summary(&outcome, start.elapsed().as_secs_f64());

    if let Some(report_path) = &options.report {
        let json = serde_json::to_string_pretty(&outcome)
            .map_err(|e| TapeImgrError::parse(format!("Cannot serialize outcome: {}", e)))?;
        std::fs::write(report_path, json)?;
        info!("Run outcome written to {}", report_path.display());
    }

    match &outcome.termination {
        Termination::DeviceUnavailable(reason) => {
            error!("Tape device not accessible: {}", reason);
            Err(TapeImgrError::device_io(reason.clone()))
        }
        _ if outcome.success => Ok(()),
        termination => Err(TapeImgrError::Generic(anyhow::anyhow!(
            "extraction finished with problems ({:?}); see the log in the output directory",
            termination
        ))),
    }
}

fn render_event(spinner: &ProgressBar, event: &Event) {
    let line = format!("{}: {}", event.level, event.message);
    match event.level {
        EventLevel::Debug => {}
        EventLevel::Info => spinner.println(line),
        EventLevel::Warning => spinner.println(format!("⚠️  {}", line)),
        EventLevel::Error => spinner.println(format!("❌ {}", line)),
    }
    spinner.set_message(event.message.clone());
}

fn print_summary(outcome: &RunOutcome, duration_secs: f64) {
    if outcome.device_inaccessible {
        println!("\n❌ Tape device not accessible, nothing was read");
        return;
    }

    println!("\n📊 Sessions:");
    for record in &outcome.sessions {
        let status = match &record.status {
            SessionStatus::Completed => "✅ extracted".to_string(),
            SessionStatus::Skipped => "⏭️  skipped".to_string(),
            SessionStatus::Empty => "∅ empty".to_string(),
            SessionStatus::Pending => "? unfinished".to_string(),
            SessionStatus::Cancelled => "⚠️  cancelled".to_string(),
            SessionStatus::Failed(reason) => format!("❌ failed: {}", reason),
        };
        print!("  #{:<4} {}", record.index, status);
        if record.output_path.is_some() {
            print!(
                " ({}, block size {}, {} read error(s))",
                utils::format_bytes(record.bytes_written),
                record.block_size.unwrap_or(0),
                record.read_errors
            );
        }
        println!();
    }

    let headline = match &outcome.termination {
        Termination::EndOfTape => "✅ End of tape reached",
        Termination::SessionLimitExceeded => "⚠️  Session limit exceeded before end of tape",
        Termination::Cancelled => "⚠️  Extraction cancelled",
        Termination::DeviceLost(_) => "❌ Lost control of the tape device",
        Termination::DeviceUnavailable(_) => "❌ Tape device not accessible",
    };
    println!("\n{}", headline);
    println!("  Bytes written: {}", utils::format_bytes(outcome.total_bytes()));
    println!("  Duration: {}", utils::format_duration(duration_secs));
    if outcome.total_bytes() > 0 && duration_secs > 0.0 {
        println!(
            "  Average Speed: {}",
            utils::format_speed(outcome.total_bytes(), duration_secs)
        );
    }
    match &outcome.manifest_path {
        Some(path) => println!("  Checksums: {}", path.display()),
        None => println!("  ⚠️  Checksum file could not be written"),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_overrides_config() {
        let config = TapeImgrConfig {
            tape_device: "/dev/nst1".to_string(),
            fill_blocks: true,
            ..TapeImgrConfig::default()
        };
        let options = ExtractOptions {
            dir_out: PathBuf::from("/tmp/out"),
            block_size: Some("1024".to_string()),
            sessions: "2".to_string(),
            extension: Some("img".to_string()),
            ..ExtractOptions::default()
        };

        let raw = options.raw_job(&config);
        assert_eq!(raw.dir_out, "/tmp/out");
        assert_eq!(raw.tape_device, "/dev/nst1");
        assert_eq!(raw.init_block_size, "1024");
        assert_eq!(raw.sessions, "2");
        assert_eq!(raw.prefix, "session");
        assert_eq!(raw.extension, "img");
        assert!(raw.fill_blocks);
    }
}
