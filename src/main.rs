use tapeimgr::cli::{Cli, Commands};
use tapeimgr::commands;
use tapeimgr::commands::extract::ExtractOptions;
use tapeimgr::config::TapeImgrConfig;
use tapeimgr::error::Result;
use tapeimgr::logger;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse_args();

    // Initialize logging system
    logger::init(args.verbose)?;

    debug!("tapeimgr CLI starting");

    match run(args).await {
        Ok(_) => {
            info!("Operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = TapeImgrConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Extract {
            dir_out,
            device,
            block_size,
            sessions,
            prefix,
            extension,
            fill_blocks,
            force,
            simulate,
            report,
        } => {
            let options = ExtractOptions {
                dir_out,
                device,
                block_size,
                sessions,
                prefix,
                extension,
                fill_blocks,
                force,
                simulate,
                report,
            };
            commands::extract::execute(&config, options).await
        }

        Commands::Verify { dir } => commands::verify::execute(dir).await,

        Commands::Status { device } => {
            commands::status::execute(device.unwrap_or(config.tape_device)).await
        }
    }
}
