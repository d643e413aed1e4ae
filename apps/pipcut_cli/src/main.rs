//! pipcut CLI: join two clips and pin a third on top as picture-in-picture.
//!
//! Usage:
//!   pipcut compose <FIRST> <SECOND> <OVERLAY>   Render the composite
//!   pipcut probe <FILE>                         Describe a media file as JSON
//!   pipcut check                                Check ffmpeg/ffprobe availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "pipcut",
    about = "Concatenate two clips with a picture-in-picture overlay",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Export settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play FIRST then SECOND, with OVERLAY scaled into the bottom-left corner
    Compose {
        first: PathBuf,
        second: PathBuf,
        overlay: PathBuf,

        /// Overlay scale factor in (0, 1]
        #[arg(long)]
        scale: Option<f64>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the ffmpeg command instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print what ffprobe reports about a clip
    Probe { path: PathBuf },

    /// Check that ffmpeg and ffprobe are installed
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compose {
            first,
            second,
            overlay,
            scale,
            output,
            dry_run,
        } => {
            commands::compose::run(commands::compose::ComposeArgs {
                config: cli.config,
                inputs: [first, second, overlay],
                scale,
                output,
                dry_run,
            })
            .await
        }
        Commands::Probe { path } => commands::probe::run(path),
        Commands::Check => commands::check::run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn compose_parses_options() {
        let cli = Cli::try_parse_from([
            "pipcut", "-v", "compose", "a.mov", "b.mov", "c.mov", "--scale", "0.5", "-o",
            "out.mp4", "--dry-run",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Compose {
                overlay,
                scale,
                output,
                dry_run,
                ..
            } => {
                assert_eq!(overlay, PathBuf::from("c.mov"));
                assert_eq!(scale, Some(0.5));
                assert_eq!(output, Some(PathBuf::from("out.mp4")));
                assert!(dry_run);
            }
            _ => panic!("expected compose"),
        }
    }

    #[test]
    fn compose_requires_three_clips() {
        assert!(Cli::try_parse_from(["pipcut", "compose", "a.mov", "b.mov"]).is_err());
    }
}
