use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};

use alphalabel::color_utils::{colors, init_color_config, symbols};
use alphalabel::config::{
    AssembleCommand, AssembleConfig, GlobalArgs, PreviewCommand, PreviewConfig, RemoveCommand,
    RemoveConfig, SplitCommand, SplitConfig, StrategyKind,
};
use alphalabel::corpus::run_assembly;
use alphalabel::preview::run_preview;
use alphalabel::removal::run_removal;
use alphalabel::split::run_split;
use std::io::Write;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Remove backgrounds from every class folder into a masked mirror tree
    Remove(RemoveCommand),

    /// Split class folders into train and validation directories
    Split(SplitCommand),

    /// Build a labeled detection corpus: remove, annotate, split, write data.yaml
    Assemble(AssembleCommand),

    /// Draw label boxes over corpus images for a visual check
    Preview(PreviewCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "alphalabel")]
#[command(about = "Detection corpus builder driven by transparency masks")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    if verbosity.is_silent() {
        return log::LevelFilter::Error; // -q
    }
    match verbosity.log_level_filter() {
        log::LevelFilter::Off => log::LevelFilter::Off, // -qq
        log::LevelFilter::Error => log::LevelFilter::Warn, // default
        log::LevelFilter::Warn => log::LevelFilter::Info, // -v
        log::LevelFilter::Info => log::LevelFilter::Debug, // -vv
        log::LevelFilter::Debug | log::LevelFilter::Trace => log::LevelFilter::Trace,
    }
}

fn init_logging(global: &GlobalArgs) {
    // Without -v/-q, honor RUST_LOG when it is set
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(get_log_level_from_verbosity(global.verbosity.clone()));
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{} {context}: {e}", symbols::operation_failed());
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();
    init_color_config(cli.global.no_color);
    init_logging(&cli.global);

    match &cli.command {
        Some(Commands::Remove(cmd)) => {
            info!(
                "{} Background removal: {} -> {} | strategy: {:?}",
                symbols::background_removal_start(),
                cmd.source_root.display(),
                cmd.output_dir.display(),
                cmd.removal.strategy
            );
            let config = RemoveConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid configuration", e));
            if let Err(e) = run_removal(&config) {
                fail("Background removal failed", e);
            }
        }
        Some(Commands::Split(cmd)) => {
            info!(
                "{} Split: {} | ratio: {} | seed: {}",
                symbols::split_start(),
                cmd.source_root.display(),
                cmd.val_ratio,
                cmd.seed
            );
            let config = SplitConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid configuration", e));
            if let Err(e) = run_split(&config) {
                fail("Split failed", e);
            }
        }
        Some(Commands::Assemble(cmd)) => {
            info!(
                "{} Corpus assembly: {} -> {} | ratio: {} | seed: {}",
                symbols::annotation_start(),
                cmd.source_root.display(),
                cmd.corpus_dir.display(),
                cmd.val_ratio,
                cmd.seed
            );

            let mut outputs = vec!["images", "labels", "data.yaml"];
            if cmd.removal.strategy != StrategyKind::None {
                outputs.insert(0, "masked");
            }
            if cli.global.metadata {
                outputs.push("assembly.toml");
            }
            info!("   Outputs: {}", outputs.join(", "));

            let config = AssembleConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid configuration", e));
            if let Err(e) = run_assembly(config) {
                fail("Corpus assembly failed", e);
            }
        }
        Some(Commands::Preview(cmd)) => {
            let config = PreviewConfig::from_args(cli.global.clone(), cmd.clone())
                .unwrap_or_else(|e| fail("Invalid configuration", e));
            if let Err(e) = run_preview(&config) {
                fail("Preview failed", e);
            }
        }
        Some(Commands::Version) => {
            println!("alphalabel v{}", env!("CARGO_PKG_VERSION"));
            println!("{}", env!("CARGO_PKG_DESCRIPTION"));
        }
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            if let Err(e) = cmd.print_help() {
                fail("Could not print help", e);
            }
        }
    }
}
