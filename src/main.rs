use clap::{Parser, Subcommand};
use media_batch::engine::{CompressParams, ConvertParams, Engine, Started};
use media_batch::{config, inventory, logging, output};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Flags shared by the batch commands.
#[derive(clap::Args, Clone)]
struct WorkerArgs {
    /// Files transformed in parallel (1-32); defaults to processing.max_workers
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Parser)]
#[command(name = "media-batch")]
#[command(about = "Bulk compression and format conversion for media libraries")]
#[command(long_about = "\
Bulk compression and format conversion for media libraries

Select files or folders and transform every supported file inside them in
parallel, with live progress. Press Enter during a run to stop it: files
already being processed finish, the rest are left untouched.

  compress   rewrite files in place at a lower quality
  convert    write each file in another format and delete the original
             (PDF-like documents become one image per page and are kept)

Conversion never overwrites an existing file, so re-running an interrupted
batch simply continues where it stopped.

External tools (found on PATH at startup):
  magick     required for conversion, fallback for compression
  jpegoptim  preferred for JPEG compression
  pngquant   preferred for PNG compression
  cwebp      preferred for WebP

Run 'media-batch gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress files in place
    Compress {
        /// Files or directories to compress
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Encoding quality (1-100)
        #[arg(long)]
        quality: Option<u32>,
        /// Leave files at or below this many bytes alone
        #[arg(long)]
        min_size: Option<u64>,
        #[command(flatten)]
        workers: WorkerArgs,
    },
    /// Convert files to another format
    Convert {
        /// Files or directories to convert
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Target format extension, e.g. jpg, png, webp
        #[arg(long)]
        to: Option<String>,
        /// Encoding quality (1-100)
        #[arg(long)]
        quality: Option<u32>,
        /// Leave PDF-like documents out of the batch
        #[arg(long)]
        skip_pdf: bool,
        #[command(flatten)]
        workers: WorkerArgs,
    },
    /// Lowercase uppercase extensions of media files (IMG_1.JPG → IMG_1.jpg)
    FixExtensions {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Count files and bytes per extension
    Stats {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List folders and media files in a directory under base_dir
    List {
        /// Directory to list; defaults to base_dir
        dir: Option<PathBuf>,
    },
    /// Find folders and media files by name under base_dir
    Search {
        /// Directory to search in
        root: PathBuf,
        /// Case-insensitive substring of the file name
        pattern: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Show which external tools were found and which formats can be written
    Tools,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    logging::init(cli.log_dir.as_deref())?;
    let config = config::load_config(&cli.config_dir)?;
    let formats = config.formats.table();

    match cli.command {
        Command::Compress {
            paths,
            quality,
            min_size,
            workers,
        } => {
            let defaults = CompressParams::from_config(&config);
            let params = CompressParams {
                quality: quality.unwrap_or(defaults.quality),
                min_size: min_size.unwrap_or(defaults.min_size),
                max_workers: workers.workers.unwrap_or(defaults.max_workers),
            };
            let engine = Arc::new(Engine::new(config));
            let started = engine.compress(&paths, &params)?;
            follow_run(&engine, &started, cli.json)?;
        }
        Command::Convert {
            paths,
            to,
            quality,
            skip_pdf,
            workers,
        } => {
            let defaults = ConvertParams::from_config(&config);
            let params = ConvertParams {
                target_format: to.unwrap_or(defaults.target_format),
                quality: quality.unwrap_or(defaults.quality),
                max_workers: workers.workers.unwrap_or(defaults.max_workers),
                skip_pdf_like_inputs: skip_pdf || defaults.skip_pdf_like_inputs,
            };
            let engine = Arc::new(Engine::new(config));
            let started = engine.convert(&paths, &params)?;
            follow_run(&engine, &started, cli.json)?;
        }
        Command::FixExtensions { paths } => {
            let renamed = inventory::fix_extensions(&paths, &formats)?;
            if cli.json {
                print_json(&serde_json::json!({ "processed": renamed }))?;
            } else {
                println!("Renamed {renamed} files");
            }
        }
        Command::Stats { paths } => {
            let stats = inventory::count_formats(&paths)?;
            if cli.json {
                print_json(&stats)?;
            } else {
                output::print_format_stats(&stats);
            }
        }
        Command::List { dir } => {
            let listing = inventory::list_directory(&config.base_dir, dir.as_deref(), &formats)?;
            if cli.json {
                print_json(&listing)?;
            } else {
                output::print_listing(&listing);
            }
        }
        Command::Search {
            root,
            pattern,
            limit,
        } => {
            let results = inventory::search(&config.base_dir, &root, &pattern, limit, &formats)?;
            if cli.json {
                print_json(&results)?;
            } else {
                output::print_search_results(&results);
            }
        }
        Command::Tools => {
            let engine = Engine::new(config);
            let writable = engine.writable_formats();
            if cli.json {
                let tools: BTreeMap<&str, bool> = engine.tool_availability().iter().collect();
                print_json(&serde_json::json!({ "tools": tools, "writable_formats": writable }))?;
            } else {
                output::print_tools(engine.tool_availability(), &writable);
            }
        }
        Command::GenConfig => unreachable!("handled before logging is set up"),
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Poll the engine until the run completes, printing progress as it changes.
/// A line on stdin requests a stop.
fn follow_run(engine: &Arc<Engine>, started: &Started, json: bool) -> Result<(), serde_json::Error> {
    if !json {
        println!("{}", output::format_started(started));
    }

    let stopper = Arc::clone(engine);
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            stopper.request_stop();
            eprintln!("Stopping after files in progress...");
        }
    });

    let mut last_line = String::new();
    loop {
        let snapshot = engine.progress();
        if !json {
            let line = output::format_progress_line(&snapshot);
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
        }
        if !snapshot.is_running() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    engine.wait();

    let snapshot = engine.progress();
    if json {
        print_json(&snapshot)?;
    } else {
        output::print_summary(&snapshot);
    }
    Ok(())
}
