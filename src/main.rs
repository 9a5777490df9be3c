//! extlink CLI - runs a host against an extension, or the demo extension.
//!
//! This is the main binary entry point. See the `extlink` library for the
//! core functionality.

use anyhow::{Context, Result};
use extlink::demo::{self, DemoOptions};
use extlink::host::{spawn_extension, AutoAcceptDriver};
use extlink::{run_extension, Config, Host, HostExit, Launch};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Runs one extension under a host and returns its exit status.
///
/// SIGINT/SIGTERM to the host are forwarded to the extension as SIGTERM;
/// its handler sends QUIT, so the serve loop ends normally.
fn run_host(config_path: Option<PathBuf>, command: Vec<OsString>) -> Result<i32> {
    let config = match config_path {
        Some(path) => Config::load_from_file(&path)?,
        None => Config::load()?,
    };
    let (program, args) = command
        .split_first()
        .context("no extension program given")?;

    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;

    let (mut child, channel) = spawn_extension(program, args)?;
    let child_pid = child.id() as libc::pid_t;

    let served = Arc::new(AtomicBool::new(false));
    let watcher = {
        let served = Arc::clone(&served);
        std::thread::spawn(move || {
            while !served.load(Ordering::Relaxed) {
                if SHUTDOWN_FLAG.load(Ordering::Relaxed) {
                    log::info!("[host] shutdown requested, signalling extension");
                    // SAFETY: plain kill(2) on our own child.
                    unsafe { libc::kill(child_pid, libc::SIGTERM) };
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })
    };

    let mut host = Host::new(channel, AutoAcceptDriver).with_config(&config);
    let outcome = host.serve();
    served.store(true, Ordering::Relaxed);
    let _ = watcher.join();
    drop(host);

    let status = child.wait().context("Failed to wait for extension")?;
    match outcome {
        Ok(HostExit::Quit) => log::info!("[host] extension quit ({status})"),
        Ok(HostExit::Disconnected) => log::warn!("[host] extension disconnected ({status})"),
        Err(e) => log::error!("[host] protocol failure: {e}"),
    }
    Ok(status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1))
}

// CLI
#[derive(Parser)]
#[command(name = "extlink")]
#[command(version)]
#[command(about = "Host/extension IPC over pipes and shared memory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a host serving one extension: extlink host -- <program> [args...]
    Host {
        /// JSON config file (defaults to EXTLINK_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Extension program and its arguments
        #[arg(last = true, required = true)]
        command: Vec<OsString>,
    },
    /// Show the effective configuration, or write it to a file
    Config {
        /// Write the JSON here instead of printing it
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Built-in demo extension
    Demo {
        /// Image width
        #[arg(long, default_value_t = 64)]
        width: u32,
        /// Image height
        #[arg(long, default_value_t = 32)]
        height: u32,
        /// Crash on purpose after creating the image
        #[arg(long, hide = true)]
        fault: bool,
        /// Pipe descriptors appended by the host
        #[arg(long, num_args = 2, value_names = ["READ_FD", "WRITE_FD"])]
        extlink: Option<Vec<u32>>,
    },
}

fn main() -> Result<()> {
    // EXTLINK_LOG_FILE sends logs to a file; otherwise stderr
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("EXTLINK_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();

    // Set up panic hook to log panics
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Host { config, command } => {
            let code = run_host(config, command)?;
            std::process::exit(code);
        }
        Commands::Config { output } => {
            let config = Config::load()?;
            match output {
                Some(path) => {
                    config.save(&path)?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
        Commands::Demo {
            width,
            height,
            fault,
            extlink: _,
        } => {
            let config = Config::load()?;
            let args: Vec<String> = std::env::args().collect();
            let options = DemoOptions {
                width,
                height,
                fault,
            };
            let launch = run_extension(&config, &args, |session| {
                let report = demo::run(session, &options)?;
                log::info!("[demo] finished: {report:?}");
                Ok(())
            });
            if launch == Launch::Standalone {
                println!("extlink demo: not running under a host, nothing to do");
            }
        }
    }

    Ok(())
}
