use clap::Parser;
use pagesmith::build::{BuildError, BuildReport, Pipeline};
use pagesmith::config::{self, BuildConfig};
use pagesmith::serve::DevServer;
use pagesmith::{eject, output, watch};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(about = "Build a static site from a plain directory tree")]
#[command(long_about = "\
Build a static site from a plain directory tree

Every directory with a README.md, page.js or page.html becomes a page at the
same path. Layouts, styles, client scripts and variables are found by name:

  site/
  ├── pagesmith.toml               # Optional config (dest, ignore, copy, ...)
  ├── global.css                   # Stylesheet for every page
  ├── global.client.js             # Script for every page
  ├── global.vars.json             # Variables for every page
  ├── root.layout.js               # The default layout
  ├── README.md                    # → index.html
  ├── notes.md                     # → notes.html
  ├── feed.json.template.js        # → feed.json
  └── blog/
      ├── page.js                  # → blog/index.html
      ├── page.vars.js             # Variables for this page
      ├── style.css                # Stylesheet for this page
      └── client.js                # Script for this page

Anything else is copied to the output unchanged.

Variables merge in order: global, page, post-render, then builder vars.
Set RUST_LOG=pagesmith=debug for detailed logs.")]
#[command(version = env!("PAGESMITH_VERSION"))]
struct Cli {
    /// Source directory
    #[arg(long, default_value = ".")]
    src: PathBuf,

    /// Output directory (default: `dest` from pagesmith.toml, or <src>/public)
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Extra ignore patterns, comma separated
    #[arg(long, value_delimiter = ',')]
    ignore: Vec<String>,

    /// Directory whose contents are copied into the output root
    #[arg(long)]
    copy: Vec<String>,

    /// Write the default style and client into the source directory and exit
    #[arg(long)]
    eject: bool,

    /// Build, then rebuild on change and serve the output
    #[arg(long, conflicts_with = "watch_only")]
    watch: bool,

    /// Like --watch, without the initial build
    #[arg(long)]
    watch_only: bool,

    /// Dev server port
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagesmith=info")),
        )
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.eject {
        return match eject::eject(&cli.src) {
            Ok(written) => {
                for path in written {
                    println!("wrote {}", path.display());
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                output::print_error(&err);
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            output::print_error(&err);
            return ExitCode::FAILURE;
        }
    };
    init_thread_pool(&config.processing);

    let mut pipeline = Pipeline::new(&cli.src, config);
    if let Some(dest) = &cli.dest {
        pipeline = pipeline.with_dest(resolve_dest(dest));
    }

    if !(cli.watch || cli.watch_only) {
        return if report_build(pipeline.build()) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    if cli.watch {
        report_build(pipeline.build());
    }
    match serve_and_watch(Arc::new(pipeline)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::print_error(err.as_ref());
            ExitCode::FAILURE
        }
    }
}

/// Config file, then command-line overrides.
fn load_config(cli: &Cli) -> Result<BuildConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.src)?;
    config.ignore.extend(cli.ignore.iter().cloned());
    config.copy.extend(cli.copy.iter().cloned());
    if let Some(port) = cli.port {
        config.serve.port = port;
    }
    config.validate()?;
    Ok(config)
}

/// `--dest` is relative to the working directory, not the source root.
fn resolve_dest(dest: &Path) -> PathBuf {
    std::path::absolute(dest).unwrap_or_else(|_| dest.to_path_buf())
}

/// Print a build's results. Returns whether it succeeded.
fn report_build(result: Result<BuildReport, BuildError>) -> bool {
    match result {
        Ok(report) => {
            output::print_build_output(&report);
            output::print_warnings(&report.warnings);
            true
        }
        Err(err) => {
            match err.report() {
                Some(report) => {
                    output::print_build_output(report);
                    output::print_warnings(&report.warnings);
                    output::print_errors(&report.errors);
                }
                None => output::print_error(&err),
            }
            false
        }
    }
}

/// Serve the output and rebuild on change until Ctrl+C.
fn serve_and_watch(pipeline: Arc<Pipeline>) -> Result<(), Box<dyn std::error::Error>> {
    let server = DevServer::bind(pipeline.dest(), &pipeline.config().serve)?;
    let watcher = watch::watch(
        pipeline.clone(),
        Arc::new(|result: Result<BuildReport, BuildError>| {
            report_build(result);
        }),
    )?;

    let watcher = Arc::new(Mutex::new(Some(watcher)));
    let stopping = watcher.clone();
    server.shutdown_on_ctrlc(move || {
        let handle = stopping.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.stop();
        }
    })?;

    println!("Serving {} at http://{}", pipeline.dest().display(), server.addr());
    server.run();
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
