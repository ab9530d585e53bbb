#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;
mod ui;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use sling_core::config::{load_config, FileConfig, DEFAULT_PORT};
use sling_core::{BuildConfig, MinifyScope, ServeConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sling")]
#[command(author, version = sling_core::VERSION, about = "Bundle CommonJS modules for the browser", long_about = None)]
struct Cli {
    /// Entry module
    source: PathBuf,

    /// Bundle file to write
    destination: PathBuf,

    /// Rewrite let/const and plain template literals to older syntax
    #[arg(short = 'e', long)]
    downlevel: bool,

    /// Inline a source map into the bundle
    #[arg(short, long)]
    debug: bool,

    /// Use absolute paths as module ids
    #[arg(short, long)]
    full_paths: bool,

    /// Minify project modules
    #[arg(short, long)]
    minify: bool,

    /// Minify third-party modules too (implies --minify)
    #[arg(long)]
    minify_global: bool,

    /// Inline fs.readFileSync contents
    #[arg(short = 'b', long)]
    inline_files: bool,

    /// Lint before every build
    #[arg(short = 'j', long)]
    lint: bool,

    /// Exit non-zero if the initial lint reports errors (implies --lint)
    #[arg(long)]
    lint_terminate: bool,

    /// Linter binary
    #[arg(long, value_name = "CMD")]
    lint_command: Option<String>,

    /// Rebuild when inputs change
    #[arg(short, long)]
    watch: bool,

    /// Coalescing window for change events, in milliseconds
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Serve FOLDER (default `.`) over HTTP; pass a folder as `--serve=FOLDER`
    #[arg(
        short,
        long,
        value_name = "FOLDER",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "."
    )]
    serve: Option<PathBuf>,

    /// Preview server port
    #[arg(short, long, requires = "serve")]
    port: Option<u16>,

    /// Config file (defaults to sling.config.json in the working directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the working directory
    #[arg(long, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Layer flags over the config file. Flags only ever enable features.
    fn build_config(&self, cwd: PathBuf, file: FileConfig) -> BuildConfig {
        let file_lint = file.lint_settings();
        let mut config = file.into_build_config(cwd);

        config.debug |= self.debug;
        config.full_paths |= self.full_paths;
        config.downlevel |= self.downlevel;
        config.inline_files |= self.inline_files;
        config.watch |= self.watch;

        if self.minify_global {
            config.minify = Some(MinifyScope::Global);
        } else if self.minify && config.minify.is_none() {
            config.minify = Some(MinifyScope::Local);
        }

        if self.lint || self.lint_terminate || self.lint_command.is_some() {
            let mut lint = config.lint.take().unwrap_or(file_lint);
            lint.terminate |= self.lint_terminate;
            if let Some(command) = &self.lint_command {
                lint.command.clone_from(command);
            }
            config.lint = Some(lint);
        }

        if let Some(ms) = self.debounce_ms {
            config.debounce = Duration::from_millis(ms);
        }

        if let Some(folder) = &self.serve {
            let port = self
                .port
                .or(config.serve.as_ref().map(|s| s.port))
                .unwrap_or(DEFAULT_PORT);
            config.serve = Some(ServeConfig {
                webroot: config.absolute(folder),
                port,
            });
        }

        config
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(report) => {
            eprintln!("{report:?}");
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().into_diagnostic()?,
    };

    let file = match load_config(&cwd, cli.config.as_deref()).into_diagnostic()? {
        Some((path, file)) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            file
        }
        None => FileConfig::default(),
    };
    let config = cli.build_config(cwd, file);
    tracing::debug!(?config, "build config");

    commands::bundle::run(commands::bundle::BundleAction {
        entry: cli.source,
        destination: cli.destination,
        config,
    })
}
