//! Depot: a workspace orchestrator for TypeScript packages.
//!
//! This is the entry point. It parses the command line, loads the
//! workspace, picks the logging variant, and hands the selected command to
//! the scheduler. Exit codes: 0 on success, 1 on any aggregated failure,
//! 130 on user cancel.

mod ansi;
mod assets;
mod build;
mod bundle;
mod command;
mod logger;
mod package;
mod process;
mod scheduler;
mod serve;
mod ui;
mod util;
mod watcher;
mod workspace;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::assets::GlobalConfig;
use crate::build::BuildCommand;
use crate::command::{
    CleanCommand, Command, Context, DocCommand, FixCommand, FmtCommand, InitCommand, TestCommand,
};
use crate::logger::Logger;
use crate::package::{Platform, Target};
use crate::process::{KillSet, Runner};
use crate::workspace::Workspace;

#[derive(Debug, Parser)]
#[command(
    name = "depot",
    version,
    about = "Workspace orchestrator for TypeScript packages"
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Args, Default, Clone)]
struct CommonArgs {
    /// Restrict to these packages and their transitive dependencies.
    #[arg(short, long = "packages", num_args = 1..)]
    packages: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Scaffold a new package.
    #[command(visible_alias = "n")]
    New {
        name: String,
        /// Output shape of the package.
        #[arg(short, long, value_enum, default_value = "lib")]
        target: Target,
        /// Execution environment of the compiled output.
        #[arg(short, long, value_enum, default_value = "browser")]
        platform: Platform,
        /// Create a whole workspace around the package.
        #[arg(short, long)]
        workspace: bool,
    },
    /// Install dependencies and configure the workspace.
    Init {
        #[command(flatten)]
        common: CommonArgs,
        /// Extra arguments for the installer.
        #[arg(last = true)]
        installer_args: Vec<String>,
    },
    /// Build packages in dependency order.
    #[command(visible_alias = "b")]
    Build {
        /// Keep every tool running and show the live pane UI.
        #[arg(short, long)]
        watch: bool,
        /// Minified output without sourcemaps.
        #[arg(short, long)]
        release: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run the workspace test suite.
    #[command(visible_alias = "t")]
    Test {
        #[command(flatten)]
        common: CommonArgs,
        /// Extra arguments for the test runner.
        #[arg(last = true)]
        runner_args: Vec<String>,
    },
    /// Generate library documentation.
    #[command(visible_alias = "d")]
    Doc {
        #[command(flatten)]
        common: CommonArgs,
        /// Extra arguments for typedoc.
        #[arg(last = true)]
        typedoc_args: Vec<String>,
    },
    /// Apply the linter's automatic fixes.
    Fix {
        #[command(flatten)]
        common: CommonArgs,
        /// Extra arguments for the linter.
        #[arg(last = true)]
        linter_args: Vec<String>,
    },
    /// Format source files.
    Fmt {
        #[command(flatten)]
        common: CommonArgs,
        /// Extra arguments for the formatter.
        #[arg(last = true)]
        formatter_args: Vec<String>,
    },
    /// Remove generated files.
    #[command(visible_alias = "c")]
    Clean {
        /// Also remove managed config symlinks.
        #[arg(short, long)]
        all: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Forward to `pnpm add`.
    #[command(disable_help_flag = true)]
    Add {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Forward to `pnpm update`.
    #[command(disable_help_flag = true)]
    Update {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Forward to `pnpm link`.
    #[command(disable_help_flag = true)]
    Link {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Clean, reinstall, build, and test from scratch.
    CommitCheck,
    /// Install and build for release.
    Prepare,
}

/// One scheduler-visible command invocation; macro aliases expand to a
/// sequence of these.
enum Invocation {
    Build {
        watch: bool,
        release: bool,
        common: CommonArgs,
    },
    Clean {
        all: bool,
        common: CommonArgs,
    },
    Doc {
        extra: Vec<String>,
        common: CommonArgs,
    },
    Fix {
        extra: Vec<String>,
        common: CommonArgs,
    },
    Fmt {
        extra: Vec<String>,
        common: CommonArgs,
    },
    Init {
        extra: Vec<String>,
        common: CommonArgs,
    },
    Test {
        extra: Vec<String>,
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            // Full chain with backtraces in dev, message-only in release.
            if cfg!(debug_assertions) {
                eprintln!("depot failed:\n{err:?}");
            } else {
                eprintln!("depot failed: {err:#}");
            }
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DEPOT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let kills = KillSet::new();
    process::spawn_signal_handler(kills.clone());

    let invocations = match cli.command {
        Cmd::New {
            name,
            target,
            platform,
            workspace,
        } => {
            let cwd = std::env::current_dir()?;
            command::scaffold(&cwd, &name, target, platform, workspace)?;
            return Ok(0);
        }
        Cmd::Add { args } => return passthrough("add", args).await,
        Cmd::Update { args } => return passthrough("update", args).await,
        Cmd::Link { args } => return passthrough("link", args).await,
        Cmd::Build {
            watch,
            release,
            common,
        } => vec![Invocation::Build {
            watch,
            release,
            common,
        }],
        Cmd::Clean { all, common } => vec![Invocation::Clean { all, common }],
        Cmd::Doc {
            common,
            typedoc_args,
        } => vec![Invocation::Doc {
            extra: typedoc_args,
            common,
        }],
        Cmd::Fix {
            common,
            linter_args,
        } => vec![Invocation::Fix {
            extra: linter_args,
            common,
        }],
        Cmd::Fmt {
            common,
            formatter_args,
        } => vec![Invocation::Fmt {
            extra: formatter_args,
            common,
        }],
        Cmd::Init {
            common,
            installer_args,
        } => vec![Invocation::Init {
            extra: installer_args,
            common,
        }],
        Cmd::Test {
            common,
            runner_args,
        } => vec![Invocation::Test {
            extra: runner_args,
            common,
        }],
        Cmd::CommitCheck => vec![
            Invocation::Clean {
                all: false,
                common: CommonArgs::default(),
            },
            Invocation::Init {
                extra: Vec::new(),
                common: CommonArgs::default(),
            },
            Invocation::Build {
                watch: false,
                release: false,
                common: CommonArgs::default(),
            },
            Invocation::Test {
                extra: Vec::new(),
                common: CommonArgs::default(),
            },
        ],
        Cmd::Prepare => vec![
            Invocation::Init {
                extra: Vec::new(),
                common: CommonArgs::default(),
            },
            Invocation::Build {
                watch: false,
                release: true,
                common: CommonArgs::default(),
            },
        ],
    };

    for invocation in invocations {
        if !dispatch(invocation, &kills).await? {
            return Ok(1);
        }
    }
    Ok(0)
}

/// Loads the workspace and runs one command through the scheduler.
async fn dispatch(invocation: Invocation, kills: &KillSet) -> Result<bool> {
    let config = GlobalConfig::load()?;
    let ws = Arc::new(Workspace::load(None).await?);

    let (cmd, common) = match invocation {
        Invocation::Build {
            watch,
            release,
            common,
        } => (
            Command::Build(BuildCommand { watch, release }),
            common,
        ),
        Invocation::Clean { all, common } => (
            Command::Clean(CleanCommand {
                all,
                config: config.clone(),
            }),
            common,
        ),
        Invocation::Doc { extra, common } => (Command::Doc(DocCommand { extra }), common),
        Invocation::Fix { extra, common } => (Command::Fix(FixCommand { extra }), common),
        Invocation::Fmt { extra, common } => (Command::Fmt(FmtCommand { extra }), common),
        Invocation::Init { extra, common } => (
            Command::Init(InitCommand {
                config: config.clone(),
                extra,
            }),
            common,
        ),
        Invocation::Test { extra, common } => (Command::Test(TestCommand { extra }), common),
    };

    let logger = Arc::new(build_logger(&cmd, &ws, &common, kills)?);
    logger.start()?;

    let runner = Runner::new(&ws.root, &config, kills.clone());
    let cx = Arc::new(Context {
        runner,
        logger: Arc::clone(&logger),
    });

    let ok = scheduler::run(Arc::clone(&ws), Arc::new(cmd), cx, &common.packages).await?;
    logger.end()?;
    Ok(ok)
}

/// Watch builds get the live pane UI; everything else collects and dumps.
fn build_logger(
    cmd: &Command,
    ws: &Workspace,
    common: &CommonArgs,
    kills: &KillSet,
) -> Result<Logger> {
    if let Command::Build(build) = cmd {
        if build.watch {
            let names = ws
                .dependency_closure(&common.packages)?
                .into_iter()
                .map(|pkg| pkg.name.to_string())
                .collect::<Vec<_>>();
            let visible = if common.packages.len() == 1 {
                names
                    .iter()
                    .position(|name| *name == common.packages[0])
                    .unwrap_or(0)
            } else {
                0
            };
            return Ok(Logger::watch(names, visible, kills.clone()));
        }
    }
    Ok(Logger::once())
}

/// Execs the installer with the forwarded argv, inheriting stdio.
async fn passthrough(subcommand: &str, args: Vec<String>) -> Result<i32> {
    let status = tokio::process::Command::new("pnpm")
        .arg(subcommand)
        .args(args)
        .status()
        .await
        .context("failed to run pnpm")?;
    Ok(status.code().unwrap_or(1))
}
