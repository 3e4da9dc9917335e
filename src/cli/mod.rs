use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod logging;

#[derive(Parser, Debug)]
#[command(
    name = "nestpm",
    version,
    about = "Resolve and install npm registry and git dependencies into nested node_modules",
    long_about = "nestpm resolves dependencies from an npm-compatible registry or git, installs them into nested node_modules directories and records the result in nestpm-lock.json.\n\nExamples:\n  nestpm install\n  nestpm install left-pad@^1.3.0\n  nestpm install github:org/repo#v1.0.0 --quick\n  nestpm list"
)]
pub struct NestpmCli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the project's dependencies, or the given specifiers
    #[command(alias = "i")]
    Install {
        /// `name@range` or git URL; empty installs package.json dependencies
        specs: Vec<String>,
        #[arg(long, short = 'D')]
        dev: bool,
        /// Do not update git checkouts that are already in place
        #[arg(long)]
        quick: bool,
        #[arg(long)]
        registry: Option<String>,
        /// Project directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        no_progress: bool,
    },
    /// Show the packages recorded in the lock file
    List {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

impl NestpmCli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(&self) -> Result<()> {
        match &self.command {
            None => {
                self.print_help();
                Ok(())
            }
            Some(Commands::Install { specs, dev, quick, registry, dir, no_progress }) => {
                commands::cmd_install(commands::InstallArgs {
                    specs: specs.clone(),
                    dev: *dev,
                    quick: *quick,
                    registry: registry.clone(),
                    dir: dir.clone(),
                    no_progress: *no_progress,
                })
            }
            Some(Commands::List { dir }) => commands::cmd_list(dir),
        }
    }

    fn print_help(&self) {
        println!("nestpm - nested node_modules installer\n");
        println!(
            "Commands:\n  install [spec..] [--dev] [--quick] [--registry URL] [--dir DIR] [--no-progress]\n  list [--dir DIR]"
        );
    }
}
