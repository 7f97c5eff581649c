use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use unicode_width::UnicodeWidthStr;

use spm::config::Config;
use spm::manifest::Origin;
use spm::{Manager, SpmError};

/// Global flags apply to every subcommand and override the `Config`
/// defaults (§6 "Global flags").
#[derive(Parser, Debug)]
#[command(name = "sk", version, about = "Skill package manager for voice-assistant skills")]
struct Cli {
    #[arg(long, global = true)]
    platform: Option<String>,
    #[arg(long, global = true)]
    repo_url: Option<String>,
    #[arg(long, global = true)]
    repo_branch: Option<String>,
    #[arg(long, global = true)]
    repo_cache: Option<PathBuf>,
    #[arg(long, global = true)]
    skills_dir: Option<PathBuf>,
    /// Track branch tips instead of catalog-pinned commits.
    #[arg(long, global = true)]
    latest: bool,
    /// Suppress info-level logging.
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install one skill by name or URL.
    Install {
        skill: String,
        author: Option<String>,
    },
    /// Remove one skill.
    Remove {
        skill: String,
        author: Option<String>,
    },
    /// Update every locally-installed skill.
    Update,
    /// Install the platform's default skill set, then update the rest.
    Default,
    /// List the catalog, optionally only locally-installed skills.
    List {
        #[arg(long)]
        installed: bool,
    },
    /// Print the names of every skill matching `query` (score >= 0.3).
    Search {
        query: String,
        author: Option<String>,
    },
    /// Print one skill's name, author, url, and install path.
    Info {
        skill: String,
        author: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.raw);

    let cfg = match build_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e:#}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };
    let manager = match Manager::new(cfg, spm::paths::manifest_path(), spm::paths::lock_file_path()) {
        Ok(m) => m,
        Err(e) => return fail(&e),
    };

    match run(&manager, cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => fail(&e),
    }
}

fn init_tracing(raw: bool) {
    let default_directive = if raw { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Load the persisted CLI defaults (teacher's `config.rs` `load_or_default`
/// pattern), apply this invocation's flags over them, then persist them back
/// if no config file existed yet.
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = Config::load_or_default().context("loading configuration")?;
    if let Some(platform) = &cli.platform {
        cfg.platform = platform.clone();
    }
    if let Some(url) = &cli.repo_url {
        cfg.repo_url = url.clone();
    }
    if let Some(branch) = &cli.repo_branch {
        cfg.repo_branch = branch.clone();
    }
    if let Some(cache) = &cli.repo_cache {
        cfg.repo_cache = cache.clone();
    }
    if let Some(dir) = &cli.skills_dir {
        cfg.skills_dir = dir.clone();
    }
    if cli.latest {
        cfg.versioned = false;
    }
    cfg.save_if_missing().context("persisting configuration")?;
    Ok(cfg)
}

fn fail(e: &SpmError) -> ExitCode {
    eprintln!("{}: {}", "error".red().bold(), e);
    ExitCode::from(e.exit_code() as u8)
}

/// Dispatch one subcommand. Returns `Ok(false)` for "operation returned no
/// change" (§6 exit codes), `Ok(true)` otherwise.
fn run(manager: &Manager, command: Command) -> spm::Result<bool> {
    match command {
        Command::Install { skill, author } => {
            let d = manager.install(&skill, author.as_deref(), None, Origin::Cli)?;
            println!("installed {} ({})", d.name, d.id);
            Ok(true)
        }
        Command::Remove { skill, author } => {
            manager.remove(&skill, author.as_deref())?;
            println!("removed {skill}");
            Ok(true)
        }
        Command::Update => {
            let results = manager.update_all()?;
            let changed = results.iter().filter(|c| **c).count();
            println!("updated {changed}/{} skills", results.len());
            Ok(changed > 0)
        }
        Command::Default => {
            let results = manager.install_defaults()?;
            let changed = results.iter().filter(|c| **c).count();
            println!("default set: {changed}/{} ok", results.len());
            Ok(changed > 0)
        }
        Command::List { installed } => {
            let skills = if installed {
                manager.local_skills()?
            } else {
                manager.list()?
            };
            let stdout_is_tty = std::io::stdout().is_terminal();
            let max_name_width = skills
                .iter()
                .map(|d| UnicodeWidthStr::width(d.name.as_str()))
                .max()
                .unwrap_or(0);
            for d in &skills {
                let marker = if d.is_local { "*" } else { " " };
                let name_width = UnicodeWidthStr::width(d.name.as_str());
                let colored_name = if stdout_is_tty {
                    d.name.clone().bold().to_string()
                } else {
                    d.name.clone()
                };
                let gap = max_name_width.saturating_sub(name_width) + 2;
                let padding = " ".repeat(gap);
                println!("{marker} {colored_name}{padding}{}", d.author);
            }
            Ok(true)
        }
        Command::Search { query, author } => {
            let candidates = manager.list()?;
            let matches = spm::resolver::search(&query, author.as_deref(), &candidates);
            for d in &matches {
                println!("{}", d.name);
            }
            Ok(!matches.is_empty())
        }
        Command::Info { skill, author } => {
            let candidates = manager.list()?;
            let d = spm::resolver::find(&skill, author.as_deref(), &candidates, manager.skills_dir())?;
            println!("name:   {}", d.name);
            println!("author: {}", d.author);
            println!("url:    {}", d.url);
            if d.is_local {
                println!("path:   {}", d.local_path.display());
            } else {
                println!("path:   Not installed");
            }
            Ok(true)
        }
    }
}
