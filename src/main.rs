use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ccswap::{
    commands::{self, NewSource},
    import::ConflictPolicy,
    manager::ProfileManager,
    paths::Paths,
    ui::{ColorMode, Ui},
};

/// Log filter for diagnostic events; falls back to RUST_LOG
const LOG_ENV: &str = "CCSWAP_LOG";

#[derive(Parser)]
#[command(name = "ccswap")]
#[command(about = "Configuration profile switcher - swap settings files atomically, with backups")]
#[command(version)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// When to use colors
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: ColorMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all available profiles
    #[command(visible_alias = "ls")]
    List,

    /// Show the current profile, mode and active config status
    #[command(visible_alias = "status")]
    Current,

    /// Print a profile's JSON
    Show { name: String },

    /// Create a new profile
    New {
        name: String,

        /// Capture the active config
        #[arg(long, conflicts_with_all = ["from_file", "template"])]
        from_current: bool,

        /// Copy content from a JSON file
        #[arg(long, value_name = "PATH", conflicts_with = "template")]
        from_file: Option<PathBuf>,

        /// Fill a template from the store's templates/ directory
        #[arg(long, value_name = "TEMPLATE")]
        template: Option<String>,

        /// Template answers; missing fields are prompted for
        #[arg(long = "set", value_name = "FIELD=VALUE", requires = "template")]
        set: Vec<String>,
    },

    /// List profile templates
    Templates,

    /// Switch to a profile
    Use {
        #[arg(required_unless_present = "previous")]
        name: Option<String>,

        /// Switch back to the previously active profile
        #[arg(long, short = 'p', conflicts_with = "name")]
        previous: bool,
    },

    /// Re-apply the current profile to the active config
    Refresh,

    /// Edit a profile in $EDITOR
    Edit { name: String },

    /// Remove a profile
    #[command(visible_alias = "rm")]
    Remove {
        name: String,

        /// Allow removing the current profile (enters empty mode first)
        #[arg(long)]
        current: bool,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Rename a profile
    #[command(visible_alias = "mv")]
    Rename { old_name: String, new_name: String },

    /// Copy a profile under a new name
    #[command(visible_alias = "cp")]
    Copy { src: String, dst: String },

    /// Remove the active config, keeping a copy to restore
    Empty,

    /// Leave empty mode, putting the saved config back
    Restore,

    /// Write profiles to an archive file
    Export {
        /// Archive to write
        #[arg(long, short)]
        output: PathBuf,

        /// Encrypt with a password (prompted, or from CCSWAP_PASSWORD)
        #[arg(long)]
        encrypt: bool,

        /// Profiles to include (default: all)
        names: Vec<String>,
    },

    /// Import profiles from an archive file
    Import {
        input: PathBuf,

        /// What to do with names that already exist (default from config.json)
        #[arg(long)]
        policy: Option<ConflictPolicy>,

        /// Show what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage switch backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Run diagnostics on the ccswap setup
    Doctor,

    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List backups, newest first
    List,

    /// Remove all but the newest backups
    Clean {
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
}

impl Commands {
    /// Whether the repair pass runs first: every writing command except
    /// `restore`, which resolves empty-mode state itself
    fn needs_repair(&self) -> bool {
        !matches!(
            self,
            Commands::Restore
                | Commands::List
                | Commands::Current
                | Commands::Show { .. }
                | Commands::Templates
                | Commands::Doctor
                | Commands::Completions { .. }
                | Commands::Backup {
                    command: BackupCommands::List
                }
                | Commands::Import { dry_run: true, .. }
        )
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ccswap", &mut std::io::stdout());
        return Ok(());
    }

    let ui = Ui::new(cli.color, cli.no_color);
    let paths = Paths::new()?;
    let manager = ProfileManager::open(&paths)?;

    if cli.command.needs_repair() {
        commands::repair(&manager, &ui)?;
    }

    match cli.command {
        Commands::List => commands::list(&manager, &ui),
        Commands::Current => commands::current(&manager, &ui),
        Commands::Show { name } => commands::show(&manager, &name, &ui),
        Commands::New {
            name,
            from_current,
            from_file,
            template,
            set,
        } => {
            let source = match (from_current, from_file, template) {
                (_, Some(path), _) => NewSource::File(path),
                (_, None, Some(template)) => NewSource::Template {
                    name: template,
                    answers: commands::parse_answers(&set)?,
                },
                (true, None, None) => NewSource::Current,
                (false, None, None) => anyhow::bail!(
                    "No content source given for '{}'.\nHint: Use --from-current, --from-file <path> or --template <name>.",
                    name
                ),
            };
            commands::new(&manager, &name, source, &ui)
        }
        Commands::Templates => commands::templates(&manager, &ui),
        Commands::Use { name, previous } => match name {
            Some(name) if !previous => commands::use_profile(&manager, &name, &ui),
            _ => commands::use_previous(&manager, &ui),
        },
        Commands::Refresh => commands::refresh(&manager, &ui),
        Commands::Edit { name } => commands::edit(&manager, &name, &ui),
        Commands::Remove {
            name,
            current,
            force,
        } => commands::remove(&manager, &name, current, force, &ui),
        Commands::Rename { old_name, new_name } => {
            commands::rename(&manager, &old_name, &new_name, &ui)
        }
        Commands::Copy { src, dst } => commands::copy(&manager, &src, &dst, &ui),
        Commands::Empty => commands::empty(&manager, &ui),
        Commands::Restore => commands::restore(&manager, &ui),
        Commands::Export {
            output,
            encrypt,
            names,
        } => commands::export(&manager, &names, &output, encrypt, &ui),
        Commands::Import {
            input,
            policy,
            dry_run,
        } => commands::import(&manager, &input, policy, dry_run, &ui),
        Commands::Backup { command } => match command {
            BackupCommands::List => commands::backup_list(&manager, &ui),
            BackupCommands::Clean { keep } => commands::backup_clean(&manager, keep, &ui),
        },
        Commands::Doctor => commands::doctor(&manager, &ui),
        Commands::Completions { .. } => Ok(()),
    }
}
