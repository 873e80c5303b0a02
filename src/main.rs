use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kanban::CardError;
use kanban::config::KanbanConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "kanban")]
#[command(version, about = "Kanban cards with gated stage transitions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// User recorded as author and actor (defaults to $USER)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a kanban project in the current directory
    Init,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage boards
    Board {
        #[command(subcommand)]
        command: BoardCommands,
    },
    /// Manage a board's stages
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Create, change and move cards
    Card {
        #[command(subcommand)]
        command: CardCommands,
    },
    /// Manage acceptance criteria of a card
    Criteria {
        #[command(subcommand)]
        command: CriteriaCommands,
    },
    /// Show the activity feed of a card
    Activity { card: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default kanban.toml file
    Init,
}

#[derive(Subcommand, Clone)]
pub enum BoardCommands {
    /// Create a board
    Add {
        name: String,
        /// Card code prefix (defaults to codes.default_prefix)
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List boards
    List,
    /// Show a board with its stages and cards
    Show { board: String },
}

#[derive(Subcommand, Clone)]
pub enum StageCommands {
    /// Add a stage to a board
    Add {
        board: String,
        title: String,
        /// todo, in-process, done or archived
        #[arg(long, default_value = "todo")]
        status: String,
        /// Maximum number of active cards
        #[arg(long)]
        wip: Option<u32>,
    },
    /// List a board's stages
    List { board: String },
}

#[derive(Subcommand, Clone)]
pub enum CardCommands {
    /// Create a card in a todo stage
    Create {
        board: String,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        deadline: Option<String>,
        #[arg(long)]
        sort: Option<i64>,
    },
    /// Change a card; fields not given keep their current value
    Modify {
        card: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long, conflicts_with = "clear_parent")]
        parent: Option<String>,
        #[arg(long)]
        clear_parent: bool,
        #[arg(long)]
        sort: Option<i64>,
        #[arg(long, conflicts_with = "clear_deadline")]
        deadline: Option<String>,
        #[arg(long)]
        clear_deadline: bool,
    },
    /// Move cards into a stage, in the order given
    Move {
        #[arg(required = true)]
        cards: Vec<String>,
        #[arg(long)]
        stage: String,
        /// Sort number of the first card; the rest follow
        #[arg(long)]
        sort: Option<i64>,
    },
    /// Move a card into an archived stage without transition checks
    Archive {
        card: String,
        #[arg(long)]
        stage: String,
        #[arg(long, default_value = "0")]
        sort: i64,
    },
    /// Delete a card and all of its children
    Delete { card: String },
    /// Show a card with its criteria and children
    Show { card: String },
    /// List the cards of a stage
    List {
        #[arg(long)]
        stage: String,
    },
    /// List the child cards of a card
    Children { card: String },
}

#[derive(Subcommand, Clone)]
pub enum CriteriaCommands {
    /// Add an acceptance criterion to a card
    Add { card: String, summary: String },
    /// Set a criterion's status
    Set {
        id: String,
        /// unverified, unpassed or passed
        #[arg(long)]
        status: String,
        /// Mark the criterion as finished
        #[arg(long)]
        finished: bool,
    },
    /// List a card's acceptance criteria
    List { card: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        if let Some(card_err) = err.downcast_ref::<CardError>() {
            eprintln!("error[{}]: {}", card_err.code(), card_err);
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => return cmd::cmd_init(&project_dir),
        Commands::Config { command } => return cmd::cmd_config(&project_dir, command.clone()),
        _ => {}
    }

    let config = KanbanConfig::with_cli_args(project_dir, cli.verbose)?;
    kanban::logging::init(&config)?;
    let session = cmd::Session::open(config, cli.user, cli.json)?;

    match cli.command {
        Commands::Init | Commands::Config { .. } => {}
        Commands::Board { command } => cmd::cmd_board(&session, command).await?,
        Commands::Stage { command } => cmd::cmd_stage(&session, command).await?,
        Commands::Card { command } => cmd::cmd_card(&session, command).await?,
        Commands::Criteria { command } => cmd::cmd_criteria(&session, command).await?,
        Commands::Activity { card } => cmd::cmd_activity(&session, card).await?,
    }

    Ok(())
}
