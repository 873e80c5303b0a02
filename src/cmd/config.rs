//! Configuration view and validation commands: `kanban config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use kanban::config::{CONFIG_FILE, KanbanConfig, KanbanToml};
    use kanban::init::get_kanban_dir;

    let kanban_dir = get_kanban_dir(project_dir);
    let config_path = kanban_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Kanban Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                KanbanToml::load(&config_path)?
            } else {
                println!("No kanban.toml found at {}", config_path.display());
                println!("Using default configuration.");
                KanbanToml::default()
            };
            println!();
            println!("[storage]");
            println!("  db_path = \"{}\"", toml.storage.db_path);
            println!("[cache]");
            println!("  enabled = {}", toml.cache.enabled);
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  json = {}", toml.logging.json);
            println!("[codes]");
            println!("  default_prefix = \"{}\"", toml.codes.default_prefix);
            println!();

            if project_dir.exists() {
                let config = KanbanConfig::new(project_dir.to_path_buf())?;
                println!("Effective values (with env overrides):");
                println!("  db_path = \"{}\"", config.db_path().display());
                println!("  log filter = \"{}\"", config.log_filter());
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No kanban.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = KanbanToml::load(&config_path)?.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("kanban.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&kanban_dir)?;
            KanbanToml::default().save(&config_path)?;
            println!("Created kanban.toml at {}", config_path.display());
        }
    }

    Ok(())
}
