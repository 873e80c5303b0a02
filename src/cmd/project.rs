//! Project initialization: `kanban init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use kanban::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized kanban project at {}",
            result.kanban_dir.display()
        );
        println!();
        println!("Created:");
        println!("  .kanban/");
        println!("  ├── kanban.toml   # Configuration (see `kanban config`)");
        println!("  └── kanban.db     # Boards, stages, cards");
        println!();
        println!("Next steps:");
        println!("  1. Run `kanban board add <name>` to create a board");
        println!("  2. Run `kanban stage add <board> <title> --status todo` for each column");
        println!("  3. Run `kanban card create <board> --stage <stage> --title <title>`");
    } else if was_initialized {
        println!(
            "Kanban project already initialized at {}",
            result.kanban_dir.display()
        );
        println!("Database: {}", result.db_path.display());
    }

    Ok(())
}
