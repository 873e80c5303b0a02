//! Board and stage setup: `kanban board`, `kanban stage`.

use anyhow::Result;
use std::str::FromStr;

use kanban::workflow::{Board, BoardView, Stage, StageStatus};
use kanban::{CardError, Missing};

use super::super::{BoardCommands, StageCommands};
use super::{Session, card_line};

pub async fn cmd_board(session: &Session, command: BoardCommands) -> Result<()> {
    match command {
        BoardCommands::Add { name, prefix } => {
            let prefix = prefix.unwrap_or_else(|| session.config.toml.codes.default_prefix.clone());
            let board = session
                .db
                .call(move |db| db.create_board(&name, &prefix))
                .await?;
            session.emit(&board, |b: &Board| {
                println!("Created board '{}' ({})", b.name, b.id);
            })
        }
        BoardCommands::List => {
            let boards = session.db.call(|db| db.list_boards()).await?;
            session.emit(&boards, |boards: &Vec<Board>| {
                if boards.is_empty() {
                    println!("No boards. Run 'kanban board add <name>' to create one.");
                }
                for b in boards {
                    println!("{:<24} prefix {:<8} ({})", b.name, b.code_prefix, b.id);
                }
            })
        }
        BoardCommands::Show { board } => {
            let view = session.service.board_view(&board).await?;
            session.emit(&view, print_board_view)
        }
    }
}

pub async fn cmd_stage(session: &Session, command: StageCommands) -> Result<()> {
    match command {
        StageCommands::Add {
            board,
            title,
            status,
            wip,
        } => {
            let status = StageStatus::from_str(&status).map_err(anyhow::Error::msg)?;
            let exists = {
                let board = board.clone();
                session.db.call(move |db| db.get_board(&board)).await?
            };
            if exists.is_none() {
                return Err(CardError::from(Missing::Board { id: board }).into());
            }
            let stage = session
                .db
                .call(move |db| db.create_stage(&board, &title, status, wip))
                .await?;
            session.emit(&stage, |s: &Stage| {
                println!("Created stage '{}' [{}] ({})", s.title, s.status.as_str(), s.id);
            })
        }
        StageCommands::List { board } => {
            let stages = session.service.engine().stages().find_by_board_id(&board).await?;
            session.emit(&stages, |stages: &Vec<Stage>| {
                for s in stages {
                    println!("{}", stage_line(s));
                }
            })
        }
    }
}

fn stage_line(stage: &Stage) -> String {
    let wip = stage
        .wip_limit
        .map(|w| format!(" wip {}", w))
        .unwrap_or_default();
    format!(
        "{:<20} [{}{}]  ({})",
        stage.title,
        stage.status.as_str(),
        wip,
        stage.id
    )
}

fn print_board_view(view: &BoardView) {
    println!("{} ({})", view.board.name, view.board.id);
    for stage_view in &view.stages {
        println!();
        println!("{}", stage_line(&stage_view.stage));
        if stage_view.cards.is_empty() {
            println!("  (empty)");
        }
        for card in &stage_view.cards {
            println!("  {}", card_line(card));
        }
    }
}
