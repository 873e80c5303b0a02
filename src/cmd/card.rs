//! Card lifecycle: `kanban card`.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use kanban::workflow::{AcceptanceCriterion, Card, CardMove, CardUpdate, NewCard};

use super::super::CardCommands;
use super::{Session, card_line};

#[derive(Serialize)]
struct CardDetail {
    card: Card,
    archived_or_done: bool,
    criteria: Vec<AcceptanceCriterion>,
    children: Vec<Card>,
}

pub async fn cmd_card(session: &Session, command: CardCommands) -> Result<()> {
    let service = &session.service;
    match command {
        CardCommands::Create {
            board,
            stage,
            title,
            content,
            parent,
            deadline,
            sort,
        } => {
            let card = NewCard {
                title,
                content,
                stage_id: stage,
                parent_id: parent,
                sort_number: sort,
                deadline: deadline.as_deref().map(parse_deadline).transpose()?,
            };
            let card = service.create_card(&session.user, &board, card).await?;
            session.emit(&card, |c: &Card| println!("Created {}", card_line(c)))
        }
        CardCommands::Modify {
            card,
            title,
            content,
            stage,
            parent,
            clear_parent,
            sort,
            deadline,
            clear_deadline,
        } => {
            let origin = service.load_card(&card).await?;
            let mut update = CardUpdate::from_card(&origin);
            if let Some(title) = title {
                update.title = title;
            }
            if content.is_some() {
                update.content = content;
            }
            if stage.is_some() {
                update.stage_id = stage;
            }
            if clear_parent {
                update.parent_id = None;
            } else if parent.is_some() {
                update.parent_id = parent;
            }
            if sort.is_some() {
                update.sort_number = sort;
            }
            if clear_deadline {
                update.deadline = None;
            } else if let Some(deadline) = deadline.as_deref() {
                update.deadline = Some(parse_deadline(deadline)?);
            }
            let saved = service
                .modify(
                    &origin.id,
                    update,
                    &origin.stage_id,
                    &origin.board_id,
                    &session.user,
                )
                .await?;
            session.emit(&saved, |c: &Card| println!("Modified {}", card_line(c)))
        }
        CardCommands::Move { cards, stage, sort } => {
            let target = service.engine().stages().find_by_id(&stage).await?;
            let start = sort.unwrap_or(0);
            let moves: Vec<CardMove> = cards
                .iter()
                .zip(start..)
                .map(|(id, sort_number)| CardMove {
                    id: id.clone(),
                    stage_id: target.id.clone(),
                    sort_number,
                })
                .collect();
            let cards = service
                .move_cards(&moves, &target.id, &target.board_id, &session.user)
                .await?;
            session.emit(&cards, |cards: &Vec<Card>| {
                println!("{} now holds:", target.title);
                for c in cards {
                    println!("  {}", card_line(c));
                }
            })
        }
        CardCommands::Archive { card, stage, sort } => {
            let archived = service.archive(&card, &stage, sort, &session.user).await?;
            session.emit(&archived, |c: &Card| println!("Archived {}", card_line(c)))
        }
        CardCommands::Delete { card } => {
            let count = service.delete_by_id(&card).await?;
            session.emit(&serde_json::json!({ "deleted": count }), |_| {
                println!("Deleted card {} and its children", card)
            })
        }
        CardCommands::Show { card } => {
            let card = service.load_card(&card).await?;
            let detail = CardDetail {
                archived_or_done: service.is_card_archived_or_done(&card.id).await?,
                criteria: service.engine().acceptance().find_by_card_id(&card.id).await?,
                children: service.find_by_parent_id(&card.id).await?,
                card,
            };
            session.emit(&detail, print_detail)
        }
        CardCommands::List { stage } => {
            let cards = service.find_by_stage_id(&stage).await?;
            session.emit(&cards, |cards: &Vec<Card>| {
                for c in cards {
                    println!("{}", card_line(c));
                }
            })
        }
        CardCommands::Children { card } => {
            service.load_card(&card).await?;
            let children = service.find_by_parent_id(&card).await?;
            session.emit(&children, |cards: &Vec<Card>| {
                for c in cards {
                    println!("{}", card_line(c));
                }
            })
        }
    }
}

fn print_detail(detail: &CardDetail) {
    let card = &detail.card;
    println!("{}", card_line(card));
    println!("  stage:    {}", card.stage_id);
    if let Some(parent) = &card.parent_id {
        println!("  parent:   {}", parent);
    }
    if let Some(content) = &card.content {
        println!("  content:  {}", content);
    }
    println!("  author:   {}", card.author);
    println!("  closed:   {}", detail.archived_or_done);
    if !detail.criteria.is_empty() {
        println!("  acceptance criteria:");
        for ac in &detail.criteria {
            let mark = if ac.finished { "x" } else { " " };
            println!("    [{}] {} ({}, {})", mark, ac.summary, ac.status.as_str(), ac.id);
        }
    }
    if !detail.children.is_empty() {
        println!("  children:");
        for child in &detail.children {
            println!("    {}", card_line(child));
        }
    }
}

/// Accepts RFC 3339 timestamps or a bare `YYYY-MM-DD`, which means the end
/// of that day in UTC.
fn parse_deadline(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("Invalid deadline '{}': use YYYY-MM-DD or RFC 3339", input))?;
    date.and_hms_opt(23, 59, 59)
        .map(|at| at.and_utc())
        .with_context(|| format!("Invalid deadline '{}'", input))
}
