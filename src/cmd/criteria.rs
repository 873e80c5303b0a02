//! Acceptance criteria and activity feed: `kanban criteria`, `kanban activity`.

use anyhow::Result;
use std::str::FromStr;

use kanban::CardError;
use kanban::workflow::{AcceptanceCriterion, Activity, CriterionStatus};

use super::super::CriteriaCommands;
use super::Session;

pub async fn cmd_criteria(session: &Session, command: CriteriaCommands) -> Result<()> {
    match command {
        CriteriaCommands::Add { card, summary } => {
            session.service.load_card(&card).await?;
            let author = session.user.clone();
            let criterion = session
                .db
                .call(move |db| db.add_criterion(&author, &card, &summary))
                .await?;
            session.emit(&criterion, |ac: &AcceptanceCriterion| {
                println!("Added acceptance criterion '{}' ({})", ac.summary, ac.id)
            })
        }
        CriteriaCommands::Set {
            id,
            status,
            finished,
        } => {
            let status = CriterionStatus::from_str(&status).map_err(anyhow::Error::msg)?;
            let updated = {
                let id = id.clone();
                session
                    .db
                    .call(move |db| db.update_criterion(&id, finished, status))
                    .await?
            };
            let Some(criterion) = updated else {
                anyhow::bail!("Acceptance criterion {} not found", id);
            };
            session.emit(&criterion, |ac: &AcceptanceCriterion| {
                println!(
                    "Criterion '{}' is now {}{}",
                    ac.summary,
                    ac.status.as_str(),
                    if ac.finished { ", finished" } else { "" }
                )
            })
        }
        CriteriaCommands::List { card } => {
            let criteria = session
                .service
                .engine()
                .acceptance()
                .find_by_card_id(&card)
                .await?;
            session.emit(&criteria, |items: &Vec<AcceptanceCriterion>| {
                for ac in items {
                    let mark = if ac.finished { "x" } else { " " };
                    println!("[{}] {:<40} {:<10} ({})", mark, ac.summary, ac.status.as_str(), ac.id);
                }
            })
        }
    }
}

pub async fn cmd_activity(session: &Session, card: String) -> Result<()> {
    let activities = {
        let card = card.clone();
        session.db.call(move |db| db.list_activities(&card)).await?
    };
    if activities.is_empty() && session.service.find_by_id(&card).await?.is_none() {
        return Err(CardError::card_not_found(card).into());
    }
    session.emit(&activities, |items: &Vec<Activity>| {
        for a in items {
            println!("{}  {:<14} {}", a.created_at, a.kind.as_str(), a.summary);
        }
    })
}
