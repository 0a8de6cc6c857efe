//! `pageforge name <task-id> <round>`

use anyhow::Result;

use pageforge::service::models::RepositoryName;

pub fn cmd_name(task_id: &str, round: u32) -> Result<()> {
    println!("{}", RepositoryName::derive(task_id, round));
    Ok(())
}
