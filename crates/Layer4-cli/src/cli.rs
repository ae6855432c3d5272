//! Command handlers

use crate::Command;
use serde::Serialize;
use taskpod_task::{Task, TaskId, TaskOrchestrator};

/// Dispatch one subcommand, printing its result as JSON
pub async fn run(orchestrator: &TaskOrchestrator, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => print_json(&orchestrator.get_all_tasks().await?),
        Command::Get { id } => {
            let id = TaskId::from(id);
            match orchestrator.get_task(&id).await? {
                Some(task) => print_json(&task),
                None => anyhow::bail!("Task not found with id: {}", id),
            }
        }
        Command::Search { name, owner } => {
            let tasks = match (name, owner) {
                (Some(name), _) => orchestrator.find_by_name(&name).await?,
                (None, Some(owner)) => orchestrator.find_by_owner(&owner).await?,
                (None, None) => anyhow::bail!("Either --name or --owner is required"),
            };
            print_json(&tasks)
        }
        Command::Save {
            id,
            name,
            owner,
            command,
        } => {
            let mut task = Task::new(name, owner, command);
            if let Some(id) = id {
                task = task.with_id(id);
                // Replacing a task keeps its history
                if let Some(existing) = orchestrator.get_task(&task.id).await? {
                    task.executions = existing.executions;
                }
            }
            print_json(&orchestrator.save_task(task).await?)
        }
        Command::Delete { id } => {
            orchestrator.delete_task(&TaskId::from(id)).await?;
            println!("Task deleted successfully");
            Ok(())
        }
        Command::Execute { id } => print_json(&orchestrator.execute(&TaskId::from(id)).await?),
        Command::Seed => {
            match orchestrator.seed_samples().await? {
                0 => println!("Sample data already exists, skipping initialization"),
                n => println!("Loaded {} sample tasks", n),
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
