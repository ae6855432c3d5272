//! Sample tasks for an empty store

use crate::task::Task;

/// Five demo tasks with ids `1` to `5`
pub fn sample_tasks() -> Vec<Task> {
    [
        ("1", "Deploy Application", "John Doe", "echo Deploying application"),
        ("2", "Run Tests", "Jane Smith", "echo Running tests"),
        ("3", "Database Backup", "John Doe", "echo Backing up database"),
        ("4", "Deploy Frontend", "Alice Johnson", "echo Deploying frontend"),
        ("5", "Monitor System", "Bob Wilson", "echo Monitoring system"),
    ]
    .into_iter()
    .map(|(id, name, owner, command)| Task::new(name, owner, command).with_id(id))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandPolicy;

    #[test]
    fn test_samples_pass_policy() {
        let policy = CommandPolicy::default();
        let tasks = sample_tasks();
        assert_eq!(tasks.len(), 5);
        for task in &tasks {
            assert!(policy.is_allowed(&task.command), "{}", task.command);
        }
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3", "4", "5"]);
    }
}
