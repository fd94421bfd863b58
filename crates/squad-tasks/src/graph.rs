//! Pure rules over the task dependency graph.
//!
//! Nothing here touches the store; the engine loads tasks and edges and asks
//! these functions what they mean.

use crate::model::{DependencyView, WaitState};
use squad_core::{Task, TaskDependency, TaskStatus, TaskType};
use std::collections::{HashMap, HashSet, VecDeque};

/// Whether a `blocks` edge from a task of `task_type` onto an upstream in
/// `upstream` status is satisfied.
///
/// Upstream `done` always satisfies. Validators may also start once the
/// upstream is `in_review`. A missing upstream never satisfies.
pub fn is_dependency_satisfied(task_type: TaskType, upstream: Option<TaskStatus>) -> bool {
    match upstream {
        Some(TaskStatus::Done) => true,
        Some(TaskStatus::InReview) => task_type.is_validator(),
        _ => false,
    }
}

/// Join `task_id`'s edges with the upstream tasks they point at.
pub fn dependency_views(
    task_id: &str,
    edges: &[TaskDependency],
    tasks: &HashMap<&str, &Task>,
) -> Vec<DependencyView> {
    let mut views: Vec<DependencyView> = edges
        .iter()
        .filter(|edge| edge.task_id == task_id)
        .map(|edge| {
            let upstream = tasks.get(edge.depends_on_task_id.as_str());
            DependencyView {
                dependency: edge.clone(),
                depends_on_task_title: upstream.map(|t| t.title.clone()),
                depends_on_task_status: upstream.map(|t| t.status),
                depends_on_task_type: upstream.map(|t| t.task_type),
                depends_on_agent_id: upstream.map(|t| t.agent_id.clone()),
            }
        })
        .collect();
    views.sort_by(|a, b| a.dependency.created_at.cmp(&b.dependency.created_at));
    views
}

/// The unsatisfied blocking edges among `dependencies`.
pub fn blocking_dependencies(task_type: TaskType, dependencies: &[DependencyView]) -> Vec<DependencyView> {
    dependencies
        .iter()
        .filter(|dep| dep.dependency.dependency_type.affects_scheduling())
        .filter(|dep| !is_dependency_satisfied(task_type, dep.depends_on_task_status))
        .cloned()
        .collect()
}

pub fn wait_state(blocking: &[DependencyView]) -> WaitState {
    if blocking.is_empty() {
        WaitState::Ready
    } else {
        WaitState::WaitingForDependencies
    }
}

/// Whether adding the blocking edge `task_id -> depends_on` closes a cycle.
///
/// Walks upstream from `depends_on` along existing blocking edges; reaching
/// `task_id` means the new edge would loop back.
pub fn would_create_cycle(edges: &[TaskDependency], task_id: &str, depends_on: &str) -> bool {
    if task_id == depends_on {
        return true;
    }

    let mut upstream: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.dependency_type.affects_scheduling()) {
        upstream
            .entry(edge.task_id.as_str())
            .or_default()
            .push(edge.depends_on_task_id.as_str());
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([depends_on]);
    while let Some(current) = queue.pop_front() {
        if current == task_id {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(next) = upstream.get(current) {
            queue.extend(next.iter().copied());
        }
    }
    false
}

/// The task an agent should be working on.
///
/// Ordered by status rank (`in_progress` first), newest first within a rank.
pub fn pick_current_task<'a>(tasks: &'a [Task], agent_id: &str) -> Option<&'a Task> {
    tasks
        .iter()
        .filter(|task| task.agent_id == agent_id)
        .min_by(|a, b| {
            a.status
                .current_task_rank()
                .cmp(&b.status.current_task_rank())
                .then_with(|| b.created_at.cmp(&a.created_at))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use squad_core::{DependencyType, Priority};

    fn task(id: &str, agent: &str, status: TaskStatus, age_secs: i64) -> Task {
        let at = Utc::now() - Duration::seconds(age_secs);
        Task {
            id: id.to_string(),
            session_id: "default".to_string(),
            agent_id: agent.to_string(),
            parent_task_id: None,
            title: id.to_string(),
            goal: "goal".to_string(),
            description: "desc".to_string(),
            status,
            priority: Priority::Medium,
            task_type: TaskType::Implementation,
            scope_path: None,
            acceptance_criteria: None,
            blocking_reason: None,
            result_summary: None,
            created_by_agent_id: None,
            started_at: None,
            completed_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn edge(task_id: &str, depends_on: &str, dependency_type: DependencyType) -> TaskDependency {
        TaskDependency {
            id: format!("taskdep-{}-{}", task_id, depends_on),
            session_id: "default".to_string(),
            task_id: task_id.to_string(),
            depends_on_task_id: depends_on.to_string(),
            dependency_type,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_satisfaction_rules() {
        assert!(is_dependency_satisfied(TaskType::Implementation, Some(TaskStatus::Done)));
        assert!(!is_dependency_satisfied(TaskType::Implementation, Some(TaskStatus::InReview)));
        assert!(is_dependency_satisfied(TaskType::Testing, Some(TaskStatus::InReview)));
        assert!(is_dependency_satisfied(TaskType::Review, Some(TaskStatus::InReview)));
        assert!(!is_dependency_satisfied(TaskType::Testing, Some(TaskStatus::InProgress)));
        assert!(!is_dependency_satisfied(TaskType::Testing, None));
    }

    #[test]
    fn test_only_blocks_edges_block() {
        let upstream = task("task-up", "a", TaskStatus::Todo, 10);
        let tasks: HashMap<&str, &Task> = [(upstream.id.as_str(), &upstream)].into_iter().collect();
        let edges = vec![
            edge("task-down", "task-up", DependencyType::RelatesTo),
            edge("task-down", "task-up", DependencyType::Blocks),
        ];

        let views = dependency_views("task-down", &edges, &tasks);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].depends_on_task_status, Some(TaskStatus::Todo));

        let blocking = blocking_dependencies(TaskType::Other, &views);
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].dependency.dependency_type, DependencyType::Blocks);
        assert_eq!(wait_state(&blocking), WaitState::WaitingForDependencies);
        assert_eq!(wait_state(&[]), WaitState::Ready);
    }

    #[test]
    fn test_cycle_detection() {
        let edges = vec![
            edge("b", "a", DependencyType::Blocks),
            edge("c", "b", DependencyType::Blocks),
            edge("a", "x", DependencyType::RelatesTo),
        ];
        assert!(would_create_cycle(&edges, "a", "a"));
        assert!(would_create_cycle(&edges, "a", "c"));
        assert!(would_create_cycle(&edges, "b", "c"));
        assert!(!would_create_cycle(&edges, "c", "a"));
        assert!(!would_create_cycle(&edges, "x", "a"));
    }

    #[test]
    fn test_current_task_prefers_active_then_newest() {
        let tasks = vec![
            task("old-ready", "a", TaskStatus::Ready, 30),
            task("new-ready", "a", TaskStatus::Ready, 5),
            task("done", "a", TaskStatus::Done, 1),
            task("other", "b", TaskStatus::InProgress, 1),
        ];
        assert_eq!(pick_current_task(&tasks, "a").unwrap().id, "new-ready");

        let mut with_review = tasks.clone();
        with_review.push(task("review", "a", TaskStatus::InReview, 60));
        assert_eq!(pick_current_task(&with_review, "a").unwrap().id, "review");

        assert!(pick_current_task(&tasks, "nobody").is_none());
    }
}
