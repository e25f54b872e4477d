//! Priority Task Queue. All task-state mutation is confined to this
//! component: every other component submits state-change requests by id
//! rather than touching a `Task` directly, which is what gives the
//! monotonic-state invariant "by construction".

// Poisoned mutex should fail the program
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use curator_protocol::Priority;
use curator_protocol::Task;
use curator_protocol::TaskResult;
use curator_protocol::TaskState;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub per_priority_queued: HashMap<Priority, usize>,
    pub per_state: HashMap<TaskState, usize>,
    pub oldest_queued_at: Option<DateTime<Utc>>,
    pub average_queued_wait_ms: f64,
}

struct QueueState {
    /// FIFO per priority class, in enqueue order. Holds ids only; `index` is
    /// the source of truth for task contents.
    buckets: HashMap<Priority, VecDeque<Uuid>>,
    index: HashMap<Uuid, Task>,
    history: VecDeque<TaskResult>,
    history_capacity: usize,
}

pub struct PriorityQueue {
    state: Mutex<QueueState>,
}

impl PriorityQueue {
    pub fn new(history_capacity: usize) -> Self {
        let mut buckets = HashMap::new();
        for p in Priority::ALL {
            buckets.insert(p, VecDeque::new());
        }
        Self {
            state: Mutex::new(QueueState {
                buckets,
                index: HashMap::new(),
                history: VecDeque::new(),
                history_capacity,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue mutex poisoned")
    }

    /// Append `task` to its priority class's FIFO. The task must already be
    /// `Queued` (callers build it via `Task::new`, which starts `Queued`).
    pub fn enqueue(&self, task: Task) -> Uuid {
        let mut state = self.lock();
        let id = task.id;
        let priority = task.priority;
        state.buckets.entry(priority).or_default().push_back(id);
        state.index.insert(id, task);
        id
    }

    /// Pop the oldest `Queued` task in the lowest-numbered (highest-priority)
    /// class that has one. Removes it from its bucket; the caller is
    /// responsible for transitioning it to `Running` via `update_state`.
    pub fn dequeue(&self) -> Option<Task> {
        let mut state = self.lock();
        for priority in Priority::ALL {
            let bucket = state.buckets.get_mut(&priority)?;
            while let Some(id) = bucket.pop_front() {
                if let Some(task) = state.index.get(&id) {
                    if task.state == TaskState::Queued {
                        return state.index.get(&id).cloned();
                    }
                    // Stale entry (e.g. cancelled while queued but not yet
                    // purged from the bucket) — drop and keep scanning.
                }
            }
        }
        None
    }

    /// The next task `dequeue` would return, without removing it.
    pub fn peek(&self) -> Option<Task> {
        let state = self.lock();
        for priority in Priority::ALL {
            if let Some(bucket) = state.buckets.get(&priority) {
                for id in bucket {
                    if let Some(task) = state.index.get(id) {
                        if task.state == TaskState::Queued {
                            return Some(task.clone());
                        }
                    }
                }
            }
        }
        None
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.lock().index.get(&id).cloned()
    }

    /// Transition a task's state. Monotonic by construction: this is the
    /// only write path for `Task::state`/`started_at`/`completed_at`.
    pub fn update_state(&self, id: Uuid, new_state: TaskState, completed_at: Option<DateTime<Utc>>) -> bool {
        let mut state = self.lock();
        let Some(task) = state.index.get_mut(&id) else {
            return false;
        };
        task.state = new_state;
        if new_state == TaskState::Running && task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        if new_state.is_terminal() {
            task.completed_at = Some(completed_at.unwrap_or_else(Utc::now));
        }
        true
    }

    /// Reset a retried task back to `Queued` and re-append it to its
    /// priority bucket.
    pub fn requeue(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        let Some(task) = state.index.get_mut(&id) else {
            return false;
        };
        task.state = TaskState::Queued;
        task.started_at = None;
        let priority = task.priority;
        state.buckets.entry(priority).or_default().push_back(id);
        true
    }

    /// Bump a task's retry counter. Kept as its own setter, rather than a
    /// generic field-mutator, so this remains the only write path into
    /// `Task::retry_count`.
    pub fn set_retry_count(&self, id: Uuid, retry_count: u32) -> bool {
        let mut state = self.lock();
        let Some(task) = state.index.get_mut(&id) else {
            return false;
        };
        task.retry_count = retry_count;
        true
    }

    /// Cancel a task if it is not already terminal. A task cancelled while
    /// `Queued` is simply marked `Cancelled` in the index; `dequeue` skips
    /// stale bucket entries, so it never transitions to `Running`.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        let Some(task) = state.index.get_mut(&id) else {
            return false;
        };
        if task.state.is_terminal() {
            return false;
        }
        task.state = TaskState::Cancelled;
        task.completed_at = Some(Utc::now());
        true
    }

    pub fn get_running(&self) -> Vec<Task> {
        let state = self.lock();
        state
            .index
            .values()
            .filter(|t| t.state == TaskState::Running)
            .cloned()
            .collect()
    }

    /// Queued tasks in priority-then-`created_at` order — the exact
    /// dispatch order guaranteed to callers.
    pub fn get_queued(&self) -> Vec<Task> {
        let state = self.lock();
        let mut out = Vec::new();
        for priority in Priority::ALL {
            if let Some(bucket) = state.buckets.get(&priority) {
                for id in bucket {
                    if let Some(task) = state.index.get(id) {
                        if task.state == TaskState::Queued {
                            out.push(task.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Drop terminal tasks older than `max_age_ms` from the index and their
    /// (already-vacated) buckets.
    pub fn cleanup_completed(&self, max_age_ms: i64) {
        let mut state = self.lock();
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms);
        state.index.retain(|_, task| {
            !(task.state.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
    }

    pub fn record_result(&self, result: TaskResult) {
        let mut state = self.lock();
        if state.history.len() >= state.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(result);
    }

    pub fn history(&self) -> Vec<TaskResult> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let mut per_priority_queued = HashMap::new();
        let mut per_state = HashMap::new();
        let mut oldest_queued_at: Option<DateTime<Utc>> = None;
        let mut wait_total_ms = 0f64;
        let mut wait_count = 0f64;
        let now = Utc::now();

        for task in state.index.values() {
            *per_state.entry(task.state).or_insert(0) += 1;
            if task.state == TaskState::Queued {
                *per_priority_queued.entry(task.priority).or_insert(0) += 1;
                oldest_queued_at = Some(match oldest_queued_at {
                    Some(current) if current <= task.created_at => current,
                    _ => task.created_at,
                });
                wait_total_ms += (now - task.created_at).num_milliseconds() as f64;
                wait_count += 1.0;
            }
        }

        QueueStats {
            per_priority_queued,
            per_state,
            oldest_queued_at,
            average_queued_wait_ms: if wait_count > 0.0 {
                wait_total_ms / wait_count
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use curator_protocol::TaskKind;

    fn task(priority: Priority) -> Task {
        Task::new(TaskKind::HealthCheck, priority, 30_000, 3)
    }

    #[test]
    fn dequeue_respects_priority_before_fifo_order() {
        let queue = PriorityQueue::new(100);
        let low1 = queue.enqueue(task(Priority::Low));
        let _low2 = queue.enqueue(task(Priority::Low));
        let high = queue.enqueue(task(Priority::High));

        let first = queue.dequeue().unwrap();
        assert_eq!(first.id, low1, "low1 was enqueued first overall");

        let second = queue.dequeue().unwrap();
        assert_eq!(second.id, high, "high beats the remaining low regardless of arrival order");
    }

    #[test]
    fn fifo_within_the_same_priority_class() {
        let queue = PriorityQueue::new(100);
        let a = queue.enqueue(task(Priority::Normal));
        let b = queue.enqueue(task(Priority::Normal));
        assert_eq!(queue.dequeue().unwrap().id, a);
        assert_eq!(queue.dequeue().unwrap().id, b);
    }

    #[test]
    fn cancelled_while_queued_never_dispatches() {
        let queue = PriorityQueue::new(100);
        let id = queue.enqueue(task(Priority::Critical));
        assert!(queue.cancel(id));
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.get(id).unwrap().state, TaskState::Cancelled);
    }

    #[test]
    fn cancel_is_a_no_op_on_terminal_tasks() {
        let queue = PriorityQueue::new(100);
        let id = queue.enqueue(task(Priority::Normal));
        queue.update_state(id, TaskState::Running, None);
        queue.update_state(id, TaskState::Completed, None);
        assert!(!queue.cancel(id));
        assert_eq!(queue.get(id).unwrap().state, TaskState::Completed);
    }

    #[test]
    fn history_ring_is_bounded() {
        let queue = PriorityQueue::new(2);
        for i in 0..5u32 {
            queue.record_result(TaskResult {
                task_id: Uuid::new_v4(),
                success: true,
                result: None,
                error: None,
                execution_time_ms: i as u64,
                memory_used_mb: 0,
            });
        }
        assert_eq!(queue.history().len(), 2);
    }

    #[test]
    fn requeue_resets_to_queued_and_reappends() {
        let queue = PriorityQueue::new(100);
        let id = queue.enqueue(task(Priority::Normal));
        queue.update_state(id, TaskState::Running, None);
        assert!(queue.requeue(id));
        assert_eq!(queue.get(id).unwrap().state, TaskState::Queued);
        assert_eq!(queue.dequeue().unwrap().id, id);
    }
}
