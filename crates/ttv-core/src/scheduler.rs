//! Two-level task scheduling: interactive work first, idle work when the
//! surface has nothing better to do.

use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Interactive,
    Idle,
}

pub trait Scheduler<T> {
    fn schedule(&mut self, task: T, priority: Priority);
}

/// In-process queue for environments without a native idle callback.
#[derive(Debug)]
pub struct IdleQueue<T> {
    interactive: VecDeque<T>,
    idle: VecDeque<T>,
}

impl<T> Default for IdleQueue<T> {
    fn default() -> Self {
        Self {
            interactive: VecDeque::new(),
            idle: VecDeque::new(),
        }
    }
}

impl<T> Scheduler<T> for IdleQueue<T> {
    fn schedule(&mut self, task: T, priority: Priority) {
        match priority {
            Priority::Interactive => self.interactive.push_back(task),
            Priority::Idle => self.idle.push_back(task),
        }
    }
}

impl<T> IdleQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.interactive.len() + self.idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactive.is_empty() && self.idle.is_empty()
    }

    /// Run every interactive task, then at most `idle_budget` idle tasks.
    /// Returns how many tasks ran.
    pub fn run(&mut self, idle_budget: usize, mut task_fn: impl FnMut(T)) -> usize {
        let mut ran = 0;
        while let Some(task) = self.interactive.pop_front() {
            task_fn(task);
            ran += 1;
        }
        for _ in 0..idle_budget {
            // Interactive work queued by an idle task still goes first.
            let next = self
                .interactive
                .pop_front()
                .or_else(|| self.idle.pop_front());
            let Some(task) = next else { break };
            task_fn(task);
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interactive_runs_first() {
        let mut q = IdleQueue::new();
        q.schedule("idle-a", Priority::Idle);
        q.schedule("click", Priority::Interactive);
        q.schedule("idle-b", Priority::Idle);

        let mut order = Vec::new();
        let ran = q.run(10, |t| order.push(t));
        assert_eq!(ran, 3);
        assert_eq!(order, vec!["click", "idle-a", "idle-b"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_idle_budget() {
        let mut q = IdleQueue::new();
        for i in 0..3 {
            q.schedule(i, Priority::Idle);
        }
        assert_eq!(q.run(0, |_| {}), 0);
        assert_eq!(q.len(), 3);
        assert_eq!(q.run(2, |_| {}), 2);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_interactive_queued_by_idle_task_runs_next() {
        let mut q = IdleQueue::new();
        q.schedule(1, Priority::Idle);
        q.schedule(2, Priority::Idle);
        let mut order = Vec::new();
        q.run(1, |t| order.push(t));
        q.schedule(9, Priority::Interactive);
        q.run(1, |t| order.push(t));
        assert_eq!(order, vec![1, 9]);
        assert_eq!(q.len(), 1);
    }
}
