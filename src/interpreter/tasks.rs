//! Micro and macro task queues
//!
//! A task is a callee with its `this`, arguments and timing. Everything a
//! queued task refers to hangs off the task root until the task has run or
//! been cleared. Microtasks always run before macrotasks; a macrotask that
//! is not yet due goes back to the tail of its queue.

use std::collections::VecDeque;

use tracing::trace;

use super::{Context, ContextState};
use crate::compiler::ScopeKind;
use crate::error::JsError;
use crate::value::Value;

pub type TaskId = u64;

#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub id: TaskId,
    pub callee: Value,
    pub this: Value,
    pub args: Vec<Value>,
    /// Monotonic time the task was (re)scheduled at
    pub start: u64,
    pub delay: u64,
    pub repeat: bool,
}

impl Task {
    fn values(&self) -> impl Iterator<Item = &Value> {
        [&self.callee, &self.this].into_iter().chain(self.args.iter())
    }

    fn due(&self) -> u64 {
        self.start.saturating_add(self.delay)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueues {
    micro: VecDeque<Task>,
    macro_tasks: VecDeque<Task>,
    next_id: TaskId,
    /// Repeating task being run, and whether it was cleared meanwhile
    running: Option<(TaskId, bool)>,
}

impl TaskQueues {
    fn next_id(&mut self) -> TaskId {
        self.next_id += 1;
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.micro.len() + self.macro_tasks.len()
    }
}

impl Context {
    fn root_task(&mut self, task: &Task) {
        let root = self.roots.task;
        for value in task.values() {
            self.heap.link(root, value);
        }
    }

    fn unroot_task(&mut self, task: &Task) {
        let root = self.roots.task;
        for value in task.values() {
            self.heap.unlink(root, value);
        }
    }

    /// Schedule `callee` to run after `delay` milliseconds, every `delay`
    /// milliseconds when `repeat` is set
    pub fn create_macrotask(&mut self, callee: Value, this: Value, args: Vec<Value>, delay: u64, repeat: bool) -> TaskId {
        let task = Task {
            id: self.tasks.next_id(),
            callee,
            this,
            args,
            start: self.runtime.time.monotonic_millis(),
            delay,
            repeat,
        };
        self.root_task(&task);
        let id = task.id;
        self.tasks.macro_tasks.push_back(task);
        id
    }

    /// Schedule `callee` to run before the next macrotask
    pub fn create_microtask(&mut self, callee: Value, this: Value, args: Vec<Value>) -> TaskId {
        let task = Task {
            id: self.tasks.next_id(),
            callee,
            this,
            args,
            start: self.runtime.time.monotonic_millis(),
            delay: 0,
            repeat: false,
        };
        self.root_task(&task);
        let id = task.id;
        self.tasks.micro.push_back(task);
        id
    }

    /// Cancel a pending macrotask; returns whether it was found
    pub fn clear_macrotask(&mut self, id: TaskId) -> bool {
        if let Some((running, cleared)) = &mut self.tasks.running
            && *running == id
        {
            *cleared = true;
            return true;
        }
        let Some(index) = self.tasks.macro_tasks.iter().position(|t| t.id == id) else {
            return false;
        };
        match self.tasks.macro_tasks.remove(index) {
            Some(task) => {
                self.unroot_task(&task);
                true
            }
            None => false,
        }
    }

    /// Cancel a pending microtask; returns whether it was found
    pub fn clear_microtask(&mut self, id: TaskId) -> bool {
        let Some(index) = self.tasks.micro.iter().position(|t| t.id == id) else {
            return false;
        };
        match self.tasks.micro.remove(index) {
            Some(task) => {
                self.unroot_task(&task);
                true
            }
            None => false,
        }
    }

    /// Either queue is non-empty
    pub fn has_task(&self) -> bool {
        self.tasks.len() > 0
    }

    /// Run the next task. Returns `false` when nothing ran: both queues are
    /// empty, or the front macrotask is not due yet and went to the tail.
    pub fn next_task(&mut self) -> Result<bool, JsError> {
        self.ensure_usable()?;
        let now = self.runtime.time.monotonic_millis();
        let task = match self.tasks.micro.pop_front() {
            Some(task) => task,
            None => match self.tasks.macro_tasks.pop_front() {
                Some(task) if now < task.due() => {
                    self.tasks.macro_tasks.push_back(task);
                    return Ok(false);
                }
                Some(task) => task,
                None => return Ok(false),
            },
        };
        self.run_task(task)?;
        Ok(true)
    }

    fn run_task(&mut self, mut task: Task) -> Result<(), JsError> {
        trace!(id = task.id, repeat = task.repeat, "running task");
        let previous_state = self.state;
        if previous_state != ContextState::Draining {
            self.state = ContextState::Running;
        }
        if task.repeat {
            self.tasks.running = Some((task.id, false));
        }

        let saved = self.current_scope;
        let scope = self.push_scope_under(self.task_scope, ScopeKind::Task)?;
        self.current_scope = scope;
        let outcome = self.call_function(task.callee.clone(), task.this.clone(), &task.args);
        // the task scope is swept on teardown; keep a thrown value for the report
        if let Err(JsError::Thrown { value }) = &outcome {
            self.heap.link(self.roots.transit, value);
        }
        let teardown = self.teardown_scope(scope);
        self.current_scope = if self.scopes.contains(saved) { saved } else { self.task_scope };

        let cleared = matches!(self.tasks.running.take(), Some((_, true)));
        if task.repeat && !cleared {
            task.start = self.runtime.time.monotonic_millis();
            self.tasks.macro_tasks.push_back(task);
        } else {
            self.unroot_task(&task);
        }

        for result in [outcome.map(|_| ()), teardown] {
            match result {
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => self.report_error(&e),
                Ok(()) => {}
            }
        }

        if previous_state != ContextState::Draining {
            self.state = ContextState::Idle;
        }
        self.collect()
    }

    /// Run tasks until both queues are empty, sleeping through the gaps
    /// before timers. Stops early once `microtask_budget` microtasks ran,
    /// or when the clock does not advance while only future timers remain.
    pub fn run_until_idle(&mut self) -> Result<(), JsError> {
        self.ensure_usable()?;
        let previous_state = self.state;
        self.state = ContextState::Draining;
        let result = self.drain();
        self.state = if previous_state == ContextState::Draining {
            ContextState::Draining
        } else {
            ContextState::Idle
        };
        result
    }

    fn drain(&mut self) -> Result<(), JsError> {
        let budget = self.runtime.microtask_budget;
        let mut microtasks = 0usize;
        while self.has_task() {
            if !self.tasks.micro.is_empty() {
                if budget != 0 && microtasks >= budget {
                    return Ok(());
                }
                microtasks += 1;
            }
            if self.next_task()? {
                continue;
            }
            let Some(due) = self.tasks.macro_tasks.iter().map(Task::due).min() else {
                continue;
            };
            let now = self.runtime.time.monotonic_millis();
            if due > now {
                self.runtime.time.sleep(due - now);
                if self.runtime.time.monotonic_millis() <= now {
                    // a frozen clock never makes the timer due
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
