//! Serial background task runner feeding the channel worker.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Consumer side of a [`TaskQueue`].
pub(crate) trait TaskHandler: Send + Sync + 'static {
    type Task: Send + 'static;

    fn process(&self, task: Self::Task);
}

struct QueueState<T> {
    tasks: VecDeque<T>,
    in_flight: bool,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    cv: Condvar,
}

/// FIFO task queue drained by a single background thread.
///
/// Tasks run serially in submission order. Closing the queue (on drop) lets
/// the worker finish everything already queued before the thread exits.
pub(crate) struct TaskQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Spawns the worker thread, handing each task to `handler`.
    pub(crate) fn spawn<H>(name: &str, handler: Arc<H>) -> Self
    where
        H: TaskHandler<Task = T>,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                in_flight: false,
                closed: false,
            }),
            cv: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(worker_shared, handler))
            .expect("failed to spawn worker thread");
        TaskQueue {
            shared,
            thread: Some(thread),
        }
    }

    /// Moves a task into the queue.
    pub(crate) fn add_task(&self, task: T) {
        let mut state = self.shared.state.lock().expect("task queue poisoned");
        state.tasks.push_back(task);
        self.shared.cv.notify_all();
    }

    /// Blocks until the queue is empty and no task is executing.
    pub(crate) fn wait_all_task_finish(&self) {
        let mut state = self.shared.state.lock().expect("task queue poisoned");
        while !state.tasks.is_empty() || state.in_flight {
            state = self.shared.cv.wait(state).expect("task queue poisoned");
        }
    }
}

impl<T: Send + 'static> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().expect("task queue poisoned");
            state.closed = true;
            self.shared.cv.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop<H: TaskHandler>(shared: Arc<Shared<H::Task>>, handler: Arc<H>) {
    loop {
        let task = {
            let mut state = shared.state.lock().expect("task queue poisoned");
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    state.in_flight = true;
                    break task;
                }
                if state.closed {
                    return;
                }
                state = shared.cv.wait(state).expect("task queue poisoned");
            }
        };
        handler.process(task);
        let mut state = shared.state.lock().expect("task queue poisoned");
        state.in_flight = false;
        if state.tasks.is_empty() {
            shared.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Recorder {
        seen: Mutex<Vec<usize>>,
        count: AtomicUsize,
    }

    impl TaskHandler for Recorder {
        type Task = usize;

        fn process(&self, task: usize) {
            self.seen.lock().unwrap().push(task);
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        let queue = TaskQueue::spawn("test-worker", Arc::clone(&recorder));
        for i in 0..32 {
            queue.add_task(i);
        }
        queue.wait_all_task_finish();
        assert_eq!(*recorder.seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn drop_drains_pending_tasks() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        {
            let queue = TaskQueue::spawn("test-worker", Arc::clone(&recorder));
            for i in 0..8 {
                queue.add_task(i);
            }
        }
        assert_eq!(recorder.count.load(Ordering::SeqCst), 8);
    }
}
