//! Capacity-bounded staging deque in front of the worker task queue.
//!
//! Commands collect here until a flush trigger fires: a distinguished
//! operator kind, a value query, an explicit flush, or capacity overflow.
//! The buffer is also the peephole rewrite point where a `Del` is fused into
//! the `ApplyOp` consuming its target, turning the deletion into a last-use
//! mark that enables inplace kernels.

use std::collections::VecDeque;

use super::command::Command;
use super::tensor_info::TensorHandle;

pub(crate) struct CommandBuffer {
    commands: VecDeque<Command>,
    capacity: usize,
}

impl CommandBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        CommandBuffer {
            commands: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Stages a command and forwards every command before the computed flush
    /// position to `sink` in order.
    pub(crate) fn enqueue(&mut self, cmd: Command, sink: &mut dyn FnMut(Command)) {
        if let Command::Del { dest } = &cmd {
            if self.fuse_del(*dest) {
                return;
            }
        }
        log::debug!("{cmd} enqueued");
        self.commands.push_back(cmd);
        let pos = self.flush_pos_for_last();
        self.flush(pos, sink);
    }

    fn flush(&mut self, pos: usize, sink: &mut dyn FnMut(Command)) {
        for cmd in self.commands.drain(..pos) {
            log::debug!("{cmd} flushed");
            sink(cmd);
        }
    }

    /// Computes how many leading commands must leave the buffer after the
    /// most recent append.
    fn flush_pos_for_last(&self) -> usize {
        match self.commands.back() {
            Some(Command::ApplyOp { op, .. }) if op.kind().forces_flush() => self.commands.len(),
            Some(Command::GetValue { .. }) => self.commands.len(),
            Some(Command::Flush { dest: None }) => self.commands.len(),
            Some(Command::Flush { dest: Some(dest) }) => {
                if let Some(produce) = self.find_produce(*dest) {
                    produce + 1
                } else {
                    self.overflow_pos()
                }
            }
            _ => self.overflow_pos(),
        }
    }

    fn overflow_pos(&self) -> usize {
        self.commands.len().saturating_sub(self.capacity)
    }

    /// Attempts to fuse `Del { dest }` into the first buffered `ApplyOp`
    /// consuming `dest`. Fusion is refused when any later buffered command
    /// still uses `dest`, since the worker would free the record before that
    /// use executes.
    fn fuse_del(&mut self, dest: TensorHandle) -> bool {
        let apply_pos = self.commands.iter().position(|cmd| {
            matches!(cmd, Command::ApplyOp { inputs, .. } if inputs.contains(&dest))
        });
        let Some(apply_pos) = apply_pos else {
            return false;
        };
        if self.find_last_usage(dest, apply_pos + 1).is_some() {
            return false;
        }
        if let Some(Command::ApplyOp { dels, .. }) = self.commands.get_mut(apply_pos) {
            log::debug!("Del {{ dest: {dest:?} }} fused");
            dels.push(dest);
            return true;
        }
        false
    }

    /// Finds the last buffered use of `dest` at or after `from`.
    fn find_last_usage(&self, dest: TensorHandle, from: usize) -> Option<usize> {
        let mut found = None;
        for (offset, cmd) in self.commands.iter().skip(from).enumerate() {
            let uses = match cmd {
                Command::ApplyOp { inputs, .. } => inputs.contains(&dest),
                Command::GetValue { dest: d } => *d == dest,
                Command::SwapIn { dest: d }
                | Command::SwapOut { dest: d }
                | Command::Drop { dest: d } => *d == dest,
                _ => false,
            };
            if uses {
                found = Some(from + offset);
            }
        }
        found
    }

    /// Finds the buffered command that produces `dest`.
    fn find_produce(&self, dest: TensorHandle) -> Option<usize> {
        self.commands.iter().position(|cmd| match cmd {
            Command::ApplyOp { outputs, .. } => outputs.contains(&dest),
            Command::Put { dest: d, .. } => *d == dest,
            _ => false,
        })
    }
}
