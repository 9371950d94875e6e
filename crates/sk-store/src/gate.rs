//! Reader/writer gate with explicit handoff.
//!
//! Any number of readers may hold the gate together; a writer holds it alone.
//! Writers queue in arrival order. When a writer leaves, the gate goes to the
//! next queued writer or, if there is none, to every queued reader at once.
//! Readers that arrive while a writer is active or queued wait, so a steady
//! stream of reads cannot starve a save.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct GateState {
    writing: bool,
    readers: usize,
    queued_writers: VecDeque<oneshot::Sender<()>>,
    queued_readers: Vec<oneshot::Sender<()>>,
}

impl GateState {
    /// Grant the gate to whoever is next. Called with the state locked.
    fn dispatch(&mut self) {
        if self.writing {
            return;
        }

        if self.readers == 0 {
            while let Some(writer) = self.queued_writers.pop_front() {
                // A closed channel means the waiter gave up
                if writer.send(()).is_ok() {
                    self.writing = true;
                    return;
                }
            }
        }

        if self.queued_writers.is_empty() {
            for reader in std::mem::take(&mut self.queued_readers) {
                if reader.send(()).is_ok() {
                    self.readers += 1;
                }
            }
        }
    }
}

/// Read/write gate serializing access to a storage backend
#[derive(Debug, Default)]
pub struct RwGate {
    state: Mutex<GateState>,
}

impl RwGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for shared access
    pub async fn read(&self) -> ReadGuard<'_> {
        let rx = {
            let mut state = self.state();
            if !state.writing && state.queued_writers.is_empty() {
                state.readers += 1;
                return ReadGuard { gate: self };
            }
            let (tx, rx) = oneshot::channel();
            state.queued_readers.push(tx);
            rx
        };

        self.wait(rx, Access::Read).await;
        ReadGuard { gate: self }
    }

    /// Wait for exclusive access
    pub async fn write(&self) -> WriteGuard<'_> {
        let rx = {
            let mut state = self.state();
            if !state.writing && state.readers == 0 {
                state.writing = true;
                return WriteGuard { gate: self };
            }
            let (tx, rx) = oneshot::channel();
            state.queued_writers.push_back(tx);
            rx
        };

        self.wait(rx, Access::Write).await;
        WriteGuard { gate: self }
    }

    /// Number of readers currently holding the gate
    pub fn active_readers(&self) -> usize {
        self.state().readers
    }

    /// Whether a writer currently holds the gate
    pub fn is_writing(&self) -> bool {
        self.state().writing
    }

    async fn wait(&self, rx: oneshot::Receiver<()>, access: Access) {
        let mut pending = Pending {
            gate: self,
            rx,
            access,
            granted: false,
        };
        // The sender is only dropped after a send, so the result is always a grant
        let _ = (&mut pending.rx).await;
        pending.granted = true;
    }

    fn release(&self, access: Access) {
        let mut state = self.state();
        match access {
            Access::Read => state.readers = state.readers.saturating_sub(1),
            Access::Write => state.writing = false,
        }
        state.dispatch();
    }
}

/// A queued acquisition. Dropping it after the gate was handed over gives the
/// gate back instead of leaking it.
struct Pending<'a> {
    gate: &'a RwGate,
    rx: oneshot::Receiver<()>,
    access: Access,
    granted: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.gate.release(self.access);
        }
    }
}

/// Shared access to the gate, released on drop
#[must_use]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    gate: &'a RwGate,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(Access::Read);
    }
}

/// Exclusive access to the gate, released on drop
#[must_use]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    gate: &'a RwGate,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(Access::Write);
    }
}
