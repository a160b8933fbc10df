//! Decode-ahead on a worker thread.
//!
//! The worker owns a [`Decoder`] and fills a bounded queue that the execution
//! thread drains. A redirect clears the queue and bumps a generation counter
//! under the queue lock; the worker decodes outside the lock and drops its
//! result if the generation moved on meanwhile, so nothing decoded for an
//! abandoned path is ever handed out.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::decoder::Decoder;
use crate::error::{AssemblyError, Result};
use crate::opcode::OpCode;
use crate::proxy::CodeAddress;

/// Where the execution loop gets its next instruction.
pub trait InstructionSource {
    fn next_opcode(&mut self) -> Result<OpCode>;

    /// Drops anything decoded ahead and continues at `at`.
    fn redirect(&mut self, at: CodeAddress);

    /// True when opcodes may be decoded before earlier instructions have run.
    fn decodes_ahead(&self) -> bool {
        false
    }
}

impl InstructionSource for Decoder {
    fn next_opcode(&mut self) -> Result<OpCode> {
        self.decode()
    }

    fn redirect(&mut self, at: CodeAddress) {
        self.reposition(at);
    }
}

struct State {
    queue: VecDeque<Result<OpCode>>,
    depth: usize,
    generation: u64,
    /// Position the worker must move to before its next decode.
    pending: Option<CodeAddress>,
    /// Set after a decode error; cleared by the next redirect.
    stalled: bool,
    running: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
    space: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shut_down(&self) {
        self.lock().running = false;
        self.available.notify_all();
        self.space.notify_all();
    }
}

/// Marks the pipeline stopped however the worker exits, including by panic.
struct ExitGuard<'a>(&'a Shared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.shut_down();
    }
}

pub struct PipelinedDecoder {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Decoder>>,
    parked: Option<Decoder>,
}

impl PipelinedDecoder {
    /// Wraps `decoder`; decoding starts at its current position once
    /// [`start`](Self::start) is called.
    pub fn new(decoder: Decoder, depth: usize) -> Self {
        let state = State {
            queue: VecDeque::with_capacity(depth.max(1)),
            depth: depth.max(1),
            generation: 0,
            pending: None,
            stalled: false,
            running: false,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                available: Condvar::new(),
                space: Condvar::new(),
            }),
            worker: None,
            parked: Some(decoder),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.lock().running
    }

    /// Instructions decoded and not yet taken.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn depth(&self) -> usize {
        self.shared.lock().depth
    }

    /// Spawns the worker. Calling it while already running does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let decoder = self.parked.take().ok_or(AssemblyError::PipelineStopped)?;
        self.shared.lock().running = true;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("i86-decode".to_string())
            .spawn(move || produce(&shared, decoder))
            .map_err(|err| {
                self.shared.lock().running = false;
                AssemblyError::Worker(err.to_string())
            })?;
        debug!("decode worker started");
        self.worker = Some(handle);
        Ok(())
    }

    /// Stops and joins the worker, keeping its decoder for a later restart.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.shared.shut_down();
        match handle.join() {
            Ok(decoder) => {
                self.parked = Some(decoder);
                debug!("decode worker stopped");
                Ok(())
            }
            Err(_) => Err(AssemblyError::Worker("decode worker panicked".to_string())),
        }
    }

    /// Blocks until the next instruction is available.
    ///
    /// Errors decoded ahead are returned here, in program order.
    pub fn take(&self) -> Result<OpCode> {
        let mut state = self.shared.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                self.shared.space.notify_one();
                return item;
            }
            if !state.running {
                return Err(AssemblyError::PipelineStopped);
            }
            state = self.shared.available.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Discards queued instructions and moves the worker to `at`.
    pub fn reposition(&self, at: CodeAddress) {
        let mut state = self.shared.lock();
        state.queue.clear();
        state.generation = state.generation.wrapping_add(1);
        state.pending = Some(at);
        state.stalled = false;
        trace!(%at, generation = state.generation, "decode pipeline redirected");
        drop(state);
        self.shared.space.notify_all();
    }
}

impl InstructionSource for PipelinedDecoder {
    fn next_opcode(&mut self) -> Result<OpCode> {
        self.take()
    }

    fn redirect(&mut self, at: CodeAddress) {
        self.reposition(at);
    }

    fn decodes_ahead(&self) -> bool {
        true
    }
}

impl Drop for PipelinedDecoder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for PipelinedDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PipelinedDecoder")
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .field("depth", &state.depth)
            .field("generation", &state.generation)
            .finish()
    }
}

fn produce(shared: &Shared, mut decoder: Decoder) -> Decoder {
    let _exit = ExitGuard(shared);
    loop {
        let generation = {
            let mut state = shared.lock();
            loop {
                if !state.running {
                    return decoder;
                }
                if let Some(at) = state.pending.take() {
                    decoder.reposition(at);
                }
                if !state.stalled && state.queue.len() < state.depth {
                    break;
                }
                state = shared.space.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            state.generation
        };

        let item = decoder.decode();

        let mut state = shared.lock();
        if state.generation != generation {
            continue;
        }
        if item.is_err() {
            state.stalled = true;
        }
        state.queue.push_back(item);
        drop(state);
        shared.available.notify_one();
    }
}
