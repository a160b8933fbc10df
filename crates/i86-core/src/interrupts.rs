//! Native interrupt handler registration.
//!
//! The surrounding system (BIOS or DOS service emulation, a test harness, ...)
//! fills an [`InterruptTable`] and hands it to the CPU. Vectors without a
//! native handler are delivered through the guest's interrupt vector table.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::cpu::Cpu;
use crate::error::Result;

/// A natively implemented interrupt service.
///
/// `process` runs inside the interrupt bracket: FLAGS, CS and IP of the
/// interrupted code are on the stack and are restored when it returns. A
/// handler reports status through registers or
/// [`Cpu::set_return_flag`](crate::cpu::Cpu::set_return_flag).
pub trait InterruptHandler: Send + Sync {
    fn process(&self, cpu: &mut Cpu) -> Result<()>;
}

impl<F> InterruptHandler for F
where
    F: Fn(&mut Cpu) -> Result<()> + Send + Sync,
{
    fn process(&self, cpu: &mut Cpu) -> Result<()> {
        self(cpu)
    }
}

/// Vector to handler map.
#[derive(Clone, Default)]
pub struct InterruptTable {
    handlers: FxHashMap<u8, Arc<dyn InterruptHandler>>,
}

impl InterruptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `vector`, replacing any previous one.
    pub fn register<H>(&mut self, vector: u8, handler: H)
    where
        H: InterruptHandler + 'static,
    {
        self.handlers.insert(vector, Arc::new(handler));
    }

    /// Installs a closure; the closure's signature is inferred from this bound.
    pub fn register_fn<F>(&mut self, vector: u8, handler: F)
    where
        F: Fn(&mut Cpu) -> Result<()> + Send + Sync + 'static,
    {
        self.register(vector, handler);
    }

    pub fn unregister(&mut self, vector: u8) -> bool {
        self.handlers.remove(&vector).is_some()
    }

    pub fn get(&self, vector: u8) -> Option<Arc<dyn InterruptHandler>> {
        self.handlers.get(&vector).cloned()
    }

    pub fn contains(&self, vector: u8) -> bool {
        self.handlers.contains_key(&vector)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for InterruptTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut vectors: Vec<_> = self.handlers.keys().copied().collect();
        vectors.sort_unstable();
        f.debug_struct("InterruptTable").field("vectors", &vectors).finish()
    }
}
