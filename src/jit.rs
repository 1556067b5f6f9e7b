//! Execution engines for finished compilation units.

use super::error::Result;
use super::ir::Module;

mod interp;
#[cfg(feature = "llvm")]
pub mod llvm;

pub use self::interp::Interpreter;

/// Handle to every unit added under it. Not `Clone`: `Engine::remove` consumes
/// it, so a tracker is released exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceTracker {
    id: u64,
}

impl ResourceTracker {
    pub(crate) fn new(id: u64) -> ResourceTracker {
        ResourceTracker { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub trait Engine {
    type Symbol;

    fn create_tracker(&mut self) -> ResourceTracker;

    /// Takes ownership of `module`. Units added without a tracker stay for
    /// the rest of the session.
    fn add_module(&mut self, module: Module, tracker: Option<&ResourceTracker>) -> Result<()>;

    /// Resolves a defined function, linking its unit's external references.
    fn lookup(&mut self, name: &str) -> Result<Self::Symbol>;

    /// Calls a zero-argument function found by `lookup`.
    fn invoke(&mut self, symbol: &Self::Symbol) -> Result<f64>;

    /// Drops every unit added under `tracker` along with its symbols.
    fn remove(&mut self, tracker: ResourceTracker) -> Result<()>;
}
