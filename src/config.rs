//! Jargon VM configuration.
//!
//! Defines runtime limits for the virtual machine.  Configuration specifies
//! constraints only; enforcement is handled by the VM.

/// VM configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the stack array, in cells.
    pub stack_max: usize,

    /// Capacity of the heap array, in cells.
    pub heap_max: usize,

    /// When set, the driver prints the compiled listing and the VM prints
    /// its state before every step.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_max: 1024,
            heap_max: 4096,
            verbose: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }
}
