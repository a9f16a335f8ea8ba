// ============================================================================
// Relay Types - Core Data Types
// ============================================================================
//
// Data structures shared by the relay consumer and the applications that
// plug a decoder and a batch processor into it. NO dependencies on any
// transport client.
//
// Contents:
// - Events and batches handed to batch processors
// - Topics and the delivery guarantee selected per consumer
//
// ============================================================================

pub mod delivery;
pub mod event;

// Re-exports for convenience
pub use delivery::*;
pub use event::*;
