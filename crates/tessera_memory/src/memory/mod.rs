//! # Memory Management
//!
//! Sub-allocation of large physical allocations into aligned blocks.
//!
//! ## Design Philosophy
//!
//! Physical allocations are few and large:
//! - One allocation per arena, never resized
//! - Blocks are intervals of an arena, not allocations of their own
//! - Freed intervals coalesce with both neighbours
//!
//! ```text
//!   PoolGroup ──┬── Pool (DeviceLocal) ──┬── Arena 0 [free-list]
//!               │                        └── Arena 1 [free-list]
//!               └── Pool (HostVisible) ──── Arena 0 [free-list, mapping]
//! ```

mod arena;
mod block;
mod group;
mod pool;
mod stats;

pub use arena::{alignment_padding, Arena, ArenaId, Region, SharedArena};
pub use block::{Block, MappedRange};
pub use group::PoolGroup;
pub use pool::Pool;
pub use stats::{ArenaStats, PoolStats};
