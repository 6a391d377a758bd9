//! Doubly linked block chain
//!
//! A header block names the head and tail data blocks; each data block holds
//! up to `entries_per_block` entries plus links to its neighbours.
//!
//! ```text
//!        header { headId, tailId }
//!           │              │
//!     ┌─────▼────┐  next  ┌▼─────────┐
//!     │ a b c d  │ ─────▶ │ e f      │
//!     │          │ ◀───── │          │
//!     └──────────┘  prior └──────────┘
//! ```
//!
//! Appending and popping work at the tail, dequeueing at the head.

mod block;
mod list;

pub use block::{
    register_chain_block_types, ChainDataBlock, ChainEntry, ChainHeaderBlock, CHAIN_DATA_TAG, CHAIN_HEADER_TAG,
};
pub use list::{Chain, ChainPath};
