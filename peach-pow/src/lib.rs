//! Peach proof-of-work reference implementation.
//!
//! Everything in this crate is deterministic and free of I/O: the 160-byte
//! block trailer codec, the Nighthash polyalgorithm dispatcher with its
//! deterministic float and memory transforms, the tile generator backing the
//! 1 GiB cache, the haiku nonce tables, and the full solve pipeline with the
//! coarse/fine difficulty evaluator. GPU kernels must agree with this crate
//! bit-for-bit; the miner uses it both as the CPU mining backend and as the
//! cross-check for every GPU solve before submission.

pub mod nighthash;
pub mod solve;
pub mod tile;
pub mod trigg;

mod trailer;

pub use solve::{peach_check, peach_eval, peach_hash, solve_difficulty};
pub use tile::{PeachMap, TileCompute, TileSource};
pub use trailer::BlockTrailer;

/// Digest length shared by every stage of the pipeline.
pub const HASH_LEN: usize = 32;

/// Tile size in bytes.
pub const PEACH_TILE_LEN: usize = 1024;

/// Number of tiles in the cache (20-bit index space).
pub const PEACH_CACHE_LEN: usize = 1 << 20;

/// Mask reducing any 32-bit value to a valid tile index.
pub const PEACH_CACHE_MASK: u32 = (PEACH_CACHE_LEN - 1) as u32;

/// Full cache size: 1 GiB.
pub const PEACH_MAP_LEN: usize = PEACH_CACHE_LEN * PEACH_TILE_LEN;

/// Tile generation seed length: u32 index plus the previous block hash.
pub const PEACH_GEN_LEN: usize = 4 + HASH_LEN;

/// Jump seed length: nonce (32) + tile index (4) + tile (1024).
pub const PEACH_JUMP_LEN: usize = HASH_LEN + 4 + PEACH_TILE_LEN;

/// Block trailer wire size.
pub const BTRAILER_LEN: usize = 160;

/// Length of the trailer prefix hashed together with the nonce.
pub const BT_HASH_PREFIX_LEN: usize = 92;

/// Maximum age of a block start time before a job is considered stale.
pub const BRIDGE_V3_SECS: u32 = 949;
