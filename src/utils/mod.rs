//! # Utility Functions and Types
//!
//! This module provides common utility functions and types used throughout the hlsgate library.
//! It includes implementations for:
//!
//! - Bit-level operations and manipulation
//! - CRC calculation for MPEG-TS PSI tables
//! - Pooled byte buffers for segment storage
//!
//! ## Bit Operations
//!
//! The bits module provides utilities for working with bit-level data:
//!
//! ```rust
//! use hlsgate::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//!
//! // Read specific number of bits
//! let value = reader.read_bits(3)?; // Reads first 3 bits (101)
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

/// Pooled byte buffers with power-of-two size classes
pub mod pool;

// Re-export commonly used types
pub use bits::*;
pub use crc::Crc32Mpeg2;
pub use pool::{BytesPool, PooledBuf};
