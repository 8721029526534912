//! Binary data processing utilities
//!
//! Byte order handling, checksums, bit extraction and BCD conversions shared
//! by every protocol variant.

pub mod bit_ops;
pub mod byte_order;
pub mod checksum;
pub mod conversions;

pub use bit_ops::*;
pub use byte_order::ByteOrder;
pub use checksum::*;
pub use conversions::*;
