//! Low-level primitives for building the keyspace layers.

/// Byte-level utilities and encoding/decoding.
///
/// Order-preserving integer encoders and a checked read cursor.
pub mod bytes;
