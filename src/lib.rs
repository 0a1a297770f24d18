//! # dalib
//!
//! Read, write, and transform the proprietary on-disk and on-wire artifacts
//! of the DarkAges client/server game.
//! * `hpf` is a bit-exact adaptive Huffman codec used to compress HPF image
//!   payloads.
//! * `cipher` is the stateful packet cipher used to encrypt and decrypt
//!   client/server datagrams.
//! * `archive` reads and writes the indexed `.dat` container format other
//!   file readers pull their byte ranges from.
//!
//! This is not a general-purpose compression library, nor a secure
//! cryptography library — the codec and cipher exist purely for
//! wire/format compatibility with the legacy client and server.
//!
//! ## Example
//!
//! ```rs
//! use dalib::hpf;
//! let test_data = "This is the chaunt of the priests.".as_bytes();
//! let compressed = hpf::compress(test_data);
//! let expanded = hpf::decompress(&compressed).expect("decompression failed");
//! assert_eq!(expanded, test_data);
//! ```

mod tools;
pub mod archive;
pub mod cipher;
pub mod hpf;

/// Errors surfaced by any of the three subsystems. All errors propagate to
/// the caller; there are no retries at this layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("invalid range: offset {offset} count {count} exceeds length {len}")]
    InvalidRange { offset: usize, count: usize, len: usize },
    #[error("entry name too long: {0}")]
    NameTooLong(String),
    #[error("archive is read-only (memory-mapped)")]
    ReadOnlyArchive,
    #[error("operation attempted on a disposed archive or cipher")]
    Disposed,
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
