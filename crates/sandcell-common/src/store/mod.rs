//! File-backed, memory-mapped record store.
//!
//! A store is a single region file with one [`ShareWriter`] and any number
//! of [`ShareReader`]s, possibly in other processes. The `layout` module describes the
//! on-disk format.

mod layout;
mod reader;
mod writer;

pub use layout::{MAX_KEY_LEN, Record, StoreStats};
pub use reader::ShareReader;
pub use writer::ShareWriter;
