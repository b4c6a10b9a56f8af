//! Secondary-index engine for an embedded document store.
//!
//! An [`IndexAccessMethod`] keeps one index in step with the documents of a
//! collection: it extracts keys, encodes them with a [`KeyCodec`] into
//! memcomparable bytes and stores `key ++ location` entries in an ordered
//! store. Cursors scan the entries in either direction and survive
//! concurrent changes through save/restore. New indexes over a full
//! collection are built with an external sort.

pub mod access;
pub mod bulk;
pub mod cursor;
pub mod data;
pub mod errors;
mod fio;
pub mod interrupt;
pub mod key;
pub mod options;
pub mod spec;
pub mod store;
pub mod ticket;

#[cfg(test)]
mod util;

pub use access::IndexAccessMethod;
pub use bulk::{BulkBuilder, BulkPhase};
pub use cursor::{IndexCursor, ScanDirection};
pub use data::{
    document::{Document, FieldKeyExtractor, KeyExtractor},
    record::{RecordLocation, RecordStore},
};
pub use errors::{ErrorCode, Errors, Result};
pub use interrupt::Interrupt;
pub use key::{Key, KeyCodec, Value};
pub use options::{BulkOptions, IndexOptions, InsertDeleteOptions, StoreType};
pub use spec::{Direction, IndexSpec};
pub use ticket::UpdateTicket;
