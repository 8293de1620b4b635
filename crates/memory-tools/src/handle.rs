//! Shared engine handle the four tools dispatch into.
//!
//! Grounded on `crates/memory/src/manager/mod.rs`'s dependency-bundle
//! shape, reused here one level up so the tool layer doesn't need to
//! know about `MultiViewCoordinator` internals.

use memory_core::reader::MemoryReader;
use memory_core::writer::MemoryWriter;

/// `writer.provenance`/`writer.coordinator` are reused directly by the
/// manage/stats tools rather than duplicated onto this struct.
pub struct MemoryEngineHandle {
    pub writer: MemoryWriter,
    pub reader: MemoryReader,
}
