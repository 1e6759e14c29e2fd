//! Seam between the diagnostic sequencer and the storage driver.
//!
//! The sequencer treats storage as an opaque capability provider; the one
//! production implementation lives in [`crate::sd_bridge`], and tests drive
//! the sequencer with in-memory fakes.

use core::fmt;

use crate::geometry::VolumeStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardKind {
    Sd1,
    Sd2,
    Sdhc,
    Unknown,
}

impl CardKind {
    pub fn label(self) -> &'static str {
        match self {
            CardKind::Sd1 => "SD1",
            CardKind::Sd2 => "SD2",
            CardKind::Sdhc => "SDHC",
            CardKind::Unknown => "Unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardReport {
    pub kind: CardKind,
    pub capacity_bytes: u64,
}

/// One root-listing row, already formatted for the console.
pub struct DirEntryInfo {
    pub name: heapless::String<16>,
    pub mtime: heapless::String<24>,
    pub size: u32,
    pub is_dir: bool,
    pub depth: u8,
    /// Marks a level whose directory list was cut short, not a real entry.
    pub truncated: bool,
}

pub trait StorageBridge {
    type Error: fmt::Debug;

    /// Low-level card init at the configured chip select; reports what kind
    /// of card answered.
    fn probe(&mut self) -> Result<CardReport, Self::Error>;

    /// Filesystem-aware init of volume 0 on the same bus.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// FAT geometry of the mounted volume.
    fn volume_stats(&mut self) -> Result<VolumeStats, Self::Error>;

    /// Visits every entry under the root directory, depth-first.
    fn walk_root(&mut self, visit: &mut dyn FnMut(&DirEntryInfo)) -> Result<(), Self::Error>;

    /// Creates or truncates `name` and writes chunks pulled from `fill`
    /// until it produces an empty run. Returns the byte count written.
    fn overwrite(
        &mut self,
        name: &str,
        fill: &mut dyn FnMut(&mut [u8]) -> usize,
    ) -> Result<u32, Self::Error>;

    /// Streams the whole of `name` through `sink`. Returns the byte count
    /// read.
    fn read_back(
        &mut self,
        name: &str,
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<u32, Self::Error>;
}
