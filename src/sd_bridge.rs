//! [`StorageBridge`] implementation backed by the `embedded-sdmmc` driver.
//!
//! The bridge owns the driver's volume manager and the raw volume handle,
//! opening and closing directory and file handles per operation so no two
//! streams ever overlap. Geometry is sniffed from the boot sectors through
//! the driver's raw block access; everything file-shaped goes through the
//! driver's FAT code.

use core::fmt::Write as _;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::sdcard::CardType;
use embedded_sdmmc::{
    Block, BlockDevice, BlockIdx, Error as SdmmcError, Mode, RawDirectory, RawVolume, SdCard,
    SdCardError, ShortFileName, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};

use crate::geometry::{self, GeometryError, VolumeStats, SECTOR_LEN};
use crate::storage::{CardKind, CardReport, DirEntryInfo, StorageBridge};

const MAX_OPEN_DIRS: usize = 8;
const MAX_OPEN_FILES: usize = 4;
// One open directory per level; stay under the driver's handle budget.
const LIST_DEPTH_MAX: u8 = 6;
const SUBDIRS_PER_LEVEL: usize = 16;
const IO_CHUNK: usize = 64;

/// The card slot has no RTC; stamp created files with a fixed date.
pub struct FixedClock;

impl TimeSource for FixedClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Debug)]
pub enum SdBridgeError {
    Driver(SdmmcError<SdCardError>),
    Geometry(GeometryError),
    /// A step that needs the volume ran before a successful mount.
    NotMounted,
}

impl From<SdmmcError<SdCardError>> for SdBridgeError {
    fn from(value: SdmmcError<SdCardError>) -> Self {
        Self::Driver(value)
    }
}

impl From<GeometryError> for SdBridgeError {
    fn from(value: GeometryError) -> Self {
        Self::Geometry(value)
    }
}

pub struct SdBridge<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    mgr: VolumeManager<SdCard<SPI, DELAY>, FixedClock, MAX_OPEN_DIRS, MAX_OPEN_FILES, 1>,
    volume: Option<RawVolume>,
}

impl<SPI, DELAY> SdBridge<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, delay: DELAY) -> Self {
        let card = SdCard::new(spi, delay);
        Self {
            mgr: VolumeManager::new_with_limits(card, FixedClock, 0x5d00_0000),
            volume: None,
        }
    }

    fn mounted(&self) -> Result<RawVolume, SdBridgeError> {
        self.volume.ok_or(SdBridgeError::NotMounted)
    }

    fn read_sector(&mut self, idx: BlockIdx) -> Result<[u8; SECTOR_LEN], SdBridgeError> {
        let mut blocks = [Block::new()];
        self.mgr
            .device()
            .read(&mut blocks, idx, "volume geometry")
            .map_err(SdmmcError::DeviceError)?;
        Ok(blocks[0].contents)
    }

    fn walk_dir(
        &mut self,
        dir: RawDirectory,
        depth: u8,
        visit: &mut dyn FnMut(&DirEntryInfo),
    ) -> Result<(), SdBridgeError> {
        let mut subdirs: heapless::Vec<ShortFileName, SUBDIRS_PER_LEVEL> = heapless::Vec::new();
        let mut overflowed = false;
        self.mgr.iterate_dir(dir, |entry| {
            if entry.attributes.is_volume() {
                return;
            }
            let mut name: heapless::String<16> = heapless::String::new();
            let _ = write!(name, "{}", entry.name);
            if name.as_str() == "." || name.as_str() == ".." {
                return;
            }
            if entry.attributes.is_directory() {
                if depth < LIST_DEPTH_MAX {
                    // Emitted later, when the walk descends, so each subtree
                    // prints contiguously under its own directory line.
                    if subdirs.push(entry.name.clone()).is_err() {
                        overflowed = true;
                    }
                } else {
                    // Too deep to descend; still show the directory itself.
                    visit(&DirEntryInfo {
                        name,
                        mtime: heapless::String::new(),
                        size: 0,
                        is_dir: true,
                        depth,
                        truncated: false,
                    });
                }
                return;
            }
            let t = entry.mtime;
            let mut mtime: heapless::String<24> = heapless::String::new();
            let _ = write!(
                mtime,
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                1970 + t.year_since_1970 as u16,
                t.zero_indexed_month + 1,
                t.zero_indexed_day + 1,
                t.hours,
                t.minutes,
                t.seconds
            );
            visit(&DirEntryInfo {
                name,
                mtime,
                size: entry.size,
                is_dir: false,
                depth,
                truncated: false,
            });
        })?;

        for sub in &subdirs {
            let mut name: heapless::String<16> = heapless::String::new();
            let _ = write!(name, "{}", sub);
            visit(&DirEntryInfo {
                name,
                mtime: heapless::String::new(),
                size: 0,
                is_dir: true,
                depth,
                truncated: false,
            });
            let child = self.mgr.open_dir(dir, sub.clone())?;
            let outcome = self.walk_dir(child, depth + 1, visit);
            let _ = self.mgr.close_dir(child);
            outcome?;
        }

        if overflowed {
            log::warn!(
                "listing tracks at most {SUBDIRS_PER_LEVEL} subdirectories per level; rest skipped at depth {depth}"
            );
            visit(&DirEntryInfo {
                name: heapless::String::new(),
                mtime: heapless::String::new(),
                size: 0,
                is_dir: false,
                depth,
                truncated: true,
            });
        }
        Ok(())
    }
}

impl<SPI, DELAY> StorageBridge for SdBridge<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    type Error = SdBridgeError;

    fn probe(&mut self) -> Result<CardReport, Self::Error> {
        // Force a fresh acquire sequence so a re-run genuinely re-probes
        // the card instead of answering from the driver's cached state.
        self.mgr.device().mark_card_uninit();
        let capacity_bytes = self
            .mgr
            .device()
            .num_bytes()
            .map_err(SdmmcError::DeviceError)?;
        let kind = match self.mgr.device().get_card_type() {
            Some(CardType::SD1) => CardKind::Sd1,
            Some(CardType::SD2) => CardKind::Sd2,
            Some(CardType::SDHC) => CardKind::Sdhc,
            None => CardKind::Unknown,
        };
        Ok(CardReport {
            kind,
            capacity_bytes,
        })
    }

    fn mount(&mut self) -> Result<(), Self::Error> {
        // A restarted pass mounts again; drop whatever the last one left.
        if let Some(stale) = self.volume.take() {
            let _ = self.mgr.close_volume(stale);
        }
        let volume = self.mgr.open_raw_volume(VolumeIdx(0))?;
        self.volume = Some(volume);
        Ok(())
    }

    fn volume_stats(&mut self) -> Result<VolumeStats, Self::Error> {
        self.mounted()?;
        let sector0 = self.read_sector(BlockIdx(0))?;
        // Partitionless cards carry the boot record at sector 0.
        if let Ok(stats) = geometry::decode_vbr(&sector0) {
            return Ok(stats);
        }
        let start =
            geometry::locate_partition(&sector0).ok_or(GeometryError::NotFat)?;
        let vbr = self.read_sector(BlockIdx(start))?;
        Ok(geometry::decode_vbr(&vbr)?)
    }

    fn walk_root(&mut self, visit: &mut dyn FnMut(&DirEntryInfo)) -> Result<(), Self::Error> {
        let volume = self.mounted()?;
        let root = self.mgr.open_root_dir(volume)?;
        let outcome = self.walk_dir(root, 0, visit);
        let _ = self.mgr.close_dir(root);
        outcome
    }

    fn overwrite(
        &mut self,
        name: &str,
        fill: &mut dyn FnMut(&mut [u8]) -> usize,
    ) -> Result<u32, Self::Error> {
        let volume = self.mounted()?;
        let root = self.mgr.open_root_dir(volume)?;
        let file = match self
            .mgr
            .open_file_in_dir(root, name, Mode::ReadWriteCreateOrTruncate)
        {
            Ok(file) => file,
            Err(err) => {
                let _ = self.mgr.close_dir(root);
                return Err(err.into());
            }
        };

        let mut chunk = [0u8; IO_CHUNK];
        let mut total = 0u32;
        let mut failure: Option<SdBridgeError> = None;
        loop {
            let n = fill(&mut chunk);
            if n == 0 {
                break;
            }
            if let Err(err) = self.mgr.write(file, &chunk[..n]) {
                failure = Some(err.into());
                break;
            }
            total += n as u32;
        }

        let closed = self.mgr.close_file(file);
        let _ = self.mgr.close_dir(root);
        if let Some(err) = failure {
            return Err(err);
        }
        closed?;
        Ok(total)
    }

    fn read_back(
        &mut self,
        name: &str,
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<u32, Self::Error> {
        let volume = self.mounted()?;
        let root = self.mgr.open_root_dir(volume)?;
        let file = match self.mgr.open_file_in_dir(root, name, Mode::ReadOnly) {
            Ok(file) => file,
            Err(err) => {
                let _ = self.mgr.close_dir(root);
                return Err(err.into());
            }
        };

        let mut chunk = [0u8; IO_CHUNK];
        let mut total = 0u32;
        let mut failure: Option<SdBridgeError> = None;
        loop {
            match self.mgr.file_eof(file) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    failure = Some(err.into());
                    break;
                }
            }
            match self.mgr.read(file, &mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    sink(&chunk[..n]);
                    total += n as u32;
                }
                Err(err) => {
                    failure = Some(err.into());
                    break;
                }
            }
        }

        let closed = self.mgr.close_file(file);
        let _ = self.mgr.close_dir(root);
        if let Some(err) = failure {
            return Err(err);
        }
        closed?;
        Ok(total)
    }
}
