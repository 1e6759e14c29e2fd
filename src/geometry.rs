//! Volume boot record and partition table field decoding.
//!
//! This is diagnostic sniffing only: just enough of the MBR and the FAT BPB
//! to report geometry to the operator. All real filesystem access goes
//! through the storage driver.

pub const SECTOR_LEN: usize = 512;

const MBR_PARTITION_TABLE: usize = 446;
const MBR_ENTRY_LEN: usize = 16;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

// Cluster-count thresholds that define the FAT variant.
const FAT12_MAX_CLUSTERS: u32 = 4085;
const FAT16_MAX_CLUSTERS: u32 = 65525;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeStats {
    pub cluster_count: u32,
    pub blocks_per_cluster: u8,
    pub fat_variant: u8,
}

impl VolumeStats {
    pub fn total_blocks(&self) -> u32 {
        self.cluster_count
            .saturating_mul(self.blocks_per_cluster as u32)
    }

    /// SD blocks are 512 bytes, so two blocks make a kilobyte.
    pub fn size_kb(&self) -> u32 {
        self.total_blocks() / 2
    }

    pub fn size_mb(&self) -> u32 {
        self.size_kb() / 1024
    }

    pub fn size_gb(&self) -> f32 {
        self.size_mb() as f32 / 1024.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// The sector carries no recognizable FAT16/FAT32 boot record.
    NotFat,
    UnsupportedSectorSize(u16),
}

/// Walks the MBR partition table and returns the start LBA of the first
/// used entry. `None` means no usable partition entry exists; the card may
/// still be formatted partitionless, with the boot record at sector 0.
pub fn locate_partition(sector0: &[u8; SECTOR_LEN]) -> Option<u32> {
    for idx in 0..4usize {
        let off = MBR_PARTITION_TABLE + idx * MBR_ENTRY_LEN;
        let p_type = sector0[off + 4];
        let start = le32(sector0, off + 8);
        if p_type != 0 && start != 0 {
            return Some(start);
        }
    }
    None
}

/// Decodes the BIOS parameter block of a FAT16/FAT32 volume boot record.
pub fn decode_vbr(vbr: &[u8; SECTOR_LEN]) -> Result<VolumeStats, GeometryError> {
    if vbr[510..512] != BOOT_SIGNATURE {
        return Err(GeometryError::NotFat);
    }

    let bytes_per_sector = le16(vbr, 11);
    if bytes_per_sector != SECTOR_LEN as u16 {
        return Err(GeometryError::UnsupportedSectorSize(bytes_per_sector));
    }

    let sectors_per_cluster = vbr[13];
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(GeometryError::NotFat);
    }

    let reserved = le16(vbr, 14) as u32;
    let num_fats = vbr[16] as u32;
    if reserved == 0 || num_fats == 0 {
        return Err(GeometryError::NotFat);
    }

    let root_entries = le16(vbr, 17) as u32;
    let root_dir_sectors = (root_entries * 32).div_ceil(SECTOR_LEN as u32);

    let total_sectors = match le16(vbr, 19) {
        0 => le32(vbr, 32),
        small => small as u32,
    };
    let fat_sectors = match le16(vbr, 22) {
        0 => le32(vbr, 36),
        small => small as u32,
    };
    if total_sectors == 0 || fat_sectors == 0 {
        return Err(GeometryError::NotFat);
    }

    let overhead = reserved + num_fats * fat_sectors + root_dir_sectors;
    if overhead >= total_sectors {
        return Err(GeometryError::NotFat);
    }

    let cluster_count = (total_sectors - overhead) / sectors_per_cluster as u32;
    let fat_variant = if cluster_count < FAT12_MAX_CLUSTERS {
        12
    } else if cluster_count < FAT16_MAX_CLUSTERS {
        16
    } else {
        32
    };

    Ok(VolumeStats {
        cluster_count,
        blocks_per_cluster: sectors_per_cluster,
        fat_variant,
    })
}

fn le16(sector: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([sector[off], sector[off + 1]])
}

fn le32(sector: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([
        sector[off],
        sector[off + 1],
        sector[off + 2],
        sector[off + 3],
    ])
}
