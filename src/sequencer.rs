//! The diagnostic sequencer: five operator-gated steps, fail-fast.
//!
//! Every step waits for a console line terminator, performs one storage
//! operation, and reports the result as plain text. A failing step ends the
//! pass; what happens next is the driver's decision via [`FailurePolicy`].

use embedded_io::{Read, Write};

use crate::console::Console;
use crate::pattern::PatternSource;
use crate::storage::StorageBridge;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagStep {
    CardProbe,
    Mount,
    VolumeReport,
    PatternWrite,
    ReadBack,
}

/// What the top-level driver does after a failed pass.
///
/// `AbortToCaller` re-runs the whole prompted sequence from the top;
/// `HaltForever` parks the processor until an external reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    AbortToCaller,
    HaltForever,
}

/// Runs one full prompted pass. Returns the step that ended the pass early,
/// if any. Never retries: a failure is terminal for this pass.
pub fn run_pass<P, S>(
    console: &mut Console<P>,
    storage: &mut S,
    file_name: &str,
    payload_len: u32,
) -> Result<(), DiagStep>
where
    P: Read + Write,
    S: StorageBridge,
{
    console.line(format_args!("Start of SD test"));

    console.prompt("Press enter to begin low-level card initialization");
    let card = match storage.probe() {
        Ok(report) => {
            console.line(format_args!("Wiring is correct and a card is present."));
            console.line(format_args!("Card capacity:     {} bytes", report.capacity_bytes));
            console.blank();
            report.kind
        }
        Err(err) => {
            console.line(format_args!("initialization failed. Things to check:"));
            console.line(format_args!("* is a card inserted?"));
            console.line(format_args!("* is your wiring correct?"));
            console.line(format_args!("* does the chip-select pin match your module?"));
            log::warn!("card probe failed: {err:?}");
            return Err(DiagStep::CardProbe);
        }
    };

    console.prompt("Press enter to mount the filesystem");
    match storage.mount() {
        Ok(()) => {
            console.line(format_args!("Init OK"));
            console.blank();
        }
        Err(err) => {
            console.line(format_args!("Initialization failed"));
            log::warn!("volume mount failed: {err:?}");
            return Err(DiagStep::Mount);
        }
    }

    console.prompt("Press enter to query for card info");
    console.line(format_args!("Card type:         {}", card.label()));
    let stats = match storage.volume_stats() {
        Ok(stats) => stats,
        Err(err) => {
            console.line(format_args!("Could not find FAT16/FAT32 partition."));
            console.line(format_args!("Make sure you've formatted the card"));
            log::warn!("volume geometry read failed: {err:?}");
            return Err(DiagStep::VolumeReport);
        }
    };
    console.line(format_args!("Clusters:          {}", stats.cluster_count));
    console.line(format_args!("Blocks x Cluster:  {}", stats.blocks_per_cluster));
    console.line(format_args!("Total Blocks:      {}", stats.total_blocks()));
    console.blank();
    console.line(format_args!("Volume type is:    FAT{}", stats.fat_variant));
    console.line(format_args!("Volume size (Kb):  {}", stats.size_kb()));
    console.line(format_args!("Volume size (Mb):  {}", stats.size_mb()));
    console.line(format_args!("Volume size (Gb):  {:.2}", stats.size_gb()));
    console.blank();
    console.line(format_args!(
        "Files found on the card (name, date and size in bytes):"
    ));
    let listing = storage.walk_root(&mut |entry| {
        for _ in 0..entry.depth {
            console.text(format_args!("  "));
        }
        if entry.truncated {
            console.line(format_args!("(more entries not shown)"));
        } else if entry.is_dir {
            console.line(format_args!("{}/", entry.name));
        } else {
            console.line(format_args!(
                "{}  {}  {}",
                entry.name, entry.mtime, entry.size
            ));
        }
    });
    if let Err(err) = listing {
        console.line(format_args!("Could not list the root directory"));
        log::warn!("root listing failed: {err:?}");
        return Err(DiagStep::VolumeReport);
    }
    console.blank();

    console.prompt("Press enter to write a file to the card");
    console.line(format_args!("Opening {file_name} for writing"));
    console.line(format_args!("Writing data"));
    let mut pattern = PatternSource::new(payload_len);
    let written = storage.overwrite(file_name, &mut |buf| {
        let n = pattern.fill(buf);
        console.bytes(&buf[..n]);
        n
    });
    match written {
        Ok(total) => {
            console.blank();
            console.line(format_args!("Done writing"));
            console.blank();
            log::info!("wrote {total} bytes to {file_name}");
        }
        Err(err) => {
            console.line(format_args!("Failed to open file"));
            log::warn!("pattern write failed: {err:?}");
            return Err(DiagStep::PatternWrite);
        }
    }

    console.prompt("Press enter to read the file from the card");
    console.line(format_args!("Opening {file_name} for reading"));
    console.line(format_args!("Reading data"));
    match storage.read_back(file_name, &mut |chunk| console.bytes(chunk)) {
        Ok(total) => {
            console.blank();
            console.line(format_args!("Done reading"));
            console.blank();
            log::info!("read {total} bytes from {file_name}");
            Ok(())
        }
        Err(err) => {
            console.line(format_args!("Failed to open file"));
            log::warn!("read-back failed: {err:?}");
            Err(DiagStep::ReadBack)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{run_pass, DiagStep};
    use crate::console::testport::{contains, ScriptPort};
    use crate::console::Console;
    use crate::geometry::VolumeStats;
    use crate::storage::{CardKind, CardReport, DirEntryInfo, StorageBridge};

    const FIVE_ENTERS: &[u8] = b"\n\n\n\n\n";

    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    enum Listing {
        #[default]
        Flat,
        Nested,
        Cut,
    }

    #[derive(Default)]
    struct MemoryBridge {
        fail_at: Option<DiagStep>,
        listing: Listing,
        calls: heapless::Vec<DiagStep, 16>,
        file: heapless::Vec<u8, 8192>,
        file_present: bool,
    }

    fn entry(name: &str, mtime: &str, size: u32, is_dir: bool, depth: u8) -> DirEntryInfo {
        let mut info = DirEntryInfo {
            name: heapless::String::new(),
            mtime: heapless::String::new(),
            size,
            is_dir,
            depth,
            truncated: false,
        };
        info.name.push_str(name).unwrap();
        info.mtime.push_str(mtime).unwrap();
        info
    }

    impl MemoryBridge {
        fn gate(&mut self, step: DiagStep) -> Result<(), &'static str> {
            let _ = self.calls.push(step);
            if self.fail_at == Some(step) {
                Err("forced failure")
            } else {
                Ok(())
            }
        }
    }

    impl StorageBridge for MemoryBridge {
        type Error = &'static str;

        fn probe(&mut self) -> Result<CardReport, Self::Error> {
            self.gate(DiagStep::CardProbe)?;
            Ok(CardReport {
                kind: CardKind::Sdhc,
                capacity_bytes: 8 << 30,
            })
        }

        fn mount(&mut self) -> Result<(), Self::Error> {
            self.gate(DiagStep::Mount)
        }

        fn volume_stats(&mut self) -> Result<VolumeStats, Self::Error> {
            self.gate(DiagStep::VolumeReport)?;
            Ok(VolumeStats {
                cluster_count: 59652,
                blocks_per_cluster: 8,
                fat_variant: 32,
            })
        }

        fn walk_root(
            &mut self,
            visit: &mut dyn FnMut(&DirEntryInfo),
        ) -> Result<(), Self::Error> {
            match self.listing {
                Listing::Flat => {
                    visit(&entry("OLD.LOG", "2026-08-30 12:00:00", 42, false, 0));
                }
                Listing::Nested => {
                    // Each directory line is followed by its own subtree.
                    visit(&entry("A", "", 0, true, 0));
                    visit(&entry("A1.TXT", "2026-01-01 00:00:00", 1, false, 1));
                    visit(&entry("B", "", 0, true, 0));
                    visit(&entry("B1.TXT", "2026-01-01 00:00:00", 2, false, 1));
                }
                Listing::Cut => {
                    visit(&entry("A", "", 0, true, 0));
                    visit(&DirEntryInfo {
                        truncated: true,
                        ..entry("", "", 0, false, 1)
                    });
                }
            }
            Ok(())
        }

        fn overwrite(
            &mut self,
            _name: &str,
            fill: &mut dyn FnMut(&mut [u8]) -> usize,
        ) -> Result<u32, Self::Error> {
            self.gate(DiagStep::PatternWrite)?;
            self.file.clear();
            self.file_present = true;
            let mut chunk = [0u8; 32];
            loop {
                let n = fill(&mut chunk);
                if n == 0 {
                    break;
                }
                self.file.extend_from_slice(&chunk[..n]).unwrap();
            }
            Ok(self.file.len() as u32)
        }

        fn read_back(
            &mut self,
            _name: &str,
            sink: &mut dyn FnMut(&[u8]),
        ) -> Result<u32, Self::Error> {
            self.gate(DiagStep::ReadBack)?;
            if !self.file_present {
                return Err("no such file");
            }
            for chunk in self.file.chunks(16) {
                sink(chunk);
            }
            Ok(self.file.len() as u32)
        }
    }

    #[test]
    fn full_pass_round_trips_the_pattern() {
        let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
        let mut bridge = MemoryBridge::default();

        run_pass(&mut console, &mut bridge, "TEST.TXT", 2048).unwrap();

        assert_eq!(
            &bridge.calls[..],
            &[
                DiagStep::CardProbe,
                DiagStep::Mount,
                DiagStep::VolumeReport,
                DiagStep::PatternWrite,
                DiagStep::ReadBack,
            ]
        );
        assert_eq!(bridge.file.len(), 2049);
        for (i, b) in bridge.file[..2048].iter().enumerate() {
            assert_eq!(*b, (i % 256) as u8);
        }
        assert_eq!(bridge.file[2048], 0);

        let out = &console_output(&console)[..];
        assert!(contains(out, b"Card type:         SDHC"));
        assert!(contains(out, b"Clusters:          59652"));
        assert!(contains(out, b"Total Blocks:      477216"));
        assert!(contains(out, b"Volume type is:    FAT32"));
        assert!(contains(out, b"OLD.LOG  2026-08-30 12:00:00  42"));
        assert!(contains(out, b"Done writing"));
        assert!(contains(out, b"Done reading"));
    }

    #[test]
    fn probe_failure_stops_before_mount() {
        let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
        let mut bridge = MemoryBridge {
            fail_at: Some(DiagStep::CardProbe),
            ..MemoryBridge::default()
        };

        let result = run_pass(&mut console, &mut bridge, "TEST.TXT", 2048);

        assert_eq!(result, Err(DiagStep::CardProbe));
        assert_eq!(&bridge.calls[..], &[DiagStep::CardProbe]);
        let out = &console_output(&console)[..];
        assert!(contains(out, b"initialization failed. Things to check:"));
        assert!(contains(out, b"* is a card inserted?"));
    }

    #[test]
    fn mount_failure_stops_before_metadata() {
        let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
        let mut bridge = MemoryBridge {
            fail_at: Some(DiagStep::Mount),
            ..MemoryBridge::default()
        };

        let result = run_pass(&mut console, &mut bridge, "TEST.TXT", 2048);

        assert_eq!(result, Err(DiagStep::Mount));
        assert_eq!(&bridge.calls[..], &[DiagStep::CardProbe, DiagStep::Mount]);
    }

    #[test]
    fn unformatted_volume_reports_reformat_hint() {
        let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
        let mut bridge = MemoryBridge {
            fail_at: Some(DiagStep::VolumeReport),
            ..MemoryBridge::default()
        };

        let result = run_pass(&mut console, &mut bridge, "TEST.TXT", 2048);

        assert_eq!(result, Err(DiagStep::VolumeReport));
        let out = &console_output(&console)[..];
        assert!(contains(out, b"Could not find FAT16/FAT32 partition."));
        assert!(contains(out, b"Make sure you've formatted the card"));
    }

    #[test]
    fn listing_prints_each_subtree_under_its_own_directory() {
        let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
        let mut bridge = MemoryBridge {
            listing: Listing::Nested,
            ..MemoryBridge::default()
        };

        run_pass(&mut console, &mut bridge, "TEST.TXT", 2048).unwrap();

        let out = &console_output(&console)[..];
        // A's children sit between A/ and B/, never interleaved after B/.
        assert!(contains(
            out,
            b"A/\r\n  A1.TXT  2026-01-01 00:00:00  1\r\nB/\r\n  B1.TXT  2026-01-01 00:00:00  2\r\n"
        ));
    }

    #[test]
    fn cut_listing_carries_a_visible_notice() {
        let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
        let mut bridge = MemoryBridge {
            listing: Listing::Cut,
            ..MemoryBridge::default()
        };

        run_pass(&mut console, &mut bridge, "TEST.TXT", 2048).unwrap();

        let out = &console_output(&console)[..];
        assert!(contains(out, b"A/\r\n  (more entries not shown)\r\n"));
    }

    #[test]
    fn second_pass_truncates_instead_of_appending() {
        let mut bridge = MemoryBridge::default();
        for _ in 0..2 {
            let mut console = Console::new(ScriptPort::new(FIVE_ENTERS));
            run_pass(&mut console, &mut bridge, "TEST.TXT", 2048).unwrap();
        }
        assert_eq!(bridge.file.len(), 2049);
    }

    fn console_output(console: &Console<ScriptPort>) -> &heapless::Vec<u8, 8192> {
        console.output()
    }
}
