//! PCAP file reader.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use tracing::debug;

use super::RawPacket;
use crate::error::{Error, PcapError as OurPcapError};

/// Buffer size for reading PCAP files (64KB).
const BUFFER_SIZE: usize = 65536;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

type Source = BufReader<Box<dyn Read + Send>>;

/// Reader for PCAP and PCAPNG files, with optional gzip decompression.
pub struct PcapReader {
    inner: ReaderInner,
    frame_number: u64,
}

enum ReaderInner {
    Legacy {
        reader: LegacyPcapReader<Source>,
        link_type: u16,
        nanosecond: bool,
    },
    Ng {
        reader: PcapNGReader<Source>,
        interfaces: Vec<Interface>,
    },
}

/// Interface description from a PCAPNG section.
#[derive(Debug, Clone, Copy)]
struct Interface {
    link_type: u16,
    /// Timestamp units per second.
    units_per_sec: u64,
}

impl PcapReader {
    /// Open a capture file for reading.
    ///
    /// Automatically detects and decompresses gzipped files.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let is_gzipped = is_gzip_file(path)?;

        // Peek at the magic number, then start over from the beginning
        let mut magic = [0u8; 4];
        open_source(path, is_gzipped)?
            .read_exact(&mut magic)
            .map_err(|_| {
                Error::Pcap(OurPcapError::InvalidFormat {
                    reason: "File too short to read magic number".to_string(),
                })
            })?;
        let source = open_source(path, is_gzipped)?;

        let reader = match &magic {
            [0xd4, 0xc3, 0xb2, 0xa1] | [0xa1, 0xb2, 0xc3, 0xd4] => Self::open_legacy(source, false),
            [0x4d, 0x3c, 0xb2, 0xa1] | [0xa1, 0xb2, 0x3c, 0x4d] => Self::open_legacy(source, true),
            [0x0a, 0x0d, 0x0d, 0x0a] => Self::open_ng(source),
            _ => Err(Error::Pcap(OurPcapError::InvalidFormat {
                reason: format!("Unknown magic number: {magic:02x?}"),
            })),
        }?;
        debug!(path = %path.display(), gzip = is_gzipped, "opened capture file");
        Ok(reader)
    }

    fn open_legacy(source: Source, nanosecond: bool) -> Result<Self, Error> {
        let reader = LegacyPcapReader::new(BUFFER_SIZE, source).map_err(|e| {
            Error::Pcap(OurPcapError::InvalidFormat {
                reason: format!("Failed to parse PCAP header: {e}"),
            })
        })?;

        Ok(Self {
            inner: ReaderInner::Legacy {
                reader,
                link_type: 1, // Updated from the file header
                nanosecond,
            },
            frame_number: 0,
        })
    }

    fn open_ng(source: Source) -> Result<Self, Error> {
        let reader = PcapNGReader::new(BUFFER_SIZE, source).map_err(|e| {
            Error::Pcap(OurPcapError::InvalidFormat {
                reason: format!("Failed to parse PCAPNG header: {e}"),
            })
        })?;

        Ok(Self {
            inner: ReaderInner::Ng {
                reader,
                interfaces: Vec::new(),
            },
            frame_number: 0,
        })
    }

    /// Get the current frame count.
    pub fn frame_count(&self) -> u64 {
        self.frame_number
    }

    /// Read the next packet.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket>, Error> {
        let packet = match &mut self.inner {
            ReaderInner::Legacy {
                reader,
                link_type,
                nanosecond,
            } => next_legacy(reader, link_type, *nanosecond)?,
            ReaderInner::Ng { reader, interfaces } => next_ng(reader, interfaces)?,
        };
        Ok(packet.map(|mut packet| {
            self.frame_number += 1;
            packet.frame_number = self.frame_number;
            packet
        }))
    }
}

fn next_legacy(
    reader: &mut LegacyPcapReader<Source>,
    link_type: &mut u16,
    nanosecond: bool,
) -> Result<Option<RawPacket>, Error> {
    loop {
        match reader.next() {
            Ok((offset, block)) => match block {
                PcapBlockOwned::Legacy(packet) => {
                    let fraction = if nanosecond {
                        packet.ts_usec as i64 / 1_000
                    } else {
                        packet.ts_usec as i64
                    };
                    let raw = RawPacket::new(
                        0,
                        (packet.ts_sec as i64) * 1_000_000 + fraction,
                        packet.caplen,
                        packet.origlen,
                        *link_type,
                        Bytes::copy_from_slice(packet.data),
                    );
                    reader.consume(offset);
                    return Ok(Some(raw));
                }
                PcapBlockOwned::LegacyHeader(header) => {
                    *link_type = header.network.0 as u16;
                    reader.consume(offset);
                }
                _ => reader.consume(offset),
            },
            Err(PcapError::Eof) => return Ok(None),
            Err(PcapError::Incomplete(_)) => refill(reader)?,
            Err(e) => {
                return Err(Error::Pcap(OurPcapError::InvalidFormat {
                    reason: format!("Parse error: {e}"),
                }))
            }
        }
    }
}

fn next_ng(
    reader: &mut PcapNGReader<Source>,
    interfaces: &mut Vec<Interface>,
) -> Result<Option<RawPacket>, Error> {
    loop {
        match reader.next() {
            Ok((offset, block)) => match block {
                PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                    // Interface ids restart in every section
                    interfaces.clear();
                    reader.consume(offset);
                }
                PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                    interfaces.push(Interface {
                        link_type: idb.linktype.0 as u16,
                        units_per_sec: ts_units_per_sec(idb.if_tsresol),
                    });
                    reader.consume(offset);
                }
                PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                    let interface = interfaces.get(epb.if_id as usize).copied().unwrap_or(Interface {
                        link_type: 1,
                        units_per_sec: 1_000_000,
                    });
                    let ts = ((epb.ts_high as u64) << 32) | (epb.ts_low as u64);
                    let raw = RawPacket::new(
                        0,
                        scale_to_micros(ts, interface.units_per_sec),
                        epb.caplen,
                        epb.origlen,
                        interface.link_type,
                        Bytes::copy_from_slice(epb.data),
                    );
                    reader.consume(offset);
                    return Ok(Some(raw));
                }
                PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                    let link_type = interfaces.first().map(|i| i.link_type).unwrap_or(1);
                    let raw = RawPacket::new(
                        0,
                        0, // No timestamp in simple packets
                        spb.data.len() as u32,
                        spb.origlen,
                        link_type,
                        Bytes::copy_from_slice(spb.data),
                    );
                    reader.consume(offset);
                    return Ok(Some(raw));
                }
                _ => reader.consume(offset),
            },
            Err(PcapError::Eof) => return Ok(None),
            Err(PcapError::Incomplete(_)) => refill(reader)?,
            Err(e) => {
                return Err(Error::Pcap(OurPcapError::InvalidFormat {
                    reason: format!("Parse error: {e}"),
                }))
            }
        }
    }
}

fn refill<R: PcapReaderIterator>(reader: &mut R) -> Result<(), Error> {
    reader.refill().map_err(|e| {
        Error::Pcap(OurPcapError::InvalidFormat {
            reason: format!("Refill error: {e}"),
        })
    })
}

/// Decode the `if_tsresol` option: high bit set means a power of two,
/// otherwise a power of ten.
fn ts_units_per_sec(tsresol: u8) -> u64 {
    let exponent = (tsresol & 0x7f) as u32;
    let units = if tsresol & 0x80 != 0 {
        2u64.checked_pow(exponent)
    } else {
        10u64.checked_pow(exponent)
    };
    match units {
        Some(0) | None => 1_000_000,
        Some(units) => units,
    }
}

/// Convert interface timestamp units to microseconds, saturating at
/// `i64::MAX`.
fn scale_to_micros(ts: u64, units_per_sec: u64) -> i64 {
    let units_per_sec = units_per_sec.max(1);
    let secs = ts / units_per_sec;
    let frac = ts % units_per_sec;
    let micros = secs
        .saturating_mul(1_000_000)
        .saturating_add((frac as u128 * 1_000_000 / units_per_sec as u128) as u64);
    micros.min(i64::MAX as u64) as i64
}

fn open_source(path: &Path, is_gzipped: bool) -> Result<Source, Error> {
    let file = File::open(path).map_err(|_| {
        Error::Pcap(OurPcapError::FileNotFound {
            path: path.display().to_string(),
        })
    })?;
    let reader: Box<dyn Read + Send> = if is_gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::with_capacity(BUFFER_SIZE, reader))
}

/// Check if a file is gzipped by extension or magic bytes.
fn is_gzip_file(path: &Path) -> Result<bool, Error> {
    if is_gzip_extension(path) {
        return Ok(true);
    }

    let mut file = File::open(path).map_err(|_| {
        Error::Pcap(OurPcapError::FileNotFound {
            path: path.display().to_string(),
        })
    })?;

    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(_) => Ok(false), // File too short to be gzipped
    }
}

/// Check if a path appears to be a gzip file by extension only.
pub fn is_gzip_extension<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .file_name()
        .and_then(|f| f.to_str())
        .map(|name| name.to_lowercase().ends_with(".gz"))
        .unwrap_or(false)
}

impl Iterator for PcapReader {
    type Item = Result<RawPacket, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pcap_file;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(data: &[u8], suffix: &str) -> NamedTempFile {
        let mut temp = NamedTempFile::with_suffix(suffix).unwrap();
        temp.write_all(data).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_detect_gzip_by_extension() {
        assert!(is_gzip_extension("test.pcap.gz"));
        assert!(is_gzip_extension("TEST.PCAP.GZ"));
        assert!(!is_gzip_extension("test.pcapng"));
    }

    #[test]
    fn test_detect_gzip_by_magic_bytes() {
        let temp = write_temp(&[0x1f, 0x8b, 0x00, 0x00], ".bin");
        assert!(is_gzip_file(temp.path()).unwrap());

        let temp = write_temp(&[0xd4, 0xc3, 0xb2, 0xa1], ".bin");
        assert!(!is_gzip_file(temp.path()).unwrap());
    }

    #[test]
    fn test_read_legacy_pcap() {
        let data = pcap_file(1, &[(1_000_000_123, vec![0xaa; 20]), (1_000_000_456, vec![0xbb; 30])]);
        let temp = write_temp(&data, ".pcap");

        let packets: Vec<RawPacket> = PcapReader::open(temp.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].frame_number, 1);
        assert_eq!(packets[0].timestamp_us, 1_000_000_123);
        assert_eq!(packets[0].link_type, 1);
        assert_eq!(packets[1].data.len(), 30);
        assert!(!packets[1].is_truncated());
    }

    #[test]
    fn test_read_gzip_pcap() {
        let data = pcap_file(101, &[(5, vec![0x45; 40])]);
        let temp = NamedTempFile::with_suffix(".pcap.gz").unwrap();
        {
            let file = File::create(temp.path()).unwrap();
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&data).unwrap();
            encoder.finish().unwrap();
        }

        let mut reader = PcapReader::open(temp.path()).unwrap();
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.link_type, 101);
        assert!(reader.next_packet().unwrap().is_none());
        assert_eq!(reader.frame_count(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = PcapReader::open("/nonexistent/capture.pcap").err().unwrap();
        assert!(matches!(err, Error::Pcap(OurPcapError::FileNotFound { .. })));
    }

    #[test]
    fn test_unknown_magic() {
        let temp = write_temp(b"not a capture file", ".pcap");
        let err = PcapReader::open(temp.path()).err().unwrap();
        assert!(matches!(err, Error::Pcap(OurPcapError::InvalidFormat { .. })));
    }

    #[test]
    fn test_timestamp_resolution() {
        assert_eq!(ts_units_per_sec(6), 1_000_000);
        assert_eq!(ts_units_per_sec(9), 1_000_000_000);
        assert_eq!(ts_units_per_sec(0x80 | 10), 1024);
        assert_eq!(scale_to_micros(1_500_000_000, 1_000_000_000), 1_500_000);
        assert_eq!(scale_to_micros(42, 1_000_000), 42);
    }

    #[test]
    fn test_timestamp_scaling_saturates() {
        // One unit per second with a timestamp far past the i64 range
        assert_eq!(scale_to_micros(u64::MAX, ts_units_per_sec(0)), i64::MAX);
        assert_eq!(scale_to_micros(u64::MAX, 1_000_000), i64::MAX);
        assert_eq!(scale_to_micros(7, 1), 7_000_000);
        assert_eq!(scale_to_micros(3, 0), 3_000_000);
    }
}
