//! Segment sources.
//!
//! A [`SegmentSource`] yields decoded TCP segments to the pipeline's read
//! loop. Sources block; the pipeline drives them from a blocking task.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::decode::decode_tcp;
use crate::error::{DecodeError, Error};
use crate::pcap::PcapReader;
use crate::stream::TcpSegment;

/// One step of a segment source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceItem {
    Segment(TcpSegment),
    /// A frame that did not yield a TCP segment.
    Skipped(DecodeError),
    /// Nothing arrived within the source's read timeout.
    Idle,
}

/// Blocking producer of decoded TCP segments.
///
/// `Ok(None)` means the source is exhausted.
pub trait SegmentSource: Send {
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error>;
}

impl<S: SegmentSource + ?Sized> SegmentSource for Box<S> {
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
        (**self).next_item()
    }
}

/// Segments replayed from a PCAP/PCAPNG file.
pub struct FileSegmentSource {
    path: PathBuf,
    reader: PcapReader,
}

impl FileSegmentSource {
    /// Open a capture file. Fails if it is missing or not a capture.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let reader = PcapReader::open(&path)?;
        Ok(Self { path, reader })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames read so far.
    pub fn frame_count(&self) -> u64 {
        self.reader.frame_count()
    }
}

impl SegmentSource for FileSegmentSource {
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
        let Some(packet) = self.reader.next_packet()? else {
            debug!(path = %self.path.display(), frames = self.reader.frame_count(), "end of capture file");
            return Ok(None);
        };
        Ok(Some(
            match decode_tcp(packet.link_type, &packet.data, packet.timestamp_us) {
                Ok(segment) => SourceItem::Segment(segment),
                Err(err) => SourceItem::Skipped(err),
            },
        ))
    }
}

/// Source over already-decoded segments.
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = TcpSegment> + Send,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I> SegmentSource for IterSource<I>
where
    I: Iterator<Item = TcpSegment> + Send,
{
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
        Ok(self.iter.next().map(SourceItem::Segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LINKTYPE_ETHERNET;
    use crate::test_utils::{pcap_file, EthernetBuilder, Ipv4Builder, SegmentBuilder, TcpBuilder};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_source_decodes_and_skips() {
        let tcp = EthernetBuilder::new()
            .payload(Ipv4Builder::new().payload(TcpBuilder::new().payload(b"data".to_vec()).build()).build())
            .build();
        let udp = EthernetBuilder::new()
            .payload(Ipv4Builder::new().protocol(17).payload(vec![0u8; 8]).build())
            .build();
        let data = pcap_file(LINKTYPE_ETHERNET, &[(1, tcp), (2, udp)]);
        let mut temp = NamedTempFile::with_suffix(".pcap").unwrap();
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();

        let mut source = FileSegmentSource::open(temp.path()).unwrap();
        match source.next_item().unwrap() {
            Some(SourceItem::Segment(seg)) => assert_eq!(&seg.payload[..], b"data"),
            other => panic!("expected segment, got {other:?}"),
        }
        assert_eq!(
            source.next_item().unwrap(),
            Some(SourceItem::Skipped(DecodeError::NotTcp { protocol: 17 }))
        );
        assert_eq!(source.next_item().unwrap(), None);
        assert_eq!(source.frame_count(), 2);
    }

    #[test]
    fn test_missing_file_fails_at_open() {
        assert!(FileSegmentSource::open("/nonexistent/file.pcap").is_err());
    }

    #[test]
    fn test_iter_source() {
        let seg = SegmentBuilder::new("10.0.0.1:1", "10.0.0.2:2").payload(b"x").build();
        let mut source = IterSource::new(vec![seg.clone()]);
        assert_eq!(source.next_item().unwrap(), Some(SourceItem::Segment(seg)));
        assert_eq!(source.next_item().unwrap(), None);
    }
}
