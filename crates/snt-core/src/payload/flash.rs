//! Flash/firmware update packets sent over the command channel.
//!
//! The image is cut into [`FLASH_MTU`]-byte packets, each followed by a
//! CRC-32 of its data. The last [`FLASH_IMAGE_TRAILER`] bytes of the image
//! are never sent. An empty `DataLast` packet closes the sequence.

use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::read_full;
use crate::error::{DriverError, Result};
use crate::platform::ImageFile;
use crate::protocol::{FLASH_IMAGE_TRAILER, FLASH_MTU, Major, Minor};

/// One packet of a flash update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPacket {
    pub minor: Minor,
    pub address: u16,
    pub payload: Vec<u8>,
}

/// Progress through a flash image.
pub struct FlashUpdate {
    file: Box<dyn ImageFile>,
    major: Major,
    data_left: u64,
    packets_left: u32,
    address: usize,
    sent: u64,
}

impl FlashUpdate {
    /// `.flash` images go to the flash partition, everything else is firmware.
    pub fn major_for(path: &Path) -> Major {
        match path.extension().and_then(|e| e.to_str()) {
            Some("flash") => Major::FlashUpdate,
            _ => Major::FwUpdate,
        }
    }

    /// Packets needed for an image of `size` bytes, closing packet included.
    pub fn packet_count(size: u64) -> u32 {
        let data = size.saturating_sub(FLASH_IMAGE_TRAILER as u64);
        data.div_ceil(FLASH_MTU as u64) as u32 + 1
    }

    pub fn new(file: Box<dyn ImageFile>, major: Major) -> Result<Self> {
        let size = file
            .size()
            .map_err(|e| DriverError::BadRead(e.to_string()))?;
        Ok(Self {
            file,
            major,
            data_left: size.saturating_sub(FLASH_IMAGE_TRAILER as u64),
            packets_left: Self::packet_count(size),
            address: 0,
            sent: 0,
        })
    }

    pub fn major(&self) -> Major {
        self.major
    }

    pub fn is_finished(&self) -> bool {
        self.packets_left == 0
    }

    pub fn packets_left(&self) -> u32 {
        self.packets_left
    }

    /// Image bytes sent so far, checksums excluded.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Build the next packet, or `None` once the closing packet went out.
    pub fn next_packet(&mut self) -> Result<Option<FlashPacket>> {
        if self.packets_left == 0 {
            return Ok(None);
        }
        if self.address > u16::MAX as usize {
            return Err(DriverError::TooLarge {
                size: self.address,
                limit: u16::MAX as usize,
            });
        }

        let want = (self.data_left as usize).min(FLASH_MTU);
        let mut payload = vec![0u8; want];
        let got = read_full(&mut *self.file, &mut payload)
            .map_err(|e| DriverError::BadRead(e.to_string()))?;
        if got < want {
            return Err(DriverError::BadRead(format!(
                "image ended at offset {}",
                self.address + got
            )));
        }

        if !payload.is_empty() {
            let checksum = crc32fast::hash(&payload);
            // Vec<u8> writes cannot fail
            let _ = payload.write_u32::<LittleEndian>(checksum);
        }

        let packet = FlashPacket {
            minor: if self.packets_left == 1 {
                Minor::DataLast
            } else {
                Minor::DataFragment
            },
            address: self.address as u16,
            payload,
        };

        self.address += want;
        self.data_left -= want as u64;
        self.sent += want as u64;
        self.packets_left -= 1;
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FileSystem, MemoryFileSystem};

    fn image(len: usize) -> FlashUpdate {
        let fs = MemoryFileSystem::new();
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        fs.insert("/fw/image", data);
        let file = fs.open(Path::new("/fw/image")).unwrap();
        FlashUpdate::new(file, Major::FwUpdate).unwrap()
    }

    #[test]
    fn test_major_from_extension() {
        assert_eq!(
            FlashUpdate::major_for(Path::new("/vendor/snt.flash")),
            Major::FlashUpdate
        );
        assert_eq!(
            FlashUpdate::major_for(Path::new("/vendor/snt.image")),
            Major::FwUpdate
        );
    }

    #[test]
    fn test_packet_count_formula() {
        // ceil((N - 16) / 256) data packets plus the closing packet
        assert_eq!(FlashUpdate::packet_count(16), 1);
        assert_eq!(FlashUpdate::packet_count(17), 2);
        assert_eq!(FlashUpdate::packet_count(16 + 256), 2);
        assert_eq!(FlashUpdate::packet_count(16 + 257), 3);
        assert_eq!(FlashUpdate::packet_count(0), 1);
    }

    #[test]
    fn test_packets_cover_image_without_trailer() {
        for len in [16usize, 100, 272, 273, 16 + 256 * 3 + 250, 1000] {
            let mut update = image(len);
            let mut data_packets = 0;
            let mut sent = 0usize;
            let mut last_minor = None;
            while let Some(packet) = update.next_packet().unwrap() {
                if !packet.payload.is_empty() {
                    data_packets += 1;
                    let data = &packet.payload[..packet.payload.len() - 4];
                    assert!(data.len() <= FLASH_MTU);
                    assert_eq!(packet.address as usize, sent);
                    let crc = u32::from_le_bytes(
                        packet.payload[packet.payload.len() - 4..].try_into().unwrap(),
                    );
                    assert_eq!(crc, crc32fast::hash(data));
                    sent += data.len();
                }
                last_minor = Some(packet.minor);
            }
            let expected = (len.saturating_sub(16)).div_ceil(256);
            assert_eq!(data_packets, expected, "len {}", len);
            assert_eq!(sent, len.saturating_sub(16));
            assert!(sent <= len);
            assert_eq!(last_minor, Some(Minor::DataLast));
            assert!(update.is_finished());
        }
    }

    #[test]
    fn test_closing_packet_is_empty() {
        let mut update = image(16 + 10);
        let first = update.next_packet().unwrap().unwrap();
        assert_eq!(first.minor, Minor::DataFragment);
        assert_eq!(first.payload.len(), 10 + 4);

        let last = update.next_packet().unwrap().unwrap();
        assert_eq!(last.minor, Minor::DataLast);
        assert!(last.payload.is_empty());
        assert!(update.next_packet().unwrap().is_none());
        assert_eq!(update.bytes_sent(), 10);
    }
}
