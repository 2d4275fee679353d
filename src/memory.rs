use byteorder::{BigEndian, ReadBytesExt};

use crate::constants::MEMORY_WORDS;
use crate::{CoreError, Result};

/// Word-addressable memory covering the full 16-bit address space,
/// zero-filled until an object image is overlaid.
pub struct MemoryImage {
    words: Vec<u16>,
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryImage {
    pub fn new() -> Self {
        Self {
            words: vec![0; MEMORY_WORDS],
        }
    }

    /// Ungated read of one word. Every 16-bit address is in bounds.
    pub fn read(&self, addr: u16) -> u16 {
        self.words[addr as usize]
    }

    /// Unconditional store of one word.
    pub fn write(&mut self, addr: u16, value: u16) {
        self.words[addr as usize] = value;
    }

    /// Overlay an object image: the first big-endian word is the load
    /// origin, the rest are placed consecutively from there. Words past
    /// the top of memory are dropped; a trailing odd byte is ignored.
    /// Returns the origin.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<u16> {
        let mut reader = bytes;
        let origin = reader
            .read_u16::<BigEndian>()
            .map_err(|_| CoreError::InvalidImage("missing origin word".into()))?;
        let mut addr = origin;
        while let Ok(word) = reader.read_u16::<BigEndian>() {
            self.words[addr as usize] = word;
            match addr.checked_add(1) {
                Some(next) => addr = next,
                None => break,
            }
        }
        Ok(origin)
    }
}
