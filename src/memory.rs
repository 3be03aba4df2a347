//! Simulated main memory
//!
//! The memory is a bounded, byte-addressable array. Multi-byte accesses
//! are little-endian and are composed from byte accesses, so a value that
//! straddles the end of the array is read or written partially: each
//! out-of-range byte reads as zero or is dropped, with one warning line
//! on stderr per byte. All bytes start at the 0xa5 fill pattern so that
//! uninitialised reads are easy to spot in dumps and traces.

use crate::hex;
use crate::utils::sign_extend;
use itertools::Itertools;
use std::fs::File;
use std::io::Read;
use thiserror::Error;

/// Failures while loading a program image. The rendered messages are
/// printed verbatim by the driver.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Can't open file '{0}' for reading.")]
    CantOpen(String),
    #[error("Program too big.")]
    ProgramTooBig,
}

#[derive(Debug)]
pub struct Memory {
    mem: Vec<u8>,
}

impl Memory {
    /// Allocate a memory of the given size in bytes, rounded up to the
    /// next multiple of 16, with every byte set to 0xa5.
    pub fn new(size: u32) -> Self {
        let size = size.saturating_add(15) & 0xffff_fff0;
        Self {
            mem: vec![0xa5; size as usize],
        }
    }

    /// The memory size in bytes (always a multiple of 16)
    pub fn size(&self) -> u32 {
        self.mem.len() as u32
    }

    /// Returns true if addr falls outside the array, warning on stderr
    /// when it does.
    fn check_illegal(&self, addr: u32) -> bool {
        if addr as usize >= self.mem.len() {
            eprintln!("WARNING: Address out of range: {}", hex::to_hex0x32(addr));
            true
        } else {
            false
        }
    }

    pub fn get8(&self, addr: u32) -> u8 {
        if self.check_illegal(addr) {
            0
        } else {
            self.mem[addr as usize]
        }
    }

    pub fn get16(&self, addr: u32) -> u16 {
        u16::from(self.get8(addr)) | u16::from(self.get8(addr.wrapping_add(1))) << 8
    }

    pub fn get32(&self, addr: u32) -> u32 {
        u32::from(self.get16(addr)) | u32::from(self.get16(addr.wrapping_add(2))) << 16
    }

    /// Read a byte and sign-extend it from bit 7
    pub fn get8_sx(&self, addr: u32) -> i32 {
        sign_extend(self.get8(addr), 7) as i32
    }

    /// Read a halfword and sign-extend it from bit 15
    pub fn get16_sx(&self, addr: u32) -> i32 {
        sign_extend(self.get16(addr), 15) as i32
    }

    /// Read a word and reinterpret it as signed
    pub fn get32_sx(&self, addr: u32) -> i32 {
        self.get32(addr) as i32
    }

    pub fn set8(&mut self, addr: u32, val: u8) {
        if !self.check_illegal(addr) {
            self.mem[addr as usize] = val;
        }
    }

    pub fn set16(&mut self, addr: u32, val: u16) {
        self.set8(addr, val as u8);
        self.set8(addr.wrapping_add(1), (val >> 8) as u8);
    }

    pub fn set32(&mut self, addr: u32, val: u32) {
        self.set16(addr, val as u16);
        self.set16(addr.wrapping_add(2), (val >> 16) as u16);
    }

    /// Copy a raw binary image into memory starting at address zero.
    /// On overflow the prefix that fit stays in memory and the load
    /// fails; the overflowing address has already produced the usual
    /// out-of-range warning.
    pub fn load_file(&mut self, fname: &str) -> Result<(), LoadError> {
        let mut infile =
            File::open(fname).map_err(|_| LoadError::CantOpen(fname.to_string()))?;
        let mut image = Vec::new();
        infile
            .read_to_end(&mut image)
            .map_err(|_| LoadError::CantOpen(fname.to_string()))?;

        for (addr, byte) in image.into_iter().enumerate() {
            let addr = addr as u32;
            if self.check_illegal(addr) {
                return Err(LoadError::ProgramTooBig);
            }
            self.set8(addr, byte);
        }
        Ok(())
    }

    /// Print the whole memory, one 16-byte row per line: the row address,
    /// the bytes in hex (an extra space after the 8th), and the bytes as
    /// ASCII between asterisks with non-printables rendered as '.'.
    pub fn dump(&self) {
        for (row, bytes) in self.mem.chunks(16).enumerate() {
            let addr = 16 * row as u32;
            let left = bytes[..8].iter().map(|b| hex::to_hex8(*b)).join(" ");
            let right = bytes[8..].iter().map(|b| hex::to_hex8(*b)).join(" ");
            let ascii: String = bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            println!("{}: {}  {} *{}*", hex::to_hex32(addr), left, right, ascii);
        }
    }
}
