//! The in-memory file model.
//!
//! An `ElfFile` owns the ordered chunk sequence. The sequence is contiguous
//! from offset 0: every byte of the file belongs to exactly one chunk, and
//! the serialized image is the concatenation of the chunks in order.
//!
//! The distinguished chunks (header, program header table, section header
//! table, dynamic table) are reached through typed accessors that locate the
//! singleton variant and fail with `UnsupportedLayout` when it is absent.

use std::path::Path;

use tracing::info;

use crate::chunk::{
    Chunk, DynamicTable, Header, ProgramHeaderTable, SectionHeader, SectionHeaderTable,
};
use crate::error::{Error, Result};
use crate::parser;

#[derive(Debug)]
pub struct ElfFile {
    pub(crate) chunks: Vec<Chunk>,
}

impl ElfFile {
    /// Decodes a complete ELF64-LE image.
    pub fn parse(data: &[u8]) -> Result<ElfFile> {
        parser::parse(data)
    }

    /// Reads and decodes the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<ElfFile> {
        let data = std::fs::read(path.as_ref()).map_err(|e| {
            Error::unsupported(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::parse(&data)
    }

    pub(crate) fn from_chunks(chunks: Vec<Chunk>) -> ElfFile {
        ElfFile { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Total size of the serialized image.
    pub fn byte_length(&self) -> u64 {
        self.chunks.iter().map(|c| c.byte_length() as u64).sum()
    }

    /// Concatenates every chunk's bytes in order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.byte_length() as usize);
        for chunk in &self.chunks {
            chunk.write_into(&mut buf);
        }
        buf
    }

    /// Serializes and writes the image to `path`.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let buf = self.serialize();
        std::fs::write(path.as_ref(), &buf).map_err(|e| {
            Error::unsupported(format!("cannot write {}: {e}", path.as_ref().display()))
        })?;
        info!(bytes = buf.len(), path = %path.as_ref().display(), "stored ELF image");
        Ok(())
    }

    /// The chunk containing `offset`, as `(chunk_index, chunk_base_offset)`.
    /// `None` when `offset` is at or past end-of-file.
    pub fn chunk_at_file_offset(&self, offset: u64) -> Option<(usize, u64)> {
        let mut base = 0u64;
        for (index, chunk) in self.chunks.iter().enumerate() {
            let end = base + chunk.byte_length() as u64;
            if offset < end {
                return Some((index, base));
            }
            base = end;
        }
        None
    }

    /// Resolves a virtual address to a file offset through the first program
    /// header whose file-backed range contains it.
    pub fn file_offset_of_virtual_address(&self, address: u64) -> Option<u64> {
        let table = self.program_header_table().ok()?;
        table
            .entries
            .iter()
            .find(|p| p.contains_virtual_address(address))
            .map(|p| p.file_offset + (address - p.virtual_memory_address))
    }

    pub fn header(&self) -> Result<&Header> {
        match self.chunks.first() {
            Some(Chunk::Header(h)) => Ok(h),
            _ => Err(Error::unsupported_layout("header chunk missing at index 0")),
        }
    }

    pub fn header_mut(&mut self) -> Result<&mut Header> {
        match self.chunks.first_mut() {
            Some(Chunk::Header(h)) => Ok(h),
            _ => Err(Error::unsupported_layout("header chunk missing at index 0")),
        }
    }

    pub fn program_header_table(&self) -> Result<&ProgramHeaderTable> {
        self.chunks
            .iter()
            .find_map(|c| match c {
                Chunk::ProgramHeaderTable(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| Error::unsupported_layout("no program header table chunk"))
    }

    pub fn program_header_table_mut(&mut self) -> Result<&mut ProgramHeaderTable> {
        self.chunks
            .iter_mut()
            .find_map(|c| match c {
                Chunk::ProgramHeaderTable(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| Error::unsupported_layout("no program header table chunk"))
    }

    pub fn section_header_table(&self) -> Result<&SectionHeaderTable> {
        self.chunks
            .iter()
            .find_map(|c| match c {
                Chunk::SectionHeaderTable(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| Error::unsupported_layout("no section header table chunk"))
    }

    pub fn section_header_table_mut(&mut self) -> Result<&mut SectionHeaderTable> {
        self.chunks
            .iter_mut()
            .find_map(|c| match c {
                Chunk::SectionHeaderTable(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| Error::unsupported_layout("no section header table chunk"))
    }

    /// Index of the section header table chunk in the chunk sequence.
    pub(crate) fn section_header_table_chunk_index(&self) -> Result<usize> {
        self.chunks
            .iter()
            .position(|c| matches!(c, Chunk::SectionHeaderTable(_)))
            .ok_or_else(|| Error::unsupported_layout("no section header table chunk"))
    }

    pub fn dynamic_table(&self) -> Option<&DynamicTable> {
        self.chunks.iter().find_map(|c| match c {
            Chunk::DynamicTable(t) => Some(t),
            _ => None,
        })
    }

    pub fn dynamic_table_mut(&mut self) -> Option<&mut DynamicTable> {
        self.chunks.iter_mut().find_map(|c| match c {
            Chunk::DynamicTable(t) => Some(t),
            _ => None,
        })
    }

    pub fn section_headers(&self) -> Result<&[SectionHeader]> {
        Ok(&self.section_header_table()?.entries)
    }

    pub fn section_header(&self, index: usize) -> Result<&SectionHeader> {
        self.section_headers()?.get(index).ok_or_else(|| {
            Error::unsupported_layout(format!("no section header at index {index}"))
        })
    }

    /// File offset of the chunk at `chunk_index`.
    pub(crate) fn offset_of_chunk(&self, chunk_index: usize) -> u64 {
        self.chunks[..chunk_index]
            .iter()
            .map(|c| c.byte_length() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, SectionHeaderTable};

    // A 64-byte header plus an empty section header table.
    fn minimal() -> ElfFile {
        let bytes = crate::test_fixtures::minimal_header();
        ElfFile::parse(&bytes).unwrap()
    }

    #[test]
    fn chunk_lookup_covers_the_image() {
        let file = minimal();
        assert_eq!(file.byte_length(), 64);
        assert_eq!(file.chunk_at_file_offset(0), Some((0, 0)));
        assert_eq!(file.chunk_at_file_offset(63), Some((0, 0)));
        assert_eq!(file.chunk_at_file_offset(64), None);
    }

    #[test]
    fn typed_accessors_check_variants() {
        let mut file = minimal();
        assert!(file.header().is_ok());
        assert!(file.section_header_table().is_ok());
        assert!(file.program_header_table().is_err());
        assert!(file.dynamic_table().is_none());

        // Losing the singleton makes the accessor fail.
        file.chunks
            .retain(|c| !matches!(c, Chunk::SectionHeaderTable(_)));
        assert!(file.section_header_table().is_err());
        file.chunks.push(Chunk::SectionHeaderTable(SectionHeaderTable {
            entries: Vec::new(),
            entry_size: 64,
        }));
        assert_eq!(file.section_header_table_chunk_index().unwrap(), 1);
    }
}
