//! In-place byte patching of section content.
//!
//! Patches target raw sections only; typed chunks (tables, string blobs)
//! must be edited through their structured operations. Virtual addresses are
//! resolved to file offsets through the program header table before
//! delegation.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::file::ElfFile;

impl ElfFile {
    fn raw_section_range(&self, offset: u64, len: usize) -> Result<(usize, usize)> {
        let (chunk_index, base) = self
            .chunk_at_file_offset(offset)
            .ok_or_else(|| Error::bad_offset(offset, "past end of file"))?;
        let chunk = &self.chunks[chunk_index];
        if !matches!(chunk, Chunk::RawSection(_)) {
            return Err(Error::WrongChunkKind {
                offset,
                expected: "raw-section",
                found: chunk.kind_name(),
            });
        }
        let start = (offset - base) as usize;
        if start + len > chunk.byte_length() {
            return Err(Error::Truncated {
                offset: offset as usize,
                needed: len,
                available: chunk.byte_length() - start,
            });
        }
        Ok((chunk_index, start))
    }

    /// Fills `buf` with the bytes at `offset`, which must lie inside a raw
    /// section chunk.
    pub fn get_raw_bytes_at_offset(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (chunk_index, start) = self.raw_section_range(offset, buf.len())?;
        if let Chunk::RawSection(data) = &self.chunks[chunk_index] {
            buf.copy_from_slice(&data[start..start + buf.len()]);
        }
        Ok(())
    }

    /// Overwrites the bytes at `offset`, which must lie inside a raw section
    /// chunk.
    pub fn patch_raw_bytes_at_offset(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let (chunk_index, start) = self.raw_section_range(offset, bytes.len())?;
        if let Chunk::RawSection(data) = &mut self.chunks[chunk_index] {
            data[start..start + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Resolves `address` through the program header table and patches at
    /// the resulting file offset.
    pub fn patch_raw_bytes_at_address(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let offset = self
            .file_offset_of_virtual_address(address)
            .ok_or_else(|| {
                Error::bad_offset(address, "virtual address not covered by any segment")
            })?;
        self.patch_raw_bytes_at_offset(offset, bytes)
    }

    /// Rewrites the addend of every relocation-with-addend entry matching
    /// `(offset, old_addend)`, across all relocation-with-addend tables.
    /// Returns how many entries were updated. Tables without addends carry
    /// no addend field and are not scanned.
    pub fn patch_value_in_relocation_table(
        &mut self,
        offset: u64,
        old_addend: i64,
        new_addend: i64,
    ) -> usize {
        let mut updated = 0;
        for chunk in &mut self.chunks {
            if let Chunk::RelocationAddendTable(table) = chunk {
                for entry in &mut table.entries {
                    if entry.offset == offset && entry.addend == old_addend {
                        entry.addend = new_addend;
                        updated += 1;
                    }
                }
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{fixture, fixture_with_rela, offsets};

    #[test]
    fn patch_and_read_back_by_offset() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        file.patch_raw_bytes_at_offset(offsets::TEXT + 1, &[0xcc, 0xcc])
            .unwrap();
        let mut buf = [0u8; 4];
        file.get_raw_bytes_at_offset(offsets::TEXT, &mut buf).unwrap();
        assert_eq!(buf, [0xc3, 0xcc, 0xcc, 0x90]);
    }

    #[test]
    fn patching_typed_chunks_is_rejected() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let err = file
            .patch_raw_bytes_at_offset(offsets::DYNSTR, &[0])
            .unwrap_err();
        assert!(matches!(err, Error::WrongChunkKind { .. }));
        // A read crossing the end of the section fails too.
        let mut buf = [0u8; 64];
        let err = file
            .get_raw_bytes_at_offset(offsets::TEXT + 8, &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn patch_by_virtual_address_resolves_through_segments() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        file.patch_raw_bytes_at_address(0x400104, &[0xeb, 0xfe])
            .unwrap();
        let mut buf = [0u8; 2];
        file.get_raw_bytes_at_offset(offsets::TEXT + 4, &mut buf)
            .unwrap();
        assert_eq!(buf, [0xeb, 0xfe]);

        let err = file
            .patch_raw_bytes_at_address(0x900000, &[0])
            .unwrap_err();
        assert!(matches!(err, Error::BadOffset { .. }));
    }

    #[test]
    fn relocation_addends_update_all_matches() {
        let mut file = ElfFile::parse(&fixture_with_rela()).unwrap();
        let updated = file.patch_value_in_relocation_table(0x400500, 0x1111, 0x2222);
        assert_eq!(updated, 2);
        // Non-matching addends stay.
        assert_eq!(file.patch_value_in_relocation_table(0x400500, 0x1111, 0), 0);
    }
}
