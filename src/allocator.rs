//! Whole-section allocation, composed from the instrumentation primitives.
//!
//! The flow mirrors how the primitives are meant to be sequenced: grow the
//! three tables' slack first (each a plain file-memory allocation), then
//! claim file memory for the section itself at an aligned offset past the
//! current end, and only then register the name, the section header, and
//! the backing LOAD segment.

use tracing::info;

use crate::chunk::{ProgramHeader, SectionHeader};
use crate::error::{Error, Result};
use crate::file::ElfFile;
use crate::format::{SectionFlags, SectionType, SegmentFlags, SegmentType};
use crate::utils::align_up;

/// Parameters for a new PROGBITS section backed by a new LOAD segment.
#[derive(Debug, Clone, Copy)]
pub struct NewSection<'a> {
    pub name: &'a str,
    /// Virtual (and physical) address of the new LOAD segment.
    pub address: u64,
    /// On-disk and in-memory size; contents are zero-padded up to it.
    pub size: u64,
    pub alignment: u64,
    pub writable: bool,
    pub executable: bool,
    pub contents: &'a [u8],
}

pub struct SectionAllocator<'a> {
    file: &'a mut ElfFile,
}

impl<'a> SectionAllocator<'a> {
    pub fn new(file: &'a mut ElfFile) -> Self {
        SectionAllocator { file }
    }

    /// Adds a loadable PROGBITS section at the end of the file and a LOAD
    /// segment mapping it at `request.address`. Returns the new section's
    /// index.
    pub fn allocate_prog_bits_section(&mut self, request: &NewSection) -> Result<usize> {
        if request.size == 0 {
            return Err(Error::bad_offset(0, "section size must be positive"));
        }
        if request.alignment > 1 && !request.alignment.is_power_of_two() {
            return Err(Error::bad_offset(
                request.alignment,
                "alignment must be a power of two",
            ));
        }
        if request.contents.len() as u64 > request.size {
            return Err(Error::InsufficientSlack {
                offset: 0,
                needed: request.contents.len(),
                available: request.size as usize,
            });
        }
        let file = &mut *self.file;

        // One entry of slack after the program header table.
        let header = file.header()?;
        let table_end =
            header.header_size as u64 + file.program_header_table()?.byte_length() as u64;
        let stride = file.program_header_table()?.entry_size as u64;
        file.allocate_file_memory(table_end, stride)?;

        // Room for the name after the section-name string table. Offsets are
        // re-read each time: earlier allocations may have moved the tables.
        let names_index = file.header()?.section_header_string_table_index as usize;
        let names = file.section_header(names_index)?;
        file.allocate_file_memory(
            names.file_offset + names.size,
            request.name.len() as u64 + 1,
        )?;

        // One entry of slack after the section header table.
        let table_end = file.header()?.section_header_table_file_offset
            + file.section_header_table()?.byte_length() as u64;
        let stride = file.section_header_table()?.entry_size as u64;
        file.allocate_file_memory(table_end, stride)?;

        // File memory for the section itself, aligned past the current end.
        let end = file.byte_length();
        let section_offset = align_up(end, request.alignment);
        file.allocate_file_memory(end, (section_offset - end) + request.size)?;

        let name_offset = file.extend_string_table(names_index, &[request.name])?[0];

        let mut flags = SectionFlags::ALLOC;
        if request.writable {
            flags |= SectionFlags::WRITABLE;
        }
        if request.executable {
            flags |= SectionFlags::EXECUTABLE;
        }
        let index = file.create_section(SectionHeader {
            name_string_table_offset: name_offset as u32,
            kind: SectionType::ProgBits,
            flags,
            virtual_address: request.address,
            file_offset: section_offset,
            size: request.size,
            link: 0,
            info: 0,
            alignment: request.alignment,
            entry_size: 0,
        })?;

        let mut segment_flags = SegmentFlags::READABLE;
        if request.writable {
            segment_flags |= SegmentFlags::WRITABLE;
        }
        if request.executable {
            segment_flags |= SegmentFlags::EXECUTABLE;
        }
        file.extend_program_header_table(ProgramHeader {
            kind: SegmentType::Load,
            flags: segment_flags,
            file_offset: section_offset,
            virtual_memory_address: request.address,
            physical_memory_address: request.address,
            file_size: request.size,
            memory_size: request.size,
            alignment: request.alignment,
        })?;

        if !request.contents.is_empty() {
            file.patch_raw_bytes_at_offset(section_offset, request.contents)?;
        }

        info!(
            name = request.name,
            index,
            offset = section_offset,
            address = request.address,
            size = request.size,
            "allocated PROGBITS section"
        );
        Ok(index)
    }
}
