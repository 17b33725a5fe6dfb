//! The chunk model: typed, contiguous file regions.
//!
//! An ELF image is represented as an ordered sequence of chunks. Every
//! variant knows its exact on-disk size (`byte_length`) and how to emit
//! itself (`write_into`), including per-entry stride padding and trailing
//! padding, so concatenating the sequence reproduces the file byte for byte.

use crate::codec::{Reader, Writer};
use crate::error::{Error, Result};
use crate::format::{
    Class, DynamicTag, Encoding, Machine, ObjectFileType, SectionFlags, SectionType, SegmentFlags,
    SegmentType, SymbolBind, SymbolType, TargetAbi, DYNAMIC_ENTRY_SIZE, HEADER_SIZE, MAGIC,
    PROGRAM_HEADER_ENTRY_SIZE, RELOCATION_ADDEND_ENTRY_SIZE, RELOCATION_ENTRY_SIZE,
    SECTION_HEADER_ENTRY_SIZE, SYMBOL_ENTRY_SIZE,
};

/// The 64-byte ELF identification and file-level metadata.
#[derive(Debug, Clone)]
pub struct Header {
    pub class: Class,
    pub encoding: Encoding,
    pub ident_version: u8,
    pub target_abi: TargetAbi,
    pub abi_version: u8,
    pub object_file_type: ObjectFileType,
    pub machine: Machine,
    pub object_file_version: u32,
    pub entry_point: u64,
    pub program_header_table_file_offset: u64,
    pub section_header_table_file_offset: u64,
    pub processor_specific_flags: u32,
    pub header_size: u16,
    pub program_header_table_entry_size: u16,
    pub program_header_table_entry_count: u16,
    pub section_header_table_entry_size: u16,
    pub section_header_table_entry_count: u16,
    pub section_header_string_table_index: u16,
}

impl Header {
    pub fn parse(r: &mut Reader) -> Result<Header> {
        let magic = r.read_bytes(4)?;
        if magic != &MAGIC[..] {
            return Err(Error::unsupported("missing ELF magic number"));
        }
        let class = Class::from_raw(r.read_u8()?);
        let encoding = Encoding::from_raw(r.read_u8()?);
        let ident_version = r.read_u8()?;
        let target_abi = TargetAbi::from_raw(r.read_u8()?);
        let abi_version = r.read_u8()?;
        r.skip(7)?; // identifier padding
        Ok(Header {
            class,
            encoding,
            ident_version,
            target_abi,
            abi_version,
            object_file_type: ObjectFileType::from_raw(r.read_u16()?),
            machine: Machine::from_raw(r.read_u16()?),
            object_file_version: r.read_u32()?,
            entry_point: r.read_u64()?,
            program_header_table_file_offset: r.read_u64()?,
            section_header_table_file_offset: r.read_u64()?,
            processor_specific_flags: r.read_u32()?,
            header_size: r.read_u16()?,
            program_header_table_entry_size: r.read_u16()?,
            program_header_table_entry_count: r.read_u16()?,
            section_header_table_entry_size: r.read_u16()?,
            section_header_table_entry_count: r.read_u16()?,
            section_header_string_table_index: r.read_u16()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.put_bytes(&MAGIC);
        w.put_u8(self.class.to_raw());
        w.put_u8(self.encoding.to_raw());
        w.put_u8(self.ident_version);
        w.put_u8(self.target_abi.to_raw());
        w.put_u8(self.abi_version);
        w.put_zeros(7);
        w.put_u16(self.object_file_type.to_raw());
        w.put_u16(self.machine.to_raw());
        w.put_u32(self.object_file_version);
        w.put_u64(self.entry_point);
        w.put_u64(self.program_header_table_file_offset);
        w.put_u64(self.section_header_table_file_offset);
        w.put_u32(self.processor_specific_flags);
        w.put_u16(self.header_size);
        w.put_u16(self.program_header_table_entry_size);
        w.put_u16(self.program_header_table_entry_count);
        w.put_u16(self.section_header_table_entry_size);
        w.put_u16(self.section_header_table_entry_count);
        w.put_u16(self.section_header_string_table_index);
    }
}

/// One segment descriptor.
#[derive(Debug, Clone)]
pub struct ProgramHeader {
    pub kind: SegmentType,
    pub flags: SegmentFlags,
    pub file_offset: u64,
    pub virtual_memory_address: u64,
    pub physical_memory_address: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub alignment: u64,
}

impl ProgramHeader {
    fn parse(r: &mut Reader, stride: usize) -> Result<ProgramHeader> {
        let entry = ProgramHeader {
            kind: SegmentType::from_raw(r.read_u32()?),
            flags: SegmentFlags::from_bits_retain(r.read_u32()?),
            file_offset: r.read_u64()?,
            virtual_memory_address: r.read_u64()?,
            physical_memory_address: r.read_u64()?,
            file_size: r.read_u64()?,
            memory_size: r.read_u64()?,
            alignment: r.read_u64()?,
        };
        r.skip(stride - PROGRAM_HEADER_ENTRY_SIZE)?;
        Ok(entry)
    }

    fn write(&self, w: &mut Writer, stride: usize) {
        w.put_u32(self.kind.to_raw());
        w.put_u32(self.flags.bits());
        w.put_u64(self.file_offset);
        w.put_u64(self.virtual_memory_address);
        w.put_u64(self.physical_memory_address);
        w.put_u64(self.file_size);
        w.put_u64(self.memory_size);
        w.put_u64(self.alignment);
        w.put_zeros(stride - PROGRAM_HEADER_ENTRY_SIZE);
    }

    /// Whether `addr` falls inside the file-backed part of this segment's
    /// address range.
    pub fn contains_virtual_address(&self, addr: u64) -> bool {
        addr >= self.virtual_memory_address
            && addr < self.virtual_memory_address + self.file_size
    }
}

/// Ordered segment descriptors plus the per-entry on-disk stride.
#[derive(Debug, Clone)]
pub struct ProgramHeaderTable {
    pub entries: Vec<ProgramHeader>,
    pub entry_size: usize,
}

impl ProgramHeaderTable {
    pub fn parse(r: &mut Reader, count: usize, stride: usize) -> Result<ProgramHeaderTable> {
        if count > 0 && stride < PROGRAM_HEADER_ENTRY_SIZE {
            return Err(Error::corrupted(format!(
                "program header entry size {stride} below minimum {PROGRAM_HEADER_ENTRY_SIZE}"
            )));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(ProgramHeader::parse(r, stride)?);
        }
        Ok(ProgramHeaderTable {
            entries,
            entry_size: stride,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.entries.len() * self.entry_size
    }

    pub fn write(&self, w: &mut Writer) {
        for entry in &self.entries {
            entry.write(w, self.entry_size);
        }
    }
}

/// One section descriptor.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name_string_table_offset: u32,
    pub kind: SectionType,
    pub flags: SectionFlags,
    pub virtual_address: u64,
    pub file_offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub alignment: u64,
    pub entry_size: u64,
}

impl SectionHeader {
    fn parse(r: &mut Reader, stride: usize) -> Result<SectionHeader> {
        let entry = SectionHeader {
            name_string_table_offset: r.read_u32()?,
            kind: SectionType::from_raw(r.read_u32()?),
            flags: SectionFlags::from_bits_retain(r.read_u64()?),
            virtual_address: r.read_u64()?,
            file_offset: r.read_u64()?,
            size: r.read_u64()?,
            link: r.read_u32()?,
            info: r.read_u32()?,
            alignment: r.read_u64()?,
            entry_size: r.read_u64()?,
        };
        r.skip(stride - SECTION_HEADER_ENTRY_SIZE)?;
        Ok(entry)
    }

    fn write(&self, w: &mut Writer, stride: usize) {
        w.put_u32(self.name_string_table_offset);
        w.put_u32(self.kind.to_raw());
        w.put_u64(self.flags.bits());
        w.put_u64(self.virtual_address);
        w.put_u64(self.file_offset);
        w.put_u64(self.size);
        w.put_u32(self.link);
        w.put_u32(self.info);
        w.put_u64(self.alignment);
        w.put_u64(self.entry_size);
        w.put_zeros(stride - SECTION_HEADER_ENTRY_SIZE);
    }

    /// Whether this section occupies bytes in the file image.
    pub fn has_file_data(&self) -> bool {
        !matches!(self.kind, SectionType::Null | SectionType::NoBits) && self.size > 0
    }

    pub fn file_range(&self) -> std::ops::Range<u64> {
        self.file_offset..self.file_offset + self.size
    }
}

/// Ordered section descriptors plus the per-entry on-disk stride.
#[derive(Debug, Clone)]
pub struct SectionHeaderTable {
    pub entries: Vec<SectionHeader>,
    pub entry_size: usize,
}

impl SectionHeaderTable {
    pub fn parse(r: &mut Reader, count: usize, stride: usize) -> Result<SectionHeaderTable> {
        if count > 0 && stride < SECTION_HEADER_ENTRY_SIZE {
            return Err(Error::corrupted(format!(
                "section header entry size {stride} below minimum {SECTION_HEADER_ENTRY_SIZE}"
            )));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(SectionHeader::parse(r, stride)?);
        }
        Ok(SectionHeaderTable {
            entries,
            entry_size: stride,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.entries.len() * self.entry_size
    }

    pub fn write(&self, w: &mut Writer) {
        for entry in &self.entries {
            entry.write(w, self.entry_size);
        }
    }
}

/// One `(tag, value)` pair of the dynamic table.
#[derive(Debug, Clone, Copy)]
pub struct DynamicEntry {
    pub tag: DynamicTag,
    pub value: u64,
}

/// The `.dynamic` section: `(tag, value)` pairs, stride, trailing padding.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    pub entries: Vec<DynamicEntry>,
    pub entry_size: usize,
    pub trailing_padding: usize,
}

impl DynamicTable {
    pub fn parse(r: &mut Reader, total_size: usize, stride: usize) -> Result<DynamicTable> {
        if stride < DYNAMIC_ENTRY_SIZE {
            return Err(Error::corrupted(format!(
                "dynamic entry size {stride} below minimum {DYNAMIC_ENTRY_SIZE}"
            )));
        }
        let count = total_size / stride;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = DynamicTag::from_raw(r.read_i64()?);
            let value = r.read_u64()?;
            r.skip(stride - DYNAMIC_ENTRY_SIZE)?;
            entries.push(DynamicEntry { tag, value });
        }
        let trailing_padding = total_size % stride;
        r.skip(trailing_padding)?;
        Ok(DynamicTable {
            entries,
            entry_size: stride,
            trailing_padding,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.entries.len() * self.entry_size + self.trailing_padding
    }

    pub fn write(&self, w: &mut Writer) {
        for entry in &self.entries {
            w.put_i64(entry.tag.to_raw());
            w.put_u64(entry.value);
            w.put_zeros(self.entry_size - DYNAMIC_ENTRY_SIZE);
        }
        w.put_zeros(self.trailing_padding);
    }

    /// First value stored under `tag`, if any.
    pub fn value_of(&self, tag: DynamicTag) -> Option<u64> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| e.value)
    }
}

/// One symbol table entry.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub name_string_table_offset: u32,
    pub info: u8,
    pub visibility: u8,
    pub section_index: u16,
    pub value: u64,
    pub size: u64,
}

impl Symbol {
    pub fn bind(&self) -> SymbolBind {
        SymbolBind::from_raw(self.info >> 4)
    }

    pub fn symbol_type(&self) -> SymbolType {
        SymbolType::from_raw(self.info & 0xf)
    }
}

/// A `.symtab`/`.dynsym` section.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    pub entries: Vec<Symbol>,
    pub entry_size: usize,
    pub trailing_padding: usize,
}

impl SymbolTable {
    pub fn parse(r: &mut Reader, total_size: usize, stride: usize) -> Result<SymbolTable> {
        if stride < SYMBOL_ENTRY_SIZE {
            return Err(Error::corrupted(format!(
                "symbol entry size {stride} below minimum {SYMBOL_ENTRY_SIZE}"
            )));
        }
        let count = total_size / stride;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = Symbol {
                name_string_table_offset: r.read_u32()?,
                info: r.read_u8()?,
                visibility: r.read_u8()?,
                section_index: r.read_u16()?,
                value: r.read_u64()?,
                size: r.read_u64()?,
            };
            r.skip(stride - SYMBOL_ENTRY_SIZE)?;
            entries.push(entry);
        }
        let trailing_padding = total_size % stride;
        r.skip(trailing_padding)?;
        Ok(SymbolTable {
            entries,
            entry_size: stride,
            trailing_padding,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.entries.len() * self.entry_size + self.trailing_padding
    }

    pub fn write(&self, w: &mut Writer) {
        for entry in &self.entries {
            w.put_u32(entry.name_string_table_offset);
            w.put_u8(entry.info);
            w.put_u8(entry.visibility);
            w.put_u16(entry.section_index);
            w.put_u64(entry.value);
            w.put_u64(entry.size);
            w.put_zeros(self.entry_size - SYMBOL_ENTRY_SIZE);
        }
        w.put_zeros(self.trailing_padding);
    }
}

/// A NUL-delimited string blob addressed by byte offset.
#[derive(Debug, Clone)]
pub struct StringTable {
    pub data: Vec<u8>,
}

impl StringTable {
    pub fn byte_length(&self) -> usize {
        self.data.len()
    }

    /// The string starting at `offset`, read up to the next NUL.
    pub fn string_at(&self, offset: usize) -> Option<&str> {
        let tail = self.data.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }
}

/// Relocation entry without addend.
#[derive(Debug, Clone, Copy)]
pub struct Rel {
    pub offset: u64,
    pub info: u64,
}

/// Relocation entry with explicit addend.
#[derive(Debug, Clone, Copy)]
pub struct Rela {
    pub offset: u64,
    pub info: u64,
    pub addend: i64,
}

/// A table of `Rel` entries.
#[derive(Debug, Clone)]
pub struct RelocationTable {
    pub entries: Vec<Rel>,
    pub entry_size: usize,
    pub trailing_padding: usize,
}

impl RelocationTable {
    pub fn parse(r: &mut Reader, total_size: usize, stride: usize) -> Result<RelocationTable> {
        if stride < RELOCATION_ENTRY_SIZE {
            return Err(Error::corrupted(format!(
                "relocation entry size {stride} below minimum {RELOCATION_ENTRY_SIZE}"
            )));
        }
        let count = total_size / stride;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = Rel {
                offset: r.read_u64()?,
                info: r.read_u64()?,
            };
            r.skip(stride - RELOCATION_ENTRY_SIZE)?;
            entries.push(entry);
        }
        let trailing_padding = total_size % stride;
        r.skip(trailing_padding)?;
        Ok(RelocationTable {
            entries,
            entry_size: stride,
            trailing_padding,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.entries.len() * self.entry_size + self.trailing_padding
    }

    pub fn write(&self, w: &mut Writer) {
        for entry in &self.entries {
            w.put_u64(entry.offset);
            w.put_u64(entry.info);
            w.put_zeros(self.entry_size - RELOCATION_ENTRY_SIZE);
        }
        w.put_zeros(self.trailing_padding);
    }
}

/// A table of `Rela` entries.
#[derive(Debug, Clone)]
pub struct RelocationAddendTable {
    pub entries: Vec<Rela>,
    pub entry_size: usize,
    pub trailing_padding: usize,
}

impl RelocationAddendTable {
    pub fn parse(
        r: &mut Reader,
        total_size: usize,
        stride: usize,
    ) -> Result<RelocationAddendTable> {
        if stride < RELOCATION_ADDEND_ENTRY_SIZE {
            return Err(Error::corrupted(format!(
                "rela entry size {stride} below minimum {RELOCATION_ADDEND_ENTRY_SIZE}"
            )));
        }
        let count = total_size / stride;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = Rela {
                offset: r.read_u64()?,
                info: r.read_u64()?,
                addend: r.read_i64()?,
            };
            r.skip(stride - RELOCATION_ADDEND_ENTRY_SIZE)?;
            entries.push(entry);
        }
        let trailing_padding = total_size % stride;
        r.skip(trailing_padding)?;
        Ok(RelocationAddendTable {
            entries,
            entry_size: stride,
            trailing_padding,
        })
    }

    pub fn byte_length(&self) -> usize {
        self.entries.len() * self.entry_size + self.trailing_padding
    }

    pub fn write(&self, w: &mut Writer) {
        for entry in &self.entries {
            w.put_u64(entry.offset);
            w.put_u64(entry.info);
            w.put_i64(entry.addend);
            w.put_zeros(self.entry_size - RELOCATION_ADDEND_ENTRY_SIZE);
        }
        w.put_zeros(self.trailing_padding);
    }
}

/// A contiguous, semantically tagged file region.
#[derive(Debug, Clone)]
pub enum Chunk {
    Header(Header),
    ProgramHeaderTable(ProgramHeaderTable),
    SectionHeaderTable(SectionHeaderTable),
    DynamicTable(DynamicTable),
    SymbolTable(SymbolTable),
    StringTable(StringTable),
    RelocationTable(RelocationTable),
    RelocationAddendTable(RelocationAddendTable),
    /// `SHT_NOTE` content, kept opaque.
    Notes(Vec<u8>),
    /// GNU version definition blob, kept opaque.
    Verdef(Vec<u8>),
    /// GNU version needs blob, kept opaque.
    Verneed(Vec<u8>),
    /// Section content with no structural role in instrumentation.
    RawSection(Vec<u8>),
    /// Uninterpreted bytes between regions; allocation slack.
    Dummy(Vec<u8>),
}

impl Chunk {
    /// Exact on-disk size of this region.
    pub fn byte_length(&self) -> usize {
        match self {
            Chunk::Header(_) => HEADER_SIZE,
            Chunk::ProgramHeaderTable(t) => t.byte_length(),
            Chunk::SectionHeaderTable(t) => t.byte_length(),
            Chunk::DynamicTable(t) => t.byte_length(),
            Chunk::SymbolTable(t) => t.byte_length(),
            Chunk::StringTable(t) => t.byte_length(),
            Chunk::RelocationTable(t) => t.byte_length(),
            Chunk::RelocationAddendTable(t) => t.byte_length(),
            Chunk::Notes(data)
            | Chunk::Verdef(data)
            | Chunk::Verneed(data)
            | Chunk::RawSection(data)
            | Chunk::Dummy(data) => data.len(),
        }
    }

    /// Appends exactly `byte_length()` bytes to `buf`; returns the count.
    pub fn write_into(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        let mut w = Writer::new(buf);
        match self {
            Chunk::Header(h) => h.write(&mut w),
            Chunk::ProgramHeaderTable(t) => t.write(&mut w),
            Chunk::SectionHeaderTable(t) => t.write(&mut w),
            Chunk::DynamicTable(t) => t.write(&mut w),
            Chunk::SymbolTable(t) => t.write(&mut w),
            Chunk::StringTable(t) => w.put_bytes(&t.data),
            Chunk::RelocationTable(t) => t.write(&mut w),
            Chunk::RelocationAddendTable(t) => t.write(&mut w),
            Chunk::Notes(data)
            | Chunk::Verdef(data)
            | Chunk::Verneed(data)
            | Chunk::RawSection(data)
            | Chunk::Dummy(data) => w.put_bytes(data),
        }
        buf.len() - start
    }

    /// Short static name, for logging and layout listings.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Chunk::Header(_) => "header",
            Chunk::ProgramHeaderTable(_) => "program-header-table",
            Chunk::SectionHeaderTable(_) => "section-header-table",
            Chunk::DynamicTable(_) => "dynamic-table",
            Chunk::SymbolTable(_) => "symbol-table",
            Chunk::StringTable(_) => "string-table",
            Chunk::RelocationTable(_) => "relocation-table",
            Chunk::RelocationAddendTable(_) => "relocation-addend-table",
            Chunk::Notes(_) => "notes",
            Chunk::Verdef(_) => "verdef",
            Chunk::Verneed(_) => "verneed",
            Chunk::RawSection(_) => "raw-section",
            Chunk::Dummy(_) => "dummy",
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, Chunk::Dummy(_))
    }
}
