//! Decodes a byte buffer into an ordered chunk list.
//!
//! The parser walks the self-describing metadata (header, program header
//! table, section header table, dynamic table) and decodes every section it
//! can type. Bytes claimed by nothing become `Dummy` chunks, so the chunk
//! sequence tiles the input exactly and serialization is byte-identical.

use std::collections::HashMap;

use tracing::debug;

use crate::chunk::{
    Chunk, DynamicTable, Header, ProgramHeaderTable, RelocationAddendTable, RelocationTable,
    SectionHeader, SectionHeaderTable, StringTable, SymbolTable,
};
use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::file::ElfFile;
use crate::format::{
    Class, DynamicTag, Encoding, SectionType, DYNAMIC_ENTRY_SIZE, RELOCATION_ADDEND_ENTRY_SIZE,
    RELOCATION_ENTRY_SIZE, SYMBOL_ENTRY_SIZE,
};

pub fn parse(data: &[u8]) -> Result<ElfFile> {
    let mut r = Reader::new(data);
    let header = Header::parse(&mut r)?;
    if header.class != Class::Elf64 {
        return Err(Error::unsupported(format!(
            "only ELF64 is supported, found {:?}",
            header.class
        )));
    }
    if header.encoding != Encoding::LittleEndian {
        return Err(Error::unsupported(format!(
            "only little-endian is supported, found {:?}",
            header.encoding
        )));
    }

    let mut placed: Vec<(u64, Chunk)> = Vec::new();
    placed.push((0, Chunk::Header(header.clone())));

    if header.program_header_table_file_offset != 0 {
        let offset = header.program_header_table_file_offset;
        let count = header.program_header_table_entry_count as usize;
        let stride = header.program_header_table_entry_size as usize;
        check_range(data, offset, (count * stride) as u64, "program header table")?;
        let mut r = Reader::at(data, offset as usize)?;
        let table = ProgramHeaderTable::parse(&mut r, count, stride)?;
        placed.push((offset, Chunk::ProgramHeaderTable(table)));
    }

    let sections = {
        let offset = header.section_header_table_file_offset;
        let count = header.section_header_table_entry_count as usize;
        let stride = header.section_header_table_entry_size as usize;
        check_range(data, offset, (count * stride) as u64, "section header table")?;
        let mut r = Reader::at(data, offset as usize)?;
        let table = SectionHeaderTable::parse(&mut r, count, stride)?;
        // shoff == 0 means "no table"; an empty table chunk at end-of-file
        // keeps the singleton invariant without emitting any bytes.
        let position = if offset == 0 { data.len() as u64 } else { offset };
        placed.push((position, Chunk::SectionHeaderTable(table.clone())));
        table.entries
    };

    let mut parsed = vec![false; sections.len()];

    // Dynamic table: the first SHT_DYNAMIC section, if any.
    let mut dynamic_values: HashMap<DynamicTag, Vec<u64>> = HashMap::new();
    if let Some((index, sh)) = sections
        .iter()
        .enumerate()
        .find(|(_, sh)| sh.kind == SectionType::Dynamic)
    {
        check_range(data, sh.file_offset, sh.size, "dynamic section")?;
        let stride = effective_stride(sh, DYNAMIC_ENTRY_SIZE);
        let mut r = Reader::at(data, sh.file_offset as usize)?;
        let table = DynamicTable::parse(&mut r, sh.size as usize, stride)?;
        for entry in &table.entries {
            dynamic_values.entry(entry.tag).or_default().push(entry.value);
        }
        placed.push((sh.file_offset, Chunk::DynamicTable(table)));
        parsed[index] = true;
    }

    // Relocation tables reachable from the dynamic table. DT_JMPREL's
    // concrete entry format is named by DT_PLTREL.
    let specs: [(DynamicTag, Option<DynamicTag>, Vec<DynamicTag>); 3] = [
        (
            DynamicTag::Rela,
            Some(DynamicTag::RelaEnt),
            vec![DynamicTag::RelaSize],
        ),
        (
            DynamicTag::Rel,
            Some(DynamicTag::RelEnt),
            vec![DynamicTag::RelSize],
        ),
        (
            DynamicTag::JmpRel,
            None,
            vec![DynamicTag::PltRelSize],
        ),
    ];
    for (tag, ent_tag, size_tags) in specs {
        let Some(addresses) = dynamic_values.get(&tag) else {
            continue;
        };
        let with_addend = match tag {
            DynamicTag::Rela => Some(true),
            DynamicTag::Rel => Some(false),
            _ => match dynamic_values.get(&DynamicTag::PltRel).and_then(|v| v.first()) {
                Some(v) if *v == DynamicTag::Rela.to_raw() as u64 => Some(true),
                Some(v) if *v == DynamicTag::Rel.to_raw() as u64 => Some(false),
                _ => None,
            },
        };
        let Some(with_addend) = with_addend else {
            debug!(?tag, "skipping relocation table with unknown entry format");
            continue;
        };
        let ent_tag = ent_tag.unwrap_or(if with_addend {
            DynamicTag::RelaEnt
        } else {
            DynamicTag::RelEnt
        });
        for &address in addresses {
            let Some((index, sh)) = sections
                .iter()
                .enumerate()
                .find(|(i, sh)| !parsed[*i] && sh.virtual_address == address)
            else {
                debug!(?tag, address, "no section matches relocation table address");
                continue;
            };
            let canonical = if with_addend {
                RELOCATION_ADDEND_ENTRY_SIZE
            } else {
                RELOCATION_ENTRY_SIZE
            };
            let stride = dynamic_values
                .get(&ent_tag)
                .and_then(|v| v.first())
                .map(|&v| v as usize)
                .unwrap_or_else(|| effective_stride(sh, canonical));
            let total = size_tags
                .iter()
                .find_map(|t| dynamic_values.get(t).and_then(|v| v.first()))
                .map(|&v| v as usize)
                .unwrap_or(sh.size as usize);
            check_range(data, sh.file_offset, total as u64, "relocation table")?;
            let mut r = Reader::at(data, sh.file_offset as usize)?;
            let chunk = if with_addend {
                Chunk::RelocationAddendTable(RelocationAddendTable::parse(&mut r, total, stride)?)
            } else {
                Chunk::RelocationTable(RelocationTable::parse(&mut r, total, stride)?)
            };
            placed.push((sh.file_offset, chunk));
            parsed[index] = true;
        }
    }

    // Remaining sections, decoded by type.
    for (index, sh) in sections.iter().enumerate() {
        if parsed[index] || !sh.has_file_data() {
            continue;
        }
        check_range(data, sh.file_offset, sh.size, "section")?;
        let start = sh.file_offset as usize;
        let bytes = data[start..start + sh.size as usize].to_vec();
        let chunk = match sh.kind {
            SectionType::StringTable => Chunk::StringTable(StringTable { data: bytes }),
            SectionType::SymbolTable | SectionType::DynamicSymbols => {
                let stride = effective_stride(sh, SYMBOL_ENTRY_SIZE);
                let mut r = Reader::at(data, start)?;
                Chunk::SymbolTable(SymbolTable::parse(&mut r, sh.size as usize, stride)?)
            }
            SectionType::Note => Chunk::Notes(bytes),
            SectionType::GnuVersionDefinition => Chunk::Verdef(bytes),
            SectionType::GnuVersionNeeds => Chunk::Verneed(bytes),
            _ => Chunk::RawSection(bytes),
        };
        placed.push((sh.file_offset, chunk));
        parsed[index] = true;
    }

    // Order by file offset and fill every hole with the raw gap bytes.
    placed.sort_by_key(|(offset, _)| *offset);
    let mut chunks = Vec::with_capacity(placed.len() * 2);
    let mut cursor = 0u64;
    for (offset, chunk) in placed {
        if offset < cursor {
            return Err(Error::corrupted(format!(
                "chunk {} at {offset:#x} overlaps the region ending at {cursor:#x}",
                chunk.kind_name()
            )));
        }
        if offset > cursor {
            chunks.push(Chunk::Dummy(data[cursor as usize..offset as usize].to_vec()));
        }
        cursor = offset + chunk.byte_length() as u64;
        chunks.push(chunk);
    }
    if cursor > data.len() as u64 {
        return Err(Error::corrupted(format!(
            "chunks extend to {cursor:#x}, past end of file at {:#x}",
            data.len()
        )));
    }
    if cursor < data.len() as u64 {
        chunks.push(Chunk::Dummy(data[cursor as usize..].to_vec()));
    }

    debug!(chunks = chunks.len(), bytes = data.len(), "parsed ELF image");
    Ok(ElfFile::from_chunks(chunks))
}

fn effective_stride(sh: &SectionHeader, canonical: usize) -> usize {
    if sh.entry_size == 0 {
        canonical
    } else {
        sh.entry_size as usize
    }
}

fn check_range(data: &[u8], offset: u64, size: u64, what: &str) -> Result<()> {
    let end = offset
        .checked_add(size)
        .ok_or_else(|| Error::corrupted(format!("{what} range overflows")))?;
    if end > data.len() as u64 {
        return Err(Error::corrupted(format!(
            "{what} range {offset:#x}..{end:#x} exceeds file size {:#x}",
            data.len()
        )));
    }
    Ok(())
}
