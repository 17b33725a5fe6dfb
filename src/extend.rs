//! Growing tables and sections into adjacent slack.
//!
//! Every operation here consumes bytes from the dummy chunk immediately
//! following the grown chunk, so the positions of all other chunks are
//! unchanged and no realignment is needed. Preconditions are validated
//! before the first mutation; a returned error leaves the file untouched.

use tracing::debug;

use crate::chunk::{Chunk, ProgramHeader, SectionHeader, Symbol};
use crate::error::{Error, Result};
use crate::file::ElfFile;
use crate::format::{symbol_info, SymbolBind, SymbolType, SymbolVisibility};

/// A symbol to append to a symbol table. The engine fills in the rest:
/// `FUNC`/`LOCAL`, default visibility, zero size.
#[derive(Debug, Clone, Copy)]
pub struct NewSymbol {
    pub name_string_table_offset: u32,
    pub value: u64,
}

fn shrink_dummy_front(chunk: &mut Chunk, n: usize) {
    if let Chunk::Dummy(data) = chunk {
        data.drain(..n);
    }
}

impl ElfFile {
    /// Chunk index and base offset of the chunk backing `section_index`.
    fn section_chunk(&self, section_index: usize) -> Result<(usize, u64)> {
        let sh = self.section_header(section_index)?;
        let target = sh.file_offset;
        let (chunk_index, base) = self
            .chunk_at_file_offset(target)
            .ok_or_else(|| Error::bad_offset(target, "section offset past end of file"))?;
        if base != target {
            return Err(Error::bad_offset(
                target,
                "section does not start at a chunk boundary",
            ));
        }
        Ok((chunk_index, base))
    }

    /// The chunk after `chunk_index` must be a dummy with at least `needed`
    /// bytes of slack.
    fn require_following_slack(&self, chunk_index: usize, needed: usize) -> Result<()> {
        let offset = self.offset_of_chunk(chunk_index)
            + self.chunks[chunk_index].byte_length() as u64;
        match self.chunks.get(chunk_index + 1) {
            Some(Chunk::Dummy(data)) if data.len() >= needed => Ok(()),
            Some(Chunk::Dummy(data)) => Err(Error::InsufficientSlack {
                offset,
                needed,
                available: data.len(),
            }),
            _ => Err(Error::InsufficientSlack {
                offset,
                needed,
                available: 0,
            }),
        }
    }

    /// Appends `new_strings` (each NUL-terminated) to the string table at
    /// `section_index`, consuming slack from the dummy that follows it.
    /// Returns the table offset of each inserted string.
    ///
    /// A table ending in two NULs keeps that terminator pair: the insertion
    /// happens before the final NUL.
    pub fn extend_string_table(
        &mut self,
        section_index: usize,
        new_strings: &[&str],
    ) -> Result<Vec<u64>> {
        self.cleanup_dummy_chunks();
        let needed: usize = new_strings.iter().map(|s| s.len() + 1).sum();
        let (chunk_index, base) = self.section_chunk(section_index)?;
        if !matches!(self.chunks[chunk_index], Chunk::StringTable(_)) {
            return Err(Error::WrongChunkKind {
                offset: base,
                expected: "string-table",
                found: self.chunks[chunk_index].kind_name(),
            });
        }
        self.require_following_slack(chunk_index, needed)?;

        let mut placed = Vec::with_capacity(new_strings.len());
        if let Chunk::StringTable(table) = &mut self.chunks[chunk_index] {
            let data = &mut table.data;
            let keep_terminator =
                data.len() >= 2 && data[data.len() - 1] == 0 && data[data.len() - 2] == 0;
            if keep_terminator {
                data.pop();
            }
            for s in new_strings {
                placed.push(data.len() as u64);
                data.extend_from_slice(s.as_bytes());
                data.push(0);
            }
            if keep_terminator {
                data.push(0);
            }
        }
        shrink_dummy_front(&mut self.chunks[chunk_index + 1], needed);
        self.section_header_table_mut()?.entries[section_index].size += needed as u64;
        debug!(section = section_index, count = new_strings.len(), "extended string table");
        Ok(placed)
    }

    /// Inserts `new_symbols` into the symbol table at `section_index`, in
    /// front of its last locally-bound entry so local symbols stay ahead of
    /// global ones. Each becomes a local `FUNC` of size zero bound to
    /// `target_section_index`.
    pub fn extend_symbol_table(
        &mut self,
        section_index: usize,
        target_section_index: u16,
        new_symbols: &[NewSymbol],
    ) -> Result<()> {
        self.cleanup_dummy_chunks();
        let (chunk_index, base) = self.section_chunk(section_index)?;
        let Chunk::SymbolTable(table) = &self.chunks[chunk_index] else {
            return Err(Error::WrongChunkKind {
                offset: base,
                expected: "symbol-table",
                found: self.chunks[chunk_index].kind_name(),
            });
        };
        let stride = table.entry_size;
        let needed = new_symbols.len() * stride;
        self.require_following_slack(chunk_index, needed)?;

        if let Chunk::SymbolTable(table) = &mut self.chunks[chunk_index] {
            let position = table
                .entries
                .iter()
                .rposition(|s| s.bind() == SymbolBind::Local)
                .unwrap_or(0);
            for (i, sym) in new_symbols.iter().enumerate() {
                table.entries.insert(
                    position + i,
                    Symbol {
                        name_string_table_offset: sym.name_string_table_offset,
                        info: symbol_info(SymbolBind::Local, SymbolType::Func),
                        visibility: SymbolVisibility::Default.to_raw(),
                        section_index: target_section_index,
                        value: sym.value,
                        size: 0,
                    },
                );
            }
        }
        shrink_dummy_front(&mut self.chunks[chunk_index + 1], needed);
        let sh = &mut self.section_header_table_mut()?.entries[section_index];
        sh.size += needed as u64;
        sh.info += new_symbols.len() as u32;
        debug!(section = section_index, count = new_symbols.len(), "extended symbol table");
        Ok(())
    }

    /// Appends `bytes` to the raw section at `section_index`, consuming the
    /// same amount of slack from the dummy that follows it.
    pub fn extend_raw_section(&mut self, section_index: usize, bytes: &[u8]) -> Result<()> {
        self.cleanup_dummy_chunks();
        let (chunk_index, base) = self.section_chunk(section_index)?;
        if !matches!(self.chunks[chunk_index], Chunk::RawSection(_)) {
            return Err(Error::WrongChunkKind {
                offset: base,
                expected: "raw-section",
                found: self.chunks[chunk_index].kind_name(),
            });
        }
        self.require_following_slack(chunk_index, bytes.len())?;

        if let Chunk::RawSection(data) = &mut self.chunks[chunk_index] {
            data.extend_from_slice(bytes);
        }
        shrink_dummy_front(&mut self.chunks[chunk_index + 1], bytes.len());
        self.section_header_table_mut()?.entries[section_index].size += bytes.len() as u64;
        Ok(())
    }

    /// Materializes `new_header` as a raw section carved out of the dummy
    /// chunk covering `new_header.file_offset`, and inserts the header into
    /// the section header table at the position keeping it sorted by file
    /// offset. Returns the new section's index.
    pub fn create_section(&mut self, new_header: SectionHeader) -> Result<usize> {
        self.cleanup_dummy_chunks();
        let sht_index = self.section_header_table_chunk_index()?;
        let stride = self.section_header_table()?.entry_size;
        self.require_following_slack(sht_index, stride)?;

        let target = new_header.file_offset;
        let (chunk_index, base) = self
            .chunk_at_file_offset(target)
            .ok_or_else(|| Error::bad_offset(target, "section location past end of file"))?;
        let Chunk::Dummy(data) = &self.chunks[chunk_index] else {
            return Err(Error::WrongChunkKind {
                offset: target,
                expected: "dummy",
                found: self.chunks[chunk_index].kind_name(),
            });
        };
        let gap = (target - base) as usize;
        if data.len() < gap + new_header.size as usize {
            return Err(Error::InsufficientSlack {
                offset: base,
                needed: gap + new_header.size as usize,
                available: data.len(),
            });
        }
        // When the dummy hosting the section is the table's own slack, its
        // front bytes are consumed by the grown table; the section location
        // must lie beyond them.
        if chunk_index == sht_index + 1 && gap < stride {
            return Err(Error::InsufficientSlack {
                offset: base,
                needed: stride,
                available: gap,
            });
        }

        // Carve the dummy into prefix, section content, suffix.
        let section_size = new_header.size as usize;
        let mut removed = self.chunks.remove(chunk_index);
        if let Chunk::Dummy(data) = &mut removed {
            let mut tail = data.split_off(gap);
            let suffix = tail.split_off(section_size);
            let mut insert_at = chunk_index;
            if !data.is_empty() {
                self.chunks
                    .insert(insert_at, Chunk::Dummy(std::mem::take(data)));
                insert_at += 1;
            }
            self.chunks
                .insert(insert_at, Chunk::RawSection(vec![0; section_size]));
            if !suffix.is_empty() {
                self.chunks.insert(insert_at + 1, Chunk::Dummy(suffix));
            }
        }

        // Insert the header, keeping the table sorted by file offset.
        let table = self.section_header_table_mut()?;
        let position = table
            .entries
            .iter()
            .position(|e| e.file_offset > target)
            .unwrap_or(table.entries.len());
        table.entries.insert(position, new_header);

        let header = self.header_mut()?;
        if position <= header.section_header_string_table_index as usize {
            header.section_header_string_table_index += 1;
        }
        header.section_header_table_entry_count += 1;

        // The carve may have shifted the table's chunk index.
        let sht_index = self.section_header_table_chunk_index()?;
        shrink_dummy_front(&mut self.chunks[sht_index + 1], stride);
        debug!(section = position, offset = target, "created section");
        Ok(position)
    }

    /// Inserts `new_entry` into the program header table, keeping entries of
    /// the same type contiguous and ordered by virtual address within the
    /// type group. Consumes one entry stride of slack after the table.
    pub fn extend_program_header_table(&mut self, new_entry: ProgramHeader) -> Result<()> {
        self.cleanup_dummy_chunks();
        self.check_instrumentation_layout()?;
        let stride = self.program_header_table()?.entry_size;
        self.require_following_slack(1, stride)?;

        let table = self.program_header_table_mut()?;
        let entries = &table.entries;
        let position = match entries.iter().position(|e| e.kind == new_entry.kind) {
            Some(start) => {
                let mut position = start;
                while position < entries.len()
                    && entries[position].kind == new_entry.kind
                    && entries[position].virtual_memory_address
                        <= new_entry.virtual_memory_address
                {
                    position += 1;
                }
                position
            }
            None => entries.len(),
        };
        table.entries.insert(position, new_entry);
        self.header_mut()?.program_header_table_entry_count += 1;
        shrink_dummy_front(&mut self.chunks[2], stride);
        debug!(position, "extended program header table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{
        SectionFlags, SectionType, SegmentFlags, SegmentType,
    };
    use crate::test_fixtures::{fixture, offsets};

    #[test]
    fn string_table_extension_preserves_terminator_pair() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let placed = file.extend_string_table(2, &["baz"]).unwrap();
        assert_eq!(placed, vec![11]);

        let (chunk_index, _) = file.section_chunk(2).unwrap();
        let Chunk::StringTable(table) = &file.chunks()[chunk_index] else {
            panic!("expected string table");
        };
        assert_eq!(table.data, b"\0.foo\0.bar\0baz\0\0");
        assert_eq!(file.section_header(2).unwrap().size, 16);
        // Slack shrank by exactly the inserted length.
        let Chunk::Dummy(slack) = &file.chunks()[chunk_index + 1] else {
            panic!("expected dummy after string table");
        };
        assert_eq!(slack.len(), 16);
        // Positions of everything else are unchanged.
        assert_eq!(file.byte_length(), offsets::TOTAL);
        assert_eq!(file.section_header(3).unwrap().file_offset, offsets::DYNAMIC);
    }

    #[test]
    fn string_table_extension_is_transactional() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let long = "x".repeat(100);
        let err = file
            .extend_string_table(2, &[long.as_str()])
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSlack { .. }));
        assert_eq!(file.serialize(), fixture());

        let err = file.extend_string_table(1, &["nope"]).unwrap_err();
        assert!(matches!(err, Error::WrongChunkKind { .. }));
        assert_eq!(file.serialize(), fixture());
    }

    #[test]
    fn symbols_insert_before_last_local() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        // Create slack between .symtab and .shstrtab first.
        file.allocate_file_memory(offsets::SHSTRTAB, 0x30).unwrap();
        file.extend_symbol_table(
            4,
            1,
            &[NewSymbol {
                name_string_table_offset: 1,
                value: 0x400110,
            }],
        )
        .unwrap();

        let (chunk_index, _) = file.section_chunk(4).unwrap();
        let Chunk::SymbolTable(table) = &file.chunks()[chunk_index] else {
            panic!("expected symbol table");
        };
        assert_eq!(table.entries.len(), 4);
        // All locals precede the global, and sh_info counts the locals.
        let first_global = table
            .entries
            .iter()
            .position(|s| s.bind() == SymbolBind::Global)
            .unwrap();
        assert!(table.entries[..first_global]
            .iter()
            .all(|s| s.bind() == SymbolBind::Local));
        let sh = file.section_header(4).unwrap();
        assert_eq!(sh.info, first_global as u32);
        assert_eq!(sh.size, 96);

        let inserted = &table.entries[1];
        assert_eq!(inserted.symbol_type(), SymbolType::Func);
        assert_eq!(inserted.section_index, 1);
        assert_eq!(inserted.value, 0x400110);
    }

    #[test]
    fn raw_section_grows_into_slack() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        file.extend_raw_section(1, &[0x0f, 0x05, 0xc3]).unwrap();
        assert_eq!(file.section_header(1).unwrap().size, 0x23);
        assert_eq!(file.byte_length(), offsets::TOTAL);
        let mut patched = [0u8; 3];
        file.get_raw_bytes_at_offset(offsets::TEXT_END, &mut patched)
            .unwrap();
        assert_eq!(patched, [0x0f, 0x05, 0xc3]);
    }

    #[test]
    fn create_section_carves_a_dummy() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let end = file.byte_length();
        file.allocate_file_memory(end, 0x100).unwrap();

        let index = file
            .create_section(SectionHeader {
                name_string_table_offset: 0,
                kind: SectionType::ProgBits,
                flags: SectionFlags::ALLOC,
                virtual_address: 0x500000,
                file_offset: end + 0x80,
                size: 0x40,
                link: 0,
                info: 0,
                alignment: 8,
                entry_size: 0,
            })
            .unwrap();
        assert_eq!(index, 6);
        assert_eq!(
            file.header().unwrap().section_header_table_entry_count,
            7
        );
        // The string table index was past the insertion point and stays.
        assert_eq!(
            file.header().unwrap().section_header_string_table_index,
            5
        );
        let sh = file.section_header(index).unwrap();
        assert_eq!(sh.file_offset, end + 0x80);
        let (chunk_index, base) = file.chunk_at_file_offset(end + 0x80).unwrap();
        assert_eq!(base, end + 0x80);
        assert!(matches!(file.chunks()[chunk_index], Chunk::RawSection(_)));
    }

    #[test]
    fn create_section_needs_room_for_the_header_entry() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let end = file.byte_length();
        file.allocate_file_memory(end, 0x100).unwrap();
        // The hosting dummy is also the table's slack; a location within the
        // first entry-stride bytes would be eaten by the growing table.
        let err = file
            .create_section(SectionHeader {
                name_string_table_offset: 0,
                kind: SectionType::ProgBits,
                flags: SectionFlags::ALLOC,
                virtual_address: 0x500000,
                file_offset: end + 0x20,
                size: 0x40,
                link: 0,
                info: 0,
                alignment: 8,
                entry_size: 0,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSlack { .. }));
    }

    #[test]
    fn program_header_insertion_keeps_type_groups_sorted() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        // Make slack after the program header table.
        file.allocate_file_memory(0xe8, 56).unwrap();
        file.extend_program_header_table(ProgramHeader {
            kind: SegmentType::Load,
            flags: SegmentFlags::READABLE,
            file_offset: 0x2000,
            virtual_memory_address: 0x500000,
            physical_memory_address: 0x500000,
            file_size: 0x100,
            memory_size: 0x100,
            alignment: 0x1000,
        })
        .unwrap();

        let table = file.program_header_table().unwrap();
        assert_eq!(table.entries.len(), 4);
        let kinds: Vec<_> = table.entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                SegmentType::ProgramHeaderTable,
                SegmentType::Load,
                SegmentType::Load,
                SegmentType::Dynamic
            ]
        );
        // Within the LOAD group, addresses ascend.
        assert!(
            table.entries[1].virtual_memory_address
                < table.entries[2].virtual_memory_address
        );
        assert_eq!(
            file.header().unwrap().program_header_table_entry_count,
            4
        );
    }
}
