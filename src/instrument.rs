//! The instrumentation engine: structural allocation of file memory.
//!
//! `allocate_file_memory` inserts bytes into the middle of an ELF image and
//! then repairs every consequence: section alignment, segment coverage,
//! section header offsets, and the self-referential entries of the dynamic
//! table. The engine works purely on the chunk sequence; existing `Dummy`
//! chunks act as slack that can absorb part or all of an insertion.

use tracing::debug;

use crate::chunk::{Chunk, SectionHeader};
use crate::error::{Error, Result};
use crate::file::ElfFile;
use crate::format::{SectionType, SegmentType, SECTION_HEADER_TABLE_ALIGNMENT};

/// A section displaced by an allocation, with its pre- and post-move offsets.
#[derive(Debug, Clone, Copy)]
struct SectionMove {
    section_index: usize,
    old_offset: u64,
    new_offset: u64,
    size: u64,
}

impl SectionMove {
    fn delta(&self) -> i64 {
        self.new_offset as i64 - self.old_offset as i64
    }
}

fn offset_add(value: u64, delta: i64) -> u64 {
    (value as i64 + delta) as u64
}

fn shrink_dummy_tail(chunk: &mut Chunk, n: usize) {
    if let Chunk::Dummy(data) = chunk {
        data.truncate(data.len() - n);
    }
}

fn grow_dummy(chunk: &mut Chunk, n: usize) {
    if let Chunk::Dummy(data) = chunk {
        data.resize(data.len() + n, 0);
    }
}

impl ElfFile {
    /// Merges consecutive dummy chunks and drops empty ones. Every public
    /// instrumentation operation starts from this normalized state.
    pub fn cleanup_dummy_chunks(&mut self) {
        let mut i = 0;
        while i < self.chunks.len() {
            let is_empty_dummy =
                matches!(&self.chunks[i], Chunk::Dummy(data) if data.is_empty());
            if is_empty_dummy {
                self.chunks.remove(i);
                continue;
            }
            if self.chunks[i].is_dummy()
                && i + 1 < self.chunks.len()
                && self.chunks[i + 1].is_dummy()
            {
                if let Chunk::Dummy(next) = self.chunks.remove(i + 1) {
                    if let Chunk::Dummy(data) = &mut self.chunks[i] {
                        data.extend_from_slice(&next);
                    }
                }
                continue;
            }
            i += 1;
        }
    }

    /// The engine only operates on files where the program header table
    /// immediately follows the ELF header.
    pub(crate) fn check_instrumentation_layout(&self) -> Result<()> {
        let header = self.header()?;
        if header.program_header_table_file_offset != header.header_size as u64 {
            return Err(Error::unsupported_layout(format!(
                "program header table at {:#x}, expected directly after the header at {:#x}",
                header.program_header_table_file_offset, header.header_size
            )));
        }
        if !matches!(self.chunks.get(1), Some(Chunk::ProgramHeaderTable(_))) {
            return Err(Error::unsupported_layout(
                "chunk 1 is not the program header table",
            ));
        }
        Ok(())
    }

    /// Inserts `size` zero bytes at `offset` and restores every invariant.
    ///
    /// `offset` must name a chunk boundary, a position inside a dummy chunk,
    /// or end-of-file, and must lie at or past the end of the program header
    /// table. Displaced sections are realigned by resizing neighboring dummy
    /// chunks; segment descriptors, section headers, and dynamic-table
    /// references are then rewritten to match the new layout.
    ///
    /// References embedded inside code or data (relative jumps, PC-relative
    /// addressing) are not discovered or adjusted.
    pub fn allocate_file_memory(&mut self, offset: u64, size: u64) -> Result<()> {
        self.cleanup_dummy_chunks();
        self.check_instrumentation_layout()?;
        if size == 0 {
            return Err(Error::bad_offset(offset, "allocation size must be positive"));
        }
        let header = self.header()?;
        let table_end =
            header.header_size as u64 + self.program_header_table()?.byte_length() as u64;
        if offset < table_end {
            return Err(Error::bad_offset(
                offset,
                format!("cannot allocate before end of program header table at {table_end:#x}"),
            ));
        }
        let total = self.byte_length();
        if offset > total {
            return Err(Error::bad_offset(
                offset,
                format!("past end of file at {total:#x}"),
            ));
        }

        // Pre-mutation layout, needed by the later phases.
        let sections_before = self.section_header_table()?.entries.clone();
        let segments_before = self.program_header_table()?.entries.clone();
        let sht_old = self.header()?.section_header_table_file_offset;
        let pht_old = self.header()?.program_header_table_file_offset;

        // Phase 1: insert the new dummy.
        let inserted_index = self.insert_dummy_at(offset, size)?;
        debug!(offset, size, chunk = inserted_index, "inserted allocation dummy");

        // Phases 2 + 3: walk the following chunks, realigning each displaced
        // section by resizing the dummy in front of it, and record who moved.
        let (moves, sht_new) =
            self.realign_following(inserted_index, offset + size, size, &sections_before)?;
        for m in &moves {
            debug!(
                section = m.section_index,
                from = m.old_offset,
                to = m.new_offset,
                "section displaced"
            );
        }

        // Phase 4: segment coverage.
        self.update_segments(&sections_before, pht_old, sht_old, sht_new, &moves)?;

        // Phase 5: section header offsets (and addresses of sections inside
        // non-LOAD segments).
        self.update_section_headers(&segments_before, &moves)?;

        // Phase 6: self-referential dynamic entries.
        self.remap_dynamic_values(&sections_before, &moves);

        if let Some(new_offset) = sht_new {
            self.header_mut()?.section_header_table_file_offset = new_offset;
        }
        self.cleanup_dummy_chunks();
        Ok(())
    }

    fn insert_dummy_at(&mut self, offset: u64, size: u64) -> Result<usize> {
        let mut base = 0u64;
        for index in 0..self.chunks.len() {
            if base == offset {
                self.chunks
                    .insert(index, Chunk::Dummy(vec![0; size as usize]));
                return Ok(index);
            }
            let len = self.chunks[index].byte_length() as u64;
            if offset < base + len {
                if !self.chunks[index].is_dummy() {
                    let found = self.chunks[index].kind_name();
                    return Err(Error::bad_offset(
                        offset,
                        format!("inside a {found} chunk; not a boundary or dummy position"),
                    ));
                }
                let cut = (offset - base) as usize;
                if let Chunk::Dummy(data) = &mut self.chunks[index] {
                    let right = data.split_off(cut);
                    self.chunks
                        .insert(index + 1, Chunk::Dummy(vec![0; size as usize]));
                    self.chunks.insert(index + 2, Chunk::Dummy(right));
                }
                return Ok(index + 1);
            }
            base += len;
        }
        // End-of-file allocation.
        self.chunks.push(Chunk::Dummy(vec![0; size as usize]));
        Ok(self.chunks.len() - 1)
    }

    /// Walks the chunks after the inserted dummy. `remaining_shift` is the
    /// number of bytes by which the chunks past the cursor are still
    /// displaced from their original positions; realignment shrinks existing
    /// dummies (absorbing the shift in whole alignment steps) or grows them
    /// when a displaced section lands misaligned. The walk stops as soon as
    /// the shift is fully absorbed.
    fn realign_following(
        &mut self,
        inserted_index: usize,
        walk_start: u64,
        size: u64,
        sections_before: &[SectionHeader],
    ) -> Result<(Vec<SectionMove>, Option<u64>)> {
        let mut remaining_shift = size;
        let mut cursor = walk_start;
        let mut j = inserted_index + 1;
        let mut moves: Vec<SectionMove> = Vec::new();
        let mut sht_new = None;

        while j < self.chunks.len() && remaining_shift > 0 {
            if self.chunks[j].is_dummy()
                && j + 1 < self.chunks.len()
                && self.chunks[j + 1].is_dummy()
            {
                if let Chunk::Dummy(next) = self.chunks.remove(j + 1) {
                    if let Chunk::Dummy(data) = &mut self.chunks[j] {
                        data.extend_from_slice(&next);
                    }
                }
                continue;
            }

            if self.chunks[j].is_dummy() {
                let dummy_len = self.chunks[j].byte_length() as u64;
                if j + 1 >= self.chunks.len() {
                    // Trailing slack has no alignment constraint.
                    break;
                }
                let target_cursor = cursor + dummy_len;
                let target_original = target_cursor - remaining_shift;
                let align = self.alignment_of_chunk(j + 1, target_original, sections_before);
                let err = target_cursor % align;
                if err < dummy_len && err <= remaining_shift {
                    shrink_dummy_tail(&mut self.chunks[j], err as usize);
                    remaining_shift -= err;
                    while remaining_shift >= align
                        && align < self.chunks[j].byte_length() as u64
                    {
                        shrink_dummy_tail(&mut self.chunks[j], align as usize);
                        remaining_shift -= align;
                    }
                } else if err != 0 {
                    grow_dummy(&mut self.chunks[j], (align - err) as usize);
                    remaining_shift += align - err;
                }
                let new_target = cursor + self.chunks[j].byte_length() as u64;
                self.record_move(
                    j + 1,
                    target_original,
                    new_target,
                    sections_before,
                    &mut moves,
                    &mut sht_new,
                );
                cursor = new_target + self.chunks[j + 1].byte_length() as u64;
                j += 2;
            } else {
                // A section-like chunk with no dummy in front: misalignment
                // can only be fixed by inserting fresh padding.
                let original = cursor - remaining_shift;
                let align = self.alignment_of_chunk(j, original, sections_before);
                let err = cursor % align;
                if err != 0 {
                    self.chunks
                        .insert(j, Chunk::Dummy(vec![0; (align - err) as usize]));
                    remaining_shift += align - err;
                    cursor += align - err;
                    j += 1;
                }
                self.record_move(
                    j,
                    original,
                    cursor,
                    sections_before,
                    &mut moves,
                    &mut sht_new,
                );
                cursor += self.chunks[j].byte_length() as u64;
                j += 1;
            }
        }
        Ok((moves, sht_new))
    }

    fn alignment_of_chunk(
        &self,
        chunk_index: usize,
        original_offset: u64,
        sections_before: &[SectionHeader],
    ) -> u64 {
        if matches!(self.chunks[chunk_index], Chunk::SectionHeaderTable(_)) {
            return SECTION_HEADER_TABLE_ALIGNMENT;
        }
        sections_before
            .iter()
            .find(|sh| sh.has_file_data() && sh.file_offset == original_offset)
            .map(|sh| sh.alignment.max(1))
            .unwrap_or(1)
    }

    fn record_move(
        &self,
        chunk_index: usize,
        old_offset: u64,
        new_offset: u64,
        sections_before: &[SectionHeader],
        moves: &mut Vec<SectionMove>,
        sht_new: &mut Option<u64>,
    ) {
        if old_offset == new_offset {
            return;
        }
        if matches!(self.chunks[chunk_index], Chunk::SectionHeaderTable(_)) {
            *sht_new = Some(new_offset);
            return;
        }
        for (index, sh) in sections_before.iter().enumerate() {
            if sh.has_file_data() && sh.file_offset == old_offset {
                moves.push(SectionMove {
                    section_index: index,
                    old_offset,
                    new_offset,
                    size: sh.size,
                });
            }
        }
    }

    /// Shifts and resizes program header entries based on how the first and
    /// last covered items moved. LOAD segments never change addresses; the
    /// ELF header and program header table are immovable anchors.
    fn update_segments(
        &mut self,
        sections_before: &[SectionHeader],
        pht_old: u64,
        sht_old: u64,
        sht_new: Option<u64>,
        moves: &[SectionMove],
    ) -> Result<()> {
        // Section-like items of the pre-mutation layout: (offset, delta).
        let mut items: Vec<(u64, i64)> = vec![
            (0, 0),
            (pht_old, 0),
            (sht_old, sht_new.map_or(0, |new| new as i64 - sht_old as i64)),
        ];
        for (index, sh) in sections_before.iter().enumerate() {
            if sh.kind == SectionType::Null {
                continue;
            }
            let delta = moves
                .iter()
                .find(|m| m.section_index == index)
                .map_or(0, |m| m.delta());
            items.push((sh.file_offset, delta));
        }
        items.sort_by_key(|&(offset, _)| offset);

        let table = self.program_header_table_mut()?;
        for entry in &mut table.entries {
            let start = entry.file_offset;
            let end = start + entry.file_size;
            let mut first = None;
            let mut last = None;
            for (i, &(offset, _)) in items.iter().enumerate() {
                if offset >= start && offset < end {
                    if first.is_none() {
                        first = Some(i);
                    }
                    last = Some(i);
                }
            }
            let (Some(first), Some(last)) = (first, last) else {
                continue;
            };
            let delta_first = items[first].1;
            let delta_last = items[last].1;
            if delta_first != 0 {
                entry.file_offset = offset_add(entry.file_offset, delta_first);
                if entry.kind != SegmentType::Load {
                    entry.virtual_memory_address =
                        offset_add(entry.virtual_memory_address, delta_first);
                    entry.physical_memory_address =
                        offset_add(entry.physical_memory_address, delta_first);
                }
            }
            if first != last && delta_last != delta_first {
                entry.file_size = offset_add(entry.file_size, delta_last - delta_first);
                entry.memory_size = offset_add(entry.memory_size, delta_last - delta_first);
            }
        }
        Ok(())
    }

    /// Rewrites `file_offset` for every moved section. `virtual_address`
    /// follows only for sections lying entirely inside a non-LOAD segment
    /// (whose own address was shifted in the segment pass); LOAD-mapped
    /// content keeps its runtime addresses.
    fn update_section_headers(
        &mut self,
        segments_before: &[crate::chunk::ProgramHeader],
        moves: &[SectionMove],
    ) -> Result<()> {
        let table = self.section_header_table_mut()?;
        for m in moves {
            let inside_non_load = segments_before.iter().any(|p| {
                p.kind != SegmentType::Load
                    && p.file_size > 0
                    && m.old_offset >= p.file_offset
                    && m.old_offset + m.size <= p.file_offset + p.file_size
            });
            let sh = &mut table.entries[m.section_index];
            sh.file_offset = m.new_offset;
            if inside_non_load {
                sh.virtual_address = offset_add(sh.virtual_address, m.delta());
            }
        }
        Ok(())
    }

    /// Rewrites dynamic entries whose value points into a moved section.
    /// Values pointing into no known section are left unchanged.
    fn remap_dynamic_values(&mut self, sections_before: &[SectionHeader], moves: &[SectionMove]) {
        let Some(table) = self.dynamic_table_mut() else {
            return;
        };
        for entry in &mut table.entries {
            if !entry.tag.is_section_reference() {
                continue;
            }
            let containing = sections_before.iter().enumerate().find(|(_, sh)| {
                sh.has_file_data()
                    && entry.value >= sh.file_offset
                    && entry.value < sh.file_offset + sh.size
            });
            if let Some((index, _)) = containing {
                if let Some(m) = moves.iter().find(|m| m.section_index == index) {
                    entry.value = offset_add(entry.value, m.delta());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DynamicTag;
    use crate::test_fixtures::{fixture, offsets};

    #[test]
    fn rejects_offsets_inside_typed_chunks() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        // Inside .text.
        let err = file.allocate_file_memory(offsets::TEXT + 4, 8).unwrap_err();
        assert!(matches!(err, Error::BadOffset { .. }));
        // Before the end of the program header table.
        let err = file.allocate_file_memory(0x40, 8).unwrap_err();
        assert!(matches!(err, Error::BadOffset { .. }));
        // Zero-sized allocation.
        let err = file.allocate_file_memory(offsets::TEXT, 0).unwrap_err();
        assert!(matches!(err, Error::BadOffset { .. }));
        // Untouched on failure.
        assert_eq!(file.serialize(), fixture());
    }

    #[test]
    fn allocation_absorbed_by_following_slack() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let before = file.byte_length();
        // The gap after .text is 32 bytes with no alignment constraint on
        // the next section, so a 16-byte insertion is fully absorbed.
        file.allocate_file_memory(offsets::TEXT_END, 16).unwrap();
        assert_eq!(file.byte_length(), before);
        let sh = file.section_header(2).unwrap();
        assert_eq!(sh.file_offset, offsets::DYNSTR);
    }

    #[test]
    fn end_of_file_allocation_appends_slack() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let before = file.byte_length();
        file.allocate_file_memory(before, 0x40).unwrap();
        assert_eq!(file.byte_length(), before + 0x40);
        assert!(file.chunks().last().unwrap().is_dummy());
    }

    #[test]
    fn displacement_updates_dynamic_references() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        file.allocate_file_memory(offsets::DYNSTR, 0x40).unwrap();
        // .dynstr moved by exactly 0x40.
        assert_eq!(
            file.section_header(2).unwrap().file_offset,
            offsets::DYNSTR + 0x40
        );
        let dynamic = file.dynamic_table().unwrap();
        assert_eq!(
            dynamic.value_of(DynamicTag::StrTab),
            Some(offsets::DYNSTR + 0x40)
        );
        // Size entries are not file references and stay put.
        assert_eq!(dynamic.value_of(DynamicTag::StrSize), Some(12));
    }

    #[test]
    fn load_addresses_never_move() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let before: Vec<_> = file
            .program_header_table()
            .unwrap()
            .entries
            .iter()
            .map(|p| (p.kind, p.virtual_memory_address, p.physical_memory_address))
            .collect();
        file.allocate_file_memory(offsets::DYNSTR, 0x40).unwrap();
        for (p, (kind, vaddr, paddr)) in file
            .program_header_table()
            .unwrap()
            .entries
            .iter()
            .zip(before)
        {
            if kind == SegmentType::Load {
                assert_eq!(p.virtual_memory_address, vaddr);
                assert_eq!(p.physical_memory_address, paddr);
            }
        }
    }

    #[test]
    fn non_load_segment_follows_its_section() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let dynamic_before = file.program_header_table().unwrap().entries[2].clone();
        assert_eq!(dynamic_before.kind, SegmentType::Dynamic);
        file.allocate_file_memory(offsets::DYNSTR, 0x40).unwrap();

        let moved = file.section_header(3).unwrap();
        let delta = moved.file_offset - offsets::DYNAMIC;
        assert!(delta > 0);
        let dynamic_after = &file.program_header_table().unwrap().entries[2];
        assert_eq!(dynamic_after.file_offset, dynamic_before.file_offset + delta);
        assert_eq!(
            dynamic_after.virtual_memory_address,
            dynamic_before.virtual_memory_address + delta
        );
        // The section's own address follows its non-LOAD segment.
        assert_eq!(moved.virtual_address, 0x400160 + delta);
    }

    #[test]
    fn alignment_holds_for_all_sections_after_allocation() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        file.allocate_file_memory(offsets::TEXT, 0x33).unwrap();
        for sh in file.section_headers().unwrap() {
            if sh.has_file_data() && sh.alignment > 1 {
                assert_eq!(
                    sh.file_offset % sh.alignment,
                    0,
                    "section at {:#x} misaligned (align {:#x})",
                    sh.file_offset,
                    sh.alignment
                );
            }
        }
        // The image stays internally consistent and serializable.
        let bytes = file.serialize();
        let reparsed = ElfFile::parse(&bytes).unwrap();
        assert_eq!(reparsed.serialize(), bytes);
    }

    #[test]
    fn growing_inside_slack_before_the_section_header_table() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let sht_old = file
            .header()
            .unwrap()
            .section_header_table_file_offset;
        // Splitting the dummy in front of the table leaves a suffix that can
        // absorb the whole insertion, so the table does not move.
        file.allocate_file_memory(sht_old - 0x30, 0x20).unwrap();
        assert_eq!(
            file.header().unwrap().section_header_table_file_offset,
            sht_old
        );
    }

    #[test]
    fn boundary_allocation_displaces_the_section_header_table() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        let sht_old = file
            .header()
            .unwrap()
            .section_header_table_file_offset;
        // A boundary insertion directly in front of the table cannot be
        // absorbed: the table moves by the inserted size (16-aligned here).
        file.allocate_file_memory(sht_old, 0x40).unwrap();
        assert_eq!(
            file.header().unwrap().section_header_table_file_offset,
            sht_old + 0x40
        );
    }

    #[test]
    fn cleanup_merges_and_drops_dummies() {
        let mut file = ElfFile::parse(&fixture()).unwrap();
        file.chunks.push(Chunk::Dummy(vec![]));
        file.chunks.push(Chunk::Dummy(vec![1, 2]));
        file.chunks.push(Chunk::Dummy(vec![3]));
        file.cleanup_dummy_chunks();
        match file.chunks.last().unwrap() {
            Chunk::Dummy(data) => assert_eq!(data, &[1, 2, 3]),
            other => panic!("expected merged dummy, got {}", other.kind_name()),
        }
    }
}
