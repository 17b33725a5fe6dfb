//! Shared synthetic ELF images for the integration tests.
//!
//! Handcrafted byte buffers rather than serializer output, so parser tests
//! exercise real wire bytes. The main fixture is a small executable with a
//! PHDR + LOAD + DYNAMIC program header table, five sections with assorted
//! alignments, inter-section gaps, and the section header table at the end.

#![allow(dead_code)]

use elfin::codec::Writer;

pub mod offsets {
    pub const PHT: u64 = 0x40;
    pub const TEXT: u64 = 0x100;
    pub const TEXT_END: u64 = 0x120;
    pub const DYNSTR: u64 = 0x140;
    pub const DYNAMIC: u64 = 0x160;
    pub const SYMTAB: u64 = 0x1a0;
    pub const SHSTRTAB: u64 = 0x1e8;
    pub const SHT: u64 = 0x400;
    pub const TOTAL: u64 = 0x580;
}

/// A bare 64-byte header declaring an empty section header table at offset
/// 64 and no program header table.
pub fn minimal_header() -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);
    w.put_bytes(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0]);
    w.put_zeros(7);
    w.put_u16(2);
    w.put_u16(62);
    w.put_u32(1);
    w.put_u64(0);
    w.put_u64(0);
    w.put_u64(64);
    w.put_u32(0);
    w.put_u16(64);
    w.put_u16(56);
    w.put_u16(0);
    w.put_u16(64);
    w.put_u16(0);
    w.put_u16(0);
    assert_eq!(buf.len(), 64);
    buf
}

pub fn put_program_header(
    w: &mut Writer,
    kind: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    file_size: u64,
    mem_size: u64,
    align: u64,
) {
    w.put_u32(kind);
    w.put_u32(flags);
    w.put_u64(offset);
    w.put_u64(vaddr);
    w.put_u64(vaddr);
    w.put_u64(file_size);
    w.put_u64(mem_size);
    w.put_u64(align);
}

#[allow(clippy::too_many_arguments)]
pub fn put_section_header(
    w: &mut Writer,
    name: u32,
    kind: u32,
    flags: u64,
    vaddr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    align: u64,
    entry_size: u64,
) {
    w.put_u32(name);
    w.put_u32(kind);
    w.put_u64(flags);
    w.put_u64(vaddr);
    w.put_u64(offset);
    w.put_u64(size);
    w.put_u32(link);
    w.put_u32(info);
    w.put_u64(align);
    w.put_u64(entry_size);
}

fn put_symbol(w: &mut Writer, name: u32, info: u8, section: u16, value: u64) {
    w.put_u32(name);
    w.put_u8(info);
    w.put_u8(0);
    w.put_u16(section);
    w.put_u64(value);
    w.put_u64(0);
}

/// Section indexes: 0 null, 1 `.text`, 2 `.dynstr`, 3 `.dynamic`,
/// 4 `.symtab`, 5 `.shstrtab`.
pub fn fixture() -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);

    w.put_bytes(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0]);
    w.put_zeros(7);
    w.put_u16(2);
    w.put_u16(62);
    w.put_u32(1);
    w.put_u64(0x400100);
    w.put_u64(offsets::PHT);
    w.put_u64(offsets::SHT);
    w.put_u32(0);
    w.put_u16(64);
    w.put_u16(56);
    w.put_u16(3);
    w.put_u16(64);
    w.put_u16(6);
    w.put_u16(5);
    assert_eq!(buf.len(), 0x40);

    {
        let mut w = Writer::new(&mut buf);
        put_program_header(&mut w, 6, 4, 0x40, 0x400040, 0xa8, 0xa8, 8);
        put_program_header(&mut w, 1, 5, 0, 0x400000, 0x190, 0x190, 0x1000);
        put_program_header(&mut w, 2, 6, 0x160, 0x400160, 0x30, 0x30, 8);
    }
    assert_eq!(buf.len(), 0xe8);

    buf.resize(offsets::TEXT as usize, 0);
    buf.push(0xc3);
    buf.resize(offsets::TEXT_END as usize, 0x90);

    buf.resize(offsets::DYNSTR as usize, 0xaa);
    buf.extend_from_slice(b"\0.foo\0.bar\0\0");
    assert_eq!(buf.len(), 0x14c);

    buf.resize(offsets::DYNAMIC as usize, 0);
    {
        let mut w = Writer::new(&mut buf);
        for (tag, value) in [(5i64, offsets::DYNSTR), (10, 12), (0, 0)] {
            w.put_i64(tag);
            w.put_u64(value);
        }
    }
    assert_eq!(buf.len(), 0x190);

    buf.resize(offsets::SYMTAB as usize, 0);
    {
        let mut w = Writer::new(&mut buf);
        put_symbol(&mut w, 0, 0, 0, 0);
        put_symbol(&mut w, 0, 0x04, 0xfff1, 0);
        put_symbol(&mut w, 1, 0x12, 1, 0x400100);
    }
    assert_eq!(buf.len(), 0x1e8);

    buf.extend_from_slice(b"\0.text\0.dynstr\0.dynamic\0.symtab\0.shstrtab\0");
    assert_eq!(buf.len(), 0x212);

    buf.resize(offsets::SHT as usize, 0);
    {
        let mut w = Writer::new(&mut buf);
        put_section_header(&mut w, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        put_section_header(&mut w, 1, 1, 0x6, 0x400100, 0x100, 0x20, 0, 0, 0x10, 0);
        put_section_header(&mut w, 7, 3, 0x2, 0x400140, 0x140, 0xc, 0, 0, 1, 0);
        put_section_header(&mut w, 15, 6, 0x3, 0x400160, 0x160, 0x30, 2, 0, 8, 0x10);
        put_section_header(&mut w, 24, 2, 0, 0, 0x1a0, 0x48, 2, 2, 8, 0x18);
        put_section_header(&mut w, 32, 3, 0, 0, 0x1e8, 0x2a, 0, 0, 1, 0);
    }
    assert_eq!(buf.len() as u64, offsets::TOTAL);
    buf
}

/// Checks the structural invariants that must survive any successful
/// instrumentation call: chunk contiguity, section/chunk correspondence,
/// and section alignment.
pub fn assert_invariants(file: &elfin::ElfFile) {
    // The chunk sequence tiles the image exactly.
    let total: u64 = file.chunks().iter().map(|c| c.byte_length() as u64).sum();
    assert_eq!(total, file.byte_length());
    assert_eq!(file.serialize().len() as u64, total);

    // The header's table references are accurate.
    let header = file.header().unwrap();
    let (sht_chunk, sht_base) = file
        .chunk_at_file_offset(header.section_header_table_file_offset)
        .unwrap();
    assert!(matches!(
        file.chunks()[sht_chunk],
        elfin::chunk::Chunk::SectionHeaderTable(_)
    ));
    assert_eq!(sht_base, header.section_header_table_file_offset);

    for sh in file.section_headers().unwrap() {
        if !sh.has_file_data() {
            continue;
        }
        // Every section lies within exactly one chunk...
        let (chunk_index, base) = file.chunk_at_file_offset(sh.file_offset).unwrap();
        let chunk_end = base + file.chunks()[chunk_index].byte_length() as u64;
        assert!(
            sh.file_offset + sh.size <= chunk_end,
            "section range {:#x}..{:#x} crosses chunk end {:#x}",
            sh.file_offset,
            sh.file_offset + sh.size,
            chunk_end
        );
        // ...and respects its alignment.
        if sh.alignment > 1 {
            assert_eq!(
                sh.file_offset % sh.alignment,
                0,
                "section at {:#x} violates alignment {:#x}",
                sh.file_offset,
                sh.alignment
            );
        }
    }
}
