//! Handcrafted synthetic ELF images for unit tests.
//!
//! The main fixture is a small but structurally complete ELF64-LE
//! executable: program header table (PHDR + LOAD + DYNAMIC), five sections
//! with assorted alignments, inter-section gaps, and a section header table
//! at the end. Offsets are fixed so tests can assert exact arithmetic.

use crate::codec::Writer;

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
    w.put_u16(2); // executable
    w.put_u16(62); // x86_64
    w.put_u32(1);
    w.put_u64(0); // entry point
    w.put_u64(0); // no program header table
    w.put_u64(64); // section header table directly after the header
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

#[allow(clippy::too_many_arguments)]
fn put_program_header(
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
fn put_section_header(
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

/// An image whose dynamic table references a relocation-with-addend table
/// (`DT_RELA`/`DT_RELASZ`/`DT_RELAENT`). Both relocation entries share the
/// same `(offset, addend)` pair.
/// Sections: 0 null, 1 `.rela.dyn`, 2 `.dynamic`, 3 `.shstrtab`.
pub fn fixture_with_rela() -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);

    w.put_bytes(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0]);
    w.put_zeros(7);
    w.put_u16(3); // shared object
    w.put_u16(62);
    w.put_u32(1);
    w.put_u64(0);
    w.put_u64(0x40);
    w.put_u64(0x200);
    w.put_u32(0);
    w.put_u16(64);
    w.put_u16(56);
    w.put_u16(2);
    w.put_u16(64);
    w.put_u16(4);
    w.put_u16(3);
    assert_eq!(buf.len(), 0x40);

    {
        let mut w = Writer::new(&mut buf);
        put_program_header(&mut w, 1, 4, 0, 0x400000, 0x180, 0x180, 0x1000);
        put_program_header(&mut w, 2, 6, 0x130, 0x400130, 0x50, 0x50, 8);
    }
    assert_eq!(buf.len(), 0xb0);

    // Gap, then .rela.dyn with two identical-key entries.
    buf.resize(0x100, 0);
    {
        let mut w = Writer::new(&mut buf);
        for _ in 0..2 {
            w.put_u64(0x400500);
            w.put_u64(8); // R_X86_64_RELATIVE
            w.put_i64(0x1111);
        }
    }
    assert_eq!(buf.len(), 0x130);

    // .dynamic: DT_RELA, DT_RELASZ, DT_RELAENT, two DT_NULLs.
    {
        let mut w = Writer::new(&mut buf);
        for (tag, value) in [(7i64, 0x400100u64), (8, 48), (9, 24), (0, 0), (0, 0)] {
            w.put_i64(tag);
            w.put_u64(value);
        }
    }
    assert_eq!(buf.len(), 0x180);

    buf.extend_from_slice(b"\0.rela.dyn\0.dynamic\0.shstrtab\0");
    assert_eq!(buf.len(), 0x19e);

    buf.resize(0x200, 0);
    {
        let mut w = Writer::new(&mut buf);
        put_section_header(&mut w, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        put_section_header(&mut w, 1, 4, 0x2, 0x400100, 0x100, 48, 0, 0, 8, 24);
        put_section_header(&mut w, 11, 6, 0x3, 0x400130, 0x130, 0x50, 0, 0, 8, 0x10);
        put_section_header(&mut w, 20, 3, 0, 0, 0x180, 30, 0, 0, 1, 0);
    }
    assert_eq!(buf.len(), 0x300);
    buf
}

/// Section indexes of the main fixture.
/// 0 null, 1 `.text`, 2 `.dynstr`, 3 `.dynamic`, 4 `.symtab`, 5 `.shstrtab`.
pub fn fixture() -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);

    // Header.
    w.put_bytes(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0]);
    w.put_zeros(7);
    w.put_u16(2); // executable
    w.put_u16(62); // x86_64
    w.put_u32(1);
    w.put_u64(0x400100); // entry point
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

    // Program header table: PHDR, LOAD, DYNAMIC.
    {
        let mut w = Writer::new(&mut buf);
        put_program_header(&mut w, 6, 4, 0x40, 0x400040, 0xa8, 0xa8, 8);
        put_program_header(&mut w, 1, 5, 0, 0x400000, 0x190, 0x190, 0x1000);
        put_program_header(&mut w, 2, 6, 0x160, 0x400160, 0x30, 0x30, 8);
    }
    assert_eq!(buf.len(), 0xe8);

    // Gap, then .text (align 16).
    buf.resize(offsets::TEXT as usize, 0);
    buf.push(0xc3);
    buf.resize(offsets::TEXT_END as usize, 0x90);

    // Gap with a recognizable non-zero pattern, then .dynstr.
    buf.resize(offsets::DYNSTR as usize, 0xaa);
    buf.extend_from_slice(b"\0.foo\0.bar\0\0");
    assert_eq!(buf.len(), 0x14c);

    // Gap, then .dynamic: DT_STRTAB, DT_STRSZ, DT_NULL.
    buf.resize(offsets::DYNAMIC as usize, 0);
    {
        let mut w = Writer::new(&mut buf);
        for (tag, value) in [(5i64, offsets::DYNSTR), (10, 12), (0, 0)] {
            w.put_i64(tag);
            w.put_u64(value);
        }
    }
    assert_eq!(buf.len(), 0x190);

    // Gap, then .symtab: null, a local FILE, a global FUNC.
    buf.resize(offsets::SYMTAB as usize, 0);
    {
        let mut w = Writer::new(&mut buf);
        put_symbol(&mut w, 0, 0, 0, 0);
        put_symbol(&mut w, 0, 0x04, 0xfff1, 0);
        put_symbol(&mut w, 1, 0x12, 1, 0x400100);
    }
    assert_eq!(buf.len(), 0x1e8);

    // .shstrtab immediately follows .symtab, no gap.
    buf.extend_from_slice(b"\0.text\0.dynstr\0.dynamic\0.symtab\0.shstrtab\0");
    assert_eq!(buf.len(), 0x212);

    // Slack, then the section header table.
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
