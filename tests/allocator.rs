//! The section allocator façade, end to end.

use pretty_assertions::assert_eq;

use elfin::allocator::{NewSection, SectionAllocator};
use elfin::format::{SectionFlags, SectionType, SegmentFlags, SegmentType};
use elfin::ElfFile;

mod common;
use common::{assert_invariants, fixture};

#[test]
fn injects_an_executable_section_and_load_segment() {
    let mut file = ElfFile::parse(&fixture()).unwrap();
    let index = SectionAllocator::new(&mut file)
        .allocate_prog_bits_section(&NewSection {
            name: ".x",
            address: 0x30000,
            size: 0x400,
            alignment: 0x1000,
            writable: false,
            executable: true,
            contents: &[0xc3],
        })
        .unwrap();

    let sh = file.section_header(index).unwrap().clone();
    assert_eq!(sh.kind, SectionType::ProgBits);
    assert_eq!(sh.flags, SectionFlags::ALLOC | SectionFlags::EXECUTABLE);
    assert_eq!(sh.virtual_address, 0x30000);
    assert_eq!(sh.size, 0x400);
    assert_eq!(sh.alignment, 0x1000);
    assert_eq!(sh.file_offset % 0x1000, 0);

    let load = file
        .program_header_table()
        .unwrap()
        .entries
        .iter()
        .find(|p| p.kind == SegmentType::Load && p.file_offset == sh.file_offset)
        .expect("a LOAD segment backs the new section")
        .clone();
    assert_eq!(load.flags, SegmentFlags::READABLE | SegmentFlags::EXECUTABLE);
    assert_eq!(load.virtual_memory_address, 0x30000);
    assert_eq!(load.file_size, 0x400);
    assert_eq!(load.memory_size, 0x400);
    assert_eq!(load.alignment, 0x1000);

    // First content byte placed, remainder zero-filled.
    let mut data = vec![0u8; 0x400];
    file.get_raw_bytes_at_offset(sh.file_offset, &mut data).unwrap();
    assert_eq!(data[0], 0xc3);
    assert!(data[1..].iter().all(|&b| b == 0));

    assert_invariants(&file);

    // The instrumented image reparses to the same bytes.
    let bytes = file.serialize();
    let reparsed = ElfFile::parse(&bytes).unwrap();
    assert_eq!(reparsed.serialize(), bytes);
}

#[test]
fn injects_a_writable_data_section() {
    let mut file = ElfFile::parse(&fixture()).unwrap();
    let payload: Vec<u8> = (0..=255).collect();
    let index = SectionAllocator::new(&mut file)
        .allocate_prog_bits_section(&NewSection {
            name: ".payload",
            address: 0x50000,
            size: 0x100,
            alignment: 0x10,
            writable: true,
            executable: false,
            contents: &payload,
        })
        .unwrap();

    let sh = file.section_header(index).unwrap();
    assert_eq!(sh.flags, SectionFlags::ALLOC | SectionFlags::WRITABLE);
    let mut data = vec![0u8; 0x100];
    file.get_raw_bytes_at_offset(sh.file_offset, &mut data).unwrap();
    assert_eq!(data, payload);
    assert_invariants(&file);
}

#[test]
fn successive_injections_accumulate() {
    let mut file = ElfFile::parse(&fixture()).unwrap();
    for (i, name) in [".one", ".two", ".three"].iter().enumerate() {
        let index = SectionAllocator::new(&mut file)
            .allocate_prog_bits_section(&NewSection {
                name,
                address: 0x600000 + (i as u64) * 0x10000,
                size: 0x80,
                alignment: 0x40,
                writable: false,
                executable: false,
                contents: &[i as u8 + 1],
            })
            .unwrap();
        let sh = file.section_header(index).unwrap();
        let mut first = [0u8; 1];
        file.get_raw_bytes_at_offset(sh.file_offset, &mut first).unwrap();
        assert_eq!(first[0], i as u8 + 1);
        assert_invariants(&file);
    }
    assert_eq!(
        file.header().unwrap().section_header_table_entry_count,
        9
    );
    assert_eq!(
        file.header().unwrap().program_header_table_entry_count,
        6
    );
}
