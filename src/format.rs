//! ELF64 enumerations, flag sets, and wire-format constants.
//!
//! Values copied out of the ELF64 specification and the Linux `elf.h`
//! definitions. Every enumeration keeps unrecognized raw values in an
//! `Unknown` variant so a parse/serialize round-trip is byte-identical even
//! for inputs using vendor extensions.

use bitflags::bitflags;

pub const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Canonical (unpadded) on-disk sizes.
pub const HEADER_SIZE: usize = 64;
pub const PROGRAM_HEADER_ENTRY_SIZE: usize = 56;
pub const SECTION_HEADER_ENTRY_SIZE: usize = 64;
pub const DYNAMIC_ENTRY_SIZE: usize = 16;
pub const SYMBOL_ENTRY_SIZE: usize = 24;
pub const RELOCATION_ENTRY_SIZE: usize = 16;
pub const RELOCATION_ADDEND_ENTRY_SIZE: usize = 24;

/// Alignment applied to the section header table when the instrumentation
/// engine moves it. The format mandates nothing; 16 is safe for every field.
pub const SECTION_HEADER_TABLE_ALIGNMENT: u64 = 16;

/// ELF class (`e_ident[EI_CLASS]`). Only `Elf64` is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
    Unknown(u8),
}

impl Class {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => Class::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Class::Elf32 => 1,
            Class::Elf64 => 2,
            Class::Unknown(raw) => raw,
        }
    }
}

/// Data encoding (`e_ident[EI_DATA]`). Only little-endian is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    LittleEndian,
    BigEndian,
    Unknown(u8),
}

impl Encoding {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Encoding::LittleEndian,
            2 => Encoding::BigEndian,
            other => Encoding::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Encoding::LittleEndian => 1,
            Encoding::BigEndian => 2,
            Encoding::Unknown(raw) => raw,
        }
    }
}

/// Target OS/ABI (`e_ident[EI_OSABI]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAbi {
    SystemV,
    HpUx,
    NetBsd,
    Linux,
    Hurd,
    Solaris,
    Aix,
    Irix,
    FreeBsd,
    Tru64,
    Modesto,
    OpenBsd,
    ArmEabi,
    Arm,
    Standalone,
    Unknown(u8),
}

impl TargetAbi {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TargetAbi::SystemV,
            1 => TargetAbi::HpUx,
            2 => TargetAbi::NetBsd,
            3 => TargetAbi::Linux,
            4 => TargetAbi::Hurd,
            6 => TargetAbi::Solaris,
            7 => TargetAbi::Aix,
            8 => TargetAbi::Irix,
            9 => TargetAbi::FreeBsd,
            10 => TargetAbi::Tru64,
            11 => TargetAbi::Modesto,
            12 => TargetAbi::OpenBsd,
            64 => TargetAbi::ArmEabi,
            97 => TargetAbi::Arm,
            255 => TargetAbi::Standalone,
            other => TargetAbi::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            TargetAbi::SystemV => 0,
            TargetAbi::HpUx => 1,
            TargetAbi::NetBsd => 2,
            TargetAbi::Linux => 3,
            TargetAbi::Hurd => 4,
            TargetAbi::Solaris => 6,
            TargetAbi::Aix => 7,
            TargetAbi::Irix => 8,
            TargetAbi::FreeBsd => 9,
            TargetAbi::Tru64 => 10,
            TargetAbi::Modesto => 11,
            TargetAbi::OpenBsd => 12,
            TargetAbi::ArmEabi => 64,
            TargetAbi::Arm => 97,
            TargetAbi::Standalone => 255,
            TargetAbi::Unknown(raw) => raw,
        }
    }
}

/// Object file type (`e_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFileType {
    None,
    Relocatable,
    Executable,
    SharedObject,
    Core,
    Unknown(u16),
}

impl ObjectFileType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => ObjectFileType::None,
            1 => ObjectFileType::Relocatable,
            2 => ObjectFileType::Executable,
            3 => ObjectFileType::SharedObject,
            4 => ObjectFileType::Core,
            other => ObjectFileType::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            ObjectFileType::None => 0,
            ObjectFileType::Relocatable => 1,
            ObjectFileType::Executable => 2,
            ObjectFileType::SharedObject => 3,
            ObjectFileType::Core => 4,
            ObjectFileType::Unknown(raw) => raw,
        }
    }
}

/// Target machine architecture (`e_machine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    None,
    We32100,
    Sparc,
    I386,
    M68K,
    M88K,
    I860,
    Mips,
    PowerPc,
    PowerPc64,
    S390,
    Arm,
    SuperH,
    Ia64,
    X86_64,
    AArch64,
    RiscV,
    Bpf,
    Unknown(u16),
}

impl Machine {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Machine::None,
            1 => Machine::We32100,
            2 => Machine::Sparc,
            3 => Machine::I386,
            4 => Machine::M68K,
            5 => Machine::M88K,
            7 => Machine::I860,
            8 => Machine::Mips,
            20 => Machine::PowerPc,
            21 => Machine::PowerPc64,
            22 => Machine::S390,
            40 => Machine::Arm,
            42 => Machine::SuperH,
            50 => Machine::Ia64,
            62 => Machine::X86_64,
            183 => Machine::AArch64,
            243 => Machine::RiscV,
            247 => Machine::Bpf,
            other => Machine::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            Machine::None => 0,
            Machine::We32100 => 1,
            Machine::Sparc => 2,
            Machine::I386 => 3,
            Machine::M68K => 4,
            Machine::M88K => 5,
            Machine::I860 => 7,
            Machine::Mips => 8,
            Machine::PowerPc => 20,
            Machine::PowerPc64 => 21,
            Machine::S390 => 22,
            Machine::Arm => 40,
            Machine::SuperH => 42,
            Machine::Ia64 => 50,
            Machine::X86_64 => 62,
            Machine::AArch64 => 183,
            Machine::RiscV => 243,
            Machine::Bpf => 247,
            Machine::Unknown(raw) => raw,
        }
    }
}

/// Section type (`sh_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    Null,
    ProgBits,
    SymbolTable,
    StringTable,
    RelocationAddend,
    Hash,
    Dynamic,
    Note,
    NoBits,
    Relocation,
    ShLib,
    DynamicSymbols,
    InitArray,
    FiniArray,
    PreInitArray,
    Group,
    SymbolTableIndexes,
    GnuHash,
    GnuVersionDefinition,
    GnuVersionNeeds,
    GnuVersionSymbols,
    Unknown(u32),
}

impl SectionType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => SectionType::Null,
            1 => SectionType::ProgBits,
            2 => SectionType::SymbolTable,
            3 => SectionType::StringTable,
            4 => SectionType::RelocationAddend,
            5 => SectionType::Hash,
            6 => SectionType::Dynamic,
            7 => SectionType::Note,
            8 => SectionType::NoBits,
            9 => SectionType::Relocation,
            10 => SectionType::ShLib,
            11 => SectionType::DynamicSymbols,
            14 => SectionType::InitArray,
            15 => SectionType::FiniArray,
            16 => SectionType::PreInitArray,
            17 => SectionType::Group,
            18 => SectionType::SymbolTableIndexes,
            0x6ffffff6 => SectionType::GnuHash,
            0x6ffffffd => SectionType::GnuVersionDefinition,
            0x6ffffffe => SectionType::GnuVersionNeeds,
            0x6fffffff => SectionType::GnuVersionSymbols,
            other => SectionType::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            SectionType::Null => 0,
            SectionType::ProgBits => 1,
            SectionType::SymbolTable => 2,
            SectionType::StringTable => 3,
            SectionType::RelocationAddend => 4,
            SectionType::Hash => 5,
            SectionType::Dynamic => 6,
            SectionType::Note => 7,
            SectionType::NoBits => 8,
            SectionType::Relocation => 9,
            SectionType::ShLib => 10,
            SectionType::DynamicSymbols => 11,
            SectionType::InitArray => 14,
            SectionType::FiniArray => 15,
            SectionType::PreInitArray => 16,
            SectionType::Group => 17,
            SectionType::SymbolTableIndexes => 18,
            SectionType::GnuHash => 0x6ffffff6,
            SectionType::GnuVersionDefinition => 0x6ffffffd,
            SectionType::GnuVersionNeeds => 0x6ffffffe,
            SectionType::GnuVersionSymbols => 0x6fffffff,
            SectionType::Unknown(raw) => raw,
        }
    }
}

bitflags! {
    /// Section flags (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        const WRITABLE = 0x1;
        const ALLOC = 0x2;
        const EXECUTABLE = 0x4;
        const MERGE = 0x10;
        const STRINGS = 0x20;
        const INFO_LINK = 0x40;
        const LINK_ORDER = 0x80;
        const OS_NONCONFORMING = 0x100;
        const GROUP = 0x200;
        const TLS = 0x400;
        const COMPRESSED = 0x800;
        const GNU_RETAIN = 0x20_0000;
    }
}

/// Segment type (`p_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Null,
    Load,
    Dynamic,
    Interpreter,
    Note,
    ShLib,
    ProgramHeaderTable,
    Tls,
    GnuEhFrame,
    GnuStack,
    GnuRelro,
    GnuProperty,
    Unknown(u32),
}

impl SegmentType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => SegmentType::Null,
            1 => SegmentType::Load,
            2 => SegmentType::Dynamic,
            3 => SegmentType::Interpreter,
            4 => SegmentType::Note,
            5 => SegmentType::ShLib,
            6 => SegmentType::ProgramHeaderTable,
            7 => SegmentType::Tls,
            0x6474e550 => SegmentType::GnuEhFrame,
            0x6474e551 => SegmentType::GnuStack,
            0x6474e552 => SegmentType::GnuRelro,
            0x6474e553 => SegmentType::GnuProperty,
            other => SegmentType::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            SegmentType::Null => 0,
            SegmentType::Load => 1,
            SegmentType::Dynamic => 2,
            SegmentType::Interpreter => 3,
            SegmentType::Note => 4,
            SegmentType::ShLib => 5,
            SegmentType::ProgramHeaderTable => 6,
            SegmentType::Tls => 7,
            SegmentType::GnuEhFrame => 0x6474e550,
            SegmentType::GnuStack => 0x6474e551,
            SegmentType::GnuRelro => 0x6474e552,
            SegmentType::GnuProperty => 0x6474e553,
            SegmentType::Unknown(raw) => raw,
        }
    }
}

bitflags! {
    /// Segment flags (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTABLE = 1;
        const WRITABLE = 2;
        const READABLE = 4;
    }
}

/// Symbol binding, the high nibble of `st_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBind {
    Local,
    Global,
    Weak,
    Unknown(u8),
}

impl SymbolBind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SymbolBind::Local,
            1 => SymbolBind::Global,
            2 => SymbolBind::Weak,
            other => SymbolBind::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            SymbolBind::Local => 0,
            SymbolBind::Global => 1,
            SymbolBind::Weak => 2,
            SymbolBind::Unknown(raw) => raw,
        }
    }
}

/// Symbol type, the low nibble of `st_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    None,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    Unknown(u8),
}

impl SymbolType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SymbolType::None,
            1 => SymbolType::Object,
            2 => SymbolType::Func,
            3 => SymbolType::Section,
            4 => SymbolType::File,
            5 => SymbolType::Common,
            6 => SymbolType::Tls,
            other => SymbolType::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            SymbolType::None => 0,
            SymbolType::Object => 1,
            SymbolType::Func => 2,
            SymbolType::Section => 3,
            SymbolType::File => 4,
            SymbolType::Common => 5,
            SymbolType::Tls => 6,
            SymbolType::Unknown(raw) => raw,
        }
    }
}

/// Packs bind and type nibbles into an `st_info` byte.
pub fn symbol_info(bind: SymbolBind, typ: SymbolType) -> u8 {
    (bind.to_raw() << 4) | (typ.to_raw() & 0xf)
}

/// Symbol visibility (`st_other`, low two bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolVisibility {
    Default,
    Internal,
    Hidden,
    Protected,
}

impl SymbolVisibility {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x3 {
            0 => SymbolVisibility::Default,
            1 => SymbolVisibility::Internal,
            2 => SymbolVisibility::Hidden,
            _ => SymbolVisibility::Protected,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            SymbolVisibility::Default => 0,
            SymbolVisibility::Internal => 1,
            SymbolVisibility::Hidden => 2,
            SymbolVisibility::Protected => 3,
        }
    }
}

/// Dynamic table entry tag (`d_tag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicTag {
    Null,
    Needed,
    PltRelSize,
    PltGot,
    Hash,
    StrTab,
    SymTab,
    Rela,
    RelaSize,
    RelaEnt,
    StrSize,
    SymEnt,
    Init,
    Fini,
    SoName,
    RPath,
    Symbolic,
    Rel,
    RelSize,
    RelEnt,
    PltRel,
    Debug,
    TextRel,
    JmpRel,
    BindNow,
    InitArray,
    FiniArray,
    InitArraySize,
    FiniArraySize,
    RunPath,
    Flags,
    GnuHash,
    VerSym,
    RelaCount,
    RelCount,
    Flags1,
    VerDef,
    VerDefNum,
    VerNeed,
    VerNeedNum,
    Unknown(i64),
}

impl DynamicTag {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => DynamicTag::Null,
            1 => DynamicTag::Needed,
            2 => DynamicTag::PltRelSize,
            3 => DynamicTag::PltGot,
            4 => DynamicTag::Hash,
            5 => DynamicTag::StrTab,
            6 => DynamicTag::SymTab,
            7 => DynamicTag::Rela,
            8 => DynamicTag::RelaSize,
            9 => DynamicTag::RelaEnt,
            10 => DynamicTag::StrSize,
            11 => DynamicTag::SymEnt,
            12 => DynamicTag::Init,
            13 => DynamicTag::Fini,
            14 => DynamicTag::SoName,
            15 => DynamicTag::RPath,
            16 => DynamicTag::Symbolic,
            17 => DynamicTag::Rel,
            18 => DynamicTag::RelSize,
            19 => DynamicTag::RelEnt,
            20 => DynamicTag::PltRel,
            21 => DynamicTag::Debug,
            22 => DynamicTag::TextRel,
            23 => DynamicTag::JmpRel,
            24 => DynamicTag::BindNow,
            25 => DynamicTag::InitArray,
            26 => DynamicTag::FiniArray,
            27 => DynamicTag::InitArraySize,
            28 => DynamicTag::FiniArraySize,
            29 => DynamicTag::RunPath,
            30 => DynamicTag::Flags,
            0x6ffffef5 => DynamicTag::GnuHash,
            0x6ffffff0 => DynamicTag::VerSym,
            0x6ffffff9 => DynamicTag::RelaCount,
            0x6ffffffa => DynamicTag::RelCount,
            0x6ffffffb => DynamicTag::Flags1,
            0x6ffffffc => DynamicTag::VerDef,
            0x6ffffffd => DynamicTag::VerDefNum,
            0x6ffffffe => DynamicTag::VerNeed,
            0x6fffffff => DynamicTag::VerNeedNum,
            other => DynamicTag::Unknown(other),
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            DynamicTag::Null => 0,
            DynamicTag::Needed => 1,
            DynamicTag::PltRelSize => 2,
            DynamicTag::PltGot => 3,
            DynamicTag::Hash => 4,
            DynamicTag::StrTab => 5,
            DynamicTag::SymTab => 6,
            DynamicTag::Rela => 7,
            DynamicTag::RelaSize => 8,
            DynamicTag::RelaEnt => 9,
            DynamicTag::StrSize => 10,
            DynamicTag::SymEnt => 11,
            DynamicTag::Init => 12,
            DynamicTag::Fini => 13,
            DynamicTag::SoName => 14,
            DynamicTag::RPath => 15,
            DynamicTag::Symbolic => 16,
            DynamicTag::Rel => 17,
            DynamicTag::RelSize => 18,
            DynamicTag::RelEnt => 19,
            DynamicTag::PltRel => 20,
            DynamicTag::Debug => 21,
            DynamicTag::TextRel => 22,
            DynamicTag::JmpRel => 23,
            DynamicTag::BindNow => 24,
            DynamicTag::InitArray => 25,
            DynamicTag::FiniArray => 26,
            DynamicTag::InitArraySize => 27,
            DynamicTag::FiniArraySize => 28,
            DynamicTag::RunPath => 29,
            DynamicTag::Flags => 30,
            DynamicTag::GnuHash => 0x6ffffef5,
            DynamicTag::VerSym => 0x6ffffff0,
            DynamicTag::RelaCount => 0x6ffffff9,
            DynamicTag::RelCount => 0x6ffffffa,
            DynamicTag::Flags1 => 0x6ffffffb,
            DynamicTag::VerDef => 0x6ffffffc,
            DynamicTag::VerDefNum => 0x6ffffffd,
            DynamicTag::VerNeed => 0x6ffffffe,
            DynamicTag::VerNeedNum => 0x6fffffff,
            DynamicTag::Unknown(raw) => raw,
        }
    }

    /// Tags whose value is a file location that must be remapped when the
    /// section it points into moves.
    pub fn is_section_reference(self) -> bool {
        matches!(
            self,
            DynamicTag::GnuHash
                | DynamicTag::StrTab
                | DynamicTag::SymTab
                | DynamicTag::JmpRel
                | DynamicTag::Rel
                | DynamicTag::Rela
                | DynamicTag::VerNeed
                | DynamicTag::VerSym
                | DynamicTag::VerDef
        )
    }
}
