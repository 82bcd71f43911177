//! Builds small PE images in memory.

#![allow(dead_code)]

pub const PE32: u16 = 0x10B;
pub const PE32_PLUS: u16 = 0x20B;

/// File offset of the NT headers in every built image.
pub const NT_OFFSET: usize = 0x40;
/// Size of the header area; the debug directory of flat images starts here.
pub const HEADERS_SIZE: usize = 0x200;
/// File offset of the first record in flat images.
pub const RECORDS_OFFSET: usize = 0x300;
pub const RECORD_STRIDE: usize = 0x100;

pub const GUID_BYTES: [u8; 16] = [
    0x78, 0x56, 0x34, 0x12, 0xBC, 0x9A, 0xF0, 0xDE, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88,
];
pub const GUID_STRING: &str = "123456789ABCDEF01122334455667788";

#[derive(Clone, Copy, Debug, Default)]
pub struct Section {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
}

/// A CodeView record: `RSDS`, GUID, age and a NUL-terminated name.
pub fn record(guid: &[u8; 16], age: u32, name: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RSDS");
    bytes.extend_from_slice(guid);
    bytes.extend_from_slice(&age.to_le_bytes());
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);
    bytes
}

/// A 28-byte `IMAGE_DEBUG_DIRECTORY` entry of type CodeView.
pub fn debug_entry(size: u32, address_of_raw_data: u32, pointer_to_raw_data: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 28];
    bytes[12..16].copy_from_slice(&2u32.to_le_bytes());
    bytes[16..20].copy_from_slice(&size.to_le_bytes());
    bytes[20..24].copy_from_slice(&address_of_raw_data.to_le_bytes());
    bytes[24..28].copy_from_slice(&pointer_to_raw_data.to_le_bytes());
    bytes
}

/// DOS header, NT headers with 16 data directories, and the section table, padded to
/// `HEADERS_SIZE`.
pub fn headers(magic: u16, debug: (u32, u32), sections: &[Section]) -> Vec<u8> {
    let mut data = vec![0u8; NT_OFFSET];
    data[0..2].copy_from_slice(b"MZ");
    data[0x3C..0x40].copy_from_slice(&(NT_OFFSET as u32).to_le_bytes());

    let (count_at, optional_size) = if magic == PE32_PLUS {
        (108, 112 + 16 * 8)
    } else {
        (92, 96 + 16 * 8)
    };

    data.extend_from_slice(b"PE\0\0");
    let mut file_header = vec![0u8; 20];
    file_header[0..2].copy_from_slice(&0x8664u16.to_le_bytes());
    file_header[2..4].copy_from_slice(&(sections.len() as u16).to_le_bytes());
    file_header[16..18].copy_from_slice(&(optional_size as u16).to_le_bytes());
    data.extend_from_slice(&file_header);

    let mut optional = vec![0u8; optional_size];
    optional[0..2].copy_from_slice(&magic.to_le_bytes());
    optional[count_at..count_at + 4].copy_from_slice(&16u32.to_le_bytes());
    let debug_at = count_at + 4 + 6 * 8;
    optional[debug_at..debug_at + 4].copy_from_slice(&debug.0.to_le_bytes());
    optional[debug_at + 4..debug_at + 8].copy_from_slice(&debug.1.to_le_bytes());
    data.extend_from_slice(&optional);

    for (i, section) in sections.iter().enumerate() {
        let mut header = vec![0u8; 40];
        header[0..6].copy_from_slice(format!(".sec{}\0", i).as_bytes());
        header[8..12].copy_from_slice(&section.virtual_size.to_le_bytes());
        header[12..16].copy_from_slice(&section.virtual_address.to_le_bytes());
        header[16..20].copy_from_slice(&section.size_of_raw_data.to_le_bytes());
        header[20..24].copy_from_slice(&section.pointer_to_raw_data.to_le_bytes());
        header[36..40].copy_from_slice(&0x4000_0040u32.to_le_bytes());
        data.extend_from_slice(&header);
    }

    assert!(data.len() <= HEADERS_SIZE);
    data.resize(HEADERS_SIZE, 0);
    data
}

/// An image whose virtual addresses equal file offsets. Each record gets its own debug
/// directory entry, in order; the last record ends the file.
pub fn flat_image(magic: u16, records: &[Vec<u8>]) -> Vec<u8> {
    let directory_size = (28 * records.len()) as u32;
    let mut data = headers(magic, (HEADERS_SIZE as u32, directory_size), &[]);

    for (i, record) in records.iter().enumerate() {
        let offset = (RECORDS_OFFSET + i * RECORD_STRIDE) as u32;
        data.extend_from_slice(&debug_entry(record.len() as u32, offset, offset));
    }

    for (i, record) in records.iter().enumerate() {
        data.resize(RECORDS_OFFSET + i * RECORD_STRIDE, 0);
        data.extend_from_slice(record);
    }
    data
}

/// The default flat PE32 image: one record for `app.pdb`, age 1.
pub fn simple_image() -> Vec<u8> {
    flat_image(PE32, &[record(&GUID_BYTES, 1, "app.pdb")])
}

/// An image laid out like a linker output: the debug directory and record live in a
/// section at virtual address 0x2000, stored at file offset 0x400.
pub fn sectioned_image(record: &[u8]) -> Vec<u8> {
    let rdata = Section {
        virtual_address: 0x2000,
        virtual_size: 0x180,
        pointer_to_raw_data: 0x400,
        size_of_raw_data: 0x200,
    };
    let mut data = headers(PE32_PLUS, (0x2000, 28), &[rdata]);

    data.resize(0x400, 0);
    data.extend_from_slice(&debug_entry(record.len() as u32, 0x2040, 0x440));
    data.resize(0x440, 0);
    data.extend_from_slice(record);
    data.resize(0x600, 0);
    data
}
