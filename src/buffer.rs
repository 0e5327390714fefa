//! Little-endian packing between byte buffers and register dwords.

pub fn set_u16(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn set_u32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn set_u64(buffer: &mut [u8], offset: usize, value: u64) {
    buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn get_u32(buffer: &[u8], offset: usize) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buffer[offset..offset + 4]);
    u32::from_le_bytes(arr)
}

pub fn get_u64(buffer: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buffer[offset..offset + 8]);
    u64::from_le_bytes(arr)
}

/// Splits a byte buffer into dwords; a short tail is zero padded.
pub fn to_dwords(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut arr = [0u8; 4];
            arr[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(arr)
        })
        .collect()
}

pub fn from_dwords(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn align(value: usize, align: usize) -> usize {
    ((value + align - 1) / align) * align
}
