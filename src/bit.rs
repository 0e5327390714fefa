/// Extracts bits `from..=to` of `value`.
pub fn get_bits(value: u64, to: usize, from: usize) -> u64 {
    (value >> from) & mask(to + 1 - from)
}

/// Low `size` bits set; `size` may be 64.
pub fn mask(size: usize) -> u64 {
    if size >= 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

/// Replaces the `size`-bit window at `offset` with the low bits of `field`.
pub fn set_bits(value: u64, offset: usize, size: usize, field: u64) -> u64 {
    let window = mask(size) << offset;
    (value & !window) | ((field << offset) & window)
}

/// Sign extends the low `bits` bits of `value`.
pub fn sign_extend(value: u64, bits: usize) -> i64 {
    if bits == 0 {
        return 0;
    }
    let shift = 64 - bits.min(64);
    ((value << shift) as i64) >> shift
}

#[inline(always)]
pub fn u64_from_u32_u32(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | (lo as u64)
}
