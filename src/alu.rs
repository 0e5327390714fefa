//! Arithmetic, compare and bit-scan helpers shared by the scalar and vector ALUs.

use crate::bit::{mask, sign_extend};
use num_traits::ops::mul_add::MulAdd;
use std::num::FpCategory;

#[inline(always)]
pub fn add_i32(a: i32, b: i32) -> (i32, bool) {
    let c = (a as i64) + (b as i64);
    (c as i32, (c > (i32::MAX as i64)) || (c < (i32::MIN as i64)))
}

#[inline(always)]
pub fn add_u32(a: u32, b: u32, c: u32) -> (u32, bool) {
    let d = (a as u64) + (b as u64) + (c as u64);
    (d as u32, d > (u32::MAX as u64))
}

#[inline(always)]
pub fn sub_i32(a: i32, b: i32) -> (i32, bool) {
    let c = (a as i64) - (b as i64);
    (c as i32, (c > (i32::MAX as i64)) || (c < (i32::MIN as i64)))
}

/// `a - b - c` with the borrow out.
#[inline(always)]
pub fn sub_u32(a: u32, b: u32, c: u32) -> (u32, bool) {
    let d = (a as i64) - (b as i64) - (c as i64);
    (d as u32, d < 0)
}

#[inline(always)]
pub fn mul_hi_u32(a: u32, b: u32) -> u32 {
    (((a as u64) * (b as u64)) >> 32) as u32
}

#[inline(always)]
pub fn mul_hi_i32(a: i32, b: i32) -> i32 {
    (((a as i64) * (b as i64)) >> 32) as i32
}

#[inline(always)]
pub fn fma<T: MulAdd<Output = T>>(a: T, b: T, c: T) -> T {
    a.mul_add(b, c)
}

/// Applies VOP3 input modifiers of source `idx`: abs first, then negate.
pub fn abs_neg<T: num::Float>(value: T, abs: u8, neg: u8, idx: usize) -> T {
    let mut result = value;
    if ((abs >> idx) & 1) != 0 {
        result = result.abs();
    }
    if ((neg >> idx) & 1) != 0 {
        result = -result;
    }
    result
}

#[inline(always)]
pub fn u32_to_f32(value: u32) -> f32 {
    f32::from_bits(value)
}

#[inline(always)]
pub fn f32_to_u32(value: f32) -> u32 {
    value.to_bits()
}

#[inline(always)]
pub fn u64_to_f64(value: u64) -> f64 {
    f64::from_bits(value)
}

#[inline(always)]
pub fn f64_to_u64(value: f64) -> u64 {
    value.to_bits()
}

/// Integer compare predicates.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OP8 {
    F,
    LT,
    EQ,
    LE,
    GT,
    LG,
    GE,
    TRU,
}

impl OP8 {
    pub fn parse(name: &str) -> Option<OP8> {
        Some(match name {
            "f" => OP8::F,
            "lt" => OP8::LT,
            "eq" => OP8::EQ,
            "le" => OP8::LE,
            "gt" => OP8::GT,
            "lg" | "ne" => OP8::LG,
            "ge" => OP8::GE,
            "t" | "tru" => OP8::TRU,
            _ => return None,
        })
    }
}

/// Float compare predicates, including the unordered forms.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OP16 {
    F,
    LT,
    EQ,
    LE,
    GT,
    LG,
    GE,
    O,
    U,
    NGE,
    NLG,
    NGT,
    NLE,
    NEQ,
    NLT,
    TRU,
}

impl OP16 {
    pub fn parse(name: &str) -> Option<OP16> {
        Some(match name {
            "f" => OP16::F,
            "lt" => OP16::LT,
            "eq" => OP16::EQ,
            "le" => OP16::LE,
            "gt" => OP16::GT,
            "lg" => OP16::LG,
            "ge" => OP16::GE,
            "o" => OP16::O,
            "u" => OP16::U,
            "nge" => OP16::NGE,
            "nlg" => OP16::NLG,
            "ngt" => OP16::NGT,
            "nle" => OP16::NLE,
            "neq" => OP16::NEQ,
            "nlt" => OP16::NLT,
            "tru" => OP16::TRU,
            _ => return None,
        })
    }
}

pub fn cmp_int<T: PartialOrd>(a: T, b: T, op: OP8) -> bool {
    match op {
        OP8::F => false,
        OP8::LT => a < b,
        OP8::EQ => a == b,
        OP8::LE => a <= b,
        OP8::GT => a > b,
        OP8::LG => a != b,
        OP8::GE => a >= b,
        OP8::TRU => true,
    }
}

/// Ordered predicates are false on NaN; their `N` forms are the exact negation.
#[allow(clippy::neg_cmp_op_on_partial_ord)]
pub fn cmp_float<T: num::Float>(a: T, b: T, op: OP16) -> bool {
    match op {
        OP16::F => false,
        OP16::LT => a < b,
        OP16::EQ => a == b,
        OP16::LE => a <= b,
        OP16::GT => a > b,
        OP16::LG => a < b || a > b,
        OP16::GE => a >= b,
        OP16::TRU => true,
        OP16::NLT => !(a < b),
        OP16::NEQ => !(a == b),
        OP16::NLE => !(a <= b),
        OP16::NGT => !(a > b),
        OP16::NLG => !(a < b || a > b),
        OP16::NGE => !(a >= b),
        OP16::O => !a.is_nan() && !b.is_nan(),
        OP16::U => a.is_nan() || b.is_nan(),
    }
}

/// `V_CMP_CLASS` test of `a` against a 10-bit class mask.
///
/// Bit 0 signaling NaN, 1 quiet NaN, 2..5 negative inf/normal/denormal/zero,
/// 6..9 positive zero/denormal/normal/inf.
pub fn cmp_class<T: num::Float>(a: T, quiet_nan: bool, mask: u32) -> bool {
    let negative = a.is_sign_negative();
    let bit = match a.classify() {
        FpCategory::Nan => {
            if quiet_nan {
                1
            } else {
                0
            }
        }
        FpCategory::Infinite => {
            if negative {
                2
            } else {
                9
            }
        }
        FpCategory::Normal => {
            if negative {
                3
            } else {
                8
            }
        }
        FpCategory::Subnormal => {
            if negative {
                4
            } else {
                7
            }
        }
        FpCategory::Zero => {
            if negative {
                5
            } else {
                6
            }
        }
    };
    (mask >> bit) & 1 != 0
}

pub fn is_quiet_nan_f32(value: u32) -> bool {
    (value >> 22) & 1 != 0
}

pub fn is_quiet_nan_f64(value: u64) -> bool {
    (value >> 51) & 1 != 0
}

/// Index of the lowest set bit, or -1.
pub fn find_first_one(value: u64) -> i32 {
    if value == 0 {
        -1
    } else {
        value.trailing_zeros() as i32
    }
}

/// Index from the MSB of the first set bit of a `bits`-wide value, or -1.
pub fn find_last_one(value: u64, bits: u32) -> i32 {
    if value == 0 {
        -1
    } else {
        (value.leading_zeros() - (64 - bits)) as i32
    }
}

/// Index from the MSB of the first bit that differs from the sign bit, or -1.
pub fn find_last_signed(value: u64, bits: u32) -> i32 {
    let signed = sign_extend(value, bits as usize);
    if signed == 0 || signed == -1 {
        return -1;
    }
    let flipped = if signed < 0 { !value } else { value } & mask(bits as usize);
    find_last_one(flipped, bits)
}

/// Bit-field extract with the S_BFE operand layout: shift in the low bits of
/// `control`, length in bits [22:16].
pub fn bfe(value: u64, control: u32, bits: u32, signed: bool) -> u64 {
    let shift = control & (bits - 1);
    let length = (control >> 16) & 0x7F;
    extract(value, shift, length, bits, signed)
}

/// Extracts `length` bits at `shift` of a `bits`-wide value.
///
/// A zero length yields 0. A field reaching the top of the value degrades to a
/// plain right shift.
pub fn extract(value: u64, shift: u32, length: u32, bits: u32, signed: bool) -> u64 {
    let width_mask = mask(bits as usize);
    if length == 0 {
        return 0;
    }
    let value = value & width_mask;
    if shift + length < bits {
        let field = (value >> shift) & mask(length as usize);
        if signed {
            (sign_extend(field, length as usize) as u64) & width_mask
        } else {
            field
        }
    } else if signed {
        ((sign_extend(value, bits as usize) >> shift) as u64) & width_mask
    } else {
        value >> shift
    }
}

#[inline(always)]
pub fn sext24(value: u32) -> i64 {
    sign_extend(value as u64, 24)
}
