use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NUM_SGPRS: usize = 102;
pub const NUM_VGPRS: usize = 256;
pub const NUM_TTMPS: usize = 16;

/// Named special registers addressable as operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Special {
    Exec,
    ExecLo,
    ExecHi,
    Vcc,
    VccLo,
    VccHi,
    FlatScratch,
    FlatScratchLo,
    FlatScratchHi,
    M0,
    Scc,
    Status,
    Mode,
    Trapsts,
    Tba,
    Tma,
    Ttmp { index: usize, words: usize },
}

impl Special {
    pub fn words(self) -> usize {
        match self {
            Special::Exec | Special::Vcc | Special::FlatScratch | Special::Tba | Special::Tma => 2,
            Special::Ttmp { words, .. } => words,
            _ => 1,
        }
    }

    const NAMES: [(&'static str, Special); 16] = [
        ("exec", Special::Exec),
        ("exec_lo", Special::ExecLo),
        ("exec_hi", Special::ExecHi),
        ("vcc", Special::Vcc),
        ("vcc_lo", Special::VccLo),
        ("vcc_hi", Special::VccHi),
        ("flat_scratch", Special::FlatScratch),
        ("flat_scratch_lo", Special::FlatScratchLo),
        ("flat_scratch_hi", Special::FlatScratchHi),
        ("m0", Special::M0),
        ("scc", Special::Scc),
        ("status", Special::Status),
        ("mode", Special::Mode),
        ("trapsts", Special::Trapsts),
        ("tba", Special::Tba),
        ("tma", Special::Tma),
    ];

    fn by_name(name: &str) -> Option<Special> {
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, special)| special)
    }

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, s)| *s == self)
            .map(|&(n, _)| n)
            .unwrap_or("ttmp")
    }
}

/// Immediate value as written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
}

const INV_2PI: f64 = 0.15915494309189535;

impl Literal {
    pub fn bits32(self) -> u32 {
        match self {
            Literal::Int(v) => v as u32,
            Literal::Float(v) => (v as f32).to_bits(),
        }
    }

    pub fn bits64(self) -> u64 {
        match self {
            Literal::Int(v) => v as u64,
            Literal::Float(v) => v.to_bits(),
        }
    }

    /// Inline constants fit in the source field and need no literal dword.
    pub fn is_inline(self) -> bool {
        match self {
            Literal::Int(v) => (-16..=64).contains(&v),
            Literal::Float(v) => {
                v == 0.0
                    || [0.5, -0.5, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0].contains(&v)
                    || (v - INV_2PI).abs() < 1e-7
            }
        }
    }
}

/// A decoded operand.
///
/// Register ranges are kept as `(index, words)` and were bounds checked when
/// the operand was parsed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Scalar { index: usize, words: usize },
    Vector { index: usize, words: usize },
    Special(Special),
    Immediate(Literal),
}

impl Operand {
    /// Width in dwords; immediates adapt to any width and report 0.
    pub fn words(&self) -> usize {
        match *self {
            Operand::Scalar { words, .. } | Operand::Vector { words, .. } => words,
            Operand::Special(special) => special.words(),
            Operand::Immediate(_) => 0,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Operand::Vector { .. })
    }

    pub fn literal(&self) -> Option<Literal> {
        match *self {
            Operand::Immediate(lit) => Some(lit),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operand::Scalar { index, words: 1 } => write!(f, "s{}", index),
            Operand::Scalar { index, words } => write!(f, "s[{}:{}]", index, index + words - 1),
            Operand::Vector { index, words: 1 } => write!(f, "v{}", index),
            Operand::Vector { index, words } => write!(f, "v[{}:{}]", index, index + words - 1),
            Operand::Special(Special::Ttmp { index, words: 1 }) => write!(f, "ttmp{}", index),
            Operand::Special(Special::Ttmp { index, words }) => {
                write!(f, "ttmp[{}:{}]", index, index + words - 1)
            }
            Operand::Special(special) => f.write_str(special.name()),
            Operand::Immediate(Literal::Int(v)) => write!(f, "{:#x}", v),
            Operand::Immediate(Literal::Float(v)) => write!(f, "{}", v),
        }
    }
}

/// Parses `N` or `[N:M]` after a register prefix, returning `(index, words)`.
fn parse_register_index(text: &str, rest: &str) -> Result<(usize, usize), DecodeError> {
    let number = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|_| DecodeError::malformed(text, "bad register index"))
    };
    if let Some(range) = rest.strip_prefix('[') {
        let range = range
            .strip_suffix(']')
            .ok_or_else(|| DecodeError::malformed(text, "unterminated register range"))?;
        let (lo, hi) = range
            .split_once(':')
            .ok_or_else(|| DecodeError::malformed(text, "register range needs `:`"))?;
        let (lo, hi) = (number(lo)?, number(hi)?);
        if hi < lo {
            return Err(DecodeError::malformed(text, "reversed register range"));
        }
        let words = (hi - lo)
            .checked_add(1)
            .ok_or_else(|| DecodeError::malformed(text, "register index out of range"))?;
        Ok((lo, words))
    } else if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
        Ok((number(rest)?, 1))
    } else {
        Err(DecodeError::malformed(text, "bad register index"))
    }
}

fn check_scalar_range(text: &str, index: usize, words: usize, limit: usize) -> Result<(), DecodeError> {
    if ![1, 2, 4, 8, 16].contains(&words) {
        return Err(DecodeError::malformed(text, "unsupported register range width"));
    }
    if index >= limit || words > limit - index {
        return Err(DecodeError::malformed(text, "register index out of range"));
    }
    let align = words.min(4);
    if index % align != 0 {
        return Err(DecodeError::malformed(text, "misaligned register range"));
    }
    Ok(())
}

fn parse_integer(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<u64>().ok()? as i64
    } else {
        return None;
    };
    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}

fn parse_float(text: &str) -> Option<f64> {
    let first = text.bytes().next()?;
    if !(first.is_ascii_digit() || first == b'-' || first == b'.') {
        return None;
    }
    if !text.contains(|c| c == '.' || c == 'e') {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Parses one operand descriptor into an [`Operand`].
///
/// This is pure: nothing but the text is consulted.
pub fn parse_operand(text: &str) -> Result<Operand, DecodeError> {
    let lowered = text.trim().to_ascii_lowercase();
    let t = lowered.as_str();
    if t.is_empty() {
        return Err(DecodeError::malformed(text, "empty operand"));
    }

    if let Some(special) = Special::by_name(t) {
        return Ok(Operand::Special(special));
    }

    if let Some(rest) = t.strip_prefix("ttmp") {
        let (index, words) = parse_register_index(text, rest)?;
        check_scalar_range(text, index, words, NUM_TTMPS)?;
        return Ok(Operand::Special(Special::Ttmp { index, words }));
    }

    if let Some(rest) = t.strip_prefix('s') {
        let (index, words) = parse_register_index(text, rest)?;
        check_scalar_range(text, index, words, NUM_SGPRS)?;
        return Ok(Operand::Scalar { index, words });
    }

    if let Some(rest) = t.strip_prefix('v') {
        let (index, words) = parse_register_index(text, rest)?;
        if !(1..=4).contains(&words) {
            return Err(DecodeError::malformed(text, "unsupported register range width"));
        }
        if index >= NUM_VGPRS || words > NUM_VGPRS - index {
            return Err(DecodeError::malformed(text, "register index out of range"));
        }
        return Ok(Operand::Vector { index, words });
    }

    if let Some(value) = parse_integer(t) {
        return Ok(Operand::Immediate(Literal::Int(value)));
    }
    if let Some(value) = parse_float(t) {
        return Ok(Operand::Immediate(Literal::Float(value)));
    }

    Err(DecodeError::malformed(text, "unrecognized operand syntax"))
}
