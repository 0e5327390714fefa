//! Text program loader.
//!
//! Turns assembler text into a [`Program`]: every line is split into a
//! mnemonic and operands, validated against the catalog signature and sized.
//! Labels are collected in a first pass and resolved into SOPP/SOPK word
//! offsets in a second one, so nothing reaches execution undecoded.

use crate::error::DecodeError;
use crate::instructions::{lookup_by_mnemonic, Format, Opcode, Slot};
use crate::operand::{parse_operand, Literal, Operand};
use crate::wavefront::{hwreg, WaitCounters};
use std::collections::HashMap;
use std::fmt;

pub type Result<T> = std::result::Result<T, DecodeError>;

/// A decoded instruction with its operands in signature order.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// VOP3 `|x|` modifiers, bit `i` applies to `operands[i]`
    pub abs: u8,
    /// VOP3 `-x` modifiers, bit `i` applies to `operands[i]`
    pub neg: u8,
    /// Encoded size in bytes, literal dword included
    pub size: usize,
    pub address: u64,
}

impl Instruction {
    pub fn format(&self) -> Format {
        self.opcode.format()
    }

    pub fn has_abs(&self, idx: usize) -> bool {
        (self.abs >> idx) & 1 != 0
    }

    pub fn has_neg(&self, idx: usize) -> bool {
        (self.neg >> idx) & 1 != 0
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        for (i, op) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            let neg = if self.has_neg(i) { "-" } else { "" };
            if self.has_abs(i) {
                write!(f, "{}|{}|", neg, op)?;
            } else {
                write!(f, "{}{}", neg, op)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Arg {
    Ready(Operand),
    Label(String),
}

#[derive(Debug, Clone)]
struct Pending {
    opcode: Opcode,
    args: Vec<Arg>,
    abs: u8,
    neg: u8,
    size: usize,
}

/// An immutable, fully decoded program addressed by byte PC.
#[derive(Debug, Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    index_by_addr: HashMap<u64, usize>,
    labels: HashMap<String, u64>,
    end: u64,
}

impl Program {
    pub fn parse(source: &str) -> Result<Program> {
        // 1st pass: decode every line and assign addresses
        let mut pending: Vec<(u64, Pending, usize)> = Vec::new();
        let mut labels = HashMap::<String, u64>::new();
        let mut pc = 0u64;

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let mut line = strip_comment(raw).trim();
            if let Some((name, rest)) = split_label(line) {
                if labels.insert(name.to_string(), pc).is_some() {
                    return Err(DecodeError::malformed(name, "duplicate label").at_line(line_no));
                }
                line = rest.trim();
            }
            // assembler directives carry nothing executable
            if line.is_empty() || line.starts_with('.') {
                continue;
            }
            let inst = parse_instruction(line).map_err(|e| e.at_line(line_no))?;
            let size = inst.size as u64;
            pending.push((pc, inst, line_no));
            pc += size;
        }

        // 2nd pass: resolve branch targets
        let mut instructions = Vec::with_capacity(pending.len());
        let mut index_by_addr = HashMap::with_capacity(pending.len());
        for (address, inst, line_no) in pending {
            let inst = resolve(inst, address, &labels).map_err(|e| e.at_line(line_no))?;
            index_by_addr.insert(address, instructions.len());
            instructions.push(inst);
        }

        Ok(Program {
            instructions,
            index_by_addr,
            labels,
            end: pc,
        })
    }

    /// Instruction starting at byte address `pc`.
    pub fn fetch(&self, pc: u64) -> Option<&Instruction> {
        self.index_by_addr.get(&pc).map(|&idx| &self.instructions[idx])
    }

    pub fn label(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Total encoded size in bytes.
    pub fn size(&self) -> u64 {
        self.end
    }
}

/// Decodes a single instruction at address 0. Label operands are rejected.
pub fn decode_line(text: &str) -> Result<Instruction> {
    let inst = parse_instruction(strip_comment(text).trim())?;
    resolve(inst, 0, &HashMap::new())
}

fn strip_comment(line: &str) -> &str {
    let end = [line.find("//"), line.find(';')]
        .iter()
        .flatten()
        .copied()
        .min()
        .unwrap_or(line.len());
    &line[..end]
}

fn is_label_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    let (name, rest) = line.split_once(':')?;
    if is_label_name(name) {
        Some((name, rest))
    } else {
        None
    }
}

/// Splits on commas outside parentheses.
fn split_operands(text: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    if text.trim().is_empty() {
        return fields;
    }
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                fields.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(text[start..].trim());
    fields
}

fn parse_instruction(text: &str) -> Result<Pending> {
    let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
        Some((m, r)) => (m, r.trim()),
        None => (text, ""),
    };
    let opcode = lookup_by_mnemonic(mnemonic)?;
    let format = opcode.format();
    let slots = opcode.info().operands;

    let mut fields = if matches!(slots, [Slot::WaitCnt]) && !rest.is_empty() {
        vec![rest]
    } else {
        split_operands(rest)
    };

    if matches!(format, Format::FLAT | Format::SMEM) {
        if let Some(last) = fields.pop() {
            let mut tokens = last.split_whitespace();
            let operand = tokens.next().unwrap_or("");
            for flag in tokens {
                if !matches!(flag.to_ascii_lowercase().as_str(), "glc" | "slc" | "nv") {
                    return Err(DecodeError::malformed(flag, "unsupported cache flag"));
                }
            }
            fields.push(operand);
        }
    }

    if fields.len() != slots.len() {
        return Err(DecodeError::Arity {
            mnemonic: opcode.mnemonic().to_string(),
            expected: slots.len(),
            found: fields.len(),
        });
    }

    let mut args = Vec::with_capacity(slots.len());
    let mut abs = 0u8;
    let mut neg = 0u8;
    let mut literals: Vec<u32> = Vec::new();

    for (i, (&slot, &field)) in slots.iter().zip(fields.iter()).enumerate() {
        let arg = match slot {
            Slot::SDst(words) => {
                let op = parse_operand(field)?;
                match op {
                    Operand::Scalar { .. } | Operand::Special(_) => {}
                    _ => return Err(DecodeError::malformed(field, "expected a scalar destination")),
                }
                expect_width(&op, words, field)?;
                Arg::Ready(op)
            }
            Slot::SSrc(words) => {
                let op = parse_operand(field)?;
                if op.is_vector() {
                    return Err(DecodeError::malformed(field, "expected a scalar source"));
                }
                if words > 2 && !matches!(op, Operand::Scalar { .. }) {
                    return Err(DecodeError::malformed(field, "expected a scalar register range"));
                }
                expect_width(&op, words, field)?;
                note_literal(&op, &mut literals);
                Arg::Ready(op)
            }
            Slot::VDst(words) | Slot::VReg(words) => {
                let op = parse_operand(field)?;
                if !op.is_vector() {
                    return Err(DecodeError::malformed(field, "expected a vector register"));
                }
                expect_width(&op, words, field)?;
                Arg::Ready(op)
            }
            Slot::VSrc(words) => {
                let (text, has_abs, has_neg) = if format == Format::VOP3 {
                    strip_modifiers(field)?
                } else {
                    (field, false, false)
                };
                let op = parse_operand(text)?;
                expect_width(&op, words, field)?;
                note_literal(&op, &mut literals);
                abs |= (has_abs as u8) << i;
                neg |= (has_neg as u8) << i;
                Arg::Ready(op)
            }
            Slot::Simm16 => Arg::Ready(Operand::Immediate(Literal::Int(parse_simm16(field)?))),
            Slot::Label => match parse_operand(field) {
                Ok(Operand::Immediate(Literal::Int(v))) if (-0x8000..=0x7FFF).contains(&v) => {
                    Arg::Ready(Operand::Immediate(Literal::Int(v & 0xFFFF)))
                }
                _ if is_label_name(field) => Arg::Label(field.to_string()),
                _ => return Err(DecodeError::malformed(field, "expected a label or word offset")),
            },
            Slot::HwReg => Arg::Ready(Operand::Immediate(Literal::Int(parse_hwreg(field)? as i64))),
            Slot::WaitCnt => Arg::Ready(Operand::Immediate(Literal::Int(parse_waitcnt(field)? as i64))),
            Slot::Literal32 => {
                let op = parse_operand(field)?;
                match op.literal() {
                    Some(lit) => literals.push(lit.bits32()),
                    None => return Err(DecodeError::malformed(field, "expected a 32-bit literal")),
                }
                Arg::Ready(op)
            }
            Slot::Offset => match parse_operand(field)? {
                op @ Operand::Scalar { words: 1, .. } => Arg::Ready(op),
                op @ Operand::Immediate(Literal::Int(v)) if (0..1 << 20).contains(&v) => Arg::Ready(op),
                _ => return Err(DecodeError::malformed(field, "expected an sgpr or 20-bit offset")),
            },
        };
        args.push(arg);
    }

    literals.sort_unstable();
    literals.dedup();
    if literals.len() > 1 {
        return Err(DecodeError::malformed(text, "more than one distinct literal"));
    }
    if format == Format::VOP3 && !literals.is_empty() {
        return Err(DecodeError::malformed(text, "VOP3 encodings cannot carry a literal"));
    }

    Ok(Pending {
        opcode,
        args,
        abs,
        neg,
        size: format.base_size() + 4 * literals.len(),
    })
}

fn expect_width(op: &Operand, words: u8, text: &str) -> Result<()> {
    if op.literal().is_some() || op.words() == words as usize {
        Ok(())
    } else {
        Err(DecodeError::malformed(
            text,
            format!("expected a {}-dword operand, found {}", words, op.words()),
        ))
    }
}

fn note_literal(op: &Operand, literals: &mut Vec<u32>) {
    if let Some(lit) = op.literal() {
        if !lit.is_inline() {
            literals.push(lit.bits32());
        }
    }
}

/// Peels `-`, `neg()`, `|..|` and `abs()` off a VOP3 source.
fn strip_modifiers(text: &str) -> Result<(&str, bool, bool)> {
    let mut t = text.trim();
    let mut neg = false;
    let mut abs = false;

    if let Some(inner) = t.strip_prefix("neg(").and_then(|r| r.strip_suffix(')')) {
        neg = true;
        t = inner.trim();
    } else if let Some(rest) = t.strip_prefix('-') {
        let numeric = rest.starts_with(|c: char| c.is_ascii_digit() || c == '.');
        if !numeric {
            neg = true;
            t = rest.trim();
        }
    }

    if let Some(inner) = t.strip_prefix('|').and_then(|r| r.strip_suffix('|')) {
        abs = true;
        t = inner.trim();
    } else if let Some(inner) = t.strip_prefix("abs(").and_then(|r| r.strip_suffix(')')) {
        abs = true;
        t = inner.trim();
    }

    if t.is_empty() {
        return Err(DecodeError::malformed(text, "empty operand"));
    }
    Ok((t, abs, neg))
}

fn parse_int(text: &str) -> Result<i64> {
    match parse_operand(text)? {
        Operand::Immediate(Literal::Int(v)) => Ok(v),
        _ => Err(DecodeError::malformed(text, "expected an integer")),
    }
}

/// Splits `name(args)` into `(name, args)`.
fn call_form(text: &str) -> Option<(String, &str)> {
    let (name, rest) = text.split_once('(')?;
    let args = rest.trim_end().strip_suffix(')')?;
    Some((name.trim().to_ascii_lowercase(), args))
}

fn parse_simm16(text: &str) -> Result<i64> {
    if let Some((name, args)) = call_form(text) {
        if name == "sendmsg" {
            return parse_sendmsg(text, args);
        }
        return Err(DecodeError::malformed(text, "unknown immediate form"));
    }
    let value = parse_int(text)?;
    if !(-0x8000..=0xFFFF).contains(&value) {
        return Err(DecodeError::malformed(text, "immediate does not fit in 16 bits"));
    }
    Ok(value & 0xFFFF)
}

fn parse_sendmsg(text: &str, args: &str) -> Result<i64> {
    let parts = split_operands(args);
    let id = match parts.first().map(|s| s.to_ascii_uppercase()) {
        Some(name) => match name.as_str() {
            "MSG_INTERRUPT" => 1,
            "MSG_GS" => 2,
            "MSG_GS_DONE" => 3,
            "MSG_SYSMSG" => 15,
            _ => parse_int(&name)?,
        },
        None => return Err(DecodeError::malformed(text, "sendmsg needs a message id")),
    };
    let op = match parts.get(1).map(|s| s.to_ascii_uppercase()) {
        Some(name) => match name.as_str() {
            "GS_OP_NOP" => 0,
            "GS_OP_CUT" => 1,
            "GS_OP_EMIT" => 2,
            "GS_OP_EMIT_CUT" => 3,
            _ => parse_int(&name)?,
        },
        None => 0,
    };
    let stream = match parts.get(2) {
        Some(s) => parse_int(s)?,
        None => 0,
    };
    if parts.len() > 3 || !(0..16).contains(&id) || !(0..8).contains(&op) || !(0..4).contains(&stream) {
        return Err(DecodeError::malformed(text, "bad sendmsg operands"));
    }
    Ok(id | (op << 4) | (stream << 8))
}

fn parse_hwreg(text: &str) -> Result<u32> {
    let args = match call_form(text) {
        Some((name, args)) if name == "hwreg" => args,
        Some(_) => return Err(DecodeError::malformed(text, "expected hwreg(...)")),
        None => {
            let value = parse_int(text)?;
            if !(0..=0xFFFF).contains(&value) {
                return Err(DecodeError::malformed(text, "hwreg immediate does not fit in 16 bits"));
            }
            return Ok(value as u32);
        }
    };
    let parts = split_operands(args);
    let id = match parts.first().map(|s| s.to_ascii_uppercase()) {
        Some(name) => match name.as_str() {
            "HW_REG_MODE" => hwreg::MODE,
            "HW_REG_STATUS" => hwreg::STATUS,
            "HW_REG_TRAPSTS" => hwreg::TRAPSTS,
            "HW_REG_HW_ID" => hwreg::HW_ID,
            "HW_REG_GPR_ALLOC" => hwreg::GPR_ALLOC,
            "HW_REG_LDS_ALLOC" => hwreg::LDS_ALLOC,
            "HW_REG_IB_STS" => hwreg::IB_STS,
            _ => parse_int(&name)? as u32,
        },
        None => return Err(DecodeError::malformed(text, "hwreg needs a register")),
    };
    let (offset, size) = match parts.len() {
        1 => (0, 32),
        3 => (parse_int(parts[1])?, parse_int(parts[2])?),
        _ => return Err(DecodeError::malformed(text, "hwreg takes a register, offset and size")),
    };
    if id > 0x3F || !(0..32).contains(&offset) || !(1..=32).contains(&size) {
        return Err(DecodeError::malformed(text, "hwreg field out of range"));
    }
    Ok(hwreg::encode(id, offset as usize, size as usize))
}

fn parse_waitcnt(text: &str) -> Result<u32> {
    if !text.contains('(') {
        let value = parse_int(text)?;
        if !(0..=0xFFFF).contains(&value) {
            return Err(DecodeError::malformed(text, "waitcnt immediate does not fit in 16 bits"));
        }
        return Ok(value as u32);
    }
    let mut counters = WaitCounters::MAX;
    let tokens = text
        .split(|c: char| c == '&' || c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty());
    for token in tokens {
        let (name, args) =
            call_form(token).ok_or_else(|| DecodeError::malformed(token, "expected counter(N)"))?;
        let value = parse_int(args)?;
        let (slot, max) = match name.as_str() {
            "vmcnt" => (&mut counters.vm, WaitCounters::MAX.vm),
            "expcnt" => (&mut counters.exp, WaitCounters::MAX.exp),
            "lgkmcnt" => (&mut counters.lgkm, WaitCounters::MAX.lgkm),
            _ => return Err(DecodeError::malformed(token, "unknown counter")),
        };
        if !(0..=max as i64).contains(&value) {
            return Err(DecodeError::malformed(token, "counter value out of range"));
        }
        *slot = value as u32;
    }
    Ok(counters.encode())
}

fn resolve(inst: Pending, address: u64, labels: &HashMap<String, u64>) -> Result<Instruction> {
    let mut operands = Vec::with_capacity(inst.args.len());
    for arg in inst.args {
        let op = match arg {
            Arg::Ready(op) => op,
            Arg::Label(name) => {
                let target = *labels
                    .get(&name)
                    .ok_or_else(|| DecodeError::malformed(&name, "undefined label"))?;
                let delta = target as i64 - (address as i64 + 4);
                let offset = delta / 4;
                if delta % 4 != 0 || !(-0x8000..=0x7FFF).contains(&offset) {
                    return Err(DecodeError::malformed(&name, "branch target out of range"));
                }
                Operand::Immediate(Literal::Int(offset & 0xFFFF))
            }
        };
        operands.push(op);
    }
    Ok(Instruction {
        opcode: inst.opcode,
        operands,
        abs: inst.abs,
        neg: inst.neg,
        size: inst.size,
        address,
    })
}
