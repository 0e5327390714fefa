use crate::barrier::BarrierTable;
use crate::bit::sign_extend;
use crate::decoder::Instruction;
use crate::error::{FaultKind, Result};
use crate::instructions::Opcode;
use crate::memory::Memory;
use crate::memory_ops;
use crate::scalar_alu;
use crate::vector_alu;
use crate::wavefront::Wavefront;
use std::collections::HashMap;
use std::sync::OnceLock;

/// What an executed instruction asks of the control unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signals {
    None,
    EndOfProgram,
    Halt,
    /// The wave is blocked and another one should run
    Switch,
}

/// Everything a semantic function may touch while executing one instruction.
pub struct Exec<'a> {
    pub wave: &'a mut Wavefront,
    pub memory: &'a mut dyn Memory,
    pub barriers: &'a BarrierTable,
    /// Address of the executing instruction
    pub pc: u64,
    /// Committed as the new PC once the handler returns
    pub next_pc: u64,
}

impl Exec<'_> {
    pub fn read_sop_src(&self, inst: &Instruction, idx: usize) -> Result<u32> {
        self.wave.read_src(&inst.operands[idx])
    }

    pub fn read_sop_src_pair(&self, inst: &Instruction, idx: usize) -> Result<u64> {
        self.wave.read_src_pair(&inst.operands[idx])
    }

    pub fn write_sop_dst(&mut self, inst: &Instruction, idx: usize, value: u32) -> Result<()> {
        self.wave.write_dst(&inst.operands[idx], value)
    }

    pub fn write_sop_dst_pair(&mut self, inst: &Instruction, idx: usize, value: u64) -> Result<()> {
        self.wave.write_dst_pair(&inst.operands[idx], value)
    }

    pub fn read_vop_src(&self, elem: usize, inst: &Instruction, idx: usize) -> Result<u32> {
        self.wave.read_lane(elem, &inst.operands[idx])
    }

    pub fn read_vop_src_pair(&self, elem: usize, inst: &Instruction, idx: usize) -> Result<u64> {
        self.wave.read_lane_pair(elem, &inst.operands[idx])
    }

    /// Raw 16-bit immediate of a SOPK/SOPP operand.
    pub fn simm16(&self, inst: &Instruction, idx: usize) -> Result<u16> {
        Ok(self.read_sop_src(inst, idx)? as u16)
    }

    /// `PC + 4 + simm16 * 4`
    pub fn branch_target(&self, inst: &Instruction, idx: usize) -> Result<u64> {
        let simm16 = sign_extend(self.simm16(inst, idx)? as u64, 16);
        Ok((self.pc as i64 + 4 + simm16 * 4) as u64)
    }
}

pub type Handler = fn(&mut Exec, &Instruction) -> Result<Signals>;

pub type HandlerTable = HashMap<Opcode, Handler>;

pub(crate) fn register(table: &mut HandlerTable, opcode: Opcode, handler: Handler) {
    table.insert(opcode, handler);
}

/// Handler table keyed by opcode, built once on first use.
pub fn handler_table() -> &'static HandlerTable {
    static TABLE: OnceLock<HandlerTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        scalar_alu::register_all(&mut table);
        vector_alu::register_all(&mut table);
        memory_ops::register_all(&mut table);
        table
    })
}

/// Runs the semantic function of `inst`.
pub fn execute(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    match handler_table().get(&inst.opcode) {
        Some(handler) => handler(ex, inst),
        None => Err(FaultKind::ImplementationFault(inst.opcode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_entry_has_a_handler() {
        let table = handler_table();
        let missing: Vec<Opcode> = Opcode::all().filter(|op| !table.contains_key(op)).collect();
        assert!(missing.is_empty(), "missing handlers: {:?}", missing);
        assert_eq!(table.len(), crate::instructions::catalog_len());
    }
}
