//! Scalar (SMEM) and flat (FLAT) memory instructions.
//!
//! Data moves as soon as the instruction executes. Each instruction opens one
//! memory ticket and raises the wait counters it holds; the counters drop when
//! the ticket completes, which is what `s_waitcnt` observes.

use crate::bit::u64_from_u32_u32;
use crate::buffer::{from_dwords, to_dwords};
use crate::decoder::Instruction;
use crate::error::Result;
use crate::execute::{register, Exec, HandlerTable, Signals};
use crate::instructions::Opcode::*;
use crate::wavefront::Counter;
use tracing::trace;

pub(crate) fn register_all(t: &mut HandlerTable) {
    register(t, S_LOAD_DWORD, s_load);
    register(t, S_LOAD_DWORDX2, s_load);
    register(t, S_LOAD_DWORDX4, s_load);
    register(t, S_LOAD_DWORDX8, s_load);
    register(t, S_LOAD_DWORDX16, s_load);
    register(t, S_BUFFER_LOAD_DWORD, s_load);
    register(t, S_BUFFER_LOAD_DWORDX2, s_load);
    register(t, S_BUFFER_LOAD_DWORDX4, s_load);
    register(t, S_STORE_DWORD, s_store);
    register(t, S_STORE_DWORDX2, s_store);
    register(t, S_STORE_DWORDX4, s_store);

    register(t, FLAT_LOAD_UBYTE, |ex, i| flat_load(ex, i, 1, false));
    register(t, FLAT_LOAD_SBYTE, |ex, i| flat_load(ex, i, 1, true));
    register(t, FLAT_LOAD_USHORT, |ex, i| flat_load(ex, i, 2, false));
    register(t, FLAT_LOAD_SSHORT, |ex, i| flat_load(ex, i, 2, true));
    register(t, FLAT_LOAD_DWORD, |ex, i| flat_load(ex, i, 4, false));
    register(t, FLAT_LOAD_DWORDX2, |ex, i| flat_load(ex, i, 8, false));
    register(t, FLAT_LOAD_DWORDX3, |ex, i| flat_load(ex, i, 12, false));
    register(t, FLAT_LOAD_DWORDX4, |ex, i| flat_load(ex, i, 16, false));
    register(t, FLAT_STORE_BYTE, |ex, i| flat_store(ex, i, 1));
    register(t, FLAT_STORE_SHORT, |ex, i| flat_store(ex, i, 2));
    register(t, FLAT_STORE_DWORD, |ex, i| flat_store(ex, i, 4));
    register(t, FLAT_STORE_DWORDX2, |ex, i| flat_store(ex, i, 8));
    register(t, FLAT_STORE_DWORDX3, |ex, i| flat_store(ex, i, 12));
    register(t, FLAT_STORE_DWORDX4, |ex, i| flat_store(ex, i, 16));
    register(t, FLAT_ATOMIC_ADD, flat_atomic_add);
}

/// Dword-aligned address of an SMEM access. A four-dword base is a buffer
/// resource whose base address sits in its first 48 bits.
fn smem_address(ex: &Exec, inst: &Instruction) -> Result<u64> {
    let base = if inst.operands[1].words() == 4 {
        let resource = ex.wave.read_words(&inst.operands[1])?;
        u64_from_u32_u32(resource[0], resource[1] & 0xFFFF)
    } else {
        ex.read_sop_src_pair(inst, 1)?
    };
    let offset = ex.read_sop_src(inst, 2)? as u64;
    Ok(base.wrapping_add(offset) & !3)
}

fn s_load(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let address = smem_address(ex, inst)?;
    let width = inst.operands[0].words() * 4;
    let bytes = ex.memory.load(address, width)?;
    ex.wave.write_words(&inst.operands[0], &to_dwords(&bytes))?;
    let ticket = ex.memory.submit()?;
    ex.wave.issue(ticket, &[Counter::Lgkm]);
    trace!(wave = ex.wave.id(), address, width, "scalar load");
    Ok(Signals::None)
}

fn s_store(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let address = smem_address(ex, inst)?;
    let data = ex.wave.read_words(&inst.operands[0])?;
    ex.memory.store(address, &from_dwords(&data))?;
    let ticket = ex.memory.submit()?;
    ex.wave.issue(ticket, &[Counter::Lgkm]);
    trace!(wave = ex.wave.id(), address, width = data.len() * 4, "scalar store");
    Ok(Signals::None)
}

fn extend(data: &[u8], width: usize, signed: bool) -> Vec<u32> {
    match (width, signed) {
        (1, false) => vec![data[0] as u32],
        (1, true) => vec![data[0] as i8 as i32 as u32],
        (2, false) => vec![u16::from_le_bytes([data[0], data[1]]) as u32],
        (2, true) => vec![u16::from_le_bytes([data[0], data[1]]) as i16 as i32 as u32],
        _ => to_dwords(data),
    }
}

fn flat_load(ex: &mut Exec, inst: &Instruction, width: usize, signed: bool) -> Result<Signals> {
    let mut results = vec![None; ex.wave.lanes()];
    for (elem, result) in results.iter_mut().enumerate() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        let address = ex.read_vop_src_pair(elem, inst, 1)?;
        let data = ex.memory.load(address, width)?;
        *result = Some(extend(&data, width, signed));
    }
    ex.wave.write_lanes(&inst.operands[0], &results)?;
    let ticket = ex.memory.submit()?;
    ex.wave.issue(ticket, &[Counter::Vm, Counter::Lgkm]);
    Ok(Signals::None)
}

fn flat_store(ex: &mut Exec, inst: &Instruction, width: usize) -> Result<Signals> {
    for elem in 0..ex.wave.lanes() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        let address = ex.read_vop_src_pair(elem, inst, 0)?;
        let data = from_dwords(&ex.wave.read_lane_words(elem, &inst.operands[1])?);
        ex.memory.store(address, &data[..width.min(data.len())])?;
    }
    let ticket = ex.memory.submit()?;
    ex.wave.issue(ticket, &[Counter::Vm, Counter::Lgkm]);
    Ok(Signals::None)
}

/// Adds the lane's data to memory and returns the previous dword.
fn flat_atomic_add(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let mut results = vec![None; ex.wave.lanes()];
    for (elem, result) in results.iter_mut().enumerate() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        let address = ex.read_vop_src_pair(elem, inst, 1)?;
        let data = ex.read_vop_src(elem, inst, 2)?;
        let old = ex.memory.atomic_add(address, data)?;
        *result = Some(vec![old]);
    }
    ex.wave.write_lanes(&inst.operands[0], &results)?;
    let ticket = ex.memory.submit()?;
    ex.wave.issue(ticket, &[Counter::Vm, Counter::Lgkm]);
    Ok(Signals::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierTable;
    use crate::decoder::decode_line;
    use crate::error::{FaultKind, MemoryError};
    use crate::execute::execute;
    use crate::memory::{FlatMemory, Memory};
    use crate::wavefront::{WaitCounters, Wavefront};

    fn run(wave: &mut Wavefront, memory: &mut FlatMemory, text: &str) -> Result<Signals> {
        let inst = decode_line(text).unwrap();
        let barriers = BarrierTable::new();
        let mut ex = Exec {
            wave,
            memory,
            barriers: &barriers,
            pc: 0,
            next_pc: inst.size as u64,
        };
        execute(&mut ex, &inst)
    }

    fn set_pair(wave: &mut Wavefront, lane: usize, reg: usize, value: u64) {
        wave.set_vgpr(lane, reg, value as u32);
        wave.set_vgpr(lane, reg + 1, (value >> 32) as u32);
    }

    #[test]
    fn scalar_load_aligns_and_counts() {
        let mut mem = FlatMemory::new(2);
        let base = mem.allocate_with(&[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
        let mut w = Wavefront::new(0, 0, 4);
        w.set_sgpr(2, base as u32);
        w.set_sgpr(3, (base >> 32) as u32);
        run(&mut w, &mut mem, "s_load_dwordx2 s[4:5], s[2:3], 6").unwrap();
        assert_eq!((w.sgpr(4), w.sgpr(5)), (2, 3));
        assert_eq!(w.counters().lgkm, 1);
        assert_eq!(w.check_wait(WaitCounters::default()), Ok(false));
        mem.tick().unwrap();
        mem.tick().unwrap();
        w.retire_completed(&mem).unwrap();
        assert_eq!(w.counters(), WaitCounters::default());
    }

    #[test]
    fn buffer_resource_base() {
        let mut mem = FlatMemory::new(0);
        let base = mem.allocate_with(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let mut w = Wavefront::new(0, 0, 4);
        w.set_sgpr(8, base as u32);
        w.set_sgpr(9, (base >> 32) as u32 | 0xFFFF_0000);
        w.set_sgpr(10, 0x1234);
        run(&mut w, &mut mem, "s_buffer_load_dword s0, s[8:11], 0").unwrap();
        assert_eq!(w.sgpr(0), 0xDDCC_BBAA);
    }

    #[test]
    fn scalar_store_round_trips() {
        let mut mem = FlatMemory::new(0);
        let base = mem.allocate(16);
        let mut w = Wavefront::new(0, 0, 4);
        w.set_sgpr(2, base as u32);
        w.set_sgpr(3, (base >> 32) as u32);
        w.set_sgpr(4, 0x0102_0304);
        run(&mut w, &mut mem, "s_store_dword s4, s[2:3], 8").unwrap();
        assert_eq!(mem.read(base + 8, 4).unwrap(), &[4, 3, 2, 1]);
    }

    #[test]
    fn unmapped_scalar_access_faults() {
        let mut mem = FlatMemory::new(0);
        let mut w = Wavefront::new(0, 0, 4);
        assert!(matches!(
            run(&mut w, &mut mem, "s_load_dword s0, s[2:3], 0"),
            Err(FaultKind::Memory(MemoryError::Unmapped { .. }))
        ));
    }

    #[test]
    fn flat_loads_extend_and_skip_inactive_lanes() {
        let mut mem = FlatMemory::new(0);
        let base = mem.allocate_with(&[0x80, 0xFF, 0x7F, 0x00]);
        let mut w = Wavefront::new(0, 0, 4);
        for lane in 0..4 {
            set_pair(&mut w, lane, 2, base);
            w.set_vgpr(lane, 0, 0x5555);
        }
        set_pair(&mut w, 3, 2, 0);
        w.set_exec(0b0111);
        run(&mut w, &mut mem, "flat_load_sbyte v0, v[2:3]").unwrap();
        assert_eq!(w.vgpr(0, 0), 0xFFFF_FF80);
        assert_eq!(w.vgpr(3, 0), 0x5555);
        run(&mut w, &mut mem, "flat_load_ushort v0, v[2:3]").unwrap();
        assert_eq!(w.vgpr(1, 0), 0xFF80);
        run(&mut w, &mut mem, "flat_load_sshort v0, v[2:3]").unwrap();
        assert_eq!(w.vgpr(2, 0), 0xFFFF_FF80);
        assert_eq!(w.counters().vm, 3);
    }

    #[test]
    fn flat_stores_truncate() {
        let mut mem = FlatMemory::new(0);
        let base = mem.allocate(8);
        let mut w = Wavefront::new(0, 0, 2);
        set_pair(&mut w, 0, 2, base);
        set_pair(&mut w, 1, 2, base + 4);
        w.set_vgpr(0, 4, 0x1122_3344);
        w.set_vgpr(1, 4, 0x5566_7788);
        run(&mut w, &mut mem, "flat_store_short v[2:3], v4").unwrap();
        assert_eq!(mem.read(base, 8).unwrap(), &[0x44, 0x33, 0, 0, 0x88, 0x77, 0, 0]);
    }

    #[test]
    fn atomic_add_returns_previous_value() {
        let mut mem = FlatMemory::new(0);
        let base = mem.allocate_with(&[10, 0, 0, 0]);
        let mut w = Wavefront::new(0, 0, 3);
        for lane in 0..3 {
            set_pair(&mut w, lane, 2, base);
            w.set_vgpr(lane, 4, 1);
        }
        run(&mut w, &mut mem, "flat_atomic_add v0, v[2:3], v4").unwrap();
        let olds: Vec<u32> = (0..3).map(|lane| w.vgpr(lane, 0)).collect();
        assert_eq!(olds, vec![10, 11, 12]);
        assert_eq!(mem.read(base, 4).unwrap(), &[13, 0, 0, 0]);
    }

    #[test]
    fn load_into_address_registers() {
        let mut mem = FlatMemory::new(0);
        let base = mem.allocate_with(&[7, 0, 0, 0, 9, 0, 0, 0]);
        let mut w = Wavefront::new(0, 0, 1);
        set_pair(&mut w, 0, 2, base);
        run(&mut w, &mut mem, "flat_load_dwordx2 v[2:3], v[2:3]").unwrap();
        assert_eq!((w.vgpr(0, 2), w.vgpr(0, 3)), (7, 9));
    }
}
