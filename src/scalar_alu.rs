//! Scalar ALU and program control: SOP1, SOP2, SOPC, SOPK and SOPP.

use crate::alu::{
    add_i32, add_u32, bfe, cmp_int, find_first_one, find_last_one, find_last_signed, mul_hi_i32,
    mul_hi_u32, sub_i32, sub_u32, OP8,
};
use crate::bit::set_bits;
use crate::decoder::Instruction;
use crate::error::{FaultKind, Result};
use crate::execute::{register, Exec, HandlerTable, Signals};
use crate::instructions::Opcode::*;
use crate::operand::{Operand, NUM_SGPRS};
use crate::wavefront::{hwreg, status, Block, ForkFrame, WaitCounters, MODE_GPR_IDX_EN};
use tracing::debug;

pub(crate) fn register_all(t: &mut HandlerTable) {
    register_sop2(t);
    register_sop1(t);
    register_sopc(t);
    register_sopk(t);
    register_sopp(t);
}

// SOP2

fn sop2_b32(ex: &mut Exec, inst: &Instruction, f: fn(u32, u32) -> u32) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let d_value = f(s0_value, s1_value);
    ex.write_sop_dst(inst, 0, d_value)?;
    ex.wave.scc = d_value != 0;
    Ok(Signals::None)
}

fn sop2_b64(ex: &mut Exec, inst: &Instruction, f: fn(u64, u64) -> u64) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let s1_value = ex.read_sop_src_pair(inst, 2)?;
    let d_value = f(s0_value, s1_value);
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    ex.wave.scc = d_value != 0;
    Ok(Signals::None)
}

fn s_add_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let (d_value, carry) = add_u32(s0_value, s1_value, 0);
    ex.write_sop_dst(inst, 0, d_value)?;
    ex.wave.scc = carry;
    Ok(Signals::None)
}

fn s_addc_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let (d_value, carry) = add_u32(s0_value, s1_value, ex.wave.scc as u32);
    ex.write_sop_dst(inst, 0, d_value)?;
    ex.wave.scc = carry;
    Ok(Signals::None)
}

fn s_sub_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let (d_value, borrow) = sub_u32(s0_value, s1_value, 0);
    ex.write_sop_dst(inst, 0, d_value)?;
    ex.wave.scc = borrow;
    Ok(Signals::None)
}

fn s_subb_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let (d_value, borrow) = sub_u32(s0_value, s1_value, ex.wave.scc as u32);
    ex.write_sop_dst(inst, 0, d_value)?;
    ex.wave.scc = borrow;
    Ok(Signals::None)
}

fn s_add_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    let (d_value, overflow) = add_i32(s0_value, s1_value);
    ex.write_sop_dst(inst, 0, d_value as u32)?;
    ex.wave.scc = overflow;
    Ok(Signals::None)
}

fn s_sub_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    let (d_value, overflow) = sub_i32(s0_value, s1_value);
    ex.write_sop_dst(inst, 0, d_value as u32)?;
    ex.wave.scc = overflow;
    Ok(Signals::None)
}

fn s_min_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    ex.write_sop_dst(inst, 0, s0_value.min(s1_value) as u32)?;
    ex.wave.scc = s0_value < s1_value;
    Ok(Signals::None)
}

fn s_min_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    ex.write_sop_dst(inst, 0, s0_value.min(s1_value))?;
    ex.wave.scc = s0_value < s1_value;
    Ok(Signals::None)
}

fn s_max_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    ex.write_sop_dst(inst, 0, s0_value.max(s1_value) as u32)?;
    ex.wave.scc = s0_value > s1_value;
    Ok(Signals::None)
}

fn s_max_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    ex.write_sop_dst(inst, 0, s0_value.max(s1_value))?;
    ex.wave.scc = s0_value > s1_value;
    Ok(Signals::None)
}

fn s_cselect_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let d_value = if ex.wave.scc { s0_value } else { s1_value };
    ex.write_sop_dst(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_cselect_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let s1_value = ex.read_sop_src_pair(inst, 2)?;
    let d_value = if ex.wave.scc { s0_value } else { s1_value };
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_bfm_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let d_value = ((1u32 << (s0_value & 31)) - 1) << (s1_value & 31);
    ex.write_sop_dst(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_bfm_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let d_value = ((1u64 << (s0_value & 63)) - 1) << (s1_value & 63);
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_mul_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    ex.write_sop_dst(inst, 0, s0_value.wrapping_mul(s1_value) as u32)?;
    Ok(Signals::None)
}

fn s_mul_hi_u32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    ex.write_sop_dst(inst, 0, mul_hi_u32(s0_value, s1_value))?;
    Ok(Signals::None)
}

fn s_mul_hi_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    ex.write_sop_dst(inst, 0, mul_hi_i32(s0_value, s1_value) as u32)?;
    Ok(Signals::None)
}

fn s_bfe(ex: &mut Exec, inst: &Instruction, bits: u32, signed: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    let d_value = bfe(s0_value, s1_value, bits, signed);
    if bits == 64 {
        ex.write_sop_dst_pair(inst, 0, d_value)?;
    } else {
        ex.write_sop_dst(inst, 0, d_value as u32)?;
    }
    ex.wave.scc = d_value != 0;
    Ok(Signals::None)
}

fn s_absdiff_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as i32;
    let s1_value = ex.read_sop_src(inst, 2)? as i32;
    let d_value = s0_value.wrapping_sub(s1_value).wrapping_abs() as u32;
    ex.write_sop_dst(inst, 0, d_value)?;
    ex.wave.scc = d_value != 0;
    Ok(Signals::None)
}

fn s_lshl_add_u32(ex: &mut Exec, inst: &Instruction, n: u32) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)? as u64;
    let s1_value = ex.read_sop_src(inst, 2)? as u64;
    let d_value = (s0_value << n) + s1_value;
    ex.write_sop_dst(inst, 0, d_value as u32)?;
    ex.wave.scc = d_value > u32::MAX as u64;
    Ok(Signals::None)
}

fn s_pack(ex: &mut Exec, inst: &Instruction, f: fn(u32, u32) -> u32) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let s1_value = ex.read_sop_src(inst, 2)?;
    ex.write_sop_dst(inst, 0, f(s0_value, s1_value))?;
    Ok(Signals::None)
}

fn s_cbranch_g_fork(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let cond = ex.read_sop_src_pair(inst, 0)?;
    let target = ex.read_sop_src_pair(inst, 1)?;
    fork(ex, cond, target);
    Ok(Signals::None)
}

fn s_rfe_restore_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 0)?;
    let s1_value = ex.read_sop_src(inst, 1)?;
    ex.next_pc = s0_value;
    ex.wave.status = (ex.wave.status & !status::INST_ATC) | ((s1_value & 1) << 23);
    Ok(Signals::None)
}

fn register_sop2(t: &mut HandlerTable) {
    register(t, S_ADD_U32, s_add_u32);
    register(t, S_SUB_U32, s_sub_u32);
    register(t, S_ADD_I32, s_add_i32);
    register(t, S_SUB_I32, s_sub_i32);
    register(t, S_ADDC_U32, s_addc_u32);
    register(t, S_SUBB_U32, s_subb_u32);
    register(t, S_MIN_I32, s_min_i32);
    register(t, S_MIN_U32, s_min_u32);
    register(t, S_MAX_I32, s_max_i32);
    register(t, S_MAX_U32, s_max_u32);
    register(t, S_CSELECT_B32, s_cselect_b32);
    register(t, S_CSELECT_B64, s_cselect_b64);
    register(t, S_AND_B32, |ex, i| sop2_b32(ex, i, |a, b| a & b));
    register(t, S_AND_B64, |ex, i| sop2_b64(ex, i, |a, b| a & b));
    register(t, S_OR_B32, |ex, i| sop2_b32(ex, i, |a, b| a | b));
    register(t, S_OR_B64, |ex, i| sop2_b64(ex, i, |a, b| a | b));
    register(t, S_XOR_B32, |ex, i| sop2_b32(ex, i, |a, b| a ^ b));
    register(t, S_XOR_B64, |ex, i| sop2_b64(ex, i, |a, b| a ^ b));
    register(t, S_ANDN2_B32, |ex, i| sop2_b32(ex, i, |a, b| a & !b));
    register(t, S_ANDN2_B64, |ex, i| sop2_b64(ex, i, |a, b| a & !b));
    register(t, S_ORN2_B32, |ex, i| sop2_b32(ex, i, |a, b| a | !b));
    register(t, S_ORN2_B64, |ex, i| sop2_b64(ex, i, |a, b| a | !b));
    register(t, S_NAND_B32, |ex, i| sop2_b32(ex, i, |a, b| !(a & b)));
    register(t, S_NAND_B64, |ex, i| sop2_b64(ex, i, |a, b| !(a & b)));
    register(t, S_NOR_B32, |ex, i| sop2_b32(ex, i, |a, b| !(a | b)));
    register(t, S_NOR_B64, |ex, i| sop2_b64(ex, i, |a, b| !(a | b)));
    register(t, S_XNOR_B32, |ex, i| sop2_b32(ex, i, |a, b| !(a ^ b)));
    register(t, S_XNOR_B64, |ex, i| sop2_b64(ex, i, |a, b| !(a ^ b)));
    register(t, S_LSHL_B32, |ex, i| sop2_b32(ex, i, |a, b| a << (b & 31)));
    register(t, S_LSHL_B64, |ex, i| sop2_b64(ex, i, |a, b| a << (b & 63)));
    register(t, S_LSHR_B32, |ex, i| sop2_b32(ex, i, |a, b| a >> (b & 31)));
    register(t, S_LSHR_B64, |ex, i| sop2_b64(ex, i, |a, b| a >> (b & 63)));
    register(t, S_ASHR_I32, |ex, i| sop2_b32(ex, i, |a, b| ((a as i32) >> (b & 31)) as u32));
    register(t, S_ASHR_I64, |ex, i| sop2_b64(ex, i, |a, b| ((a as i64) >> (b & 63)) as u64));
    register(t, S_BFM_B32, s_bfm_b32);
    register(t, S_BFM_B64, s_bfm_b64);
    register(t, S_MUL_I32, s_mul_i32);
    register(t, S_BFE_U32, |ex, i| s_bfe(ex, i, 32, false));
    register(t, S_BFE_I32, |ex, i| s_bfe(ex, i, 32, true));
    register(t, S_BFE_U64, |ex, i| s_bfe(ex, i, 64, false));
    register(t, S_BFE_I64, |ex, i| s_bfe(ex, i, 64, true));
    register(t, S_CBRANCH_G_FORK, s_cbranch_g_fork);
    register(t, S_ABSDIFF_I32, s_absdiff_i32);
    register(t, S_RFE_RESTORE_B64, s_rfe_restore_b64);
    register(t, S_MUL_HI_U32, s_mul_hi_u32);
    register(t, S_MUL_HI_I32, s_mul_hi_i32);
    register(t, S_LSHL1_ADD_U32, |ex, i| s_lshl_add_u32(ex, i, 1));
    register(t, S_LSHL2_ADD_U32, |ex, i| s_lshl_add_u32(ex, i, 2));
    register(t, S_LSHL3_ADD_U32, |ex, i| s_lshl_add_u32(ex, i, 3));
    register(t, S_LSHL4_ADD_U32, |ex, i| s_lshl_add_u32(ex, i, 4));
    register(t, S_PACK_LL_B32_B16, |ex, i| {
        s_pack(ex, i, |a, b| (a & 0xFFFF) | ((b & 0xFFFF) << 16))
    });
    register(t, S_PACK_LH_B32_B16, |ex, i| {
        s_pack(ex, i, |a, b| (a & 0xFFFF) | (b & 0xFFFF_0000))
    });
    register(t, S_PACK_HH_B32_B16, |ex, i| {
        s_pack(ex, i, |a, b| (a >> 16) | (b & 0xFFFF_0000))
    });
}

// SOP1

fn sop1_b32(ex: &mut Exec, inst: &Instruction, f: fn(u32) -> u32, scc: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let d_value = f(s0_value);
    ex.write_sop_dst(inst, 0, d_value)?;
    if scc {
        ex.wave.scc = d_value != 0;
    }
    Ok(Signals::None)
}

fn sop1_b64(ex: &mut Exec, inst: &Instruction, f: fn(u64) -> u64, scc: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let d_value = f(s0_value);
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    if scc {
        ex.wave.scc = d_value != 0;
    }
    Ok(Signals::None)
}

/// 32-bit result computed from a 64-bit source.
fn sop1_i32_b64(ex: &mut Exec, inst: &Instruction, f: fn(u64) -> i32, scc: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let d_value = f(s0_value) as u32;
    ex.write_sop_dst(inst, 0, d_value)?;
    if scc {
        ex.wave.scc = d_value != 0;
    }
    Ok(Signals::None)
}

fn s_cmov_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    if ex.wave.scc {
        ex.write_sop_dst(inst, 0, s0_value)?;
    }
    Ok(Signals::None)
}

fn s_cmov_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    if ex.wave.scc {
        ex.write_sop_dst_pair(inst, 0, s0_value)?;
    }
    Ok(Signals::None)
}

fn wqm(value: u64, bits: u32) -> u64 {
    (0..bits)
        .step_by(4)
        .filter(|i| (value >> i) & 0xF != 0)
        .fold(0, |d, i| d | (0xF << i))
}

fn quadmask(value: u64, bits: u32) -> u64 {
    (0..bits / 4)
        .filter(|i| (value >> (4 * i)) & 0xF != 0)
        .fold(0, |d, i| d | (1 << i))
}

fn s_bitset_b32(ex: &mut Exec, inst: &Instruction, set: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let d_value = ex.read_sop_src(inst, 0)?;
    let bit = 1u32 << (s0_value & 31);
    let d_value = if set { d_value | bit } else { d_value & !bit };
    ex.write_sop_dst(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_bitset_b64(ex: &mut Exec, inst: &Instruction, set: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let d_value = ex.read_sop_src_pair(inst, 0)?;
    let bit = 1u64 << (s0_value & 63);
    let d_value = if set { d_value | bit } else { d_value & !bit };
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_getpc_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let d_value = ex.pc + 4;
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_setpc_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    ex.next_pc = ex.read_sop_src_pair(inst, 0)?;
    Ok(Signals::None)
}

fn s_swappc_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let d_value = ex.pc + 4;
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    ex.next_pc = s0_value;
    Ok(Signals::None)
}

/// Writes the prior EXEC to the destination, then replaces EXEC.
fn saveexec(ex: &mut Exec, inst: &Instruction, f: fn(u64, u64) -> u64) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let exec_value = ex.wave.exec;
    ex.write_sop_dst_pair(inst, 0, exec_value)?;
    ex.wave.set_exec(f(s0_value, exec_value));
    ex.wave.scc = ex.wave.exec != 0;
    Ok(Signals::None)
}

/// Replaces EXEC, then writes the new EXEC to the destination.
fn wrexec(ex: &mut Exec, inst: &Instruction, f: fn(u64, u64) -> u64) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 1)?;
    let exec_value = ex.wave.exec;
    ex.wave.set_exec(f(s0_value, exec_value));
    let exec_value = ex.wave.exec;
    ex.write_sop_dst_pair(inst, 0, exec_value)?;
    ex.wave.scc = exec_value != 0;
    Ok(Signals::None)
}

/// Resolves an M0-relative scalar register range.
fn relative(ex: &Exec, op: &Operand) -> Result<Operand> {
    match *op {
        Operand::Scalar { index, words } => {
            let index = index + ex.wave.m0 as usize;
            if index + words > NUM_SGPRS {
                return Err(FaultKind::RegisterOutOfRange(index));
            }
            Ok(Operand::Scalar { index, words })
        }
        _ => Err(FaultKind::InvalidReadSource(op.to_string())),
    }
}

fn s_movrels(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let src = relative(ex, &inst.operands[1])?;
    let value = ex.wave.read(&src)?;
    ex.wave.write(&inst.operands[0], value)?;
    Ok(Signals::None)
}

fn s_movreld(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let dst = relative(ex, &inst.operands[0]).map_err(|fault| match fault {
        FaultKind::InvalidReadSource(text) => FaultKind::InvalidWriteTarget(text),
        other => other,
    })?;
    let value = ex.wave.read(&inst.operands[1])?;
    ex.wave.write(&dst, value)?;
    Ok(Signals::None)
}

fn s_cbranch_join(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let expected = ex.read_sop_src(inst, 0)? as usize;
    let depth = ex.wave.divergence.len();
    if depth <= expected {
        return Ok(Signals::None);
    }
    let resumed = ex.wave.divergence[depth - 1].resumed;
    if !resumed {
        let frame = &mut ex.wave.divergence[depth - 1];
        frame.resumed = true;
        let (mask, pc) = (frame.other_mask, frame.other_pc);
        ex.wave.exec = mask;
        ex.next_pc = pc;
        debug!(wave = ex.wave.id(), pc = ex.pc, exec = mask, target = pc, "join: switch path");
    } else if let Some(frame) = ex.wave.divergence.pop() {
        ex.wave.exec = frame.saved_exec;
        debug!(wave = ex.wave.id(), pc = ex.pc, exec = frame.saved_exec, "join: reconverge");
    }
    Ok(Signals::None)
}

fn s_abs_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    sop1_b32(ex, inst, |a| (a as i32).wrapping_abs() as u32, true)
}

fn s_set_gpr_idx_idx(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)?;
    ex.wave.m0 = (ex.wave.m0 & 0xFFFF_FF00) | (s0_value & 0xFF);
    Ok(Signals::None)
}

fn s_bitreplicate_b64_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 1)?;
    let d_value = (0..32)
        .filter(|i| (s0_value >> i) & 1 != 0)
        .fold(0u64, |d, i| d | (3 << (2 * i)));
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn register_sop1(t: &mut HandlerTable) {
    register(t, S_MOV_B32, |ex, i| sop1_b32(ex, i, |a| a, false));
    register(t, S_MOV_B64, |ex, i| sop1_b64(ex, i, |a| a, false));
    register(t, S_CMOV_B32, s_cmov_b32);
    register(t, S_CMOV_B64, s_cmov_b64);
    register(t, S_NOT_B32, |ex, i| sop1_b32(ex, i, |a| !a, true));
    register(t, S_NOT_B64, |ex, i| sop1_b64(ex, i, |a| !a, true));
    register(t, S_WQM_B32, |ex, i| sop1_b32(ex, i, |a| wqm(a as u64, 32) as u32, true));
    register(t, S_WQM_B64, |ex, i| sop1_b64(ex, i, |a| wqm(a, 64), true));
    register(t, S_BREV_B32, |ex, i| sop1_b32(ex, i, |a| a.reverse_bits(), false));
    register(t, S_BREV_B64, |ex, i| sop1_b64(ex, i, |a| a.reverse_bits(), false));
    register(t, S_BCNT0_I32_B32, |ex, i| sop1_b32(ex, i, |a| a.count_zeros(), true));
    register(t, S_BCNT0_I32_B64, |ex, i| sop1_i32_b64(ex, i, |a| a.count_zeros() as i32, true));
    register(t, S_BCNT1_I32_B32, |ex, i| sop1_b32(ex, i, |a| a.count_ones(), true));
    register(t, S_BCNT1_I32_B64, |ex, i| sop1_i32_b64(ex, i, |a| a.count_ones() as i32, true));
    register(t, S_FF0_I32_B32, |ex, i| {
        sop1_b32(ex, i, |a| find_first_one(!a as u64) as u32, false)
    });
    register(t, S_FF0_I32_B64, |ex, i| sop1_i32_b64(ex, i, |a| find_first_one(!a), false));
    register(t, S_FF1_I32_B32, |ex, i| {
        sop1_b32(ex, i, |a| find_first_one(a as u64) as u32, false)
    });
    register(t, S_FF1_I32_B64, |ex, i| sop1_i32_b64(ex, i, |a| find_first_one(a), false));
    register(t, S_FLBIT_I32_B32, |ex, i| {
        sop1_b32(ex, i, |a| find_last_one(a as u64, 32) as u32, false)
    });
    register(t, S_FLBIT_I32_B64, |ex, i| sop1_i32_b64(ex, i, |a| find_last_one(a, 64), false));
    register(t, S_FLBIT_I32, |ex, i| {
        sop1_b32(ex, i, |a| find_last_signed(a as u64, 32) as u32, false)
    });
    register(t, S_FLBIT_I32_I64, |ex, i| {
        sop1_i32_b64(ex, i, |a| find_last_signed(a, 64), false)
    });
    register(t, S_SEXT_I32_I8, |ex, i| sop1_b32(ex, i, |a| a as i8 as i32 as u32, false));
    register(t, S_SEXT_I32_I16, |ex, i| sop1_b32(ex, i, |a| a as i16 as i32 as u32, false));
    register(t, S_BITSET0_B32, |ex, i| s_bitset_b32(ex, i, false));
    register(t, S_BITSET0_B64, |ex, i| s_bitset_b64(ex, i, false));
    register(t, S_BITSET1_B32, |ex, i| s_bitset_b32(ex, i, true));
    register(t, S_BITSET1_B64, |ex, i| s_bitset_b64(ex, i, true));
    register(t, S_GETPC_B64, s_getpc_b64);
    register(t, S_SETPC_B64, s_setpc_b64);
    register(t, S_SWAPPC_B64, s_swappc_b64);
    register(t, S_RFE_B64, s_setpc_b64);
    register(t, S_AND_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| s & e));
    register(t, S_OR_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| s | e));
    register(t, S_XOR_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| s ^ e));
    register(t, S_ANDN2_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| s & !e));
    register(t, S_ORN2_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| s | !e));
    register(t, S_NAND_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| !(s & e)));
    register(t, S_NOR_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| !(s | e)));
    register(t, S_XNOR_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| !(s ^ e)));
    register(t, S_ANDN1_SAVEEXEC_B64, |ex, i| saveexec(ex, i, |s, e| !s & e));
    register(t, S_ANDN1_WREXEC_B64, |ex, i| wrexec(ex, i, |s, e| !s & e));
    register(t, S_ANDN2_WREXEC_B64, |ex, i| wrexec(ex, i, |s, e| s & !e));
    register(t, S_QUADMASK_B32, |ex, i| sop1_b32(ex, i, |a| quadmask(a as u64, 32) as u32, true));
    register(t, S_QUADMASK_B64, |ex, i| sop1_b64(ex, i, |a| quadmask(a, 64), true));
    register(t, S_MOVRELS_B32, s_movrels);
    register(t, S_MOVRELS_B64, s_movrels);
    register(t, S_MOVRELD_B32, s_movreld);
    register(t, S_MOVRELD_B64, s_movreld);
    register(t, S_CBRANCH_JOIN, s_cbranch_join);
    register(t, S_ABS_I32, s_abs_i32);
    register(t, S_SET_GPR_IDX_IDX, s_set_gpr_idx_idx);
    register(t, S_BITREPLICATE_B64_B32, s_bitreplicate_b64_b32);
}

// SOPC

fn sopc_i32(ex: &mut Exec, inst: &Instruction, op: OP8) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)? as i32;
    let s1_value = ex.read_sop_src(inst, 1)? as i32;
    ex.wave.scc = cmp_int(s0_value, s1_value, op);
    Ok(Signals::None)
}

fn sopc_u32(ex: &mut Exec, inst: &Instruction, op: OP8) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)?;
    let s1_value = ex.read_sop_src(inst, 1)?;
    ex.wave.scc = cmp_int(s0_value, s1_value, op);
    Ok(Signals::None)
}

fn sopc_u64(ex: &mut Exec, inst: &Instruction, op: OP8) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 0)?;
    let s1_value = ex.read_sop_src_pair(inst, 1)?;
    ex.wave.scc = cmp_int(s0_value, s1_value, op);
    Ok(Signals::None)
}

fn s_bitcmp(ex: &mut Exec, inst: &Instruction, bits: u32, value: bool) -> Result<Signals> {
    let s0_value = ex.read_sop_src_pair(inst, 0)?;
    let s1_value = ex.read_sop_src(inst, 1)?;
    let bit = (s0_value >> (s1_value & (bits - 1))) & 1 != 0;
    ex.wave.scc = bit == value;
    Ok(Signals::None)
}

fn s_setvskip(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)?;
    let s1_value = ex.read_sop_src(inst, 1)?;
    ex.wave.vskip = (s0_value >> (s1_value & 31)) & 1 != 0;
    Ok(Signals::None)
}

fn s_set_gpr_idx_on(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)?;
    let imm = ex.simm16(inst, 1)? as u32;
    ex.wave.mode |= MODE_GPR_IDX_EN;
    let m0 = (ex.wave.m0 & 0xFFFF_FF00) | (s0_value & 0xFF);
    ex.wave.m0 = (m0 & 0xFFFF_0FFF) | ((imm & 0xF) << 12);
    Ok(Signals::None)
}

fn register_sopc(t: &mut HandlerTable) {
    register(t, S_CMP_EQ_I32, |ex, i| sopc_i32(ex, i, OP8::EQ));
    register(t, S_CMP_LG_I32, |ex, i| sopc_i32(ex, i, OP8::LG));
    register(t, S_CMP_GT_I32, |ex, i| sopc_i32(ex, i, OP8::GT));
    register(t, S_CMP_GE_I32, |ex, i| sopc_i32(ex, i, OP8::GE));
    register(t, S_CMP_LT_I32, |ex, i| sopc_i32(ex, i, OP8::LT));
    register(t, S_CMP_LE_I32, |ex, i| sopc_i32(ex, i, OP8::LE));
    register(t, S_CMP_EQ_U32, |ex, i| sopc_u32(ex, i, OP8::EQ));
    register(t, S_CMP_LG_U32, |ex, i| sopc_u32(ex, i, OP8::LG));
    register(t, S_CMP_GT_U32, |ex, i| sopc_u32(ex, i, OP8::GT));
    register(t, S_CMP_GE_U32, |ex, i| sopc_u32(ex, i, OP8::GE));
    register(t, S_CMP_LT_U32, |ex, i| sopc_u32(ex, i, OP8::LT));
    register(t, S_CMP_LE_U32, |ex, i| sopc_u32(ex, i, OP8::LE));
    register(t, S_BITCMP0_B32, |ex, i| s_bitcmp(ex, i, 32, false));
    register(t, S_BITCMP1_B32, |ex, i| s_bitcmp(ex, i, 32, true));
    register(t, S_BITCMP0_B64, |ex, i| s_bitcmp(ex, i, 64, false));
    register(t, S_BITCMP1_B64, |ex, i| s_bitcmp(ex, i, 64, true));
    register(t, S_SETVSKIP, s_setvskip);
    register(t, S_SET_GPR_IDX_ON, s_set_gpr_idx_on);
    register(t, S_CMP_EQ_U64, |ex, i| sopc_u64(ex, i, OP8::EQ));
    register(t, S_CMP_LG_U64, |ex, i| sopc_u64(ex, i, OP8::LG));
    register(t, S_CMP_NE_U64, |ex, i| sopc_u64(ex, i, OP8::LG));
}

// SOPK

fn sext16(value: u16) -> i32 {
    value as i16 as i32
}

fn s_movk_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let simm16 = ex.simm16(inst, 1)?;
    ex.write_sop_dst(inst, 0, sext16(simm16) as u32)?;
    Ok(Signals::None)
}

fn s_cmovk_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let simm16 = ex.simm16(inst, 1)?;
    if ex.wave.scc {
        ex.write_sop_dst(inst, 0, sext16(simm16) as u32)?;
    }
    Ok(Signals::None)
}

fn sopk_cmp_i32(ex: &mut Exec, inst: &Instruction, op: OP8) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)? as i32;
    let simm16 = sext16(ex.simm16(inst, 1)?);
    ex.wave.scc = cmp_int(s0_value, simm16, op);
    Ok(Signals::None)
}

fn sopk_cmp_u32(ex: &mut Exec, inst: &Instruction, op: OP8) -> Result<Signals> {
    let s0_value = ex.read_sop_src(inst, 0)?;
    let simm16 = ex.simm16(inst, 1)? as u32;
    ex.wave.scc = cmp_int(s0_value, simm16, op);
    Ok(Signals::None)
}

fn s_addk_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let d_value = ex.read_sop_src(inst, 0)? as i32;
    let simm16 = sext16(ex.simm16(inst, 1)?);
    let (d_value, overflow) = add_i32(d_value, simm16);
    ex.write_sop_dst(inst, 0, d_value as u32)?;
    ex.wave.scc = overflow;
    Ok(Signals::None)
}

fn s_mulk_i32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let d_value = ex.read_sop_src(inst, 0)? as i32;
    let simm16 = sext16(ex.simm16(inst, 1)?);
    ex.write_sop_dst(inst, 0, d_value.wrapping_mul(simm16) as u32)?;
    Ok(Signals::None)
}

fn s_cbranch_i_fork(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let cond = ex.read_sop_src_pair(inst, 0)?;
    let target = ex.branch_target(inst, 1)?;
    fork(ex, cond, target);
    Ok(Signals::None)
}

fn s_getreg_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let (id, offset, size) = hwreg::decode(ex.simm16(inst, 1)? as u32);
    let d_value = ex.wave.get_hw_reg(id, offset, size)?;
    ex.write_sop_dst(inst, 0, d_value)?;
    Ok(Signals::None)
}

fn s_setreg_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let (id, offset, size) = hwreg::decode(ex.simm16(inst, 0)? as u32);
    let s0_value = ex.read_sop_src(inst, 1)?;
    ex.wave.set_hw_reg(id, offset, size, s0_value)?;
    Ok(Signals::None)
}

fn s_call_b64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let target = ex.branch_target(inst, 1)?;
    let d_value = ex.pc + 4;
    ex.write_sop_dst_pair(inst, 0, d_value)?;
    ex.next_pc = target;
    Ok(Signals::None)
}

fn register_sopk(t: &mut HandlerTable) {
    register(t, S_MOVK_I32, s_movk_i32);
    register(t, S_CMOVK_I32, s_cmovk_i32);
    register(t, S_CMPK_EQ_I32, |ex, i| sopk_cmp_i32(ex, i, OP8::EQ));
    register(t, S_CMPK_LG_I32, |ex, i| sopk_cmp_i32(ex, i, OP8::LG));
    register(t, S_CMPK_GT_I32, |ex, i| sopk_cmp_i32(ex, i, OP8::GT));
    register(t, S_CMPK_GE_I32, |ex, i| sopk_cmp_i32(ex, i, OP8::GE));
    register(t, S_CMPK_LT_I32, |ex, i| sopk_cmp_i32(ex, i, OP8::LT));
    register(t, S_CMPK_LE_I32, |ex, i| sopk_cmp_i32(ex, i, OP8::LE));
    register(t, S_CMPK_EQ_U32, |ex, i| sopk_cmp_u32(ex, i, OP8::EQ));
    register(t, S_CMPK_LG_U32, |ex, i| sopk_cmp_u32(ex, i, OP8::LG));
    register(t, S_CMPK_GT_U32, |ex, i| sopk_cmp_u32(ex, i, OP8::GT));
    register(t, S_CMPK_GE_U32, |ex, i| sopk_cmp_u32(ex, i, OP8::GE));
    register(t, S_CMPK_LT_U32, |ex, i| sopk_cmp_u32(ex, i, OP8::LT));
    register(t, S_CMPK_LE_U32, |ex, i| sopk_cmp_u32(ex, i, OP8::LE));
    register(t, S_ADDK_I32, s_addk_i32);
    register(t, S_MULK_I32, s_mulk_i32);
    register(t, S_CBRANCH_I_FORK, s_cbranch_i_fork);
    register(t, S_GETREG_B32, s_getreg_b32);
    register(t, S_SETREG_B32, s_setreg_b32);
    register(t, S_GETREG_REGRD_B32, s_getreg_b32);
    register(t, S_SETREG_IMM32_B32, s_setreg_b32);
    register(t, S_CALL_B64, s_call_b64);
}

// SOPP

fn s_nop(_: &mut Exec, _: &Instruction) -> Result<Signals> {
    Ok(Signals::None)
}

fn s_endpgm(_: &mut Exec, _: &Instruction) -> Result<Signals> {
    Ok(Signals::EndOfProgram)
}

fn s_branch(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    ex.next_pc = ex.branch_target(inst, 0)?;
    Ok(Signals::None)
}

fn s_cbranch(ex: &mut Exec, inst: &Instruction, taken: fn(&Exec) -> bool) -> Result<Signals> {
    if taken(ex) {
        ex.next_pc = ex.branch_target(inst, 0)?;
    }
    Ok(Signals::None)
}

fn s_barrier(ex: &mut Exec, _: &Instruction) -> Result<Signals> {
    let workgroup = ex.wave.workgroup();
    let generation = ex.barriers.arrive(workgroup);
    if ex.barriers.is_released(workgroup, generation) {
        return Ok(Signals::None);
    }
    debug!(wave = ex.wave.id(), workgroup, generation, "blocked on barrier");
    ex.wave.blocked = Some(Block::Barrier { generation });
    Ok(Signals::Switch)
}

fn s_waitcnt(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let thresholds = WaitCounters::decode(ex.simm16(inst, 0)? as u32);
    if ex.wave.check_wait(thresholds)? {
        return Ok(Signals::None);
    }
    debug!(wave = ex.wave.id(), ?thresholds, counters = ?ex.wave.counters(), "blocked on waitcnt");
    ex.wave.blocked = Some(Block::Wait(thresholds));
    Ok(Signals::Switch)
}

fn s_setkill(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    if ex.simm16(inst, 0)? & 1 != 0 {
        debug!(wave = ex.wave.id(), "killed");
        return Ok(Signals::EndOfProgram);
    }
    Ok(Signals::None)
}

fn s_sethalt(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    if ex.simm16(inst, 0)? & 1 != 0 {
        ex.wave.status |= status::HALT;
        Ok(Signals::Halt)
    } else {
        ex.wave.status &= !status::HALT;
        Ok(Signals::None)
    }
}

fn s_setprio(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let prio = ex.simm16(inst, 0)? as u64 & 3;
    ex.wave.status = set_bits(ex.wave.status as u64, status::WAVE_PRIO_SHIFT, 2, prio) as u32;
    Ok(Signals::None)
}

fn s_sendmsg(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let simm16 = ex.simm16(inst, 0)?;
    debug!(
        wave = ex.wave.id(),
        msg = simm16 & 0xF,
        op = (simm16 >> 4) & 0x7,
        stream = (simm16 >> 8) & 0x3,
        "sendmsg"
    );
    Ok(Signals::None)
}

fn s_sendmsghalt(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    s_sendmsg(ex, inst)?;
    ex.wave.status |= status::HALT;
    Ok(Signals::Halt)
}

/// Saves the return address in TTMP0/TTMP1 with the trap id in TTMP1[23:16].
fn s_trap(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let trap_id = ex.simm16(inst, 0)? as u32 & 0xFF;
    let return_pc = ex.pc + 4;
    ex.wave.ttmp[0] = return_pc as u32;
    ex.wave.ttmp[1] = ((return_pc >> 32) as u32 & 0xFFFF) | (trap_id << 16);
    ex.wave.status |= status::TRAP;
    debug!(wave = ex.wave.id(), trap_id, "trap");
    Ok(Signals::Halt)
}

fn s_perflevel(ex: &mut Exec, inst: &Instruction, up: bool) -> Result<Signals> {
    let idx = (ex.simm16(inst, 0)? & 7) as usize;
    let level = &mut ex.wave.perf_levels[idx];
    *level = if up {
        level.wrapping_add(1)
    } else {
        level.wrapping_sub(1)
    };
    Ok(Signals::None)
}

fn s_set_gpr_idx_off(ex: &mut Exec, _: &Instruction) -> Result<Signals> {
    ex.wave.mode &= !MODE_GPR_IDX_EN;
    Ok(Signals::None)
}

fn s_set_gpr_idx_mode(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let imm = ex.simm16(inst, 0)? as u32;
    ex.wave.m0 = (ex.wave.m0 & 0xFFFF_0FFF) | ((imm & 0xF) << 12);
    Ok(Signals::None)
}

fn register_sopp(t: &mut HandlerTable) {
    register(t, S_NOP, s_nop);
    register(t, S_ENDPGM, s_endpgm);
    register(t, S_BRANCH, s_branch);
    register(t, S_CBRANCH_SCC0, |ex, i| s_cbranch(ex, i, |ex| !ex.wave.scc));
    register(t, S_CBRANCH_SCC1, |ex, i| s_cbranch(ex, i, |ex| ex.wave.scc));
    register(t, S_CBRANCH_VCCZ, |ex, i| s_cbranch(ex, i, |ex| ex.wave.vcc == 0));
    register(t, S_CBRANCH_VCCNZ, |ex, i| s_cbranch(ex, i, |ex| ex.wave.vcc != 0));
    register(t, S_CBRANCH_EXECZ, |ex, i| s_cbranch(ex, i, |ex| ex.wave.exec == 0));
    register(t, S_CBRANCH_EXECNZ, |ex, i| s_cbranch(ex, i, |ex| ex.wave.exec != 0));
    register(t, S_BARRIER, s_barrier);
    register(t, S_SETKILL, s_setkill);
    register(t, S_WAITCNT, s_waitcnt);
    register(t, S_SETHALT, s_sethalt);
    register(t, S_SLEEP, s_nop);
    register(t, S_SETPRIO, s_setprio);
    register(t, S_SENDMSG, s_sendmsg);
    register(t, S_SENDMSGHALT, s_sendmsghalt);
    register(t, S_TRAP, s_trap);
    register(t, S_ICACHE_INV, s_nop);
    register(t, S_INCPERFLEVEL, |ex, i| s_perflevel(ex, i, true));
    register(t, S_DECPERFLEVEL, |ex, i| s_perflevel(ex, i, false));
    register(t, S_TTRACEDATA, s_nop);
    register(t, S_CBRANCH_CDBGSYS, |ex, i| {
        s_cbranch(ex, i, |ex| ex.wave.status() & status::COND_DBG_SYS != 0)
    });
    register(t, S_CBRANCH_CDBGUSER, |ex, i| {
        s_cbranch(ex, i, |ex| ex.wave.status() & status::COND_DBG_USER != 0)
    });
    register(t, S_CBRANCH_CDBGSYS_OR_USER, |ex, i| {
        s_cbranch(ex, i, |ex| {
            ex.wave.status() & (status::COND_DBG_SYS | status::COND_DBG_USER) != 0
        })
    });
    register(t, S_CBRANCH_CDBGSYS_AND_USER, |ex, i| {
        s_cbranch(ex, i, |ex| {
            let both = status::COND_DBG_SYS | status::COND_DBG_USER;
            ex.wave.status() & both == both
        })
    });
    register(t, S_ENDPGM_SAVED, s_endpgm);
    register(t, S_SET_GPR_IDX_OFF, s_set_gpr_idx_off);
    register(t, S_SET_GPR_IDX_MODE, s_set_gpr_idx_mode);
    register(t, S_ENDPGM_ORDERED_PS_DONE, s_endpgm);
}

// Divergence

/// Splits EXEC on `cond`. A mixed split runs the smaller population first
/// (passes on a tie) and pushes one frame for the other.
fn fork(ex: &mut Exec, cond: u64, target: u64) {
    let exec = ex.wave.exec;
    let passes = exec & cond;
    let failures = exec & !cond;
    let fall_through = ex.next_pc;

    if passes == exec {
        ex.next_pc = target;
        return;
    }
    if failures == exec {
        return;
    }

    let (run_mask, run_pc, other_mask, other_pc) = if passes.count_ones() <= failures.count_ones() {
        (passes, target, failures, fall_through)
    } else {
        (failures, fall_through, passes, target)
    };
    ex.wave.divergence.push(ForkFrame {
        other_mask,
        other_pc,
        saved_exec: exec,
        resumed: false,
    });
    ex.wave.exec = run_mask;
    ex.next_pc = run_pc;
    debug!(
        wave = ex.wave.id(),
        pc = ex.pc,
        exec = run_mask,
        deferred = other_mask,
        depth = ex.wave.divergence.len(),
        "fork"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierTable;
    use crate::decoder::decode_line;
    use crate::execute::execute;
    use crate::memory::FlatMemory;
    use crate::wavefront::{Counter, Wavefront};

    /// Runs one instruction at `pc` and returns the signal and the next PC.
    fn run_at(wave: &mut Wavefront, pc: u64, text: &str) -> (Result<Signals>, u64) {
        let inst = decode_line(text).unwrap();
        let mut memory = FlatMemory::new(0);
        let barriers = BarrierTable::new();
        let mut ex = Exec {
            wave,
            memory: &mut memory,
            barriers: &barriers,
            pc,
            next_pc: pc + inst.size as u64,
        };
        let result = execute(&mut ex, &inst);
        (result, ex.next_pc)
    }

    fn run(wave: &mut Wavefront, text: &str) -> Signals {
        run_at(wave, 0, text).0.unwrap()
    }

    fn wave() -> Wavefront {
        Wavefront::new(0, 0, 64)
    }

    fn set(w: &mut Wavefront, reg: &str, value: u64) {
        w.write(&crate::operand::parse_operand(reg).unwrap(), value).unwrap();
    }

    #[test]
    fn add_u32_carry() {
        let mut w = wave();
        w.set_sgpr(1, 0xFFFF_FFFF);
        run(&mut w, "s_add_u32 s0, s1, 1");
        assert_eq!(w.sgpr(0), 0);
        assert!(w.scc());
        run(&mut w, "s_addc_u32 s2, 0, 0");
        assert_eq!(w.sgpr(2), 1);
        assert!(!w.scc());
    }

    #[test]
    fn signed_overflow() {
        let mut w = wave();
        w.set_sgpr(1, 0x7FFF_FFFF);
        run(&mut w, "s_add_i32 s0, s1, 1");
        assert_eq!(w.sgpr(0), 0x8000_0000);
        assert!(w.scc());
        run(&mut w, "s_sub_i32 s0, s1, -1");
        assert!(w.scc());
        run(&mut w, "s_sub_i32 s0, s1, 1");
        assert!(!w.scc());
        assert_eq!(w.sgpr(0), 0x7FFF_FFFE);
    }

    #[test]
    fn absdiff_wraps() {
        let mut w = wave();
        w.set_sgpr(1, 0x8000_0000);
        run(&mut w, "s_absdiff_i32 s0, s1, 1");
        assert_eq!(w.sgpr(0), 0x7FFF_FFFF);
        assert!(w.scc());
    }

    #[test]
    fn bfe_zero_length() {
        let mut w = wave();
        w.set_sgpr(1, 0xFFFF_FFFF);
        w.set_sgpr(2, 5);
        set(&mut w, "scc", 1);
        run(&mut w, "s_bfe_u32 s0, s1, s2");
        assert_eq!(w.sgpr(0), 0);
        assert!(!w.scc());
        w.set_sgpr(2, 4 | (8 << 16));
        run(&mut w, "s_bfe_i32 s0, s1, s2");
        assert_eq!(w.sgpr(0), 0xFFFF_FFFF);
    }

    #[test]
    fn bcnt0() {
        let mut w = wave();
        w.set_sgpr(1, 0xCCCC_CCCC);
        run(&mut w, "s_bcnt0_i32_b32 s0, s1");
        assert_eq!(w.sgpr(0), 16);
        assert!(w.scc());
    }

    #[test]
    fn bitwise_scc_tracks_result() {
        let boundaries = [0x0000_0000u32, 0xFFFF_FFFF, 0x8000_0000, 0x7FFF_FFFF];
        let ops = [
            "s_and_b32", "s_or_b32", "s_xor_b32", "s_andn2_b32", "s_orn2_b32", "s_nand_b32",
            "s_nor_b32", "s_xnor_b32", "s_lshl_b32", "s_lshr_b32", "s_ashr_i32",
        ];
        let mut w = wave();
        for op in ops {
            for &a in &boundaries {
                for &b in &boundaries {
                    w.set_sgpr(1, a);
                    w.set_sgpr(2, b);
                    run(&mut w, &format!("{} s0, s1, s2", op));
                    assert_eq!(w.scc(), w.sgpr(0) != 0, "{} {:#x} {:#x}", op, a, b);
                }
            }
        }
        for op in ["s_not_b32", "s_wqm_b32", "s_bcnt1_i32_b32", "s_abs_i32", "s_quadmask_b32"] {
            for &a in &boundaries {
                w.set_sgpr(1, a);
                run(&mut w, &format!("{} s0, s1", op));
                assert_eq!(w.scc(), w.sgpr(0) != 0, "{} {:#x}", op, a);
            }
        }
    }

    #[test]
    fn shifts_mask_their_amount() {
        let mut w = wave();
        w.set_sgpr(1, 1);
        w.set_sgpr(2, 33);
        run(&mut w, "s_lshl_b32 s0, s1, s2");
        assert_eq!(w.sgpr(0), 2);
        w.set_sgpr(4, 0x8000_0000);
        w.set_sgpr(5, 0x8000_0000);
        run(&mut w, "s_ashr_i64 s[6:7], s[4:5], 63");
        assert_eq!(w.sgpr(6), 0xFFFF_FFFF);
        assert_eq!(w.sgpr(7), 0xFFFF_FFFF);
    }

    #[test]
    fn min_max_scc() {
        let mut w = wave();
        w.set_sgpr(1, (-5i32) as u32);
        run(&mut w, "s_min_i32 s0, s1, 3");
        assert_eq!(w.sgpr(0), (-5i32) as u32);
        assert!(w.scc());
        run(&mut w, "s_max_u32 s0, s1, 3");
        assert_eq!(w.sgpr(0), (-5i32) as u32);
        assert!(w.scc());
    }

    #[test]
    fn packs_and_shift_adds() {
        let mut w = wave();
        w.set_sgpr(1, 0x1111_2222);
        w.set_sgpr(2, 0x3333_4444);
        run(&mut w, "s_pack_ll_b32_b16 s0, s1, s2");
        assert_eq!(w.sgpr(0), 0x4444_2222);
        run(&mut w, "s_pack_lh_b32_b16 s0, s1, s2");
        assert_eq!(w.sgpr(0), 0x3333_2222);
        run(&mut w, "s_pack_hh_b32_b16 s0, s1, s2");
        assert_eq!(w.sgpr(0), 0x3333_1111);
        w.set_sgpr(1, 0x8000_0000);
        run(&mut w, "s_lshl1_add_u32 s0, s1, 1");
        assert_eq!(w.sgpr(0), 1);
        assert!(w.scc());
    }

    #[test]
    fn bit_scans() {
        let mut w = wave();
        w.set_sgpr(1, 0);
        run(&mut w, "s_ff1_i32_b32 s0, s1");
        assert_eq!(w.sgpr(0), 0xFFFF_FFFF);
        run(&mut w, "s_flbit_i32_b32 s0, s1");
        assert_eq!(w.sgpr(0), 0xFFFF_FFFF);
        run(&mut w, "s_ff0_i32_b32 s0, s1");
        assert_eq!(w.sgpr(0), 0);
        w.set_sgpr(1, 0x0000_0100);
        run(&mut w, "s_ff1_i32_b32 s0, s1");
        assert_eq!(w.sgpr(0), 8);
        run(&mut w, "s_flbit_i32_b32 s0, s1");
        assert_eq!(w.sgpr(0), 23);
        w.set_sgpr(1, 0xFFFF_0000);
        run(&mut w, "s_flbit_i32 s0, s1");
        assert_eq!(w.sgpr(0), 16);
    }

    #[test]
    fn saveexec_and_wrexec_order() {
        let mut w = wave();
        w.set_exec(0xFF);
        w.set_sgpr(4, 0x0F);
        w.set_sgpr(5, 0);
        run(&mut w, "s_and_saveexec_b64 s[2:3], s[4:5]");
        assert_eq!(w.sgpr(2), 0xFF);
        assert_eq!(w.exec(), 0x0F);
        assert!(w.scc());

        let mut w = wave();
        w.set_exec(0xFF);
        run(&mut w, "s_andn2_wrexec_b64 s[2:3], s[4:5]");
        assert_eq!(w.exec(), 0);
        assert_eq!(w.sgpr(2), 0);
        assert!(!w.scc());

        // destination aliases EXEC
        let mut w = wave();
        w.set_exec(0xF0);
        w.set_sgpr(4, 0x3C);
        run(&mut w, "s_and_saveexec_b64 exec, s[4:5]");
        assert_eq!(w.exec(), 0x30);
        let mut w = wave();
        w.set_exec(0xF0);
        run(&mut w, "s_andn1_wrexec_b64 exec, s[4:5]");
        assert_eq!(w.exec(), 0xC0);
    }

    #[test]
    fn exec_family_semantics() {
        let mut w = wave();
        w.set_exec(0b1100);
        w.set_sgpr(4, 0b1010);
        w.set_sgpr(5, 0);
        run(&mut w, "s_orn2_saveexec_b64 s[2:3], s[4:5]");
        assert_eq!(w.exec(), 0b1010 | !0b1100u64);
        let mut w = wave();
        w.set_exec(0b1100);
        run(&mut w, "s_andn1_saveexec_b64 s[2:3], s[4:5]");
        assert_eq!(w.exec(), 0b0100);
    }

    #[test]
    fn movrel_bounds() {
        let mut w = wave();
        w.set_sgpr(12, 99);
        set(&mut w, "m0", 2);
        run(&mut w, "s_movrels_b32 s0, s10");
        assert_eq!(w.sgpr(0), 99);
        run(&mut w, "s_movreld_b32 s10, 7");
        assert_eq!(w.sgpr(12), 7);
        set(&mut w, "m0", 200);
        assert_eq!(
            run_at(&mut w, 0, "s_movrels_b32 s0, s10").0,
            Err(FaultKind::RegisterOutOfRange(210))
        );
        assert_eq!(
            run_at(&mut w, 0, "s_movreld_b32 s10, 7").0,
            Err(FaultKind::RegisterOutOfRange(210))
        );
    }

    #[test]
    fn sopk_immediates() {
        let mut w = wave();
        run(&mut w, "s_movk_i32 s0, 0xFFFE");
        assert_eq!(w.sgpr(0), 0xFFFF_FFFE);
        run(&mut w, "s_cmpk_lt_i32 s0, 0");
        assert!(w.scc());
        run(&mut w, "s_cmpk_lt_u32 s0, 0xFFFF");
        assert!(!w.scc());
        w.set_sgpr(1, 0x7FFF_FFFF);
        run(&mut w, "s_addk_i32 s1, 1");
        assert_eq!(w.sgpr(1), 0x8000_0000);
        assert!(w.scc());
    }

    #[test]
    fn hwreg_access() {
        let mut w = wave();
        run(&mut w, "s_setreg_imm32_b32 hwreg(HW_REG_MODE, 0, 4), 0xABCD");
        assert_eq!(w.mode(), 0xD);
        run(&mut w, "s_getreg_b32 s0, hwreg(HW_REG_MODE)");
        assert_eq!(w.sgpr(0), 0xD);
        assert!(matches!(
            run_at(&mut w, 0, "s_setreg_b32 hwreg(HW_REG_HW_ID), s0").0,
            Err(FaultKind::InvalidWriteTarget(_))
        ));
    }

    #[test]
    fn branches_and_calls() {
        let mut w = wave();
        assert_eq!(run_at(&mut w, 100, "s_branch -3").1, 92);
        set(&mut w, "scc", 0);
        assert_eq!(run_at(&mut w, 100, "s_cbranch_scc1 5").1, 104);
        assert_eq!(run_at(&mut w, 100, "s_cbranch_scc0 5").1, 124);
        assert_eq!(run_at(&mut w, 100, "s_call_b64 s[4:5], 2").1, 112);
        assert_eq!(w.sgpr(4), 104);
        assert_eq!(run_at(&mut w, 0, "s_getpc_b64 s[6:7]").1, 4);
        assert_eq!(w.sgpr(6), 4);
        assert_eq!(run_at(&mut w, 0, "s_swappc_b64 s[6:7], s[4:5]").1, 104);
    }

    #[test]
    fn uniform_fork_pushes_nothing() {
        let mut w = wave();
        w.set_sgpr(2, u32::MAX);
        w.set_sgpr(3, u32::MAX);
        let (_, next) = run_at(&mut w, 0, "s_cbranch_i_fork s[2:3], 4");
        assert_eq!(next, 20);
        assert_eq!(w.divergence_depth(), 0);
        w.set_sgpr(2, 0);
        w.set_sgpr(3, 0);
        let (_, next) = run_at(&mut w, 0, "s_cbranch_i_fork s[2:3], 4");
        assert_eq!(next, 4);
        assert_eq!(w.divergence_depth(), 0);
    }

    #[test]
    fn mixed_fork_and_join() {
        let mut w = Wavefront::new(0, 0, 8);
        w.set_sgpr(2, 0b0000_0011);
        w.set_sgpr(3, 0);
        w.set_sgpr(10, 0);
        let (_, next) = run_at(&mut w, 0, "s_cbranch_i_fork s[2:3], 4");
        assert_eq!(next, 20);
        assert_eq!(w.exec(), 0b0000_0011);
        assert_eq!(w.divergence_depth(), 1);

        let (_, next) = run_at(&mut w, 40, "s_cbranch_join s10");
        assert_eq!(next, 4);
        assert_eq!(w.exec(), 0b1111_1100);
        assert_eq!(w.divergence_depth(), 1);

        let (_, next) = run_at(&mut w, 40, "s_cbranch_join s10");
        assert_eq!(next, 44);
        assert_eq!(w.exec(), 0xFF);
        assert_eq!(w.divergence_depth(), 0);
    }

    #[test]
    fn fork_tie_takes_passes() {
        let mut w = Wavefront::new(0, 0, 4);
        w.set_sgpr(2, 0b0101);
        w.set_sgpr(3, 0);
        w.set_sgpr(4, 64);
        w.set_sgpr(5, 0);
        let (_, next) = run_at(&mut w, 0, "s_cbranch_g_fork s[2:3], s[4:5]");
        assert_eq!(next, 64);
        assert_eq!(w.exec(), 0b0101);
    }

    #[test]
    fn program_control() {
        let mut w = wave();
        assert_eq!(run(&mut w, "s_endpgm"), Signals::EndOfProgram);
        assert_eq!(run(&mut w, "s_setkill 0"), Signals::None);
        assert_eq!(run(&mut w, "s_setkill 1"), Signals::EndOfProgram);
        assert_eq!(run(&mut w, "s_sethalt 1"), Signals::Halt);
        assert_ne!(w.status() & status::HALT, 0);
        assert_eq!(run(&mut w, "s_sethalt 0"), Signals::None);
        assert_eq!(w.status() & status::HALT, 0);
        run(&mut w, "s_setprio 3");
        assert_eq!((w.status() >> 3) & 3, 3);
    }

    #[test]
    fn trap_saves_return_address() {
        let mut w = wave();
        let (signal, _) = run_at(&mut w, 0x1_0000_0010, "s_trap 2");
        assert_eq!(signal, Ok(Signals::Halt));
        assert_eq!(w.read(&crate::operand::parse_operand("ttmp0").unwrap()), Ok(0x14));
        assert_eq!(
            w.read(&crate::operand::parse_operand("ttmp1").unwrap()),
            Ok(0x0002_0001)
        );
    }

    #[test]
    fn gpr_index_mode() {
        let mut w = wave();
        w.set_sgpr(1, 0x1234_5678);
        run(&mut w, "s_set_gpr_idx_on s1, 9");
        assert_eq!(w.m0() & 0xFF, 0x78);
        assert_eq!((w.m0() >> 12) & 0xF, 9);
        assert_ne!(w.mode() & MODE_GPR_IDX_EN, 0);
        run(&mut w, "s_set_gpr_idx_mode 3");
        assert_eq!((w.m0() >> 12) & 0xF, 3);
        run(&mut w, "s_set_gpr_idx_idx 0x1FF");
        assert_eq!(w.m0() & 0xFF, 0xFF);
        run(&mut w, "s_set_gpr_idx_off");
        assert_eq!(w.mode() & MODE_GPR_IDX_EN, 0);
    }

    #[test]
    fn waitcnt_without_requests_is_unsatisfiable() {
        let mut w = wave();
        assert_eq!(run(&mut w, "s_waitcnt 0"), Signals::None);
        w.note_external_request(Counter::Lgkm);
        assert!(matches!(
            run_at(&mut w, 0, "s_waitcnt lgkmcnt(0)").0,
            Err(FaultKind::UnsatisfiableWait { counter: "lgkmcnt", .. })
        ));
    }

    #[test]
    fn lone_barrier_passes() {
        let mut w = wave();
        assert_eq!(run(&mut w, "s_barrier"), Signals::None);
        assert_eq!(w.blocked(), None);
    }

    #[test]
    fn bitreplicate_and_bitset() {
        let mut w = wave();
        w.set_sgpr(1, 0b101);
        run(&mut w, "s_bitreplicate_b64_b32 s[2:3], s1");
        assert_eq!(w.sgpr(2), 0b11_00_11);
        run(&mut w, "s_bitset1_b64 s[2:3], 40");
        assert_eq!(w.sgpr(3), 1 << 8);
        run(&mut w, "s_bitset0_b32 s2, 0");
        assert_eq!(w.sgpr(2), 0b11_00_10);
    }
}
