//! Vector ALU: VOP1, VOP2, VOP3 and VOPC.
//!
//! Every handler computes the per-lane results from the state before the
//! instruction and commits them in one go, so a destination that aliases a
//! source never feeds a later lane. Lanes disabled in EXEC are neither
//! evaluated nor written, and lane masks written to scalar destinations keep
//! the bits of inactive lanes.

use crate::alu::{
    abs_neg, add_u32, cmp_class, cmp_float, cmp_int, extract, f32_to_u32, f64_to_u64,
    find_first_one, find_last_one, find_last_signed, fma, is_quiet_nan_f32, is_quiet_nan_f64,
    mul_hi_i32, mul_hi_u32, sext24, sub_u32, u32_to_f32, u64_to_f64, OP16, OP8,
};
use crate::bit::mask;
use crate::decoder::Instruction;
use crate::error::{FaultKind, Result};
use crate::execute::{register, Exec, HandlerTable, Signals};
use crate::instructions::Format;
use crate::instructions::Opcode::{self, *};
use libm::{ceilf, exp2f, floorf, frexp, frexpf, ldexp, ldexpf, log2f, rintf, truncf};
use std::f32::consts::PI;

pub(crate) fn register_all(t: &mut HandlerTable) {
    register_vop1(t);
    register_vop2(t);
    register_vop3(t);
    for opcode in Opcode::all().filter(|op| op.format() == Format::VOPC) {
        register(t, opcode, v_cmp);
    }
}

type Lanes = Vec<Option<Vec<u32>>>;

/// Evaluates `f` on every active lane. Results are `words` dwords wide.
fn map_lanes(ex: &Exec, words: usize, f: impl Fn(&Exec, usize) -> Result<u64>) -> Result<Lanes> {
    let mut results = vec![None; ex.wave.lanes()];
    for (elem, result) in results.iter_mut().enumerate() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        let d_value = f(ex, elem)?;
        *result = Some(match words {
            1 => vec![d_value as u32],
            _ => vec![d_value as u32, (d_value >> 32) as u32],
        });
    }
    Ok(results)
}

/// Merges a per-lane condition into a scalar mask: inactive lanes keep their bit.
fn write_lane_mask(ex: &mut Exec, inst: &Instruction, idx: usize, bits: u64) -> Result<()> {
    let exec = ex.wave.exec;
    let old = ex.read_sop_src_pair(inst, idx)?;
    ex.write_sop_dst_pair(inst, idx, (old & !exec) | (bits & exec))
}

fn read_f32(ex: &Exec, elem: usize, inst: &Instruction, idx: usize) -> Result<f32> {
    let value = u32_to_f32(ex.read_vop_src(elem, inst, idx)?);
    Ok(abs_neg(value, inst.abs, inst.neg, idx))
}

fn read_f64(ex: &Exec, elem: usize, inst: &Instruction, idx: usize) -> Result<f64> {
    let value = u64_to_f64(ex.read_vop_src_pair(elem, inst, idx)?);
    Ok(abs_neg(value, inst.abs, inst.neg, idx))
}

fn commit(ex: &mut Exec, inst: &Instruction, results: &Lanes) -> Result<Signals> {
    ex.wave.write_lanes(&inst.operands[0], results)?;
    Ok(Signals::None)
}

fn vop_u32_1(ex: &mut Exec, inst: &Instruction, f: fn(u32) -> u32) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)?;
        Ok(f(s0_value) as u64)
    })?;
    commit(ex, inst, &results)
}

fn vop_u32_2(ex: &mut Exec, inst: &Instruction, f: fn(u32, u32) -> u32) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)?;
        let s1_value = ex.read_vop_src(elem, inst, 2)?;
        Ok(f(s0_value, s1_value) as u64)
    })?;
    commit(ex, inst, &results)
}

fn vop_u32_3(ex: &mut Exec, inst: &Instruction, f: fn(u32, u32, u32) -> u32) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)?;
        let s1_value = ex.read_vop_src(elem, inst, 2)?;
        let s2_value = ex.read_vop_src(elem, inst, 3)?;
        Ok(f(s0_value, s1_value, s2_value) as u64)
    })?;
    commit(ex, inst, &results)
}

fn vop_f32_1(ex: &mut Exec, inst: &Instruction, f: fn(f32) -> f32) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = read_f32(ex, elem, inst, 1)?;
        Ok(f32_to_u32(f(s0_value)) as u64)
    })?;
    commit(ex, inst, &results)
}

fn vop_f32_2(ex: &mut Exec, inst: &Instruction, f: fn(f32, f32) -> f32) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = read_f32(ex, elem, inst, 1)?;
        let s1_value = read_f32(ex, elem, inst, 2)?;
        Ok(f32_to_u32(f(s0_value, s1_value)) as u64)
    })?;
    commit(ex, inst, &results)
}

fn vop_f32_3(ex: &mut Exec, inst: &Instruction, f: fn(f32, f32, f32) -> f32) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = read_f32(ex, elem, inst, 1)?;
        let s1_value = read_f32(ex, elem, inst, 2)?;
        let s2_value = read_f32(ex, elem, inst, 3)?;
        Ok(f32_to_u32(f(s0_value, s1_value, s2_value)) as u64)
    })?;
    commit(ex, inst, &results)
}

fn vop_f64_1(ex: &mut Exec, inst: &Instruction, f: fn(f64) -> f64) -> Result<Signals> {
    let results = map_lanes(ex, 2, |ex, elem| {
        let s0_value = read_f64(ex, elem, inst, 1)?;
        Ok(f64_to_u64(f(s0_value)))
    })?;
    commit(ex, inst, &results)
}

fn vop_f64_2(ex: &mut Exec, inst: &Instruction, f: fn(f64, f64) -> f64) -> Result<Signals> {
    let results = map_lanes(ex, 2, |ex, elem| {
        let s0_value = read_f64(ex, elem, inst, 1)?;
        let s1_value = read_f64(ex, elem, inst, 2)?;
        Ok(f64_to_u64(f(s0_value, s1_value)))
    })?;
    commit(ex, inst, &results)
}

fn vop_f64_3(ex: &mut Exec, inst: &Instruction, f: fn(f64, f64, f64) -> f64) -> Result<Signals> {
    let results = map_lanes(ex, 2, |ex, elem| {
        let s0_value = read_f64(ex, elem, inst, 1)?;
        let s1_value = read_f64(ex, elem, inst, 2)?;
        let s2_value = read_f64(ex, elem, inst, 3)?;
        Ok(f64_to_u64(f(s0_value, s1_value, s2_value)))
    })?;
    commit(ex, inst, &results)
}

/// 32-bit float source, result of another shape (conversions and frexp).
fn vop_from_f32(ex: &mut Exec, inst: &Instruction, words: usize, f: fn(f32) -> u64) -> Result<Signals> {
    let results = map_lanes(ex, words, |ex, elem| {
        let s0_value = read_f32(ex, elem, inst, 1)?;
        Ok(f(s0_value))
    })?;
    commit(ex, inst, &results)
}

fn vop_from_f64(ex: &mut Exec, inst: &Instruction, words: usize, f: fn(f64) -> u64) -> Result<Signals> {
    let results = map_lanes(ex, words, |ex, elem| {
        let s0_value = read_f64(ex, elem, inst, 1)?;
        Ok(f(s0_value))
    })?;
    commit(ex, inst, &results)
}

/// Integer source, 64-bit result.
fn vop_to_64(ex: &mut Exec, inst: &Instruction, f: fn(u32) -> u64) -> Result<Signals> {
    let results = map_lanes(ex, 2, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)?;
        Ok(f(s0_value))
    })?;
    commit(ex, inst, &results)
}

// VOP1

fn v_nop(_: &mut Exec, _: &Instruction) -> Result<Signals> {
    Ok(Signals::None)
}

fn v_readfirstlane_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let lane = match find_first_one(ex.wave.exec) {
        -1 => 0,
        lane => lane as usize,
    };
    let s0_value = ex.read_vop_src(lane, inst, 1)?;
    ex.write_sop_dst(inst, 0, s0_value)?;
    Ok(Signals::None)
}

fn fract(x: f32) -> f32 {
    (x - floorf(x)).min(1.0 - f32::EPSILON / 2.0)
}

/// Exponent part of `frexp`; 0 for infinities and NaN.
fn frexp_exp_f32(x: f32) -> u64 {
    if x.is_finite() {
        frexpf(x).1 as u32 as u64
    } else {
        0
    }
}

fn frexp_mant_f32(x: f32) -> u64 {
    let mant = if x.is_finite() { frexpf(x).0 } else { x };
    f32_to_u32(mant) as u64
}

fn frexp_exp_f64(x: f64) -> u64 {
    if x.is_finite() {
        frexp(x).1 as u32 as u64
    } else {
        0
    }
}

fn frexp_mant_f64(x: f64) -> u64 {
    let mant = if x.is_finite() { frexp(x).0 } else { x };
    f64_to_u64(mant)
}

fn register_vop1(t: &mut HandlerTable) {
    register(t, V_NOP, v_nop);
    register(t, V_MOV_B32, |ex, i| vop_u32_1(ex, i, |a| a));
    register(t, V_READFIRSTLANE_B32, v_readfirstlane_b32);
    register(t, V_CVT_I32_F64, |ex, i| vop_from_f64(ex, i, 1, |a| a as i32 as u32 as u64));
    register(t, V_CVT_F64_I32, |ex, i| vop_to_64(ex, i, |a| f64_to_u64(a as i32 as f64)));
    register(t, V_CVT_F32_I32, |ex, i| vop_u32_1(ex, i, |a| f32_to_u32(a as i32 as f32)));
    register(t, V_CVT_F32_U32, |ex, i| vop_u32_1(ex, i, |a| f32_to_u32(a as f32)));
    register(t, V_CVT_U32_F32, |ex, i| vop_from_f32(ex, i, 1, |a| a as u32 as u64));
    register(t, V_CVT_I32_F32, |ex, i| vop_from_f32(ex, i, 1, |a| a as i32 as u32 as u64));
    register(t, V_CVT_F32_F64, |ex, i| vop_from_f64(ex, i, 1, |a| f32_to_u32(a as f32) as u64));
    register(t, V_CVT_F64_F32, |ex, i| vop_from_f32(ex, i, 2, |a| f64_to_u64(a as f64)));
    register(t, V_CVT_U32_F64, |ex, i| vop_from_f64(ex, i, 1, |a| a as u32 as u64));
    register(t, V_CVT_F64_U32, |ex, i| vop_to_64(ex, i, |a| f64_to_u64(a as f64)));
    register(t, V_FRACT_F32, |ex, i| vop_f32_1(ex, i, fract));
    register(t, V_TRUNC_F32, |ex, i| vop_f32_1(ex, i, truncf));
    register(t, V_CEIL_F32, |ex, i| vop_f32_1(ex, i, ceilf));
    register(t, V_RNDNE_F32, |ex, i| vop_f32_1(ex, i, rintf));
    register(t, V_FLOOR_F32, |ex, i| vop_f32_1(ex, i, floorf));
    register(t, V_EXP_F32, |ex, i| vop_f32_1(ex, i, exp2f));
    register(t, V_LOG_F32, |ex, i| vop_f32_1(ex, i, log2f));
    register(t, V_RCP_F32, |ex, i| vop_f32_1(ex, i, |a| 1.0 / a));
    register(t, V_RSQ_F32, |ex, i| vop_f32_1(ex, i, |a| 1.0 / a.sqrt()));
    register(t, V_SQRT_F32, |ex, i| vop_f32_1(ex, i, |a| a.sqrt()));
    register(t, V_SIN_F32, |ex, i| vop_f32_1(ex, i, |a| libm::sinf(a * 2.0 * PI)));
    register(t, V_COS_F32, |ex, i| vop_f32_1(ex, i, |a| libm::cosf(a * 2.0 * PI)));
    register(t, V_RCP_F64, |ex, i| vop_f64_1(ex, i, |a| 1.0 / a));
    register(t, V_RSQ_F64, |ex, i| vop_f64_1(ex, i, |a| 1.0 / a.sqrt()));
    register(t, V_SQRT_F64, |ex, i| vop_f64_1(ex, i, |a| a.sqrt()));
    register(t, V_NOT_B32, |ex, i| vop_u32_1(ex, i, |a| !a));
    register(t, V_BFREV_B32, |ex, i| vop_u32_1(ex, i, |a| a.reverse_bits()));
    register(t, V_FFBH_U32, |ex, i| vop_u32_1(ex, i, |a| find_last_one(a as u64, 32) as u32));
    register(t, V_FFBL_B32, |ex, i| vop_u32_1(ex, i, |a| find_first_one(a as u64) as u32));
    register(t, V_FFBH_I32, |ex, i| vop_u32_1(ex, i, |a| find_last_signed(a as u64, 32) as u32));
    register(t, V_FREXP_EXP_I32_F32, |ex, i| vop_from_f32(ex, i, 1, frexp_exp_f32));
    register(t, V_FREXP_MANT_F32, |ex, i| vop_from_f32(ex, i, 1, frexp_mant_f32));
    register(t, V_FREXP_EXP_I32_F64, |ex, i| vop_from_f64(ex, i, 1, frexp_exp_f64));
    register(t, V_FREXP_MANT_F64, |ex, i| vop_from_f64(ex, i, 2, frexp_mant_f64));
}

// VOP2

fn v_cndmask_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let select = ex.read_sop_src_pair(inst, 3)?;
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)?;
        let s1_value = ex.read_vop_src(elem, inst, 2)?;
        let d_value = if (select >> elem) & 1 != 0 { s1_value } else { s0_value };
        Ok(d_value as u64)
    })?;
    commit(ex, inst, &results)
}

fn v_mac_f32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = read_f32(ex, elem, inst, 1)?;
        let s1_value = read_f32(ex, elem, inst, 2)?;
        let d_value = u32_to_f32(ex.read_vop_src(elem, inst, 0)?);
        Ok(f32_to_u32(s0_value * s1_value + d_value) as u64)
    })?;
    commit(ex, inst, &results)
}

fn v_ldexp_f32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = read_f32(ex, elem, inst, 1)?;
        let s1_value = ex.read_vop_src(elem, inst, 2)? as i32;
        Ok(f32_to_u32(ldexpf(s0_value, s1_value)) as u64)
    })?;
    commit(ex, inst, &results)
}

/// Add/subtract with a per-lane carry. Sources are operands 2 and 3; the
/// carry-in mask, when present, is operand 4.
fn v_carry_op(ex: &mut Exec, inst: &Instruction, f: fn(u32, u32, u32) -> (u32, bool)) -> Result<Signals> {
    let carry_in = if inst.operands.len() > 4 {
        ex.read_sop_src_pair(inst, 4)?
    } else {
        0
    };
    let mut results = vec![None; ex.wave.lanes()];
    let mut carry_out = 0u64;
    for (elem, result) in results.iter_mut().enumerate() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        let s0_value = ex.read_vop_src(elem, inst, 2)?;
        let s1_value = ex.read_vop_src(elem, inst, 3)?;
        let (d_value, carry) = f(s0_value, s1_value, ((carry_in >> elem) & 1) as u32);
        *result = Some(vec![d_value]);
        carry_out |= (carry as u64) << elem;
    }
    ex.wave.write_lanes(&inst.operands[0], &results)?;
    write_lane_mask(ex, inst, 1, carry_out)?;
    Ok(Signals::None)
}

fn register_vop2(t: &mut HandlerTable) {
    register(t, V_CNDMASK_B32, v_cndmask_b32);
    register(t, V_ADD_F32, |ex, i| vop_f32_2(ex, i, |a, b| a + b));
    register(t, V_SUB_F32, |ex, i| vop_f32_2(ex, i, |a, b| a - b));
    register(t, V_SUBREV_F32, |ex, i| vop_f32_2(ex, i, |a, b| b - a));
    register(t, V_MUL_F32, |ex, i| vop_f32_2(ex, i, |a, b| a * b));
    register(t, V_MUL_I32_I24, |ex, i| {
        vop_u32_2(ex, i, |a, b| (sext24(a) * sext24(b)) as u32)
    });
    register(t, V_MUL_HI_I32_I24, |ex, i| {
        vop_u32_2(ex, i, |a, b| ((sext24(a) * sext24(b)) >> 32) as u32)
    });
    register(t, V_MUL_U32_U24, |ex, i| {
        vop_u32_2(ex, i, |a, b| (a & 0xFF_FFFF).wrapping_mul(b & 0xFF_FFFF))
    });
    register(t, V_MUL_HI_U32_U24, |ex, i| {
        vop_u32_2(ex, i, |a, b| mul_hi_u32(a & 0xFF_FFFF, b & 0xFF_FFFF))
    });
    register(t, V_MIN_F32, |ex, i| vop_f32_2(ex, i, f32::min));
    register(t, V_MAX_F32, |ex, i| vop_f32_2(ex, i, f32::max));
    register(t, V_MIN_I32, |ex, i| vop_u32_2(ex, i, |a, b| (a as i32).min(b as i32) as u32));
    register(t, V_MAX_I32, |ex, i| vop_u32_2(ex, i, |a, b| (a as i32).max(b as i32) as u32));
    register(t, V_MIN_U32, |ex, i| vop_u32_2(ex, i, u32::min));
    register(t, V_MAX_U32, |ex, i| vop_u32_2(ex, i, u32::max));
    register(t, V_LSHRREV_B32, |ex, i| vop_u32_2(ex, i, |a, b| b >> (a & 31)));
    register(t, V_ASHRREV_I32, |ex, i| vop_u32_2(ex, i, |a, b| ((b as i32) >> (a & 31)) as u32));
    register(t, V_LSHLREV_B32, |ex, i| vop_u32_2(ex, i, |a, b| b << (a & 31)));
    register(t, V_AND_B32, |ex, i| vop_u32_2(ex, i, |a, b| a & b));
    register(t, V_OR_B32, |ex, i| vop_u32_2(ex, i, |a, b| a | b));
    register(t, V_XOR_B32, |ex, i| vop_u32_2(ex, i, |a, b| a ^ b));
    register(t, V_MAC_F32, v_mac_f32);
    register(t, V_ADD_U32, |ex, i| v_carry_op(ex, i, add_u32));
    register(t, V_SUB_U32, |ex, i| v_carry_op(ex, i, sub_u32));
    register(t, V_SUBREV_U32, |ex, i| v_carry_op(ex, i, |a, b, c| sub_u32(b, a, c)));
    register(t, V_ADDC_U32, |ex, i| v_carry_op(ex, i, add_u32));
    register(t, V_SUBB_U32, |ex, i| v_carry_op(ex, i, sub_u32));
    register(t, V_SUBBREV_U32, |ex, i| v_carry_op(ex, i, |a, b, c| sub_u32(b, a, c)));
    register(t, V_LDEXP_F32, v_ldexp_f32);
}

// VOP3

fn min3<T: PartialOrd + Copy>(a: T, b: T, c: T) -> T {
    let m = if b < a { b } else { a };
    if c < m {
        c
    } else {
        m
    }
}

fn max3<T: PartialOrd + Copy>(a: T, b: T, c: T) -> T {
    let m = if b > a { b } else { a };
    if c > m {
        c
    } else {
        m
    }
}

fn med3<T: Ord + Copy>(a: T, b: T, c: T) -> T {
    a.min(b).max(a.max(b).min(c))
}

fn v_ldexp_f64(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let results = map_lanes(ex, 2, |ex, elem| {
        let s0_value = read_f64(ex, elem, inst, 1)?;
        let s1_value = ex.read_vop_src(elem, inst, 2)? as i32;
        Ok(f64_to_u64(ldexp(s0_value, s1_value)))
    })?;
    commit(ex, inst, &results)
}

/// 64-bit shifts: operand 1 is the shift amount, operand 2 the value.
fn v_shift_b64(ex: &mut Exec, inst: &Instruction, f: fn(u64, u32) -> u64) -> Result<Signals> {
    let results = map_lanes(ex, 2, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)?;
        let s1_value = ex.read_vop_src_pair(elem, inst, 2)?;
        Ok(f(s1_value, s0_value & 63))
    })?;
    commit(ex, inst, &results)
}

fn lane_select(ex: &Exec, inst: &Instruction, idx: usize) -> Result<usize> {
    let lane = (ex.read_sop_src(inst, idx)? & 63) as usize;
    if lane >= ex.wave.lanes() {
        return Err(FaultKind::RegisterOutOfRange(lane));
    }
    Ok(lane)
}

fn v_readlane_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let lane = lane_select(ex, inst, 2)?;
    let s0_value = ex.read_vop_src(lane, inst, 1)?;
    ex.write_sop_dst(inst, 0, s0_value)?;
    Ok(Signals::None)
}

fn v_writelane_b32(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let lane = lane_select(ex, inst, 2)?;
    let s0_value = ex.read_sop_src(inst, 1)?;
    ex.wave.vector_write(lane, &inst.operands[0], s0_value as u64)?;
    Ok(Signals::None)
}

fn v_mbcnt(ex: &mut Exec, inst: &Instruction, hi: bool) -> Result<Signals> {
    let results = map_lanes(ex, 1, |ex, elem| {
        let s0_value = ex.read_vop_src(elem, inst, 1)? as u64;
        let s1_value = ex.read_vop_src(elem, inst, 2)?;
        let below = if hi { elem.saturating_sub(32) } else { elem.min(32) };
        let count = (s0_value & mask(below)).count_ones();
        Ok(count.wrapping_add(s1_value) as u64)
    })?;
    commit(ex, inst, &results)
}

/// `D = S0 * S1 + S2` at 64 bits with a per-lane carry mask in operand 1.
fn v_mad_64_32(ex: &mut Exec, inst: &Instruction, signed: bool) -> Result<Signals> {
    let mut results = vec![None; ex.wave.lanes()];
    let mut carry_out = 0u64;
    for (elem, result) in results.iter_mut().enumerate() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        let s0_value = ex.read_vop_src(elem, inst, 2)?;
        let s1_value = ex.read_vop_src(elem, inst, 3)?;
        let s2_value = ex.read_vop_src_pair(elem, inst, 4)?;
        let (d_value, carry) = if signed {
            let d = (s0_value as i32 as i128) * (s1_value as i32 as i128) + (s2_value as i64 as i128);
            (d as u64, d > i64::MAX as i128 || d < i64::MIN as i128)
        } else {
            let d = (s0_value as u128) * (s1_value as u128) + (s2_value as u128);
            (d as u64, d > u64::MAX as u128)
        };
        *result = Some(vec![d_value as u32, (d_value >> 32) as u32]);
        carry_out |= (carry as u64) << elem;
    }
    ex.wave.write_lanes(&inst.operands[0], &results)?;
    write_lane_mask(ex, inst, 1, carry_out)?;
    Ok(Signals::None)
}

fn register_vop3(t: &mut HandlerTable) {
    register(t, V_MAD_F32, |ex, i| vop_f32_3(ex, i, |a, b, c| a * b + c));
    register(t, V_MAD_I32_I24, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| (sext24(a) * sext24(b)).wrapping_add(c as i32 as i64) as u32)
    });
    register(t, V_MAD_U32_U24, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| (a & 0xFF_FFFF).wrapping_mul(b & 0xFF_FFFF).wrapping_add(c))
    });
    register(t, V_BFE_U32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| extract(a as u64, b & 31, c & 31, 32, false) as u32)
    });
    register(t, V_BFE_I32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| extract(a as u64, b & 31, c & 31, 32, true) as u32)
    });
    register(t, V_BFI_B32, |ex, i| vop_u32_3(ex, i, |a, b, c| (a & b) | (!a & c)));
    register(t, V_FMA_F32, |ex, i| vop_f32_3(ex, i, fma));
    register(t, V_FMA_F64, |ex, i| vop_f64_3(ex, i, fma));
    register(t, V_ALIGNBIT_B32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| ((((a as u64) << 32) | b as u64) >> (c & 31)) as u32)
    });
    register(t, V_ALIGNBYTE_B32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| ((((a as u64) << 32) | b as u64) >> (8 * (c & 3))) as u32)
    });
    register(t, V_MIN3_F32, |ex, i| vop_f32_3(ex, i, |a, b, c| a.min(b).min(c)));
    register(t, V_MIN3_I32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| min3(a as i32, b as i32, c as i32) as u32)
    });
    register(t, V_MIN3_U32, |ex, i| vop_u32_3(ex, i, min3));
    register(t, V_MAX3_F32, |ex, i| vop_f32_3(ex, i, |a, b, c| a.max(b).max(c)));
    register(t, V_MAX3_I32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| max3(a as i32, b as i32, c as i32) as u32)
    });
    register(t, V_MAX3_U32, |ex, i| vop_u32_3(ex, i, max3));
    register(t, V_MED3_I32, |ex, i| {
        vop_u32_3(ex, i, |a, b, c| med3(a as i32, b as i32, c as i32) as u32)
    });
    register(t, V_MED3_U32, |ex, i| vop_u32_3(ex, i, med3));
    register(t, V_ADD_F64, |ex, i| vop_f64_2(ex, i, |a, b| a + b));
    register(t, V_MUL_F64, |ex, i| vop_f64_2(ex, i, |a, b| a * b));
    register(t, V_MIN_F64, |ex, i| vop_f64_2(ex, i, f64::min));
    register(t, V_MAX_F64, |ex, i| vop_f64_2(ex, i, f64::max));
    register(t, V_LDEXP_F64, v_ldexp_f64);
    register(t, V_MUL_LO_U32, |ex, i| vop_u32_2(ex, i, u32::wrapping_mul));
    register(t, V_MUL_HI_U32, |ex, i| vop_u32_2(ex, i, mul_hi_u32));
    register(t, V_MUL_LO_I32, |ex, i| {
        vop_u32_2(ex, i, |a, b| (a as i32).wrapping_mul(b as i32) as u32)
    });
    register(t, V_MUL_HI_I32, |ex, i| {
        vop_u32_2(ex, i, |a, b| mul_hi_i32(a as i32, b as i32) as u32)
    });
    register(t, V_LSHLREV_B64, |ex, i| v_shift_b64(ex, i, |v, s| v << s));
    register(t, V_LSHRREV_B64, |ex, i| v_shift_b64(ex, i, |v, s| v >> s));
    register(t, V_ASHRREV_I64, |ex, i| v_shift_b64(ex, i, |v, s| ((v as i64) >> s) as u64));
    register(t, V_READLANE_B32, v_readlane_b32);
    register(t, V_WRITELANE_B32, v_writelane_b32);
    register(t, V_BCNT_U32_B32, |ex, i| vop_u32_2(ex, i, |a, b| a.count_ones().wrapping_add(b)));
    register(t, V_MBCNT_LO_U32_B32, |ex, i| v_mbcnt(ex, i, false));
    register(t, V_MBCNT_HI_U32_B32, |ex, i| v_mbcnt(ex, i, true));
    register(t, V_MAD_U64_U32, |ex, i| v_mad_64_32(ex, i, false));
    register(t, V_MAD_I64_I32, |ex, i| v_mad_64_32(ex, i, true));
}

// VOPC

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compare {
    F32(OP16),
    F64(OP16),
    I32(OP8),
    I64(OP8),
    U32(OP8),
    U64(OP8),
    Class32,
    Class64,
}

/// Reads the predicate, operand type and EXEC-writing flag off the mnemonic,
/// e.g. `v_cmpx_nlt_f32`.
fn compare_of(opcode: Opcode) -> Option<(Compare, bool)> {
    let name = opcode.mnemonic();
    let (rest, writes_exec) = match name.strip_prefix("v_cmpx_") {
        Some(rest) => (rest, true),
        None => (name.strip_prefix("v_cmp_")?, false),
    };
    let (pred, ty) = rest.rsplit_once('_')?;
    let compare = match (pred, ty) {
        ("class", "f32") => Compare::Class32,
        ("class", "f64") => Compare::Class64,
        (pred, "f32") => Compare::F32(OP16::parse(pred)?),
        (pred, "f64") => Compare::F64(OP16::parse(pred)?),
        (pred, "i32") => Compare::I32(OP8::parse(pred)?),
        (pred, "i64") => Compare::I64(OP8::parse(pred)?),
        (pred, "u32") => Compare::U32(OP8::parse(pred)?),
        (pred, "u64") => Compare::U64(OP8::parse(pred)?),
        _ => return None,
    };
    Some((compare, writes_exec))
}

fn compare_lane(ex: &Exec, inst: &Instruction, elem: usize, compare: Compare) -> Result<bool> {
    Ok(match compare {
        Compare::F32(op) => cmp_float(read_f32(ex, elem, inst, 1)?, read_f32(ex, elem, inst, 2)?, op),
        Compare::F64(op) => cmp_float(read_f64(ex, elem, inst, 1)?, read_f64(ex, elem, inst, 2)?, op),
        Compare::I32(op) => cmp_int(
            ex.read_vop_src(elem, inst, 1)? as i32,
            ex.read_vop_src(elem, inst, 2)? as i32,
            op,
        ),
        Compare::I64(op) => cmp_int(
            ex.read_vop_src_pair(elem, inst, 1)? as i64,
            ex.read_vop_src_pair(elem, inst, 2)? as i64,
            op,
        ),
        Compare::U32(op) => cmp_int(ex.read_vop_src(elem, inst, 1)?, ex.read_vop_src(elem, inst, 2)?, op),
        Compare::U64(op) => cmp_int(
            ex.read_vop_src_pair(elem, inst, 1)?,
            ex.read_vop_src_pair(elem, inst, 2)?,
            op,
        ),
        Compare::Class32 => {
            let raw = ex.read_vop_src(elem, inst, 1)?;
            let value = abs_neg(u32_to_f32(raw), inst.abs, inst.neg, 1);
            cmp_class(value, is_quiet_nan_f32(raw), ex.read_vop_src(elem, inst, 2)?)
        }
        Compare::Class64 => {
            let raw = ex.read_vop_src_pair(elem, inst, 1)?;
            let value = abs_neg(u64_to_f64(raw), inst.abs, inst.neg, 1);
            cmp_class(value, is_quiet_nan_f64(raw), ex.read_vop_src(elem, inst, 2)?)
        }
    })
}

fn v_cmp(ex: &mut Exec, inst: &Instruction) -> Result<Signals> {
    let (compare, writes_exec) =
        compare_of(inst.opcode).ok_or(FaultKind::ImplementationFault(inst.opcode))?;
    let mut bits = 0u64;
    for elem in 0..ex.wave.lanes() {
        if !ex.wave.is_active(elem) {
            continue;
        }
        if compare_lane(ex, inst, elem, compare)? {
            bits |= 1 << elem;
        }
    }
    let exec = ex.wave.exec;
    write_lane_mask(ex, inst, 0, bits)?;
    if writes_exec {
        ex.wave.set_exec(bits & exec);
    }
    Ok(Signals::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierTable;
    use crate::decoder::decode_line;
    use crate::execute::execute;
    use crate::memory::FlatMemory;
    use crate::operand::parse_operand;
    use crate::wavefront::Wavefront;
    use rand::{Rng, SeedableRng};

    fn try_run(wave: &mut Wavefront, text: &str) -> Result<Signals> {
        let inst = decode_line(text).unwrap();
        let mut memory = FlatMemory::new(0);
        let barriers = BarrierTable::new();
        let mut ex = Exec {
            wave,
            memory: &mut memory,
            barriers: &barriers,
            pc: 0,
            next_pc: inst.size as u64,
        };
        execute(&mut ex, &inst)
    }

    fn run(wave: &mut Wavefront, text: &str) {
        try_run(wave, text).unwrap();
    }

    fn set(wave: &mut Wavefront, reg: &str, value: u64) {
        wave.write(&parse_operand(reg).unwrap(), value).unwrap();
    }

    fn fill(wave: &mut Wavefront, reg: usize, f: impl Fn(usize) -> u32) {
        for lane in 0..wave.lanes() {
            wave.set_vgpr(lane, reg, f(lane));
        }
    }

    #[test]
    fn inactive_lanes_are_untouched() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let mut w = Wavefront::new(0, 0, 64);
            let exec: u64 = rng.gen();
            let a: Vec<u32> = (0..64).map(|_| rng.gen()).collect();
            let b: Vec<u32> = (0..64).map(|_| rng.gen()).collect();
            fill(&mut w, 1, |lane| a[lane]);
            fill(&mut w, 2, |lane| b[lane]);
            fill(&mut w, 3, |_| 0xDEAD_BEEF);
            w.set_exec(exec);
            run(&mut w, "v_add_u32 v3, vcc, v1, v2");
            for lane in 0..64 {
                if (exec >> lane) & 1 != 0 {
                    assert_eq!(w.vgpr(lane, 3), a[lane].wrapping_add(b[lane]));
                } else {
                    assert_eq!(w.vgpr(lane, 3), 0xDEAD_BEEF);
                }
            }
        }
    }

    #[test]
    fn carry_mask_keeps_inactive_bits() {
        let mut w = Wavefront::new(0, 0, 4);
        fill(&mut w, 1, |_| u32::MAX);
        fill(&mut w, 2, |lane| lane as u32 & 1);
        set(&mut w, "vcc", 0b1100);
        w.set_exec(0b0011);
        run(&mut w, "v_add_u32 v0, vcc, v1, v2");
        assert_eq!(w.vcc(), 0b1110);
        assert_eq!(w.vgpr(1, 0), 0);
        assert_eq!(w.vgpr(0, 0), u32::MAX);
    }

    #[test]
    fn carry_chain() {
        let mut w = Wavefront::new(0, 0, 2);
        fill(&mut w, 1, |_| 0xFFFF_FFFF);
        fill(&mut w, 2, |lane| lane as u32);
        run(&mut w, "v_add_u32 v3, vcc, v1, v2");
        run(&mut w, "v_addc_u32 v4, vcc, 0, v9, vcc");
        assert_eq!(w.vgpr(0, 4), 0);
        assert_eq!(w.vgpr(1, 4), 1);
        run(&mut w, "v_sub_u32 v5, s[0:1], 0, v2");
        assert_eq!(w.sgpr(0), 0b10);
        assert_eq!(w.vgpr(1, 5), u32::MAX);
    }

    #[test]
    fn aliased_destination() {
        let mut w = Wavefront::new(0, 0, 4);
        fill(&mut w, 0, |lane| lane as u32);
        run(&mut w, "v_add_u32 v0, vcc, v0, v0");
        let got: Vec<u32> = (0..4).map(|lane| w.vgpr(lane, 0)).collect();
        assert_eq!(got, vec![0, 2, 4, 6]);
    }

    #[test]
    fn compare_writes_vcc_and_exec() {
        let mut w = Wavefront::new(0, 0, 8);
        fill(&mut w, 0, |lane| lane as u32);
        set(&mut w, "vcc", 0xF0);
        w.set_exec(0x0F);
        run(&mut w, "v_cmp_lt_u32 vcc, 1, v0");
        assert_eq!(w.vcc(), 0xF0 | 0b1100);
        assert_eq!(w.exec(), 0x0F);
        run(&mut w, "v_cmpx_gt_i32 vcc, 2, v0");
        assert_eq!(w.exec(), 0b0011);
        assert_eq!(w.vcc() & 0x0F, 0b0011);
    }

    #[test]
    fn float_compares_with_nan() {
        let mut w = Wavefront::new(0, 0, 2);
        w.set_vgpr(0, 0, f32::NAN.to_bits());
        w.set_vgpr(1, 0, 1.0f32.to_bits());
        set(&mut w, "vcc", 0);
        run(&mut w, "v_cmp_lt_f32 vcc, 0, v0");
        assert_eq!(w.vcc(), 0b10);
        run(&mut w, "v_cmp_nle_f32 vcc, 0, v0");
        assert_eq!(w.vcc(), 0b01);
        run(&mut w, "v_cmp_u_f32 vcc, v0, v0");
        assert_eq!(w.vcc(), 0b01);
        fill(&mut w, 1, |_| 1 << 1 | 1 << 8);
        run(&mut w, "v_cmp_class_f32 vcc, v0, v1");
        assert_eq!(w.vcc(), 0b11);
    }

    #[test]
    fn compare_table_covers_every_vopc_opcode() {
        for op in Opcode::all().filter(|op| op.format() == Format::VOPC) {
            assert!(compare_of(op).is_some(), "{}", op.mnemonic());
        }
        assert_eq!(compare_of(V_CMPX_NE_U32), Some((Compare::U32(OP8::LG), true)));
        assert_eq!(compare_of(V_CMP_T_I64), Some((Compare::I64(OP8::TRU), false)));
    }

    #[test]
    fn cndmask_selects_per_lane() {
        let mut w = Wavefront::new(0, 0, 4);
        fill(&mut w, 1, |_| 7);
        set(&mut w, "s[2:3]", 0b0101);
        run(&mut w, "v_cndmask_b32 v0, 3, v1, s[2:3]");
        let got: Vec<u32> = (0..4).map(|lane| w.vgpr(lane, 0)).collect();
        assert_eq!(got, vec![7, 3, 7, 3]);
    }

    #[test]
    fn vop3_modifiers() {
        let mut w = Wavefront::new(0, 0, 1);
        w.set_vgpr(0, 1, (-2.0f32).to_bits());
        w.set_vgpr(0, 2, 3.0f32.to_bits());
        w.set_vgpr(0, 3, 1.0f32.to_bits());
        run(&mut w, "v_fma_f32 v0, |v1|, -v2, v3");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), -5.0);
        run(&mut w, "v_mad_f32 v0, -|v1|, v2, v3");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), -5.0);
    }

    #[test]
    fn transcendental_scaling() {
        let mut w = Wavefront::new(0, 0, 1);
        run(&mut w, "v_sin_f32 v0, 0.25");
        assert!((f32::from_bits(w.vgpr(0, 0)) - 1.0).abs() < 1e-6);
        run(&mut w, "v_exp_f32 v0, 4.0");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), 16.0);
        run(&mut w, "v_rndne_f32 v0, 2.5");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), 2.0);
        run(&mut w, "v_fract_f32 v0, -0.25");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), 0.75);
    }

    #[test]
    fn conversions_saturate() {
        let mut w = Wavefront::new(0, 0, 1);
        w.set_vgpr(0, 1, 1e20f32.to_bits());
        run(&mut w, "v_cvt_i32_f32 v0, v1");
        assert_eq!(w.vgpr(0, 0), i32::MAX as u32);
        run(&mut w, "v_cvt_u32_f32 v0, -1.0");
        assert_eq!(w.vgpr(0, 0), 0);
        run(&mut w, "v_cvt_f64_i32 v[2:3], -1");
        let bits = ((w.vgpr(0, 3) as u64) << 32) | w.vgpr(0, 2) as u64;
        assert_eq!(f64::from_bits(bits), -1.0);
    }

    #[test]
    fn frexp_parts() {
        let mut w = Wavefront::new(0, 0, 1);
        w.set_vgpr(0, 1, 8.0f32.to_bits());
        run(&mut w, "v_frexp_exp_i32_f32 v0, v1");
        assert_eq!(w.vgpr(0, 0), 4);
        run(&mut w, "v_frexp_mant_f32 v0, v1");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), 0.5);
        w.set_vgpr(0, 1, f32::INFINITY.to_bits());
        run(&mut w, "v_frexp_exp_i32_f32 v0, v1");
        assert_eq!(w.vgpr(0, 0), 0);
    }

    #[test]
    fn lane_access() {
        let mut w = Wavefront::new(0, 0, 16);
        fill(&mut w, 4, |lane| 100 + lane as u32);
        set(&mut w, "s2", 5);
        run(&mut w, "v_readlane_b32 s0, v4, s2");
        assert_eq!(w.sgpr(0), 105);
        set(&mut w, "s2", 20);
        assert_eq!(
            try_run(&mut w, "v_readlane_b32 s0, v4, s2"),
            Err(FaultKind::RegisterOutOfRange(20))
        );

        w.set_exec(0b1000_0000);
        run(&mut w, "v_writelane_b32 v4, 9, 7");
        run(&mut w, "v_writelane_b32 v4, 9, 6");
        assert_eq!(w.vgpr(7, 4), 9);
        assert_eq!(w.vgpr(6, 4), 106);

        w.set_exec(0b0110_0000);
        run(&mut w, "v_readfirstlane_b32 s1, v4");
        assert_eq!(w.sgpr(1), 105);
    }

    #[test]
    fn mbcnt_gives_lane_index() {
        let mut w = Wavefront::new(0, 0, 64);
        run(&mut w, "v_mbcnt_lo_u32_b32 v0, -1, 0");
        run(&mut w, "v_mbcnt_hi_u32_b32 v0, -1, v0");
        for lane in 0..64 {
            assert_eq!(w.vgpr(lane, 0), lane as u32);
        }
    }

    #[test]
    fn wide_multiply_add() {
        let mut w = Wavefront::new(0, 0, 2);
        fill(&mut w, 0, |_| u32::MAX);
        fill(&mut w, 2, |lane| lane as u32 * u32::MAX);
        fill(&mut w, 3, |lane| lane as u32 * u32::MAX);
        run(&mut w, "v_mad_u64_u32 v[4:5], s[6:7], v0, v0, v[2:3]");
        assert_eq!(w.vgpr(0, 4), 1);
        assert_eq!(w.vgpr(0, 5), 0xFFFF_FFFE);
        assert_eq!(w.sgpr(6) & 0b11, 0b10);

        w.set_vgpr(0, 0, (-3i32) as u32);
        w.set_vgpr(0, 2, 0);
        w.set_vgpr(0, 3, 0);
        w.set_exec(0b01);
        run(&mut w, "v_mad_i64_i32 v[4:5], s[6:7], v0, 2, v[2:3]");
        assert_eq!(w.vgpr(0, 4), (-6i32) as u32);
        assert_eq!(w.vgpr(0, 5), u32::MAX);
    }

    #[test]
    fn bit_field_ops() {
        let mut w = Wavefront::new(0, 0, 1);
        w.set_vgpr(0, 1, 0xABCD_1234);
        run(&mut w, "v_bfe_u32 v0, v1, 8, 8");
        assert_eq!(w.vgpr(0, 0), 0x12);
        run(&mut w, "v_bfe_i32 v0, v1, 28, 4");
        assert_eq!(w.vgpr(0, 0), 0xFFFF_FFFA);
        run(&mut w, "v_alignbit_b32 v0, v1, 0, 4");
        assert_eq!(w.vgpr(0, 0), 0x4000_0000);
        run(&mut w, "v_med3_i32 v0, -5, 9, 2");
        assert_eq!(w.vgpr(0, 0), 2);
        run(&mut w, "v_lshlrev_b64 v[2:3], 36, v[0:1]");
        assert_eq!(w.vgpr(0, 3), 0x20);
    }

    #[test]
    fn float_literal_source() {
        let mut w = Wavefront::new(0, 0, 1);
        w.set_vgpr(0, 1, 3.0f32.to_bits());
        run(&mut w, "v_mul_f32 v0, 1.5, v1");
        assert_eq!(f32::from_bits(w.vgpr(0, 0)), 4.5);
    }
}
