//! Instruction catalog.
//!
//! One static row per opcode gives its mnemonic, encoding format and operand
//! signature. The enum and the table come out of the same macro invocation,
//! so the discriminant of an [`Opcode`] is its row index.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    SOP1,
    SOP2,
    SOPK,
    SOPC,
    SOPP,
    SMEM,
    VOP1,
    VOP2,
    VOP3,
    VOPC,
    FLAT,
}

impl Format {
    /// Size of the encoding in bytes, without a trailing literal dword.
    pub fn base_size(self) -> usize {
        match self {
            Format::SMEM | Format::VOP3 | Format::FLAT => 8,
            _ => 4,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(
            self,
            Format::VOP1 | Format::VOP2 | Format::VOP3 | Format::VOPC | Format::FLAT
        )
    }
}

/// Operand slot in an instruction signature. The number is the width in dwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    SDst(u8),
    SSrc(u8),
    VDst(u8),
    VSrc(u8),
    VReg(u8),
    Simm16,
    Label,
    HwReg,
    WaitCnt,
    Literal32,
    Offset,
}

use Slot::*;

const NONE: &[Slot] = &[];
const SIMM16: &[Slot] = &[Simm16];
const BRANCH: &[Slot] = &[Label];
const WAIT: &[Slot] = &[WaitCnt];

const S1_B32: &[Slot] = &[SDst(1), SSrc(1)];
const S1_B64: &[Slot] = &[SDst(2), SSrc(2)];
const S1_I32_B64: &[Slot] = &[SDst(1), SSrc(2)];
const S1_B64_B32: &[Slot] = &[SDst(2), SSrc(1)];
const S1_DST64: &[Slot] = &[SDst(2)];
const S1_SRC64: &[Slot] = &[SSrc(2)];
const S1_SRC32: &[Slot] = &[SSrc(1)];

const S2_B32: &[Slot] = &[SDst(1), SSrc(1), SSrc(1)];
const S2_B64: &[Slot] = &[SDst(2), SSrc(2), SSrc(2)];
const S2_B64_B32: &[Slot] = &[SDst(2), SSrc(2), SSrc(1)];
const S2_BFM64: &[Slot] = &[SDst(2), SSrc(1), SSrc(1)];
const S2_FORK: &[Slot] = &[SSrc(2), SSrc(2)];
const S2_RFE: &[Slot] = &[SSrc(2), SSrc(1)];

const SC_B32: &[Slot] = &[SSrc(1), SSrc(1)];
const SC_B64: &[Slot] = &[SSrc(2), SSrc(2)];
const SC_BIT64: &[Slot] = &[SSrc(2), SSrc(1)];
const SC_IDX_ON: &[Slot] = &[SSrc(1), Simm16];

const SK_IMM: &[Slot] = &[SDst(1), Simm16];
const SK_GETREG: &[Slot] = &[SDst(1), HwReg];
const SK_SETREG: &[Slot] = &[HwReg, SSrc(1)];
const SK_SETREG_IMM: &[Slot] = &[HwReg, Literal32];
const SK_CALL: &[Slot] = &[SDst(2), Label];
const SK_FORK: &[Slot] = &[SSrc(2), Label];

const SM_LOAD1: &[Slot] = &[SDst(1), SSrc(2), Offset];
const SM_LOAD2: &[Slot] = &[SDst(2), SSrc(2), Offset];
const SM_LOAD4: &[Slot] = &[SDst(4), SSrc(2), Offset];
const SM_LOAD8: &[Slot] = &[SDst(8), SSrc(2), Offset];
const SM_LOAD16: &[Slot] = &[SDst(16), SSrc(2), Offset];
const SM_BLOAD1: &[Slot] = &[SDst(1), SSrc(4), Offset];
const SM_BLOAD2: &[Slot] = &[SDst(2), SSrc(4), Offset];
const SM_BLOAD4: &[Slot] = &[SDst(4), SSrc(4), Offset];
const SM_STORE1: &[Slot] = &[SSrc(1), SSrc(2), Offset];
const SM_STORE2: &[Slot] = &[SSrc(2), SSrc(2), Offset];
const SM_STORE4: &[Slot] = &[SSrc(4), SSrc(2), Offset];

const V1_B32: &[Slot] = &[VDst(1), VSrc(1)];
const V1_B64: &[Slot] = &[VDst(2), VSrc(2)];
const V1_32_64: &[Slot] = &[VDst(1), VSrc(2)];
const V1_64_32: &[Slot] = &[VDst(2), VSrc(1)];
const V1_READFIRST: &[Slot] = &[SDst(1), VSrc(1)];

const V2_B32: &[Slot] = &[VDst(1), VSrc(1), VReg(1)];
const V2_CARRY: &[Slot] = &[VDst(1), SDst(2), VSrc(1), VReg(1)];
const V2_CARRY_IN: &[Slot] = &[VDst(1), SDst(2), VSrc(1), VReg(1), SSrc(2)];
const V2_CNDMASK: &[Slot] = &[VDst(1), VSrc(1), VReg(1), SSrc(2)];

const V3_B32_2: &[Slot] = &[VDst(1), VSrc(1), VSrc(1)];
const V3_B32_3: &[Slot] = &[VDst(1), VSrc(1), VSrc(1), VSrc(1)];
const V3_B64_2: &[Slot] = &[VDst(2), VSrc(2), VSrc(2)];
const V3_B64_3: &[Slot] = &[VDst(2), VSrc(2), VSrc(2), VSrc(2)];
const V3_SHIFT64: &[Slot] = &[VDst(2), VSrc(1), VSrc(2)];
const V3_LDEXP64: &[Slot] = &[VDst(2), VSrc(2), VSrc(1)];
const V3_READLANE: &[Slot] = &[SDst(1), VReg(1), SSrc(1)];
const V3_WRITELANE: &[Slot] = &[VDst(1), SSrc(1), SSrc(1)];
const V3_MAD64: &[Slot] = &[VDst(2), SDst(2), VSrc(1), VSrc(1), VSrc(2)];

const VC_32: &[Slot] = &[SDst(2), VSrc(1), VReg(1)];
const VC_64: &[Slot] = &[SDst(2), VSrc(2), VReg(2)];
const VC_CLASS64: &[Slot] = &[SDst(2), VSrc(2), VReg(1)];

const FL_LOAD1: &[Slot] = &[VDst(1), VReg(2)];
const FL_LOAD2: &[Slot] = &[VDst(2), VReg(2)];
const FL_LOAD3: &[Slot] = &[VDst(3), VReg(2)];
const FL_LOAD4: &[Slot] = &[VDst(4), VReg(2)];
const FL_STORE1: &[Slot] = &[VReg(2), VReg(1)];
const FL_STORE2: &[Slot] = &[VReg(2), VReg(2)];
const FL_STORE3: &[Slot] = &[VReg(2), VReg(3)];
const FL_STORE4: &[Slot] = &[VReg(2), VReg(4)];
const FL_ATOMIC: &[Slot] = &[VDst(1), VReg(2), VReg(1)];

macro_rules! catalog {
    ($($format:ident { $($op:ident => $sig:expr,)* })*) => {
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Opcode {
            $($($op,)*)*
        }

        const ROWS: &[(Opcode, &str, Format, &[Slot])] = &[
            $($((Opcode::$op, stringify!($op), Format::$format, $sig),)*)*
        ];
    };
}

catalog! {
    SOP2 {
        S_ADD_U32 => S2_B32,
        S_SUB_U32 => S2_B32,
        S_ADD_I32 => S2_B32,
        S_SUB_I32 => S2_B32,
        S_ADDC_U32 => S2_B32,
        S_SUBB_U32 => S2_B32,
        S_MIN_I32 => S2_B32,
        S_MIN_U32 => S2_B32,
        S_MAX_I32 => S2_B32,
        S_MAX_U32 => S2_B32,
        S_CSELECT_B32 => S2_B32,
        S_CSELECT_B64 => S2_B64,
        S_AND_B32 => S2_B32,
        S_AND_B64 => S2_B64,
        S_OR_B32 => S2_B32,
        S_OR_B64 => S2_B64,
        S_XOR_B32 => S2_B32,
        S_XOR_B64 => S2_B64,
        S_ANDN2_B32 => S2_B32,
        S_ANDN2_B64 => S2_B64,
        S_ORN2_B32 => S2_B32,
        S_ORN2_B64 => S2_B64,
        S_NAND_B32 => S2_B32,
        S_NAND_B64 => S2_B64,
        S_NOR_B32 => S2_B32,
        S_NOR_B64 => S2_B64,
        S_XNOR_B32 => S2_B32,
        S_XNOR_B64 => S2_B64,
        S_LSHL_B32 => S2_B32,
        S_LSHL_B64 => S2_B64_B32,
        S_LSHR_B32 => S2_B32,
        S_LSHR_B64 => S2_B64_B32,
        S_ASHR_I32 => S2_B32,
        S_ASHR_I64 => S2_B64_B32,
        S_BFM_B32 => S2_B32,
        S_BFM_B64 => S2_BFM64,
        S_MUL_I32 => S2_B32,
        S_BFE_U32 => S2_B32,
        S_BFE_I32 => S2_B32,
        S_BFE_U64 => S2_B64_B32,
        S_BFE_I64 => S2_B64_B32,
        S_CBRANCH_G_FORK => S2_FORK,
        S_ABSDIFF_I32 => S2_B32,
        S_RFE_RESTORE_B64 => S2_RFE,
        S_MUL_HI_U32 => S2_B32,
        S_MUL_HI_I32 => S2_B32,
        S_LSHL1_ADD_U32 => S2_B32,
        S_LSHL2_ADD_U32 => S2_B32,
        S_LSHL3_ADD_U32 => S2_B32,
        S_LSHL4_ADD_U32 => S2_B32,
        S_PACK_LL_B32_B16 => S2_B32,
        S_PACK_LH_B32_B16 => S2_B32,
        S_PACK_HH_B32_B16 => S2_B32,
    }
    SOP1 {
        S_MOV_B32 => S1_B32,
        S_MOV_B64 => S1_B64,
        S_CMOV_B32 => S1_B32,
        S_CMOV_B64 => S1_B64,
        S_NOT_B32 => S1_B32,
        S_NOT_B64 => S1_B64,
        S_WQM_B32 => S1_B32,
        S_WQM_B64 => S1_B64,
        S_BREV_B32 => S1_B32,
        S_BREV_B64 => S1_B64,
        S_BCNT0_I32_B32 => S1_B32,
        S_BCNT0_I32_B64 => S1_I32_B64,
        S_BCNT1_I32_B32 => S1_B32,
        S_BCNT1_I32_B64 => S1_I32_B64,
        S_FF0_I32_B32 => S1_B32,
        S_FF0_I32_B64 => S1_I32_B64,
        S_FF1_I32_B32 => S1_B32,
        S_FF1_I32_B64 => S1_I32_B64,
        S_FLBIT_I32_B32 => S1_B32,
        S_FLBIT_I32_B64 => S1_I32_B64,
        S_FLBIT_I32 => S1_B32,
        S_FLBIT_I32_I64 => S1_I32_B64,
        S_SEXT_I32_I8 => S1_B32,
        S_SEXT_I32_I16 => S1_B32,
        S_BITSET0_B32 => S1_B32,
        S_BITSET0_B64 => S1_B64_B32,
        S_BITSET1_B32 => S1_B32,
        S_BITSET1_B64 => S1_B64_B32,
        S_GETPC_B64 => S1_DST64,
        S_SETPC_B64 => S1_SRC64,
        S_SWAPPC_B64 => S1_B64,
        S_RFE_B64 => S1_SRC64,
        S_AND_SAVEEXEC_B64 => S1_B64,
        S_OR_SAVEEXEC_B64 => S1_B64,
        S_XOR_SAVEEXEC_B64 => S1_B64,
        S_ANDN2_SAVEEXEC_B64 => S1_B64,
        S_ORN2_SAVEEXEC_B64 => S1_B64,
        S_NAND_SAVEEXEC_B64 => S1_B64,
        S_NOR_SAVEEXEC_B64 => S1_B64,
        S_XNOR_SAVEEXEC_B64 => S1_B64,
        S_ANDN1_SAVEEXEC_B64 => S1_B64,
        S_ANDN1_WREXEC_B64 => S1_B64,
        S_ANDN2_WREXEC_B64 => S1_B64,
        S_QUADMASK_B32 => S1_B32,
        S_QUADMASK_B64 => S1_B64,
        S_MOVRELS_B32 => S1_B32,
        S_MOVRELS_B64 => S1_B64,
        S_MOVRELD_B32 => S1_B32,
        S_MOVRELD_B64 => S1_B64,
        S_CBRANCH_JOIN => S1_SRC32,
        S_ABS_I32 => S1_B32,
        S_SET_GPR_IDX_IDX => S1_SRC32,
        S_BITREPLICATE_B64_B32 => S1_B64_B32,
    }
    SOPC {
        S_CMP_EQ_I32 => SC_B32,
        S_CMP_LG_I32 => SC_B32,
        S_CMP_GT_I32 => SC_B32,
        S_CMP_GE_I32 => SC_B32,
        S_CMP_LT_I32 => SC_B32,
        S_CMP_LE_I32 => SC_B32,
        S_CMP_EQ_U32 => SC_B32,
        S_CMP_LG_U32 => SC_B32,
        S_CMP_GT_U32 => SC_B32,
        S_CMP_GE_U32 => SC_B32,
        S_CMP_LT_U32 => SC_B32,
        S_CMP_LE_U32 => SC_B32,
        S_BITCMP0_B32 => SC_B32,
        S_BITCMP1_B32 => SC_B32,
        S_BITCMP0_B64 => SC_BIT64,
        S_BITCMP1_B64 => SC_BIT64,
        S_SETVSKIP => SC_B32,
        S_SET_GPR_IDX_ON => SC_IDX_ON,
        S_CMP_EQ_U64 => SC_B64,
        S_CMP_LG_U64 => SC_B64,
        S_CMP_NE_U64 => SC_B64,
    }
    SOPK {
        S_MOVK_I32 => SK_IMM,
        S_CMOVK_I32 => SK_IMM,
        S_CMPK_EQ_I32 => SK_IMM,
        S_CMPK_LG_I32 => SK_IMM,
        S_CMPK_GT_I32 => SK_IMM,
        S_CMPK_GE_I32 => SK_IMM,
        S_CMPK_LT_I32 => SK_IMM,
        S_CMPK_LE_I32 => SK_IMM,
        S_CMPK_EQ_U32 => SK_IMM,
        S_CMPK_LG_U32 => SK_IMM,
        S_CMPK_GT_U32 => SK_IMM,
        S_CMPK_GE_U32 => SK_IMM,
        S_CMPK_LT_U32 => SK_IMM,
        S_CMPK_LE_U32 => SK_IMM,
        S_ADDK_I32 => SK_IMM,
        S_MULK_I32 => SK_IMM,
        S_CBRANCH_I_FORK => SK_FORK,
        S_GETREG_B32 => SK_GETREG,
        S_SETREG_B32 => SK_SETREG,
        S_GETREG_REGRD_B32 => SK_GETREG,
        S_SETREG_IMM32_B32 => SK_SETREG_IMM,
        S_CALL_B64 => SK_CALL,
    }
    SOPP {
        S_NOP => SIMM16,
        S_ENDPGM => NONE,
        S_BRANCH => BRANCH,
        S_CBRANCH_SCC0 => BRANCH,
        S_CBRANCH_SCC1 => BRANCH,
        S_CBRANCH_VCCZ => BRANCH,
        S_CBRANCH_VCCNZ => BRANCH,
        S_CBRANCH_EXECZ => BRANCH,
        S_CBRANCH_EXECNZ => BRANCH,
        S_BARRIER => NONE,
        S_SETKILL => SIMM16,
        S_WAITCNT => WAIT,
        S_SETHALT => SIMM16,
        S_SLEEP => SIMM16,
        S_SETPRIO => SIMM16,
        S_SENDMSG => SIMM16,
        S_SENDMSGHALT => SIMM16,
        S_TRAP => SIMM16,
        S_ICACHE_INV => NONE,
        S_INCPERFLEVEL => SIMM16,
        S_DECPERFLEVEL => SIMM16,
        S_TTRACEDATA => NONE,
        S_CBRANCH_CDBGSYS => BRANCH,
        S_CBRANCH_CDBGUSER => BRANCH,
        S_CBRANCH_CDBGSYS_OR_USER => BRANCH,
        S_CBRANCH_CDBGSYS_AND_USER => BRANCH,
        S_ENDPGM_SAVED => NONE,
        S_SET_GPR_IDX_OFF => NONE,
        S_SET_GPR_IDX_MODE => SIMM16,
        S_ENDPGM_ORDERED_PS_DONE => NONE,
    }
    SMEM {
        S_LOAD_DWORD => SM_LOAD1,
        S_LOAD_DWORDX2 => SM_LOAD2,
        S_LOAD_DWORDX4 => SM_LOAD4,
        S_LOAD_DWORDX8 => SM_LOAD8,
        S_LOAD_DWORDX16 => SM_LOAD16,
        S_BUFFER_LOAD_DWORD => SM_BLOAD1,
        S_BUFFER_LOAD_DWORDX2 => SM_BLOAD2,
        S_BUFFER_LOAD_DWORDX4 => SM_BLOAD4,
        S_STORE_DWORD => SM_STORE1,
        S_STORE_DWORDX2 => SM_STORE2,
        S_STORE_DWORDX4 => SM_STORE4,
    }
    VOP1 {
        V_NOP => NONE,
        V_MOV_B32 => V1_B32,
        V_READFIRSTLANE_B32 => V1_READFIRST,
        V_CVT_I32_F64 => V1_32_64,
        V_CVT_F64_I32 => V1_64_32,
        V_CVT_F32_I32 => V1_B32,
        V_CVT_F32_U32 => V1_B32,
        V_CVT_U32_F32 => V1_B32,
        V_CVT_I32_F32 => V1_B32,
        V_CVT_F32_F64 => V1_32_64,
        V_CVT_F64_F32 => V1_64_32,
        V_CVT_U32_F64 => V1_32_64,
        V_CVT_F64_U32 => V1_64_32,
        V_FRACT_F32 => V1_B32,
        V_TRUNC_F32 => V1_B32,
        V_CEIL_F32 => V1_B32,
        V_RNDNE_F32 => V1_B32,
        V_FLOOR_F32 => V1_B32,
        V_EXP_F32 => V1_B32,
        V_LOG_F32 => V1_B32,
        V_RCP_F32 => V1_B32,
        V_RSQ_F32 => V1_B32,
        V_SQRT_F32 => V1_B32,
        V_SIN_F32 => V1_B32,
        V_COS_F32 => V1_B32,
        V_RCP_F64 => V1_B64,
        V_RSQ_F64 => V1_B64,
        V_SQRT_F64 => V1_B64,
        V_NOT_B32 => V1_B32,
        V_BFREV_B32 => V1_B32,
        V_FFBH_U32 => V1_B32,
        V_FFBL_B32 => V1_B32,
        V_FFBH_I32 => V1_B32,
        V_FREXP_EXP_I32_F32 => V1_B32,
        V_FREXP_MANT_F32 => V1_B32,
        V_FREXP_EXP_I32_F64 => V1_32_64,
        V_FREXP_MANT_F64 => V1_B64,
    }
    VOP2 {
        V_CNDMASK_B32 => V2_CNDMASK,
        V_ADD_F32 => V2_B32,
        V_SUB_F32 => V2_B32,
        V_SUBREV_F32 => V2_B32,
        V_MUL_F32 => V2_B32,
        V_MUL_I32_I24 => V2_B32,
        V_MUL_HI_I32_I24 => V2_B32,
        V_MUL_U32_U24 => V2_B32,
        V_MUL_HI_U32_U24 => V2_B32,
        V_MIN_F32 => V2_B32,
        V_MAX_F32 => V2_B32,
        V_MIN_I32 => V2_B32,
        V_MAX_I32 => V2_B32,
        V_MIN_U32 => V2_B32,
        V_MAX_U32 => V2_B32,
        V_LSHRREV_B32 => V2_B32,
        V_ASHRREV_I32 => V2_B32,
        V_LSHLREV_B32 => V2_B32,
        V_AND_B32 => V2_B32,
        V_OR_B32 => V2_B32,
        V_XOR_B32 => V2_B32,
        V_MAC_F32 => V2_B32,
        V_ADD_U32 => V2_CARRY,
        V_SUB_U32 => V2_CARRY,
        V_SUBREV_U32 => V2_CARRY,
        V_ADDC_U32 => V2_CARRY_IN,
        V_SUBB_U32 => V2_CARRY_IN,
        V_SUBBREV_U32 => V2_CARRY_IN,
        V_LDEXP_F32 => V2_B32,
    }
    VOP3 {
        V_MAD_F32 => V3_B32_3,
        V_MAD_I32_I24 => V3_B32_3,
        V_MAD_U32_U24 => V3_B32_3,
        V_BFE_U32 => V3_B32_3,
        V_BFE_I32 => V3_B32_3,
        V_BFI_B32 => V3_B32_3,
        V_FMA_F32 => V3_B32_3,
        V_FMA_F64 => V3_B64_3,
        V_ALIGNBIT_B32 => V3_B32_3,
        V_ALIGNBYTE_B32 => V3_B32_3,
        V_MIN3_F32 => V3_B32_3,
        V_MIN3_I32 => V3_B32_3,
        V_MIN3_U32 => V3_B32_3,
        V_MAX3_F32 => V3_B32_3,
        V_MAX3_I32 => V3_B32_3,
        V_MAX3_U32 => V3_B32_3,
        V_MED3_I32 => V3_B32_3,
        V_MED3_U32 => V3_B32_3,
        V_ADD_F64 => V3_B64_2,
        V_MUL_F64 => V3_B64_2,
        V_MIN_F64 => V3_B64_2,
        V_MAX_F64 => V3_B64_2,
        V_LDEXP_F64 => V3_LDEXP64,
        V_MUL_LO_U32 => V3_B32_2,
        V_MUL_HI_U32 => V3_B32_2,
        V_MUL_LO_I32 => V3_B32_2,
        V_MUL_HI_I32 => V3_B32_2,
        V_LSHLREV_B64 => V3_SHIFT64,
        V_LSHRREV_B64 => V3_SHIFT64,
        V_ASHRREV_I64 => V3_SHIFT64,
        V_READLANE_B32 => V3_READLANE,
        V_WRITELANE_B32 => V3_WRITELANE,
        V_BCNT_U32_B32 => V3_B32_2,
        V_MBCNT_LO_U32_B32 => V3_B32_2,
        V_MBCNT_HI_U32_B32 => V3_B32_2,
        V_MAD_U64_U32 => V3_MAD64,
        V_MAD_I64_I32 => V3_MAD64,
    }
    VOPC {
        V_CMP_CLASS_F32 => VC_32,
        V_CMPX_CLASS_F32 => VC_32,
        V_CMP_CLASS_F64 => VC_CLASS64,
        V_CMP_F_F32 => VC_32,
        V_CMP_LT_F32 => VC_32,
        V_CMP_EQ_F32 => VC_32,
        V_CMP_LE_F32 => VC_32,
        V_CMP_GT_F32 => VC_32,
        V_CMP_LG_F32 => VC_32,
        V_CMP_GE_F32 => VC_32,
        V_CMP_O_F32 => VC_32,
        V_CMP_U_F32 => VC_32,
        V_CMP_NGE_F32 => VC_32,
        V_CMP_NLG_F32 => VC_32,
        V_CMP_NGT_F32 => VC_32,
        V_CMP_NLE_F32 => VC_32,
        V_CMP_NEQ_F32 => VC_32,
        V_CMP_NLT_F32 => VC_32,
        V_CMP_TRU_F32 => VC_32,
        V_CMPX_F_F32 => VC_32,
        V_CMPX_LT_F32 => VC_32,
        V_CMPX_EQ_F32 => VC_32,
        V_CMPX_LE_F32 => VC_32,
        V_CMPX_GT_F32 => VC_32,
        V_CMPX_LG_F32 => VC_32,
        V_CMPX_GE_F32 => VC_32,
        V_CMPX_O_F32 => VC_32,
        V_CMPX_U_F32 => VC_32,
        V_CMPX_NGE_F32 => VC_32,
        V_CMPX_NLG_F32 => VC_32,
        V_CMPX_NGT_F32 => VC_32,
        V_CMPX_NLE_F32 => VC_32,
        V_CMPX_NEQ_F32 => VC_32,
        V_CMPX_NLT_F32 => VC_32,
        V_CMPX_TRU_F32 => VC_32,
        V_CMP_F_F64 => VC_64,
        V_CMP_LT_F64 => VC_64,
        V_CMP_EQ_F64 => VC_64,
        V_CMP_LE_F64 => VC_64,
        V_CMP_GT_F64 => VC_64,
        V_CMP_LG_F64 => VC_64,
        V_CMP_GE_F64 => VC_64,
        V_CMP_O_F64 => VC_64,
        V_CMP_U_F64 => VC_64,
        V_CMP_NGE_F64 => VC_64,
        V_CMP_NLG_F64 => VC_64,
        V_CMP_NGT_F64 => VC_64,
        V_CMP_NLE_F64 => VC_64,
        V_CMP_NEQ_F64 => VC_64,
        V_CMP_NLT_F64 => VC_64,
        V_CMP_TRU_F64 => VC_64,
        V_CMP_F_I32 => VC_32,
        V_CMP_LT_I32 => VC_32,
        V_CMP_EQ_I32 => VC_32,
        V_CMP_LE_I32 => VC_32,
        V_CMP_GT_I32 => VC_32,
        V_CMP_NE_I32 => VC_32,
        V_CMP_GE_I32 => VC_32,
        V_CMP_T_I32 => VC_32,
        V_CMPX_F_I32 => VC_32,
        V_CMPX_LT_I32 => VC_32,
        V_CMPX_EQ_I32 => VC_32,
        V_CMPX_LE_I32 => VC_32,
        V_CMPX_GT_I32 => VC_32,
        V_CMPX_NE_I32 => VC_32,
        V_CMPX_GE_I32 => VC_32,
        V_CMPX_T_I32 => VC_32,
        V_CMP_F_I64 => VC_64,
        V_CMP_LT_I64 => VC_64,
        V_CMP_EQ_I64 => VC_64,
        V_CMP_LE_I64 => VC_64,
        V_CMP_GT_I64 => VC_64,
        V_CMP_NE_I64 => VC_64,
        V_CMP_GE_I64 => VC_64,
        V_CMP_T_I64 => VC_64,
        V_CMP_F_U32 => VC_32,
        V_CMP_LT_U32 => VC_32,
        V_CMP_EQ_U32 => VC_32,
        V_CMP_LE_U32 => VC_32,
        V_CMP_GT_U32 => VC_32,
        V_CMP_NE_U32 => VC_32,
        V_CMP_GE_U32 => VC_32,
        V_CMP_T_U32 => VC_32,
        V_CMPX_F_U32 => VC_32,
        V_CMPX_LT_U32 => VC_32,
        V_CMPX_EQ_U32 => VC_32,
        V_CMPX_LE_U32 => VC_32,
        V_CMPX_GT_U32 => VC_32,
        V_CMPX_NE_U32 => VC_32,
        V_CMPX_GE_U32 => VC_32,
        V_CMPX_T_U32 => VC_32,
        V_CMP_F_U64 => VC_64,
        V_CMP_LT_U64 => VC_64,
        V_CMP_EQ_U64 => VC_64,
        V_CMP_LE_U64 => VC_64,
        V_CMP_GT_U64 => VC_64,
        V_CMP_NE_U64 => VC_64,
        V_CMP_GE_U64 => VC_64,
        V_CMP_T_U64 => VC_64,
    }
    FLAT {
        FLAT_LOAD_UBYTE => FL_LOAD1,
        FLAT_LOAD_SBYTE => FL_LOAD1,
        FLAT_LOAD_USHORT => FL_LOAD1,
        FLAT_LOAD_SSHORT => FL_LOAD1,
        FLAT_LOAD_DWORD => FL_LOAD1,
        FLAT_LOAD_DWORDX2 => FL_LOAD2,
        FLAT_LOAD_DWORDX3 => FL_LOAD3,
        FLAT_LOAD_DWORDX4 => FL_LOAD4,
        FLAT_STORE_BYTE => FL_STORE1,
        FLAT_STORE_SHORT => FL_STORE1,
        FLAT_STORE_DWORD => FL_STORE1,
        FLAT_STORE_DWORDX2 => FL_STORE2,
        FLAT_STORE_DWORDX3 => FL_STORE3,
        FLAT_STORE_DWORDX4 => FL_STORE4,
        FLAT_ATOMIC_ADD => FL_ATOMIC,
    }
}

/// Catalog row for one opcode.
#[derive(Debug, Clone)]
pub struct InstructionInfo {
    pub opcode: Opcode,
    pub mnemonic: String,
    pub format: Format,
    pub operands: &'static [Slot],
}

struct Catalog {
    infos: Vec<InstructionInfo>,
    by_mnemonic: HashMap<String, Opcode>,
}

fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let infos: Vec<InstructionInfo> = ROWS
            .iter()
            .map(|&(opcode, name, format, operands)| InstructionInfo {
                opcode,
                mnemonic: name.to_ascii_lowercase(),
                format,
                operands,
            })
            .collect();
        let by_mnemonic = infos
            .iter()
            .map(|info| (info.mnemonic.clone(), info.opcode))
            .collect();
        Catalog { infos, by_mnemonic }
    })
}

impl Opcode {
    pub fn info(self) -> &'static InstructionInfo {
        &catalog().infos[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        &self.info().mnemonic
    }

    pub fn format(self) -> Format {
        ROWS[self as usize].2
    }

    pub fn all() -> impl Iterator<Item = Opcode> {
        ROWS.iter().map(|row| row.0)
    }
}

pub fn lookup_by_mnemonic(text: &str) -> Result<Opcode, DecodeError> {
    let key = text.trim().to_ascii_lowercase();
    catalog()
        .by_mnemonic
        .get(&key)
        .copied()
        .ok_or_else(|| DecodeError::UnknownInstruction(text.trim().to_string()))
}

pub fn format_of(opcode: Opcode) -> Format {
    opcode.format()
}

pub fn catalog_len() -> usize {
    ROWS.len()
}
