use crate::bit::{get_bits, mask, set_bits, u64_from_u32_u32};
use crate::error::{Fault, FaultKind, Result};
use crate::memory::{Memory, Ticket};
use crate::operand::{Operand, Special, NUM_SGPRS, NUM_TTMPS, NUM_VGPRS};
use crate::register_file::{RegisterFile, RegisterFileImpl};
use serde::{Deserialize, Serialize};

pub const MAX_LANES: usize = 64;

/// Bit positions of the STATUS register.
pub mod status {
    pub const SCC: u32 = 1 << 0;
    pub const WAVE_PRIO_SHIFT: usize = 3;
    pub const EXECZ: u32 = 1 << 9;
    pub const VCCZ: u32 = 1 << 10;
    pub const IN_BARRIER: u32 = 1 << 12;
    pub const HALT: u32 = 1 << 13;
    pub const TRAP: u32 = 1 << 14;
    pub const VALID: u32 = 1 << 16;
    pub const COND_DBG_USER: u32 = 1 << 20;
    pub const COND_DBG_SYS: u32 = 1 << 21;
    pub const INST_ATC: u32 = 1 << 23;
}

/// MODE.GPR_IDX_EN
pub const MODE_GPR_IDX_EN: u32 = 1 << 27;

/// Hardware register ids used by `s_getreg`/`s_setreg`.
pub mod hwreg {
    pub const MODE: u32 = 1;
    pub const STATUS: u32 = 2;
    pub const TRAPSTS: u32 = 3;
    pub const HW_ID: u32 = 4;
    pub const GPR_ALLOC: u32 = 5;
    pub const LDS_ALLOC: u32 = 6;
    pub const IB_STS: u32 = 7;

    /// Splits an encoded `hwreg(...)` immediate into `(id, offset, size)`.
    pub fn decode(simm16: u32) -> (u32, usize, usize) {
        let id = simm16 & 0x3F;
        let offset = ((simm16 >> 6) & 0x1F) as usize;
        let size = (((simm16 >> 11) & 0x1F) + 1) as usize;
        (id, offset, size)
    }

    pub fn encode(id: u32, offset: usize, size: usize) -> u32 {
        (id & 0x3F) | (((offset as u32) & 0x1F) << 6) | ((((size as u32) - 1) & 0x1F) << 11)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveState {
    Running,
    Halted,
    Terminated,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Counter {
    Vm,
    Exp,
    Lgkm,
}

impl Counter {
    pub fn name(self) -> &'static str {
        match self {
            Counter::Vm => "vmcnt",
            Counter::Exp => "expcnt",
            Counter::Lgkm => "lgkmcnt",
        }
    }
}

/// The three hardware wait counters, or a set of thresholds for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WaitCounters {
    pub vm: u32,
    pub exp: u32,
    pub lgkm: u32,
}

impl WaitCounters {
    pub const MAX: WaitCounters = WaitCounters {
        vm: 0x3F,
        exp: 0x7,
        lgkm: 0xF,
    };

    pub fn decode(simm16: u32) -> Self {
        WaitCounters {
            vm: (simm16 & 0xF) | (((simm16 >> 14) & 0x3) << 4),
            exp: (simm16 >> 4) & 0x7,
            lgkm: (simm16 >> 8) & 0xF,
        }
    }

    pub fn encode(self) -> u32 {
        (self.vm & 0xF) | ((self.exp & 0x7) << 4) | ((self.lgkm & 0xF) << 8) | (((self.vm >> 4) & 0x3) << 14)
    }

    pub fn get(&self, counter: Counter) -> u32 {
        match counter {
            Counter::Vm => self.vm,
            Counter::Exp => self.exp,
            Counter::Lgkm => self.lgkm,
        }
    }

    fn get_mut(&mut self, counter: Counter) -> &mut u32 {
        match counter {
            Counter::Vm => &mut self.vm,
            Counter::Exp => &mut self.exp,
            Counter::Lgkm => &mut self.lgkm,
        }
    }

    fn increment(&mut self, counter: Counter) {
        let value = self.get_mut(counter);
        *value = value.saturating_add(1);
    }

    /// Each counter clamped to its hardware width.
    pub fn saturated(self) -> WaitCounters {
        WaitCounters {
            vm: self.vm.min(WaitCounters::MAX.vm),
            exp: self.exp.min(WaitCounters::MAX.exp),
            lgkm: self.lgkm.min(WaitCounters::MAX.lgkm),
        }
    }

    fn decrement(&mut self, counter: Counter) {
        let value = self.get_mut(counter);
        *value = value.saturating_sub(1);
    }
}

const COUNTERS: [Counter; 3] = [Counter::Vm, Counter::Exp, Counter::Lgkm];

/// One level of the divergence stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkFrame {
    /// Lanes of the deferred path
    pub other_mask: u64,
    pub other_pc: u64,
    /// EXEC before the fork, restored by the final join
    pub saved_exec: u64,
    /// Set once the deferred path has been started
    pub resumed: bool,
}

/// Why a running wave cannot issue its next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Barrier { generation: u64 },
    Wait(WaitCounters),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: Ticket,
    holds: [bool; 3],
}

/// Read-only copy of the architectural state of a wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: usize,
    pub workgroup: usize,
    pub pc: u64,
    pub scalar: Vec<u32>,
    /// `vector[lane][register]`
    pub vector: Vec<Vec<u32>>,
    pub exec: u64,
    pub vcc: u64,
    pub scc: bool,
    pub status: u32,
    pub mode: u32,
    pub m0: u32,
    pub counters: WaitCounters,
    pub divergence_depth: usize,
    pub state: WaveState,
}

/// Register state and control state of one wavefront.
#[derive(Debug, Clone)]
pub struct Wavefront {
    id: usize,
    workgroup: usize,
    lanes: usize,
    sgprs: RegisterFileImpl<u32>,
    vgprs: RegisterFileImpl<u32>,
    pub(crate) exec: u64,
    pub(crate) vcc: u64,
    pub(crate) scc: bool,
    pc: u64,
    pub(crate) status: u32,
    pub(crate) mode: u32,
    pub(crate) m0: u32,
    pub(crate) trapsts: u32,
    pub(crate) tba: u64,
    pub(crate) tma: u64,
    pub(crate) flat_scratch: u64,
    pub(crate) ttmp: [u32; NUM_TTMPS],
    pub(crate) perf_levels: [u32; 8],
    pub(crate) vskip: bool,
    pub(crate) divergence: Vec<ForkFrame>,
    /// Outstanding requests per counter, not clamped to the hardware width
    counters: WaitCounters,
    in_flight: Vec<InFlight>,
    pub(crate) blocked: Option<Block>,
    pub(crate) state: WaveState,
    fault: Option<Fault>,
}

impl Wavefront {
    /// Creates a wave of `lanes` lanes with every lane enabled in EXEC.
    pub fn new(id: usize, workgroup: usize, lanes: usize) -> Self {
        let lanes = lanes.clamp(1, MAX_LANES);
        Wavefront {
            id,
            workgroup,
            lanes,
            sgprs: RegisterFile::new(1, NUM_SGPRS, 0),
            vgprs: RegisterFile::new(lanes, NUM_VGPRS, 0),
            exec: mask(lanes),
            vcc: 0,
            scc: false,
            pc: 0,
            status: 0,
            mode: 0,
            m0: 0,
            trapsts: 0,
            tba: 0,
            tma: 0,
            flat_scratch: 0,
            ttmp: [0; NUM_TTMPS],
            perf_levels: [0; 8],
            vskip: false,
            divergence: Vec::new(),
            counters: WaitCounters::default(),
            in_flight: Vec::new(),
            blocked: None,
            state: WaveState::Running,
            fault: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn workgroup(&self) -> usize {
        self.workgroup
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc & mask(48);
    }

    pub fn exec(&self) -> u64 {
        self.exec
    }

    /// Sets EXEC; bits for lanes the wave does not have are dropped.
    pub fn set_exec(&mut self, exec: u64) {
        self.exec = exec & mask(self.lanes);
    }

    pub fn vcc(&self) -> u64 {
        self.vcc
    }

    pub fn scc(&self) -> bool {
        self.scc
    }

    pub fn m0(&self) -> u32 {
        self.m0
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn state(&self) -> WaveState {
        self.state
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn blocked(&self) -> Option<Block> {
        self.blocked
    }

    pub fn counters(&self) -> WaitCounters {
        self.counters.saturated()
    }

    pub fn divergence_depth(&self) -> usize {
        self.divergence.len()
    }

    pub fn sgpr(&self, idx: usize) -> u32 {
        self.sgprs.get(0, idx)
    }

    pub fn set_sgpr(&mut self, idx: usize, value: u32) {
        self.sgprs.set(0, idx, value);
    }

    pub fn vgpr(&self, lane: usize, idx: usize) -> u32 {
        self.vgprs.get(lane, idx)
    }

    pub fn set_vgpr(&mut self, lane: usize, idx: usize, value: u32) {
        self.vgprs.set(lane, idx, value);
    }

    /// STATUS with the live SCC, EXECZ and VCCZ bits folded in.
    pub fn status(&self) -> u32 {
        let mut value = self.status | status::VALID;
        if self.scc {
            value |= status::SCC;
        }
        if self.exec == 0 {
            value |= status::EXECZ;
        }
        if self.vcc == 0 {
            value |= status::VCCZ;
        }
        if matches!(self.blocked, Some(Block::Barrier { .. })) {
            value |= status::IN_BARRIER;
        }
        value
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, WaveState::Terminated | WaveState::Faulted)
    }

    /// Leaves the Halted state; the only transition driven from outside the engine.
    pub fn resume(&mut self) {
        if self.state == WaveState::Halted {
            self.status &= !status::HALT;
            self.state = WaveState::Running;
        }
    }

    pub(crate) fn set_fault(&mut self, fault: Fault) {
        self.state = WaveState::Faulted;
        self.blocked = None;
        self.fault = Some(fault);
    }

    pub fn is_active(&self, lane: usize) -> bool {
        lane < self.lanes && (self.exec >> lane) & 1 != 0
    }

    pub fn active_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.lanes).filter(move |&lane| self.is_active(lane))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id,
            workgroup: self.workgroup,
            pc: self.pc,
            scalar: self.sgprs.elem_regs(0),
            vector: (0..self.lanes).map(|lane| self.vgprs.elem_regs(lane)).collect(),
            exec: self.exec,
            vcc: self.vcc,
            scc: self.scc,
            status: self.status(),
            mode: self.mode,
            m0: self.m0,
            counters: self.counters.saturated(),
            divergence_depth: self.divergence.len(),
            state: self.state,
        }
    }

    // Scalar operand access

    fn special_lo(&self, special: Special) -> u32 {
        match special {
            Special::Exec | Special::ExecLo => self.exec as u32,
            Special::ExecHi => (self.exec >> 32) as u32,
            Special::Vcc | Special::VccLo => self.vcc as u32,
            Special::VccHi => (self.vcc >> 32) as u32,
            Special::FlatScratch | Special::FlatScratchLo => self.flat_scratch as u32,
            Special::FlatScratchHi => (self.flat_scratch >> 32) as u32,
            Special::M0 => self.m0,
            Special::Scc => self.scc as u32,
            Special::Status => self.status(),
            Special::Mode => self.mode,
            Special::Trapsts => self.trapsts,
            Special::Tba => self.tba as u32,
            Special::Tma => self.tma as u32,
            Special::Ttmp { index, .. } => self.ttmp[index],
        }
    }

    /// Reads a 32-bit scalar source.
    pub fn read_src(&self, op: &Operand) -> Result<u32> {
        match *op {
            Operand::Scalar { index, .. } => Ok(self.sgpr(index)),
            Operand::Special(special) => Ok(self.special_lo(special)),
            Operand::Immediate(lit) => Ok(lit.bits32()),
            Operand::Vector { .. } => Err(FaultKind::InvalidReadSource(op.to_string())),
        }
    }

    /// Reads a 64-bit scalar source.
    pub fn read_src_pair(&self, op: &Operand) -> Result<u64> {
        match *op {
            Operand::Scalar { index, words } if words >= 2 => {
                Ok(u64_from_u32_u32(self.sgpr(index), self.sgpr(index + 1)))
            }
            Operand::Special(Special::Exec) => Ok(self.exec),
            Operand::Special(Special::Vcc) => Ok(self.vcc),
            Operand::Special(Special::FlatScratch) => Ok(self.flat_scratch),
            Operand::Special(Special::Tba) => Ok(self.tba),
            Operand::Special(Special::Tma) => Ok(self.tma),
            Operand::Special(Special::Ttmp { index, words }) if words >= 2 => {
                Ok(u64_from_u32_u32(self.ttmp[index], self.ttmp[index + 1]))
            }
            Operand::Immediate(lit) => Ok(lit.bits64()),
            _ => self.read_src(op).map(|v| v as u64),
        }
    }

    /// Reads every dword of a scalar register range.
    pub fn read_words(&self, op: &Operand) -> Result<Vec<u32>> {
        match *op {
            Operand::Scalar { index, words } => Ok((index..index + words).map(|i| self.sgpr(i)).collect()),
            _ if op.words() == 2 => {
                let value = self.read_src_pair(op)?;
                Ok(vec![value as u32, (value >> 32) as u32])
            }
            _ => Ok(vec![self.read_src(op)?]),
        }
    }

    /// Reads an operand at its natural width.
    pub fn read(&self, op: &Operand) -> Result<u64> {
        if op.words() >= 2 || op.literal().is_some() {
            self.read_src_pair(op)
        } else {
            self.read_src(op).map(|v| v as u64)
        }
    }

    fn write_special(&mut self, special: Special, value: u32) -> Result<()> {
        let lo = |reg: u64| (reg & !0xFFFF_FFFF) | value as u64;
        let hi = |reg: u64| (reg & 0xFFFF_FFFF) | ((value as u64) << 32);
        match special {
            Special::Exec | Special::ExecLo => self.set_exec(lo(self.exec)),
            Special::ExecHi => self.set_exec(hi(self.exec)),
            Special::Vcc | Special::VccLo => self.vcc = lo(self.vcc),
            Special::VccHi => self.vcc = hi(self.vcc),
            Special::FlatScratch | Special::FlatScratchLo => self.flat_scratch = lo(self.flat_scratch),
            Special::FlatScratchHi => self.flat_scratch = hi(self.flat_scratch),
            Special::M0 => self.m0 = value,
            Special::Scc => self.scc = value & 1 != 0,
            Special::Status => return Err(FaultKind::InvalidWriteTarget("status".into())),
            Special::Mode => self.mode = value,
            Special::Trapsts => self.trapsts = value,
            Special::Tba => self.tba = lo(self.tba),
            Special::Tma => self.tma = lo(self.tma),
            Special::Ttmp { index, .. } => self.ttmp[index] = value,
        }
        Ok(())
    }

    /// Writes a 32-bit scalar destination.
    pub fn write_dst(&mut self, op: &Operand, value: u32) -> Result<()> {
        match *op {
            Operand::Scalar { index, .. } => {
                self.set_sgpr(index, value);
                Ok(())
            }
            Operand::Special(special) => self.write_special(special, value),
            _ => Err(FaultKind::InvalidWriteTarget(op.to_string())),
        }
    }

    /// Writes a 64-bit scalar destination.
    pub fn write_dst_pair(&mut self, op: &Operand, value: u64) -> Result<()> {
        match *op {
            Operand::Scalar { index, words } if words >= 2 => {
                self.set_sgpr(index, value as u32);
                self.set_sgpr(index + 1, (value >> 32) as u32);
                Ok(())
            }
            Operand::Special(Special::Exec) => {
                self.set_exec(value);
                Ok(())
            }
            Operand::Special(Special::Vcc) => {
                self.vcc = value;
                Ok(())
            }
            Operand::Special(Special::FlatScratch) => {
                self.flat_scratch = value;
                Ok(())
            }
            Operand::Special(Special::Tba) => {
                self.tba = value;
                Ok(())
            }
            Operand::Special(Special::Tma) => {
                self.tma = value;
                Ok(())
            }
            Operand::Special(Special::Ttmp { index, words }) if words >= 2 => {
                self.ttmp[index] = value as u32;
                self.ttmp[index + 1] = (value >> 32) as u32;
                Ok(())
            }
            _ => self.write_dst(op, value as u32),
        }
    }

    /// Writes consecutive dwords into a scalar register range.
    pub fn write_words(&mut self, op: &Operand, values: &[u32]) -> Result<()> {
        match *op {
            Operand::Scalar { index, words } => {
                for (i, value) in values.iter().take(words).enumerate() {
                    self.set_sgpr(index + i, *value);
                }
                Ok(())
            }
            _ if values.len() >= 2 => {
                self.write_dst_pair(op, u64_from_u32_u32(values[0], values[1]))
            }
            _ => self.write_dst(op, values.first().copied().unwrap_or(0)),
        }
    }

    /// Writes `value` split over the operand's dwords, least significant first.
    pub fn write(&mut self, op: &Operand, value: u64) -> Result<()> {
        match op.words() {
            0 => Err(FaultKind::InvalidWriteTarget(op.to_string())),
            1 => self.write_dst(op, value as u32),
            _ => self.write_dst_pair(op, value),
        }
    }

    // Vector operand access

    /// Reads a 32-bit source as seen by `lane`.
    pub fn read_lane(&self, lane: usize, op: &Operand) -> Result<u32> {
        match *op {
            Operand::Vector { index, .. } => Ok(self.vgpr(lane, index)),
            _ => self.read_src(op),
        }
    }

    pub fn read_lane_pair(&self, lane: usize, op: &Operand) -> Result<u64> {
        match *op {
            Operand::Vector { index, words } if words >= 2 => {
                Ok(u64_from_u32_u32(self.vgpr(lane, index), self.vgpr(lane, index + 1)))
            }
            Operand::Vector { index, .. } => Ok(self.vgpr(lane, index) as u64),
            _ => self.read_src_pair(op),
        }
    }

    pub fn read_lane_words(&self, lane: usize, op: &Operand) -> Result<Vec<u32>> {
        match *op {
            Operand::Vector { index, words } => {
                Ok((index..index + words).map(|i| self.vgpr(lane, i)).collect())
            }
            _ => self.read_words(op),
        }
    }

    /// Writes one lane of a vector destination if the lane is enabled in EXEC.
    pub fn vector_write(&mut self, lane: usize, op: &Operand, value: u64) -> Result<()> {
        match *op {
            Operand::Vector { index, words } => {
                if self.is_active(lane) {
                    for word in 0..words.min(2) {
                        self.set_vgpr(lane, index + word, (value >> (32 * word)) as u32);
                    }
                }
                Ok(())
            }
            _ => Err(FaultKind::InvalidWriteTarget(op.to_string())),
        }
    }

    /// Commits per-lane results of one instruction. Each entry holds the
    /// dwords for that lane; lanes disabled in EXEC are never written.
    pub(crate) fn write_lanes(&mut self, op: &Operand, results: &[Option<Vec<u32>>]) -> Result<()> {
        let (index, words) = match *op {
            Operand::Vector { index, words } => (index, words),
            _ => return Err(FaultKind::InvalidWriteTarget(op.to_string())),
        };
        for word in 0..words {
            let column: Vec<Option<u32>> = (0..self.lanes)
                .map(|lane| {
                    if !self.is_active(lane) {
                        return None;
                    }
                    results
                        .get(lane)
                        .and_then(|r| r.as_ref())
                        .and_then(|dwords| dwords.get(word).copied())
                })
                .collect();
            self.vgprs.set_vec(index + word, &column);
        }
        Ok(())
    }

    // Hardware registers

    pub(crate) fn hw_reg(&self, id: u32) -> Result<u32> {
        Ok(match id {
            hwreg::MODE => self.mode,
            hwreg::STATUS => self.status(),
            hwreg::TRAPSTS => self.trapsts,
            hwreg::HW_ID => (self.id as u32 & 0xF) | ((self.workgroup as u32 & 0xF) << 16),
            hwreg::GPR_ALLOC => ((NUM_VGPRS as u32 / 4 - 1) << 8) | ((((NUM_SGPRS as u32 + 15) / 16) - 1) << 24),
            hwreg::LDS_ALLOC => 0,
            hwreg::IB_STS => {
                let counters = self.counters.saturated();
                (counters.vm & 0xF) | (counters.exp << 4) | (counters.lgkm << 8)
            }
            _ => return Err(FaultKind::InvalidReadSource(format!("hwreg {}", id))),
        })
    }

    pub(crate) fn set_hw_reg(&mut self, id: u32, offset: usize, size: usize, value: u32) -> Result<()> {
        let merge = |reg: u32| set_bits(reg as u64, offset, size, value as u64) as u32;
        match id {
            hwreg::MODE => self.mode = merge(self.mode),
            hwreg::STATUS => {
                let merged = merge(self.status());
                self.scc = merged & status::SCC != 0;
                self.status = merged & !(status::SCC | status::EXECZ | status::VCCZ | status::VALID | status::IN_BARRIER);
            }
            hwreg::TRAPSTS => self.trapsts = merge(self.trapsts),
            _ => return Err(FaultKind::InvalidWriteTarget(format!("hwreg {}", id))),
        }
        Ok(())
    }

    pub(crate) fn get_hw_reg(&self, id: u32, offset: usize, size: usize) -> Result<u32> {
        Ok(get_bits(self.hw_reg(id)? as u64, (offset + size - 1).min(63), offset) as u32)
    }

    // Wait counters

    /// Records an issued memory request holding the given counters.
    pub(crate) fn issue(&mut self, ticket: Ticket, counters: &[Counter]) {
        let mut holds = [false; 3];
        for &counter in counters {
            self.counters.increment(counter);
            holds[counter as usize] = true;
        }
        self.in_flight.push(InFlight { ticket, holds });
    }

    /// Raises a counter for traffic issued outside this core (e.g. exports).
    /// Nothing in flight will ever lower it again.
    pub fn note_external_request(&mut self, counter: Counter) {
        self.counters.increment(counter);
    }

    /// Retires every completed request, decrementing the counters it held.
    pub(crate) fn retire_completed(&mut self, memory: &dyn Memory) -> Result<()> {
        let mut pending = Vec::with_capacity(self.in_flight.len());
        for request in self.in_flight.drain(..) {
            if memory.is_complete(request.ticket)? {
                for counter in COUNTERS {
                    if request.holds[counter as usize] {
                        self.counters.decrement(counter);
                    }
                }
            } else {
                pending.push(request);
            }
        }
        self.in_flight = pending;
        Ok(())
    }

    /// `Ok(true)` once every counter is within its threshold, `Ok(false)` while
    /// outstanding requests can still bring it there.
    pub(crate) fn check_wait(&self, thresholds: WaitCounters) -> Result<bool> {
        let mut satisfied = true;
        for counter in COUNTERS {
            let outstanding = self.counters.get(counter);
            let value = outstanding.min(WaitCounters::MAX.get(counter));
            let threshold = thresholds.get(counter);
            if value <= threshold {
                continue;
            }
            satisfied = false;
            let pending = self
                .in_flight
                .iter()
                .filter(|request| request.holds[counter as usize])
                .count() as u32;
            if outstanding.saturating_sub(pending) > threshold {
                return Err(FaultKind::UnsatisfiableWait {
                    counter: counter.name(),
                    value,
                    threshold,
                });
            }
        }
        Ok(satisfied)
    }
}
