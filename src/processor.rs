//! Fetch-decode-execute loop of a single wavefront.

use crate::barrier::BarrierTable;
use crate::decoder::{Instruction, Program};
use crate::error::{Fault, FaultKind, Result};
use crate::execute::{execute, Exec, Signals};
use crate::memory::Memory;
use crate::wavefront::{Block, WaveState, Wavefront};
use tracing::{debug, trace};

/// Outcome of stepping a wave.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Continuing,
    /// Waiting on a barrier or on wait counters; step again later
    Blocked,
    Halted,
    Terminated,
    Faulted(Fault),
}

pub trait Processor {
    fn step(&mut self, wave: &mut Wavefront) -> StepResult;

    /// Steps until anything other than `Continuing` comes back, or until
    /// `max_steps` steps have been taken.
    fn run(&mut self, wave: &mut Wavefront, max_steps: usize) -> StepResult {
        for _ in 0..max_steps {
            let result = self.step(wave);
            if result != StepResult::Continuing {
                return result;
            }
        }
        StepResult::Continuing
    }
}

/// Drives wavefronts over a decoded program.
pub struct ControlUnit<'a, M: Memory> {
    program: &'a Program,
    memory: M,
    barriers: &'a BarrierTable,
}

impl<'a, M: Memory> ControlUnit<'a, M> {
    pub fn new(program: &'a Program, memory: M, barriers: &'a BarrierTable) -> Self {
        ControlUnit {
            program,
            memory,
            barriers,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Ticks memory, retires finished requests and re-checks the block reason
    /// of `wave`. `Ok(true)` when the wave may issue.
    fn advance(&mut self, wave: &mut Wavefront) -> Result<bool> {
        self.memory.tick()?;
        wave.retire_completed(&self.memory)?;
        self.unblock(wave)
    }

    fn unblock(&self, wave: &mut Wavefront) -> Result<bool> {
        let released = match wave.blocked() {
            None => return Ok(true),
            Some(Block::Barrier { generation }) => {
                self.barriers.is_released(wave.workgroup(), generation)
            }
            Some(Block::Wait(thresholds)) => wave.check_wait(thresholds)?,
        };
        if released {
            debug!(wave = wave.id(), pc = wave.pc(), "unblocked");
            wave.blocked = None;
        }
        Ok(released)
    }

    fn fault(&self, wave: &mut Wavefront, pc: u64, inst: Option<&Instruction>, kind: FaultKind) -> StepResult {
        let fault = Fault {
            pc,
            opcode: inst.map(|inst| inst.opcode),
            kind,
        };
        debug!(wave = wave.id(), %fault, "faulted");
        wave.set_fault(fault.clone());
        self.barriers.retire(wave.workgroup());
        StepResult::Faulted(fault)
    }
}

impl<M: Memory> Processor for ControlUnit<'_, M> {
    fn step(&mut self, wave: &mut Wavefront) -> StepResult {
        match wave.state() {
            WaveState::Running => {}
            WaveState::Halted => return StepResult::Halted,
            WaveState::Terminated => return StepResult::Terminated,
            WaveState::Faulted => {
                return wave
                    .fault()
                    .cloned()
                    .map_or(StepResult::Terminated, StepResult::Faulted)
            }
        }

        let pc = wave.pc();
        match self.advance(wave) {
            Ok(true) => {}
            Ok(false) => return StepResult::Blocked,
            Err(kind) => return self.fault(wave, pc, None, kind),
        }

        let program = self.program;
        let inst = match program.fetch(pc) {
            Some(inst) => inst,
            None => return self.fault(wave, pc, None, FaultKind::InvalidProgramCounter(pc)),
        };
        trace!(wave = wave.id(), pc = format_args!("{:#x}", pc), "{}", inst);

        let fallthrough = pc + inst.size as u64;
        if wave.vskip && inst.format().is_vector() {
            wave.set_pc(fallthrough);
            return StepResult::Continuing;
        }

        let mut ex = Exec {
            wave: &mut *wave,
            memory: &mut self.memory,
            barriers: self.barriers,
            pc,
            next_pc: fallthrough,
        };
        let result = execute(&mut ex, inst);
        let next_pc = ex.next_pc;

        match result {
            Ok(signal) => {
                wave.set_pc(next_pc);
                match signal {
                    Signals::None => StepResult::Continuing,
                    Signals::Switch => StepResult::Blocked,
                    Signals::Halt => {
                        debug!(wave = wave.id(), pc, "halted");
                        wave.state = WaveState::Halted;
                        StepResult::Halted
                    }
                    Signals::EndOfProgram => {
                        debug!(wave = wave.id(), pc, "end of program");
                        wave.state = WaveState::Terminated;
                        wave.blocked = None;
                        self.barriers.retire(wave.workgroup());
                        StepResult::Terminated
                    }
                }
            }
            Err(kind) => self.fault(wave, pc, Some(inst), kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::Opcode;
    use crate::memory::FlatMemory;

    fn program(text: &str) -> Program {
        Program::parse(text).unwrap()
    }

    #[test]
    fn runs_to_end_of_program() {
        let prog = program(
            "
            s_mov_b32 s0, 5
            s_add_u32 s0, s0, 7
            s_endpgm
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 4);
        assert_eq!(cu.run(&mut wave, 100), StepResult::Terminated);
        assert_eq!(wave.sgpr(0), 12);
        assert_eq!(wave.pc(), 12);

        let before = wave.snapshot();
        assert_eq!(cu.step(&mut wave), StepResult::Terminated);
        assert_eq!(wave.snapshot(), before);
    }

    #[test]
    fn run_stops_after_max_steps() {
        let prog = program(
            "
            loop:
            s_add_u32 s0, s0, 1
            s_branch loop
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 1);
        assert_eq!(cu.run(&mut wave, 10), StepResult::Continuing);
        assert_eq!(wave.sgpr(0), 5);
        assert_eq!(wave.state(), WaveState::Running);
    }

    #[test]
    fn pc_outside_program_faults() {
        let prog = program("s_branch 4");
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 1);
        assert_eq!(cu.step(&mut wave), StepResult::Continuing);
        assert_eq!(wave.pc(), 20);
        match cu.step(&mut wave) {
            StepResult::Faulted(fault) => {
                assert_eq!(fault.pc, 20);
                assert_eq!(fault.opcode, None);
                assert_eq!(fault.kind, FaultKind::InvalidProgramCounter(20));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(wave.state(), WaveState::Faulted);
        assert!(matches!(cu.step(&mut wave), StepResult::Faulted(_)));
    }

    #[test]
    fn execution_fault_records_opcode() {
        let prog = program(
            "
            s_mov_b32 m0, 200
            s_movrels_b32 s0, s10
            s_endpgm
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 1);
        match cu.run(&mut wave, 10) {
            StepResult::Faulted(fault) => {
                assert_eq!(fault.pc, 4);
                assert_eq!(fault.opcode, Some(Opcode::S_MOVRELS_B32));
                assert_eq!(fault.kind, FaultKind::RegisterOutOfRange(210));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(wave.fault().map(|f| f.pc), Some(4));
    }

    #[test]
    fn halted_wave_resumes_after_the_halt() {
        let prog = program(
            "
            s_sethalt 1
            s_mov_b32 s1, 9
            s_endpgm
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 1);
        assert_eq!(cu.run(&mut wave, 10), StepResult::Halted);
        assert_eq!(cu.step(&mut wave), StepResult::Halted);
        assert_eq!(wave.pc(), 4);
        assert_eq!(wave.sgpr(1), 0);

        wave.resume();
        assert_eq!(cu.run(&mut wave, 10), StepResult::Terminated);
        assert_eq!(wave.sgpr(1), 9);
    }

    #[test]
    fn waitcnt_blocks_until_load_completes() {
        let mut memory = FlatMemory::new(4);
        let base = memory.allocate_with(&0xCAFE_F00Du32.to_le_bytes());
        let prog = program(
            "
            s_load_dword s4, s[0:1], 0
            s_waitcnt lgkmcnt(0)
            s_mov_b32 s5, s4
            s_endpgm
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, memory, &barriers);
        let mut wave = Wavefront::new(0, 0, 1);
        wave.set_sgpr(0, base as u32);
        wave.set_sgpr(1, (base >> 32) as u32);

        assert_eq!(cu.step(&mut wave), StepResult::Continuing);
        assert_eq!(wave.counters().lgkm, 1);
        let mut blocked = 0;
        loop {
            match cu.step(&mut wave) {
                StepResult::Blocked => blocked += 1,
                StepResult::Continuing => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(blocked, 3);
        assert_eq!(wave.counters().lgkm, 0);
        assert_eq!(cu.run(&mut wave, 10), StepResult::Terminated);
        assert_eq!(wave.sgpr(5), 0xCAFE_F00D);
    }

    #[test]
    fn vskip_retires_vector_instructions_without_effect() {
        let prog = program(
            "
            s_setvskip 1, 0
            v_mov_b32 v0, 7
            s_mov_b32 s0, 3
            s_setvskip 0, 0
            v_mov_b32 v1, 8
            s_endpgm
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 2);
        assert_eq!(cu.run(&mut wave, 20), StepResult::Terminated);
        assert_eq!(wave.vgpr(0, 0), 0);
        assert_eq!(wave.sgpr(0), 3);
        assert_eq!(wave.vgpr(1, 1), 8);
    }

    #[test]
    fn setkill_terminates() {
        let prog = program(
            "
            s_setkill 1
            s_mov_b32 s0, 1
            s_endpgm
            ",
        );
        let barriers = BarrierTable::new();
        let mut cu = ControlUnit::new(&prog, FlatMemory::new(0), &barriers);
        let mut wave = Wavefront::new(0, 0, 1);
        assert_eq!(cu.run(&mut wave, 10), StepResult::Terminated);
        assert_eq!(wave.sgpr(0), 0);
    }
}
