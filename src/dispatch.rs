use crate::barrier::BarrierTable;
use crate::bit::mask;
use crate::config::{LaunchGeometry, SimConfig};
use crate::decoder::Program;
use crate::error::DispatchError;
use crate::memory::Memory;
use crate::processor::{ControlUnit, Processor, StepResult};
use crate::wavefront::{Block, Snapshot, WaveState, Wavefront};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Final state of every wave of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Ordered by wave id
    pub snapshots: Vec<Snapshot>,
    /// Waves left Halted when their workgroup finished
    pub halted: Vec<usize>,
}

/// Preloads the argument registers of one wave.
///
/// s[0:1] receive the kernarg address, followed by the enabled workgroup ids.
/// v0..v2 receive the workitem ids and EXEC covers the valid workitems.
pub fn bind_arguments(
    wave: &mut Wavefront,
    geometry: &LaunchGeometry,
    kernarg_address: u64,
    workgroup_id: [u32; 3],
    workitem_offset: usize,
) {
    wave.set_sgpr(0, kernarg_address as u32);
    wave.set_sgpr(1, (kernarg_address >> 32) as u32);
    let mut sgprs_pos = 2;
    for (axis, &enabled) in geometry.enable_sgpr_workgroup_id.iter().enumerate() {
        if enabled {
            wave.set_sgpr(sgprs_pos, workgroup_id[axis]);
            sgprs_pos += 1;
        }
    }

    let [size_x, size_y, size_z] = geometry.workgroup_size.map(|n| n.max(1) as usize);
    let valid = geometry
        .workgroup_items()
        .saturating_sub(workitem_offset)
        .min(wave.lanes());
    for lane in 0..valid {
        let id = workitem_offset + lane;
        wave.set_vgpr(lane, 0, (id % size_x) as u32);
        if geometry.enable_vgpr_workitem_id > 0 {
            wave.set_vgpr(lane, 1, ((id / size_x) % size_y) as u32);
        }
        if geometry.enable_vgpr_workitem_id > 1 {
            wave.set_vgpr(lane, 2, ((id / (size_x * size_y)) % size_z) as u32);
        }
    }
    wave.set_exec(mask(valid));
}

/// Runs the waves of one workgroup round-robin until each has ended.
///
/// A wave gets `max_steps` steps per turn. Halted and Terminated waves leave
/// the rotation; a fault aborts the workgroup.
pub fn run_workgroup<P: Processor>(
    processor: &mut P,
    workgroup: usize,
    waves: Vec<Wavefront>,
    max_steps: usize,
) -> Result<Vec<Wavefront>> {
    let mut queue: VecDeque<Wavefront> = waves.into();
    let mut finished = Vec::with_capacity(queue.len());
    // consecutive turns spent by waves stuck at an unreleased barrier
    let mut stalled = 0;

    while let Some(mut wave) = queue.pop_front() {
        let pc = wave.pc();
        match processor.run(&mut wave, max_steps) {
            StepResult::Continuing => {
                stalled = 0;
                queue.push_back(wave);
            }
            StepResult::Blocked => {
                let stuck = wave.pc() == pc && matches!(wave.blocked(), Some(Block::Barrier { .. }));
                stalled = if stuck { stalled + 1 } else { 0 };
                queue.push_back(wave);
                if stalled >= queue.len() {
                    debug!(workgroup, waves = queue.len(), "every wave is stuck at a barrier");
                    return Err(DispatchError::Deadlock { workgroup });
                }
            }
            StepResult::Halted | StepResult::Terminated => {
                stalled = 0;
                finished.push(wave);
            }
            StepResult::Faulted(fault) => {
                return Err(DispatchError::Fault {
                    wave: wave.id(),
                    fault,
                });
            }
        }
    }
    Ok(finished)
}

/// Launches a program over a grid of workgroups.
///
/// Each workgroup runs on its own worker thread, `threads` at a time, all of
/// them sharing one memory.
pub struct Dispatcher<M: Memory + Send + 'static> {
    program: Arc<Program>,
    memory: Arc<Mutex<M>>,
    geometry: LaunchGeometry,
    kernarg_address: u64,
    config: SimConfig,
}

impl<M: Memory + Send + 'static> Dispatcher<M> {
    pub fn new(
        program: Program,
        memory: Arc<Mutex<M>>,
        geometry: LaunchGeometry,
        kernarg_address: u64,
        config: SimConfig,
    ) -> Self {
        Dispatcher {
            program: Arc::new(program),
            memory,
            geometry,
            kernarg_address,
            config,
        }
    }

    pub fn memory(&self) -> &Arc<Mutex<M>> {
        &self.memory
    }

    pub fn waves_per_workgroup(&self) -> usize {
        let lanes = self.config.lanes.max(1);
        ((self.geometry.workgroup_items() + lanes - 1) / lanes).max(1)
    }

    /// Creates the waves of workgroup `workgroup` with their registers bound.
    pub fn setup_workgroup(&self, workgroup: usize) -> Vec<Wavefront> {
        let waves = self.waves_per_workgroup();
        let workgroup_id = self.geometry.workgroup_id(workgroup);
        (0..waves)
            .map(|i| {
                let mut wave = Wavefront::new(workgroup * waves + i, workgroup, self.config.lanes);
                bind_arguments(
                    &mut wave,
                    &self.geometry,
                    self.kernarg_address,
                    workgroup_id,
                    i * self.config.lanes,
                );
                wave
            })
            .collect()
    }

    pub fn execute(&self) -> Result<DispatchReport> {
        self.config.validate()?;
        let num_workgroups = self.geometry.num_workgroups();
        let threads = self.config.threads;
        info!(
            workgroups = num_workgroups,
            waves_per_workgroup = self.waves_per_workgroup(),
            threads,
            "dispatch start"
        );

        use indicatif::{ProgressBar, ProgressStyle};
        let bar = if self.config.progress {
            ProgressBar::new(num_workgroups as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta_precise}) \n {msg}")
            .progress_chars("#>-"));

        let barriers = Arc::new(BarrierTable::new());
        let mut report = DispatchReport::default();

        for workgroup_base in (0..num_workgroups).step_by(threads) {
            let mut thread_handles = vec![];
            for workgroup in workgroup_base..(workgroup_base + threads).min(num_workgroups) {
                let waves = self.setup_workgroup(workgroup);
                barriers.register(workgroup, waves.len());

                let program = Arc::clone(&self.program);
                let memory = Arc::clone(&self.memory);
                let barriers = Arc::clone(&barriers);
                let max_steps = self.config.max_steps;

                let handle = thread::spawn(move || {
                    let mut cu = ControlUnit::new(&program, memory, &barriers);
                    run_workgroup(&mut cu, workgroup, waves, max_steps)
                });
                thread_handles.push(handle);
            }

            for handle in thread_handles {
                let waves = handle.join().map_err(|_| DispatchError::WorkerPanicked)??;
                for wave in waves {
                    if wave.state() == WaveState::Halted {
                        warn!(wave = wave.id(), workgroup = wave.workgroup(), pc = wave.pc(), "wave left halted");
                        report.halted.push(wave.id());
                    }
                    report.snapshots.push(wave.snapshot());
                }
                bar.inc(1);
            }
        }

        bar.finish();
        report.snapshots.sort_by_key(|snapshot| snapshot.id);
        report.halted.sort_unstable();
        info!(
            waves = report.snapshots.len(),
            halted = report.halted.len(),
            "dispatch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FlatMemory;

    fn geometry(workgroup_size: [u32; 3], grid_size: [u32; 3]) -> LaunchGeometry {
        LaunchGeometry {
            workgroup_size,
            grid_size,
            ..LaunchGeometry::default()
        }
    }

    #[test]
    fn binds_ids_and_exec() {
        let geometry = LaunchGeometry {
            workgroup_size: [4, 3, 1],
            enable_sgpr_workgroup_id: [true, false, true],
            enable_vgpr_workitem_id: 1,
            ..LaunchGeometry::default()
        };
        let mut wave = Wavefront::new(0, 0, 8);
        bind_arguments(&mut wave, &geometry, 0x1_2345_6000, [5, 6, 7], 8);
        assert_eq!(wave.sgpr(0), 0x2345_6000);
        assert_eq!(wave.sgpr(1), 0x1);
        assert_eq!(wave.sgpr(2), 5);
        assert_eq!(wave.sgpr(3), 7);
        assert_eq!(wave.exec(), 0b1111);
        assert_eq!(wave.vgpr(0, 0), 0);
        assert_eq!(wave.vgpr(0, 1), 2);
        assert_eq!(wave.vgpr(3, 0), 3);
        assert_eq!(wave.vgpr(3, 1), 2);
        assert_eq!(wave.vgpr(3, 2), 0);
    }

    #[test]
    fn splits_workgroups_into_waves() {
        let program = Program::parse("s_endpgm").unwrap();
        let config = SimConfig {
            lanes: 16,
            ..SimConfig::default()
        };
        let memory = Arc::new(Mutex::new(FlatMemory::new(0)));
        let dispatcher = Dispatcher::new(program, memory, geometry([40, 1, 1], [2, 1, 1]), 0, config);
        assert_eq!(dispatcher.waves_per_workgroup(), 3);
        let waves = dispatcher.setup_workgroup(1);
        let ids: Vec<usize> = waves.iter().map(|w| w.id()).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(waves[2].exec(), 0xFF);
        assert_eq!(waves[2].vgpr(7, 0), 39);

        let report = dispatcher.execute().unwrap();
        assert_eq!(report.snapshots.len(), 6);
        assert!(report.snapshots.iter().all(|s| s.state == WaveState::Terminated));
        assert!(report.halted.is_empty());
    }

    #[test]
    fn halted_waves_are_reported() {
        let program = Program::parse("s_sethalt 1\ns_endpgm").unwrap();
        let config = SimConfig {
            lanes: 4,
            ..SimConfig::default()
        };
        let memory = Arc::new(Mutex::new(FlatMemory::new(0)));
        let dispatcher = Dispatcher::new(program, memory, geometry([4, 1, 1], [1, 1, 1]), 0, config);
        let report = dispatcher.execute().unwrap();
        assert_eq!(report.halted, vec![0]);
        assert_eq!(report.snapshots[0].state, WaveState::Halted);
    }

    #[test]
    fn lone_barrier_participant_deadlocks() {
        let program = Program::parse(
            "
            s_cmp_eq_u32 s2, 0
            s_cbranch_scc1 wait
            s_sethalt 1
            wait:
            s_barrier
            s_endpgm
            ",
        )
        .unwrap();
        let geometry = LaunchGeometry {
            workgroup_size: [8, 1, 1],
            grid_size: [1, 1, 1],
            ..LaunchGeometry::default()
        };
        let config = SimConfig {
            lanes: 4,
            ..SimConfig::default()
        };
        let memory = Arc::new(Mutex::new(FlatMemory::new(0)));
        let dispatcher = Dispatcher::new(program, memory, geometry, 0, config);
        let mut waves = dispatcher.setup_workgroup(0);
        waves[1].set_sgpr(2, 1);

        let barriers = BarrierTable::new();
        barriers.register(0, waves.len());
        let mut cu = ControlUnit::new(&dispatcher.program, Arc::clone(dispatcher.memory()), &barriers);
        assert!(matches!(
            run_workgroup(&mut cu, 0, waves, 100),
            Err(DispatchError::Deadlock { workgroup: 0 })
        ));
    }
}
