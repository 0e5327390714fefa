use gcn_wave_sim::barrier::BarrierTable;
use gcn_wave_sim::buffer::to_dwords;
use gcn_wave_sim::config::{LaunchManifest, SimConfig};
use gcn_wave_sim::dispatch::Dispatcher;
use gcn_wave_sim::error::{DispatchError, FaultKind};
use gcn_wave_sim::memory::FlatMemory;
use gcn_wave_sim::processor::{ControlUnit, Processor, StepResult};
use gcn_wave_sim::wavefront::{Counter, WaveState, Wavefront};
use gcn_wave_sim::Program;
use std::sync::{Arc, Mutex};

fn run_single(source: &str, lanes: usize) -> Wavefront {
    let program = Program::parse(source).unwrap();
    let barriers = BarrierTable::new();
    let mut cu = ControlUnit::new(&program, FlatMemory::new(0), &barriers);
    let mut wave = Wavefront::new(0, 0, lanes);
    assert_eq!(cu.run(&mut wave, 1000), StepResult::Terminated);
    wave
}

#[test]
fn uniform_fork_takes_the_branch() {
    let wave = run_single(
        "
            v_cmp_gt_u32 s[10:11], 1, v0
            s_mov_b32 s12, 0
            s_cbranch_i_fork s[10:11], then
            v_mov_b32 v1, 100
            s_branch join
        then:
            v_mov_b32 v1, 200
        join:
            s_cbranch_join s12
            v_add_u32 v2, vcc, v1, v0
            s_endpgm
        ",
        4,
    );
    // v0 is zero in every lane, so every lane passes
    assert_eq!(wave.exec(), 0xF);
    assert_eq!(wave.divergence_depth(), 0);
    for lane in 0..4 {
        assert_eq!(wave.vgpr(lane, 1), 200, "lane {}", lane);
    }
}

#[test]
fn fork_splits_lanes_by_condition() {
    let wave = run_single(
        "
            v_mbcnt_lo_u32_b32 v0, -1, 0
            v_cmp_gt_u32 s[10:11], 1, v0
            s_mov_b32 s12, 0
            s_cbranch_i_fork s[10:11], then
            v_mov_b32 v1, 100
            s_branch join
        then:
            v_mov_b32 v1, 200
        join:
            s_cbranch_join s12
            v_add_u32 v2, vcc, v1, v0
            s_endpgm
        ",
        4,
    );
    assert_eq!(wave.exec(), 0xF);
    assert_eq!(wave.divergence_depth(), 0);
    let results: Vec<u32> = (0..4).map(|lane| wave.vgpr(lane, 2)).collect();
    assert_eq!(results, vec![200, 101, 102, 103]);
}

#[test]
fn saveexec_and_wrexec_write_different_masks() {
    let wave = run_single(
        "
            s_mov_b64 exec, 9
            s_mov_b64 s[2:3], 6
            s_andn2_saveexec_b64 s[4:5], s[2:3]
            s_mov_b64 exec, 9
            s_andn2_wrexec_b64 s[6:7], s[2:3]
            s_cselect_b32 s8, 1, 0
            s_endpgm
        ",
        4,
    );
    assert_eq!(wave.sgpr(4), 9);
    assert_eq!(wave.sgpr(6), 6);
    assert_eq!(wave.exec(), 6);
    assert_eq!(wave.sgpr(8), 1);
}

#[test]
fn unsatisfiable_wait_faults_the_wave() {
    let program = Program::parse("s_waitcnt expcnt(0)\ns_endpgm").unwrap();
    let barriers = BarrierTable::new();
    let mut cu = ControlUnit::new(&program, FlatMemory::new(0), &barriers);
    let mut wave = Wavefront::new(0, 0, 1);
    wave.note_external_request(Counter::Exp);
    match cu.run(&mut wave, 10) {
        StepResult::Faulted(fault) => {
            assert_eq!(fault.pc, 0);
            assert_eq!(
                fault.kind,
                FaultKind::UnsatisfiableWait {
                    counter: "expcnt",
                    value: 1,
                    threshold: 0,
                }
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(wave.state(), WaveState::Faulted);
}

const EXCHANGE: &str = "
    s_load_dwordx4 s[4:7], s[0:1], 0
    s_waitcnt lgkmcnt(0)
    v_lshlrev_b32 v1, 2, v0
    v_mov_b32 v3, s5
    v_add_u32 v2, vcc, s4, v1
    v_addc_u32 v3, vcc, 0, v3, vcc
    flat_store_dword v[2:3], v0
    s_waitcnt vmcnt(0) & lgkmcnt(0)
    s_barrier
    v_add_u32 v4, vcc, 4, v0
    v_and_b32 v4, 7, v4
    v_lshlrev_b32 v4, 2, v4
    v_mov_b32 v9, s5
    v_add_u32 v8, vcc, s4, v4
    v_addc_u32 v9, vcc, 0, v9, vcc
    flat_load_dword v5, v[8:9]
    v_mov_b32 v11, s7
    v_add_u32 v10, vcc, s6, v1
    v_addc_u32 v11, vcc, 0, v11, vcc
    s_waitcnt vmcnt(0)
    flat_store_dword v[10:11], v5
    s_endpgm
";

const EXCHANGE_MANIFEST: &str = "
Kernel:
  WorkgroupSize: [8, 1, 1]
  GridSize: [1, 1, 1]
  Args:
    - { Size: 8, Align: 8, Buffer: 32 }
    - { Size: 8, Align: 8, Buffer: 32 }
";

#[test]
fn barrier_orders_waves_of_a_workgroup() {
    let manifest = LaunchManifest::from_yaml(EXCHANGE_MANIFEST).unwrap();
    let mut memory = FlatMemory::new(3);
    let kernargs = manifest.pack(&mut memory);
    let memory = Arc::new(Mutex::new(memory));
    let config = SimConfig {
        lanes: 4,
        ..SimConfig::default()
    };
    let dispatcher = Dispatcher::new(
        Program::parse(EXCHANGE).unwrap(),
        Arc::clone(&memory),
        manifest.geometry,
        kernargs.address,
        config,
    );
    let report = dispatcher.execute().unwrap();
    assert_eq!(report.snapshots.len(), 2);
    assert!(report.snapshots.iter().all(|s| s.state == WaveState::Terminated));

    let memory = memory.lock().unwrap();
    let out = to_dwords(memory.read(kernargs.buffers[1], 32).unwrap());
    assert_eq!(out, vec![4, 5, 6, 7, 0, 1, 2, 3]);
}

const GLOBAL_IDS: &str = "
    s_load_dwordx2 s[4:5], s[0:1], 0
    s_waitcnt lgkmcnt(0)
    s_mul_i32 s3, s2, 4
    v_add_u32 v1, vcc, s3, v0
    v_lshlrev_b32 v2, 2, v1
    v_mov_b32 v4, s5
    v_add_u32 v3, vcc, s4, v2
    v_addc_u32 v4, vcc, 0, v4, vcc
    s_mul_i32 s6, s2, 100
    v_add_u32 v5, vcc, s6, v0
    flat_store_dword v[3:4], v5
    s_endpgm
";

#[test]
fn manifest_binds_workgroup_ids_across_threads() {
    let manifest = LaunchManifest::from_yaml(
        "
Kernel:
  WorkgroupSize: [4, 1, 1]
  GridSize: [3, 1, 1]
  EnableSgprWorkgroupId: [true, false, false]
  Args:
    - { Size: 8, Align: 8, Buffer: 48 }
",
    )
    .unwrap();
    let mut memory = FlatMemory::new(1);
    let kernargs = manifest.pack(&mut memory);
    let memory = Arc::new(Mutex::new(memory));
    let config = SimConfig {
        lanes: 4,
        threads: 2,
        ..SimConfig::default()
    };
    let dispatcher = Dispatcher::new(
        Program::parse(GLOBAL_IDS).unwrap(),
        Arc::clone(&memory),
        manifest.geometry,
        kernargs.address,
        config,
    );
    let report = dispatcher.execute().unwrap();
    let ids: Vec<usize> = report.snapshots.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    let memory = memory.lock().unwrap();
    let out = to_dwords(memory.read(kernargs.buffers[0], 48).unwrap());
    assert_eq!(out, vec![0, 1, 2, 3, 100, 101, 102, 103, 200, 201, 202, 203]);
}

#[test]
fn faulting_wave_fails_the_dispatch() {
    let memory = Arc::new(Mutex::new(FlatMemory::new(0)));
    let dispatcher = Dispatcher::new(
        Program::parse("s_load_dword s4, s[0:1], 0\ns_endpgm").unwrap(),
        memory,
        Default::default(),
        0,
        SimConfig::default(),
    );
    match dispatcher.execute() {
        Err(DispatchError::Fault { wave, fault }) => {
            assert_eq!(wave, 0);
            assert!(matches!(fault.kind, FaultKind::Memory(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}
