use anyhow::{bail, Context, Result};
use gcn_wave_sim::buffer::to_dwords;
use gcn_wave_sim::config::{ArgValue, LaunchManifest, SimConfig};
use gcn_wave_sim::decoder::Program;
use gcn_wave_sim::dispatch::Dispatcher;
use gcn_wave_sim::memory::FlatMemory;
use getopts::{Matches, Options};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [OPTIONS] [-k KERNEL] [-m MANIFEST]", program);
    print!("{}", opts.usage(&brief));
}

fn opt_number<T>(matches: &Matches, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(matches
        .opt_get::<T>(name)
        .with_context(|| format!("invalid value for --{}", name))?
        .unwrap_or(default))
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();
    let mut opts = Options::new();
    opts.optopt("k", "kernel", "Kernel assembler source", "FILE");
    opts.optopt("m", "manifest", "YAML launch manifest", "FILE");
    opts.optopt("", "lanes", "Lanes per wavefront (1-64)", "N");
    opts.optopt("", "max-steps", "Steps per wave before switching", "N");
    opts.optopt("", "latency", "Memory completion latency in ticks", "N");
    opts.optopt("t", "threads", "Workgroups run in parallel", "N");
    opts.optopt("", "dump", "Write final wave snapshots as MessagePack", "FILE");
    opts.optflag("q", "quiet", "Only log warnings and hide the progress bar");
    opts.optflag("h", "help", "Print help");
    let matches = opts.parse(&args[1..]).context("invalid arguments")?;
    if matches.opt_present("h") {
        print_usage(&program, opts);
        return Ok(());
    }

    let quiet = matches.opt_present("q");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if quiet { "warn" } else { "info" }));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let defaults = SimConfig::default();
    let config = SimConfig {
        lanes: opt_number(&matches, "lanes", defaults.lanes)?,
        max_steps: opt_number(&matches, "max-steps", defaults.max_steps)?,
        memory_latency: opt_number(&matches, "latency", defaults.memory_latency)?,
        threads: opt_number(&matches, "threads", defaults.threads)?,
        progress: !quiet,
    };
    config.validate()?;

    let (manifest, manifest_dir) = match matches.opt_str("m") {
        Some(path) => {
            let text = fs::read_to_string(&path).with_context(|| format!("failed to read manifest {}", path))?;
            let dir = Path::new(&path).parent().map(Path::to_path_buf).unwrap_or_default();
            (LaunchManifest::from_yaml(&text)?, dir)
        }
        None => {
            let mut manifest = LaunchManifest::default();
            manifest.geometry.workgroup_size = [config.lanes as u32, 1, 1];
            (manifest, Default::default())
        }
    };

    let kernel_path = match (matches.opt_str("k"), &manifest.source) {
        (Some(path), _) => Path::new(&path).to_path_buf(),
        (None, Some(source)) => manifest_dir.join(source),
        (None, None) => {
            print_usage(&program, opts);
            bail!("no kernel given; pass --kernel or a manifest with `Source`");
        }
    };
    let source = fs::read_to_string(&kernel_path)
        .with_context(|| format!("failed to read kernel {}", kernel_path.display()))?;
    let kernel = Program::parse(&source).with_context(|| format!("failed to decode {}", kernel_path.display()))?;
    info!(
        path = %kernel_path.display(),
        instructions = kernel.len(),
        bytes = kernel.size(),
        "kernel loaded"
    );

    let mut memory = FlatMemory::new(config.memory_latency);
    let kernargs = manifest.pack(&mut memory);
    let memory = Arc::new(Mutex::new(memory));

    let dispatcher = Dispatcher::new(kernel, Arc::clone(&memory), manifest.geometry, kernargs.address, config);
    let report = dispatcher.execute()?;

    for snapshot in &report.snapshots {
        println!(
            "wave {:4} wg {:4} {:?} pc 0x{:X} exec 0x{:016X}",
            snapshot.id, snapshot.workgroup, snapshot.state, snapshot.pc, snapshot.exec
        );
    }

    if let Ok(memory) = memory.lock() {
        let sizes = manifest.args.iter().filter_map(|arg| match arg.value {
            ArgValue::Buffer(bytes) => Some(bytes),
            ArgValue::Value(_) => None,
        });
        for (i, (&address, bytes)) in kernargs.buffers.iter().zip(sizes).enumerate() {
            let head = memory.read(address, bytes.min(64))?;
            println!("buffer {} @ 0x{:X}: {:08X?}", i, address, to_dwords(head));
        }
    }

    if let Some(path) = matches.opt_str("dump") {
        let bytes = rmp_serde::to_vec(&report.snapshots).context("failed to encode snapshots")?;
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path))?;
        info!(path = %path, waves = report.snapshots.len(), "snapshots written");
    }

    Ok(())
}
