//! Run parameters and the YAML launch manifest.
//!
//! A manifest looks like
//!
//! ```yaml
//! Kernel:
//!   Source: saxpy.s
//!   WorkgroupSize: [128, 1, 1]
//!   GridSize: [4, 1, 1]
//!   EnableSgprWorkgroupId: [true, false, false]
//!   EnableVgprWorkitemId: 0
//!   Args:
//!     - { Size: 8, Align: 8, Buffer: 2048 }
//!     - { Size: 4, Align: 4, Value: 3 }
//! ```

use crate::buffer::{align, set_u16, set_u32, set_u64};
use crate::error::DispatchError;
use crate::memory::FlatMemory;
use crate::wavefront::MAX_LANES;
use yaml_rust::yaml::{Yaml, YamlLoader};

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Lanes per wavefront
    pub lanes: usize,
    /// Steps a wave runs before the next wave of its workgroup gets a turn
    pub max_steps: usize,
    /// Ticks until a memory request completes
    pub memory_latency: u64,
    /// Workgroups run concurrently
    pub threads: usize,
    pub progress: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            lanes: MAX_LANES,
            max_steps: 1_000_000,
            memory_latency: 0,
            threads: 1,
            progress: false,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lanes == 0 || self.lanes > MAX_LANES {
            return Err(DispatchError::Manifest(format!(
                "lane count {} is outside 1..={}",
                self.lanes, MAX_LANES
            )));
        }
        if self.threads == 0 {
            return Err(DispatchError::Manifest("thread count must be at least 1".to_string()));
        }
        if self.max_steps == 0 {
            return Err(DispatchError::Manifest("max steps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Shape of a dispatch. The grid is counted in workgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub workgroup_size: [u32; 3],
    pub grid_size: [u32; 3],
    pub enable_sgpr_workgroup_id: [bool; 3],
    /// 0 binds v0 only, 1 adds v1, 2 adds v2
    pub enable_vgpr_workitem_id: u8,
}

impl Default for LaunchGeometry {
    fn default() -> Self {
        LaunchGeometry {
            workgroup_size: [1, 1, 1],
            grid_size: [1, 1, 1],
            enable_sgpr_workgroup_id: [false; 3],
            enable_vgpr_workitem_id: 0,
        }
    }
}

impl LaunchGeometry {
    pub fn workgroup_items(&self) -> usize {
        self.workgroup_size.iter().map(|&n| n as usize).product()
    }

    pub fn num_workgroups(&self) -> usize {
        self.grid_size.iter().map(|&n| n as usize).product()
    }

    /// `(x, y, z)` of the `flat`-th workgroup, x varying fastest.
    pub fn workgroup_id(&self, flat: usize) -> [u32; 3] {
        let [nx, ny, _] = self.grid_size.map(|n| n.max(1) as usize);
        [
            (flat % nx) as u32,
            ((flat / nx) % ny) as u32,
            (flat / (nx * ny)) as u32,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    /// Raw bits, little endian, truncated to the argument size
    Value(u64),
    /// Allocate this many zeroed bytes and pass their address
    Buffer(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelArg {
    pub size: usize,
    pub align: usize,
    pub value: ArgValue,
}

/// A kernarg segment placed in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArgs {
    pub address: u64,
    pub segment: Vec<u8>,
    /// Addresses of the `Buffer` arguments, in argument order
    pub buffers: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchManifest {
    /// Kernel source path, relative to the manifest
    pub source: Option<String>,
    pub geometry: LaunchGeometry,
    pub args: Vec<KernelArg>,
}

fn manifest_error(message: impl Into<String>) -> DispatchError {
    DispatchError::Manifest(message.into())
}

fn get_integer(node: &Yaml, key: &str) -> Result<Option<i64>> {
    match &node[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(integer) => Ok(Some(*integer)),
        other => Err(manifest_error(format!("`{}` must be an integer, found {:?}", key, other))),
    }
}

fn get_triple<T>(node: &Yaml, key: &str, convert: impl Fn(&Yaml) -> Option<T>) -> Result<Option<[T; 3]>>
where
    T: Copy + Default,
{
    let items = match &node[key] {
        Yaml::BadValue | Yaml::Null => return Ok(None),
        Yaml::Array(items) if items.len() == 3 => items,
        _ => return Err(manifest_error(format!("`{}` must be a list of three values", key))),
    };
    let mut triple = [T::default(); 3];
    for (slot, item) in triple.iter_mut().zip(items) {
        *slot = convert(item).ok_or_else(|| manifest_error(format!("bad entry {:?} in `{}`", item, key)))?;
    }
    Ok(Some(triple))
}

fn positive(item: &Yaml) -> Option<u32> {
    match item {
        Yaml::Integer(integer) if *integer > 0 => u32::try_from(*integer).ok(),
        _ => None,
    }
}

fn boolean(item: &Yaml) -> Option<bool> {
    match item {
        Yaml::Boolean(flag) => Some(*flag),
        Yaml::Integer(integer) => Some(*integer != 0),
        _ => None,
    }
}

fn parse_arg(index: usize, arg: &Yaml) -> Result<KernelArg> {
    let size = get_integer(arg, "Size")?
        .filter(|&size| size > 0)
        .ok_or_else(|| manifest_error(format!("argument {} needs a positive `Size`", index)))?
        as usize;
    let align = get_integer(arg, "Align")?.unwrap_or(1) as usize;
    if align == 0 || !align.is_power_of_two() {
        return Err(manifest_error(format!("argument {} has alignment {}", index, align)));
    }
    let value = match (&arg["Value"], &arg["Buffer"]) {
        (Yaml::BadValue, Yaml::BadValue) => ArgValue::Value(0),
        (Yaml::Integer(value), Yaml::BadValue) => ArgValue::Value(*value as u64),
        (Yaml::Real(_), Yaml::BadValue) => {
            let real = arg["Value"]
                .as_f64()
                .ok_or_else(|| manifest_error(format!("argument {} has a bad float", index)))?;
            if size == 4 {
                ArgValue::Value((real as f32).to_bits() as u64)
            } else {
                ArgValue::Value(real.to_bits())
            }
        }
        (Yaml::BadValue, Yaml::Integer(bytes)) if *bytes >= 0 => ArgValue::Buffer(*bytes as usize),
        _ => {
            return Err(manifest_error(format!(
                "argument {} needs exactly one of `Value` or `Buffer`",
                index
            )))
        }
    };
    Ok(KernelArg { size, align, value })
}

impl LaunchManifest {
    pub fn from_yaml(text: &str) -> Result<LaunchManifest> {
        let docs = YamlLoader::load_from_str(text).map_err(|e| manifest_error(e.to_string()))?;
        let doc = docs.first().ok_or_else(|| manifest_error("empty manifest"))?;
        let kernel = &doc["Kernel"];
        if kernel.is_badvalue() {
            return Err(manifest_error("missing `Kernel` section"));
        }

        let mut geometry = LaunchGeometry::default();
        if let Some(size) = get_triple(kernel, "WorkgroupSize", positive)? {
            geometry.workgroup_size = size;
        }
        if let Some(grid) = get_triple(kernel, "GridSize", positive)? {
            geometry.grid_size = grid;
        }
        if let Some(enable) = get_triple(kernel, "EnableSgprWorkgroupId", boolean)? {
            geometry.enable_sgpr_workgroup_id = enable;
        }
        if let Some(dims) = get_integer(kernel, "EnableVgprWorkitemId")? {
            if !(0..=2).contains(&dims) {
                return Err(manifest_error(format!("EnableVgprWorkitemId {} is outside 0..=2", dims)));
            }
            geometry.enable_vgpr_workitem_id = dims as u8;
        }

        let source = kernel["Source"].as_str().map(|s| s.to_string());

        let mut args = Vec::new();
        match &kernel["Args"] {
            Yaml::BadValue | Yaml::Null => {}
            Yaml::Array(array) => {
                for (index, arg) in array.iter().enumerate() {
                    args.push(parse_arg(index, arg)?);
                }
            }
            _ => return Err(manifest_error("`Args` must be a list")),
        }

        Ok(LaunchManifest {
            source,
            geometry,
            args,
        })
    }

    /// Lays the arguments out at their alignments, allocating buffers on the
    /// way, and maps the segment into `memory`.
    pub fn pack(&self, memory: &mut FlatMemory) -> KernelArgs {
        let mut segment: Vec<u8> = Vec::new();
        let mut buffers = Vec::new();
        for arg in &self.args {
            let offset = align(segment.len(), arg.align);
            segment.resize(offset + arg.size, 0);

            let value = match arg.value {
                ArgValue::Value(value) => value,
                ArgValue::Buffer(bytes) => {
                    let address = memory.allocate(bytes);
                    buffers.push(address);
                    address
                }
            };
            match arg.size {
                1 => segment[offset] = value as u8,
                2 => set_u16(&mut segment, offset, value as u16),
                4 => set_u32(&mut segment, offset, value as u32),
                8 => set_u64(&mut segment, offset, value),
                size => {
                    let bytes = value.to_le_bytes();
                    let n = size.min(bytes.len());
                    segment[offset..offset + n].copy_from_slice(&bytes[..n]);
                }
            }
        }
        let address = memory.allocate_with(&segment);
        KernelArgs {
            address,
            segment,
            buffers,
        }
    }
}
