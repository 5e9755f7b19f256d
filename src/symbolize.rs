//! DWARF symbolization of captured instruction pointers
//!
//! Maps raw instruction pointers from the target process to
//! `StackFrame { function, file, line }` using the addr2line crate. For
//! position-independent executables the runtime load bias is recovered
//! from `/proc/<pid>/maps` so link-time addresses line up. Addresses
//! that cannot be resolved (stripped binaries, JIT regions, libraries we
//! did not index) become hex placeholder frames rather than being
//! dropped, which keeps sample counts honest.

use anyhow::{Context, Result};
use object::{Object, ObjectSection};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sample::StackFrame;

/// Placeholder file name for frames with no resolvable source location
const UNKNOWN_FILE: &str = "[unknown]";

/// DWARF lookup context for the target's main binary.
pub struct Symbolizer {
    context: addr2line::Context<gimli::EndianArcSlice<gimli::RunTimeEndian>>,
    /// Runtime address = link-time address + bias (0 for non-PIE)
    load_bias: u64,
}

impl Symbolizer {
    /// Build a symbolizer for a running process from `/proc/<pid>/exe`.
    pub fn for_process(pid: u32) -> Result<Self> {
        let exe = exe_path(pid)?;
        let bias = load_bias(pid, &exe)?;
        Self::load(&exe, bias)
    }

    /// Load DWARF debug info from an ELF binary with a known load bias.
    pub fn load(binary_path: &Path, load_bias: u64) -> Result<Self> {
        let file = File::open(binary_path)
            .with_context(|| format!("Failed to open binary: {}", binary_path.display()))?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("Failed to memory-map binary")?;

        let object = object::File::parse(&*mmap).context("Failed to parse ELF binary")?;

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        // Non-PIE executables are mapped at their link address.
        let bias = match object.kind() {
            object::ObjectKind::Executable => 0,
            _ => load_bias,
        };

        let load_section =
            |id: gimli::SectionId| -> Result<gimli::EndianArcSlice<gimli::RunTimeEndian>> {
                let data = object
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[]));
                let bytes: Arc<[u8]> = Arc::from(data.into_owned());
                Ok(gimli::EndianArcSlice::new(bytes, endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)
            .context("Failed to load DWARF sections - binary may not have debug symbols")?;

        let context =
            addr2line::Context::from_dwarf(dwarf).context("Failed to create DWARF context")?;

        Ok(Self {
            context,
            load_bias: bias,
        })
    }

    /// Resolve one instruction pointer to a frame.
    ///
    /// `is_leaf` distinguishes the executing IP from a return address;
    /// return addresses point one past the call, so they are backed up
    /// by one byte before lookup.
    pub fn frame_for(&self, ip: u64, is_leaf: bool) -> StackFrame {
        let adjusted = if is_leaf { ip } else { ip.saturating_sub(1) };
        let link_addr = adjusted.wrapping_sub(self.load_bias);

        let mut function_name = None;
        let mut source_file = None;
        let mut line_number = 0u32;

        if let Ok(mut frames) = self.context.find_frames(link_addr).skip_all_loads() {
            if let Ok(Some(frame)) = frames.next() {
                if let Some(func) = frame.function {
                    if let Ok(name) = func.raw_name() {
                        function_name = Some(name.to_string());
                    }
                }
                if let Some(loc) = frame.location {
                    if let Some(file) = loc.file {
                        source_file = Some(basename(file));
                    }
                    line_number = loc.line.unwrap_or(0);
                }
            }
        }

        // Fall back to the line table when inline frame info is absent.
        if source_file.is_none() {
            if let Ok(Some(loc)) = self.context.find_location(link_addr) {
                if let Some(file) = loc.file {
                    source_file = Some(basename(file));
                }
                line_number = loc.line.unwrap_or(0);
            }
        }

        StackFrame::new(
            function_name.unwrap_or_else(|| format!("0x{:x}", ip)),
            source_file.unwrap_or_else(|| UNKNOWN_FILE.to_string()),
            line_number,
        )
    }
}

/// Placeholder frame for when no symbolizer is available at all.
pub fn placeholder_frame(ip: u64) -> StackFrame {
    StackFrame::new(format!("0x{:x}", ip), UNKNOWN_FILE, 0)
}

/// Keep only the file basename, matching folded-stack convention.
fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Compute the load bias of `exe` inside `pid` from `/proc/<pid>/maps`.
///
/// The bias is `mapping start - file offset` of the executable's first
/// mapping. For non-PIE binaries the caller overrides this with 0.
fn load_bias(pid: u32, exe: &Path) -> Result<u64> {
    let maps = File::open(format!("/proc/{}/maps", pid))
        .with_context(|| format!("Failed to open maps of PID {}", pid))?;

    for line in BufReader::new(maps).lines() {
        let line = line.context("Failed to read maps entry")?;
        if let Some(bias) = parse_maps_line(&line, exe) {
            return Ok(bias);
        }
    }

    // Executable not found in maps (e.g. deleted on disk): assume no bias.
    Ok(0)
}

/// Parse one maps line; returns the bias if it maps `exe`.
///
/// Format: `start-end perms offset dev inode path`
fn parse_maps_line(line: &str, exe: &Path) -> Option<u64> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let _perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next()?;

    if Path::new(path) != exe {
        return None;
    }

    let start = u64::from_str_radix(range.split('-').next()?, 16).ok()?;
    let offset = u64::from_str_radix(offset, 16).ok()?;
    Some(start.wrapping_sub(offset))
}

/// Resolve the executable path of a process (exposed for diagnostics).
pub fn exe_path(pid: u32) -> Result<PathBuf> {
    std::fs::read_link(format!("/proc/{}/exe", pid))
        .with_context(|| format!("Failed to resolve executable of PID {}", pid))
}
