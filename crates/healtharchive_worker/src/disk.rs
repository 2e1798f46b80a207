//! Filesystem guardrail probes.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Disk usage of the filesystem holding `path`, as df reports it.
pub fn disk_usage_pct(path: &Path) -> io::Result<f64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;

    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let used = stats.f_blocks.saturating_sub(stats.f_bfree) as f64;
    let usable = used + stats.f_bavail as f64;
    if usable == 0.0 {
        return Ok(0.0);
    }
    Ok(used / usable * 100.0)
}

/// The watermark gate: strictly greater blocks, exactly at it does not.
pub fn over_watermark(usage_pct: f64, watermark_pct: f64) -> bool {
    usage_pct > watermark_pct
}

/// Device id of the filesystem holding `path` (nearest existing ancestor).
pub fn device_of(path: &Path) -> io::Result<u64> {
    let mut probe: PathBuf = path.to_path_buf();
    loop {
        match std::fs::metadata(&probe) {
            Ok(metadata) => return Ok(metadata.dev()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Whether `path` resolves to the same device as `/`.
pub fn is_on_root_device(path: &Path) -> io::Result<bool> {
    Ok(device_of(path)? == device_of(Path::new("/"))?)
}
