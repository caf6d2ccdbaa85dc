/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The Virtual Node Provider (spec §4.6, §6): attributes and contents for
//! synthetic paths, without ever touching a layer.
//!
//! CPU brand lookup uses `sysinfo` rather than a platform call like
//! `sysctlbyname` (what the original macOS-only implementation used) so
//! the same code works on every host the bridge binary ships on.

use sysinfo::System;

use crate::vpath::VirtualPath;

pub const ROOT_MODE: u32 = 0o755;
pub const DEV_MODE: u32 = 0o755;
pub const CPU_MODE: u32 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticNode {
    Root,
    Dev,
    Cpu,
}

/// Classify `vpath` as one of the three synthetic paths, if it is one.
/// Synthetic paths never resolve through layers and never carry whiteout
/// markers (spec invariant 5).
pub fn classify(vpath: &VirtualPath) -> Option<SyntheticNode> {
    match vpath.as_str() {
        "/" => Some(SyntheticNode::Root),
        "/dev" => Some(SyntheticNode::Dev),
        "/dev/cpu" => Some(SyntheticNode::Cpu),
        _ => None,
    }
}

/// Render the host CPU brand as `"CPU Brand: <brand>\n"`, the single
/// source of truth both `stat` and `read` of `/dev/cpu` use, so the two
/// can never disagree on length (the original C implementation computed
/// this string twice, once in `getattr` and once in `read`).
pub fn render_cpu_node() -> String {
    let mut sys = System::new();
    sys.refresh_cpu();
    let brand = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    format!("CPU Brand: {brand}\n")
}

/// Clip `[offset, offset + size)` against `content`'s byte length, per
/// spec §4.6 `read` for `/dev/cpu`.
pub fn read_clipped(content: &str, offset: u64, size: u32) -> &[u8] {
    let bytes = content.as_bytes();
    let len = bytes.len() as u64;
    if offset >= len {
        return &[];
    }
    let end = (offset + u64::from(size)).min(len);
    &bytes[offset as usize..end as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_synthetic_paths() {
        assert_eq!(
            classify(&VirtualPath::new("/").unwrap()),
            Some(SyntheticNode::Root)
        );
        assert_eq!(
            classify(&VirtualPath::new("/dev").unwrap()),
            Some(SyntheticNode::Dev)
        );
        assert_eq!(
            classify(&VirtualPath::new("/dev/cpu").unwrap()),
            Some(SyntheticNode::Cpu)
        );
        assert_eq!(classify(&VirtualPath::new("/dev/other").unwrap()), None);
    }

    #[test]
    fn render_has_expected_shape() {
        let content = render_cpu_node();
        assert!(content.starts_with("CPU Brand: "));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn clipping_matches_scenario_6() {
        let content = "CPU Brand: Apple M1\n";
        assert_eq!(content.len(), 20);
        assert_eq!(read_clipped(content, 0, 100), content.as_bytes());
        assert_eq!(read_clipped(content, 20, 100), b"");
        assert_eq!(read_clipped(content, 5, 4), b"Bran");
    }
}
