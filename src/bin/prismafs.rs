/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Mount Bootstrap (spec §6, §9) and a concrete protocol-bridge adapter.
//!
//! The core crate treats "the kernel-to-userspace filesystem protocol
//! bridge" as external; this binary is one conforming instance of it,
//! built on `fuser`, the maintained Rust FUSE binding. It owns nothing
//! the core doesn't already expose: an inode table mapping FUSE's numeric
//! inodes to `VirtualPath`s (FUSE's wire protocol is inode-addressed; the
//! Dispatcher is path-addressed) and a thin translation from
//! `prismafs::Error` to the errno the kernel expects.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::time::SystemTime;

use anyhow::Context;
use clap::Parser;
use fuser::FileAttr;
use fuser::FileType;
use fuser::Filesystem;
use fuser::MountOption;
use fuser::ReplyAttr;
use fuser::ReplyCreate;
use fuser::ReplyData;
use fuser::ReplyDirectory;
use fuser::ReplyEmpty;
use fuser::ReplyEntry;
use fuser::ReplyOpen;
use fuser::ReplyStatfs;
use fuser::ReplyWrite;
use fuser::Request;
use fuser::TimeOrNow;
use prismafs::dispatcher::Attr;
use prismafs::dispatcher::Dispatcher;
use prismafs::vpath::VirtualPath;
use prismafs::Config;
use tracing_subscriber::EnvFilter;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INODE: u64 = 1;

/// POSIX-ish CLI: `prismafs <mountpoint> [bridge flags...]`, plus the
/// short-circuit `-v`/`-V` version flag (spec §6). The version flag is
/// handled before full argument parsing since it is not spelled the way
/// clap's own `--version` is.
#[derive(Parser, Debug)]
#[command(name = "prismafs", disable_version_flag = true)]
struct Args {
    mountpoint: PathBuf,
    /// Flags forwarded verbatim to the FUSE bridge (e.g. `-o allow_other`).
    #[arg(trailing_var_arg = true)]
    bridge_args: Vec<OsString>,
}

fn main() -> anyhow::Result<()> {
    let raw_args: Vec<OsString> = std::env::args_os().collect();
    if let Some(first) = raw_args.get(1) {
        if first == "-v" || first == "-V" {
            println!("PrismaFS Version: {}", prismafs::VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::from_env().context("mount bootstrap failed")?;

    let mut options = vec![
        MountOption::FSName("prismafs".to_string()),
        MountOption::DefaultPermissions,
    ];
    options.extend(parse_bridge_options(&args.bridge_args));

    let fs = PrismaFuse::new(config);
    fuser::mount2(fs, &args.mountpoint, &options)
        .with_context(|| format!("failed to mount at {}", args.mountpoint.display()))
}

/// Turn trailing `-o foo,bar` style bridge flags into `MountOption`s.
/// Anything that doesn't parse as a recognised option is dropped with a
/// warning rather than failing the mount outright.
fn parse_bridge_options(bridge_args: &[OsString]) -> Vec<MountOption> {
    let mut out = Vec::new();
    let mut iter = bridge_args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-o" {
            let Some(value) = iter.next() else { continue };
            for part in value.to_string_lossy().split(',') {
                match MountOption::from_str(part) {
                    Ok(opt) => out.push(opt),
                    Err(_) => eprintln!("prismafs: ignoring unrecognised mount option {part:?}"),
                }
            }
        }
    }
    out
}

/// Maps FUSE's numeric inodes to `VirtualPath`s. Entries are never
/// evicted: a looked-up path stays valid for the life of the mount, which
/// matches the core's stateless-per-operation contract (spec §5) -- the
/// table here is purely an artifact of the bridge's wire protocol, not
/// state the overlay engine relies on.
struct Inodes {
    by_ino: HashMap<u64, VirtualPath>,
    by_path: HashMap<VirtualPath, u64>,
    next: u64,
}

impl Inodes {
    fn new() -> Self {
        let root = VirtualPath::new("/").unwrap();
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(ROOT_INODE, root.clone());
        by_path.insert(root, ROOT_INODE);
        Self {
            by_ino,
            by_path,
            next: ROOT_INODE + 1,
        }
    }

    fn path(&self, ino: u64) -> Option<&VirtualPath> {
        self.by_ino.get(&ino)
    }

    fn intern(&mut self, path: VirtualPath) -> u64 {
        if let Some(ino) = self.by_path.get(&path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, path.clone());
        self.by_path.insert(path, ino);
        ino
    }
}

struct PrismaFuse {
    config: Config,
    inodes: Inodes,
}

impl PrismaFuse {
    fn new(config: Config) -> Self {
        Self {
            config,
            inodes: Inodes::new(),
        }
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.config)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<VirtualPath> {
        let parent_path = self.inodes.path(parent)?;
        Some(parent_path.join(&name.to_string_lossy()))
    }

    fn attr_for(&self, ino: u64, attr: &Attr) -> FileAttr {
        let now = SystemTime::now();
        match attr {
            Attr::Synthetic { is_dir, mode, size } => FileAttr {
                ino,
                size: *size,
                blocks: (*size).div_ceil(512),
                atime: now,
                mtime: now,
                ctime: now,
                crtime: now,
                kind: if *is_dir {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                },
                perm: (*mode & 0o7777) as u16,
                nlink: if *is_dir { 2 } else { 1 },
                uid: unsafe { libc::getuid() },
                gid: unsafe { libc::getgid() },
                rdev: 0,
                blksize: 4096,
                flags: 0,
            },
            Attr::Real(meta) => {
                use std::os::unix::fs::MetadataExt;
                FileAttr {
                    ino,
                    size: meta.size(),
                    blocks: meta.blocks(),
                    atime: meta.accessed().unwrap_or(now),
                    mtime: meta.modified().unwrap_or(now),
                    ctime: now,
                    crtime: now,
                    kind: if meta.is_dir() {
                        FileType::Directory
                    } else if meta.file_type().is_symlink() {
                        FileType::Symlink
                    } else {
                        FileType::RegularFile
                    },
                    perm: (meta.mode() & 0o7777) as u16,
                    nlink: meta.nlink() as u32,
                    uid: meta.uid(),
                    gid: meta.gid(),
                    rdev: meta.rdev() as u32,
                    blksize: 4096,
                    flags: 0,
                }
            }
        }
    }
}

impl Filesystem for PrismaFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().stat(&child) {
            Ok(attr) => {
                let ino = self.inodes.intern(child);
                let fattr = self.attr_for(ino, &attr);
                reply.entry(&TTL, &fattr, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().stat(&path) {
            Ok(attr) => reply.attr(&TTL, &self.attr_for(ino, &attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        let d = self.dispatcher();

        if let Some(mode) = mode {
            if let Err(e) = d.chmod(&path, mode) {
                reply.error(e.to_errno());
                return;
            }
        }
        if let Some(size) = size {
            if let Err(e) = d.truncate(&path, size) {
                reply.error(e.to_errno());
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            let now = SystemTime::now();
            let resolve = |t: Option<TimeOrNow>| match t {
                Some(TimeOrNow::SpecificTime(t)) => Some(t),
                Some(TimeOrNow::Now) => Some(now),
                None => None,
            };
            if let Err(e) = d.utimens(&path, resolve(atime), resolve(mtime)) {
                reply.error(e.to_errno());
                return;
            }
        }

        match d.stat(&path) {
            Ok(attr) => reply.attr(&TTL, &self.attr_for(ino, &attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().mkdir(&child, mode) {
            Ok(()) => match self.dispatcher().stat(&child) {
                Ok(attr) => {
                    let ino = self.inodes.intern(child);
                    reply.entry(&TTL, &self.attr_for(ino, &attr), 0);
                }
                Err(e) => reply.error(e.to_errno()),
            },
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().rmdir(&child) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().unlink(&child) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().open(&path, flags) {
            Ok(_) => reply.opened(0, flags as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().read(&path, offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().write(&path, offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(child) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().create(&child, mode) {
            Ok(()) => match self.dispatcher().stat(&child) {
                Ok(attr) => {
                    let ino = self.inodes.intern(child);
                    reply.created(&TTL, &self.attr_for(ino, &attr), 0, 0, flags as u32);
                }
                Err(e) => reply.error(e.to_errno()),
            },
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.dispatcher().list(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        for (i, entry) in entries.into_iter().enumerate().skip(offset as usize) {
            let kind = match entry.kind {
                prismafs::merge::EntryKind::Dir => FileType::Directory,
                _ => FileType::RegularFile,
            };
            let child_ino = match entry.name.as_str() {
                "." => ino,
                ".." => ino,
                name => self.inodes.intern(path.join(name)),
            };
            if reply.add(child_ino, (i + 1) as i64, kind, entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let Some(path) = self.inodes.path(ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher().statfs(&path) {
            Ok(stat) => reply.statfs(
                stat.blocks_total,
                stat.blocks_free,
                stat.blocks_free,
                0,
                0,
                stat.block_size as u32,
                stat.name_max,
                stat.block_size as u32,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}

