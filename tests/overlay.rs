/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! End-to-end coverage of the overlay engine against real directories,
//! exercising the Dispatcher the way the protocol-bridge binary does: one
//! call per operation, no shared state between calls.

use std::fs;

use prismafs::dispatcher::Attr;
use prismafs::dispatcher::Dispatcher;
use prismafs::vpath::VirtualPath;
use prismafs::Config;

fn vp(s: &str) -> VirtualPath {
    VirtualPath::new(s).unwrap()
}

#[test]
fn copy_up_preserves_untouched_regions() {
    let session = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    fs::write(base.path().join("log.txt"), b"0123456789").unwrap();

    let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
    let d = Dispatcher::new(&config);
    let path = vp("/log.txt");

    d.write(&path, 2, b"XX").unwrap();

    let contents = fs::read(session.path().join("log.txt")).unwrap();
    assert_eq!(&contents, b"01XX456789");
    assert_eq!(fs::read(base.path().join("log.txt")).unwrap(), b"0123456789");
}

#[test]
fn mkdir_and_nested_create_round_trip() {
    let session = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
    let d = Dispatcher::new(&config);

    d.mkdir(&vp("/workdir"), 0o755).unwrap();
    d.create(&vp("/workdir/file"), 0o644).unwrap();
    d.write(&vp("/workdir/file"), 0, b"payload").unwrap();

    assert_eq!(
        d.read(&vp("/workdir/file"), 0, 32).unwrap(),
        b"payload".to_vec()
    );

    let entries = d.list(&vp("/workdir")).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"file"));
}

#[test]
fn deep_missing_ancestor_is_rejected() {
    let session = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
    let d = Dispatcher::new(&config);

    let err = d.create(&vp("/a/b/c"), 0o644).unwrap_err();
    assert!(matches!(err, prismafs::Error::NotFound(_)));
}

#[test]
fn rmdir_does_not_whiteout_base_directory() {
    let session = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    fs::create_dir(base.path().join("shared")).unwrap();
    let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
    let d = Dispatcher::new(&config);

    // "shared" exists only in the base layer; a session-layer rmdir has
    // nothing to remove and must fail rather than silently succeed.
    let err = d.rmdir(&vp("/shared")).unwrap_err();
    assert!(matches!(err, prismafs::Error::NotFound(_)));

    // the base-layer directory is untouched and still listed through the
    // union, since rmdir never creates a whiteout for directories.
    let entries = d.list(&vp("/")).unwrap();
    assert!(entries.iter().any(|e| e.name == "shared"));
}

#[test]
fn whiteout_survives_across_dispatcher_instances() {
    let session = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    fs::write(base.path().join("gone"), b"x").unwrap();
    let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);

    Dispatcher::new(&config).unlink(&vp("/gone")).unwrap();

    // a fresh Dispatcher sees the same whiteout: the engine keeps no
    // in-memory state between calls (spec concurrency model).
    let d2 = Dispatcher::new(&config);
    assert!(matches!(
        d2.stat(&vp("/gone")),
        Err(prismafs::Error::NotFound(_))
    ));
}

#[test]
fn multi_layer_precedence_picks_highest_priority_base() {
    let session = tempfile::tempdir().unwrap();
    let near = tempfile::tempdir().unwrap();
    let far = tempfile::tempdir().unwrap();
    fs::write(near.path().join("shared.conf"), b"near").unwrap();
    fs::write(far.path().join("shared.conf"), b"far").unwrap();

    let config = Config::new(
        session.path().to_owned(),
        vec![near.path().to_owned(), far.path().to_owned()],
    );
    let d = Dispatcher::new(&config);

    match d.stat(&vp("/shared.conf")).unwrap() {
        Attr::Real(meta) => assert_eq!(meta.len(), 4),
        other => panic!("expected a real file, got {other:?}"),
    }
    assert_eq!(d.read(&vp("/shared.conf"), 0, 16).unwrap(), b"near");
}

#[test]
fn synthetic_dev_cpu_is_read_only() {
    let session = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let config = Config::new(session.path().to_owned(), vec![base.path().to_owned()]);
    let d = Dispatcher::new(&config);

    match d.stat(&vp("/dev/cpu")).unwrap() {
        Attr::Synthetic { is_dir, mode, .. } => {
            assert!(!is_dir);
            assert_eq!(mode, 0o444);
        }
        other => panic!("expected synthetic node, got {other:?}"),
    }

    // writes are not modeled for synthetic nodes: the dispatcher's write
    // path always takes the copy-up route, which has no base entry for
    // `/dev/cpu` to copy from.
    let err = d.write(&vp("/dev/cpu"), 0, b"nope").unwrap_err();
    assert!(matches!(err, prismafs::Error::NotFound(_)));
}
