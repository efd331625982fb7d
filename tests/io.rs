//! Concurrency behavior of pty handles
//!
//! These tests verify that blocked reads are interrupted by deadlines
//! and by close() from another thread, and that separate pairs do not
//! interfere with each other.

#![cfg(unix)]

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crosspty::{inherit_size, open, Error, NativeProvider, PtyProvider, Winsize};

const TIMEOUT: Duration = Duration::from_secs(1);

#[test]
fn read_deadline_interrupts_blocked_read() {
    let (pty, _tty) = open().expect("open pair");
    pty.set_read_timeout(Some(TIMEOUT / 10));

    let started = Instant::now();
    let mut buf = [0u8; 1];
    let err = pty.read(&mut buf).expect_err("read must not succeed");
    assert!(matches!(err, Error::Timeout), "got {err:?}");
    assert!(
        started.elapsed() < TIMEOUT,
        "deadline did not interrupt the read in time"
    );
}

#[test]
fn close_interrupts_blocked_read() {
    let (pty, _tty) = open().expect("open pair");
    let reader = pty.try_clone().expect("clone handle");

    let closer = thread::spawn(move || {
        thread::sleep(TIMEOUT / 10);
        pty.close();
    });

    let started = Instant::now();
    let mut buf = [0u8; 1];
    let err = reader.read(&mut buf).expect_err("read must not succeed");
    assert!(matches!(err, Error::Closed), "got {err:?}");
    assert!(
        started.elapsed() < TIMEOUT,
        "close did not interrupt the read in time"
    );
    closer.join().expect("closer thread");
}

#[test]
fn deadline_still_delivers_available_data() {
    let (pty, tty) = open().expect("open pair");
    pty.set_read_timeout(Some(TIMEOUT));

    tty.write_all(b"x").expect("write");
    let mut buf = [0u8; 1];
    let n = pty.read(&mut buf).expect("read");
    assert_eq!((n, buf[0]), (1, b'x'));
}

#[test]
fn clone_sees_writes_and_close() {
    let (pty, tty) = open().expect("open pair");
    let clone = pty.try_clone().expect("clone");
    clone.set_read_timeout(Some(TIMEOUT));

    tty.write_all(b"via clone").expect("write");
    let mut buf = [0u8; 9];
    let mut filled = 0;
    while filled < buf.len() {
        filled += clone.read(&mut buf[filled..]).expect("read via clone");
    }
    assert_eq!(&buf, b"via clone");

    pty.close();
    assert!(matches!(clone.read(&mut buf), Err(Error::Closed)));
}

#[test]
fn concurrent_pairs_do_not_interfere() {
    let (result_tx, result_rx) = mpsc::channel();
    let mut workers = Vec::new();

    for id in 0..4u8 {
        let tx = result_tx.clone();
        workers.push(thread::spawn(move || {
            let (pty, tty) = open().expect("open pair");
            pty.set_read_timeout(Some(TIMEOUT));

            let payload = [id; 32];
            tty.write_all(&payload).expect("write");

            let mut buf = [0u8; 32];
            let mut filled = 0;
            while filled < buf.len() {
                filled += pty.read(&mut buf[filled..]).expect("read");
            }
            tx.send((id, buf)).expect("send result");
        }));
    }
    drop(result_tx);

    for _ in 0..4 {
        let (id, buf) = result_rx.recv().expect("worker result");
        assert!(buf.iter().all(|&b| b == id), "pair {id} saw foreign bytes");
    }
    for worker in workers {
        worker.join().expect("worker thread");
    }
}

#[test]
fn inherit_size_copies_master_size_to_slave() {
    let (pty, tty) = open().expect("open pair");

    pty.set_window_size(Winsize::with_pixels(133, 44, 1330, 880))
        .expect("set on pty");
    inherit_size(&pty, &tty).expect("inherit");

    let size = tty.window_size().expect("get from tty");
    assert_eq!(size, Winsize::with_pixels(133, 44, 1330, 880));
}

#[test]
fn provider_pairs_behave_like_open() {
    let provider = NativeProvider;
    assert!(provider.is_supported());
    assert!(provider.has_device_paths());

    let (pty, tty) = provider.open_pair().expect("open via provider");
    pty.set_read_timeout(Some(TIMEOUT));
    tty.write_all(b"hi").expect("write");

    let mut buf = [0u8; 2];
    let mut filled = 0;
    while filled < buf.len() {
        filled += pty.read(&mut buf[filled..]).expect("read");
    }
    assert_eq!(&buf, b"hi");
}
