/*!
 * Descriptor I/O and poller integration tests (tokio backend)
 */

mod common;

use serial_test::serial;
use std::io::Write as _;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use threadmill::io::{self, Events, Poller};
use threadmill::{native, Backend, Config, Runtime, Thread};

fn rt() -> &'static Runtime {
    common::runtime(Config::new(Backend::Tokio))
}

#[test]
#[serial]
fn test_blocking_read_waits_for_writer() {
    rt().run(|| {
        let (read_end, write_end) = nix::unistd::pipe().expect("pipe");
        let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let reader = Thread::spawn(move || {
            let mut buf = [0u8; 16];
            let n = io::read(read_end.as_raw_fd(), &mut buf)?;
            sink.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(())
        })
        .unwrap();

        // Reader must be suspended in read, not spinning the carrier.
        threadmill::time::sleep(Duration::from_millis(30)).unwrap();
        assert!(reader.is_alive());
        assert_eq!(io::write(write_end.as_raw_fd(), b"ping").unwrap(), 4);
        reader.join(None).unwrap();
        assert_eq!(*received.lock().unwrap(), b"ping");
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_regular_file_read() {
    rt().run(|| {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"contents").unwrap();
        tmp.flush().unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();
        let mut buf = [0u8; 16];
        let n = io::read(file.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"contents");
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_poll_timeout_returns_empty() {
    rt().run(|| {
        let (read_end, _write_end) = nix::unistd::pipe().expect("pipe");
        let mut poller = Poller::new();
        poller.register(read_end.as_raw_fd(), Events::IN);
        let start = Instant::now();
        let ready = poller.poll(Some(Duration::from_millis(100))).unwrap();
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(100));
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_poll_reports_readable_fd() {
    rt().run(|| {
        let (read_end, write_end) = nix::unistd::pipe().expect("pipe");
        let mut poller = Poller::new();
        poller.register(read_end.as_raw_fd(), Events::IN);
        io::write(write_end.as_raw_fd(), b"x").unwrap();
        let ready = poller.poll(None).unwrap();
        assert_eq!(ready, vec![(read_end.as_raw_fd(), Events::IN)]);
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_poll_invalid_fd_reports_nval_immediately() {
    rt().run(|| {
        let mut poller = Poller::new();
        poller.register(987_654, Events::IN);
        let start = Instant::now();
        let ready = poller.poll(None).unwrap();
        assert_eq!(ready, vec![(987_654, Events::NVAL)]);
        assert!(start.elapsed() < Duration::from_secs(5));
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_poll_without_fds_blocks_until_cancelled() {
    rt().run(|| {
        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        let worker = Thread::spawn(move || {
            let poller = Poller::new();
            let err = poller
                .poll(None)
                .expect_err("empty poll with no timeout never returns");
            *seen.lock().unwrap() = Some(err.is_cancelled());
            Ok(())
        })
        .unwrap();

        threadmill::time::sleep(Duration::from_millis(50)).unwrap();
        assert!(worker.is_alive());
        worker.cancel().unwrap();
        assert!(worker.join(None).unwrap());
        assert_eq!(*outcome.lock().unwrap(), Some(true));
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_native_poll_uses_plain_syscall() {
    rt().run(|| {
        let _native = native::scope();
        let (read_end, write_end) = nix::unistd::pipe().expect("pipe");
        let mut poller = Poller::new();
        poller.register(read_end.as_raw_fd(), Events::IN);

        let ready = poller.poll(Some(Duration::from_millis(20))).unwrap();
        assert!(ready.is_empty());

        nix::unistd::write(&write_end, b"x").unwrap();
        let ready = poller.poll(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(ready, vec![(read_end.as_raw_fd(), Events::IN)]);
    })
    .expect("runner scope");
}
