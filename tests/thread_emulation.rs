/*!
 * Thread emulation integration tests (tokio backend)
 */

mod common;

use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use threadmill::{native, Backend, Config, Error, Runtime, Thread};

fn rt() -> &'static Runtime {
    common::runtime(Config::new(Backend::Tokio))
}

#[test]
#[serial]
fn test_emulated_sleeps_overlap() {
    let elapsed = rt()
        .run(|| {
            let start = Instant::now();
            let workers: Vec<Thread> = (0..6)
                .map(|_| {
                    Thread::spawn(|| {
                        threadmill::time::sleep(Duration::from_millis(300))?;
                        Ok(())
                    })
                    .expect("spawn")
                })
                .collect();
            for worker in &workers {
                worker.join(None).expect("join");
            }
            start.elapsed()
        })
        .expect("runner scope");
    assert!(elapsed >= Duration::from_millis(300));
    // Six logical threads sleeping together must not serialize.
    assert!(elapsed < Duration::from_millis(1500), "sleeps serialized: {elapsed:?}");
}

#[test]
#[serial]
fn test_native_sleeps_serialize() {
    let elapsed = rt()
        .run(|| {
            let start = Instant::now();
            let workers: Vec<Thread> = (0..3)
                .map(|_| {
                    Thread::spawn(|| {
                        let _native = native::scope();
                        threadmill::time::sleep(Duration::from_millis(100))?;
                        Ok(())
                    })
                    .expect("spawn")
                })
                .collect();
            for worker in &workers {
                worker.join(None).expect("join");
            }
            start.elapsed()
        })
        .expect("runner scope");
    // Each native sleep holds the carrier for its full duration.
    assert!(elapsed >= Duration::from_millis(300), "native sleeps overlapped: {elapsed:?}");
}

#[test]
#[serial]
fn test_double_start_is_error() {
    rt().run(|| {
        let thread = Thread::new(|| Ok(()));
        thread.start().expect("first start");
        assert!(matches!(thread.start(), Err(Error::InvalidState(_))));
        thread.join(None).expect("join");
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_join_before_start_is_error() {
    rt().run(|| {
        let thread = Thread::new(|| Ok(()));
        assert!(matches!(thread.join(None), Err(Error::InvalidState(_))));
        assert!(!thread.is_alive());
        assert_eq!(thread.ident(), None);
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_self_join_is_error() {
    rt().run(|| {
        let (tx, rx) = std::sync::mpsc::channel::<Thread>();
        let thread = Thread::new(move || {
            let me = rx.recv().unwrap();
            assert!(matches!(me.join(None), Err(Error::InvalidState(_))));
            Ok(())
        });
        thread.start().unwrap();
        tx.send(thread.clone()).unwrap();
        assert!(thread.join(None).unwrap());
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_join_timeout() {
    rt().run(|| {
        let thread = Thread::spawn(|| {
            threadmill::time::sleep(Duration::from_millis(300))?;
            Ok(())
        })
        .unwrap();
        assert!(!thread.join(Some(Duration::from_millis(30))).unwrap());
        assert!(thread.is_alive());
        assert!(thread.join(None).unwrap());
        assert!(!thread.is_alive());
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_cancel_unwinds_sleep() {
    rt().run(|| {
        let thread = Thread::spawn(|| {
            threadmill::time::sleep(Duration::from_secs(30))?;
            Ok(())
        })
        .unwrap();
        let start = Instant::now();
        thread.cancel().unwrap();
        assert!(thread.join(None).unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!thread.is_alive());
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_daemon_cancelled_at_scope_exit() {
    let start = Instant::now();
    let worker = rt()
        .run(|| {
            threadmill::thread::Builder::new()
                .name("background")
                .daemon(true)
                .spawn(|| loop {
                    threadmill::time::sleep(Duration::from_millis(50))?;
                })
                .expect("spawn daemon")
        })
        .expect("runner scope");
    // Scope exit cancels the daemon instead of waiting forever.
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!worker.is_alive());
    assert!(worker.is_daemon());
}

#[test]
#[serial]
fn test_daemon_flag_inherited() {
    rt().run(|| {
        let inherited = Arc::new(AtomicBool::new(false));
        let seen = inherited.clone();
        let parent = threadmill::thread::Builder::new()
            .daemon(true)
            .spawn(move || {
                let child = Thread::new(|| Ok(()));
                seen.store(child.is_daemon(), Ordering::SeqCst);
                child.start()?;
                child.join(None)?;
                // keep the parent short-lived so teardown does not cancel
                // it mid-assert
                Ok(())
            })
            .unwrap();
        parent.join(None).unwrap();
        assert!(inherited.load(Ordering::SeqCst));
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_identity_and_names() {
    rt().run(|| {
        let thread = threadmill::thread::Builder::new()
            .name("worker")
            .spawn(|| {
                assert_eq!(threadmill::thread::current().name(), "worker");
                Ok(())
            })
            .unwrap();
        let ident = thread.ident().expect("started thread has an identity");
        assert!(ident > 0);
        assert_eq!(thread.name(), "worker");
        thread.join(None).unwrap();

        let other = Thread::spawn(|| Ok(())).unwrap();
        assert_ne!(other.ident(), Some(ident));
        other.join(None).unwrap();
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_uncaught_failure_reaches_hook() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    rt().run(move || {
        threadmill::thread::set_uncaught_hook(move |thread, failure| {
            sink.lock().unwrap().push(format!("{}: {}", thread.name(), failure));
        })
        .unwrap();
        let thread = threadmill::thread::Builder::new()
            .name("failing")
            .spawn(|| Err(Error::InvalidState("boom".into())))
            .unwrap();
        assert!(thread.join(None).unwrap());
    })
    .expect("runner scope");

    // Delivery happens after the completion signal; give it a moment.
    for _ in 0..100 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("failing"));
    assert!(seen[0].contains("boom"));
}

#[test]
#[serial]
fn test_backend_mismatch_rejected() {
    let _ = rt();
    let err = threadmill::setup(Config::new(Backend::Smol))
        .err()
        .expect("second backend must be rejected");
    assert!(matches!(err, Error::BackendMismatch(Backend::Tokio)));
}

#[test]
#[serial]
fn test_exit_callbacks_run_lifo() {
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let (first, second, third) = (order.clone(), order.clone(), order.clone());
    rt().run(move || {
        threadmill::exitcall::register(move || first.lock().unwrap().push(1)).unwrap();
        threadmill::exitcall::register(move || second.lock().unwrap().push(2)).unwrap();
        let id = threadmill::exitcall::register(move || third.lock().unwrap().push(3)).unwrap();
        assert!(threadmill::exitcall::unregister(id).unwrap());
    })
    .expect("runner scope");
    assert_eq!(*order.lock().unwrap(), vec![2, 1]);
}
