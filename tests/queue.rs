/*!
 * Queue integration tests (tokio backend)
 */

mod common;

use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use threadmill::sync::Queue;
use threadmill::{Backend, Config, Error, Runtime, Thread};

fn rt() -> &'static Runtime {
    common::runtime(Config::new(Backend::Tokio))
}

#[test]
#[serial]
fn test_bounded_put_blocks_until_get() {
    rt().run(|| {
        let queue: Queue<u32> = Queue::new(1);
        queue.put_nowait(1).unwrap();
        assert!(queue.is_full());

        let producer_queue = queue.clone();
        let producer = Thread::spawn(move || producer_queue.put(2, None)).unwrap();

        threadmill::time::sleep(Duration::from_millis(30)).unwrap();
        assert!(producer.is_alive());
        assert_eq!(queue.get(None).unwrap(), 1);
        producer.join(None).unwrap();
        assert_eq!(queue.get(None).unwrap(), 2);
        assert!(queue.is_empty());
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_get_wakes_on_put() {
    rt().run(|| {
        let queue: Queue<&'static str> = Queue::new(0);
        let consumer_queue = queue.clone();
        let consumer = Thread::spawn(move || {
            assert_eq!(consumer_queue.get(None)?, "work");
            Ok(())
        })
        .unwrap();

        threadmill::time::sleep(Duration::from_millis(30)).unwrap();
        queue.put("work", None).unwrap();
        consumer.join(None).unwrap();
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_timeouts_are_full_and_empty() {
    rt().run(|| {
        let queue: Queue<u8> = Queue::new(1);
        let start = Instant::now();
        assert!(matches!(queue.get(Some(Duration::from_millis(30))), Err(Error::Empty)));
        assert!(start.elapsed() >= Duration::from_millis(30));

        queue.put_nowait(1).unwrap();
        assert!(matches!(
            queue.put(2, Some(Duration::from_millis(30))),
            Err(Error::Full)
        ));
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_join_waits_for_task_done() {
    rt().run(|| {
        let queue: Queue<usize> = Queue::new(0);
        for item in 0..5 {
            queue.put_nowait(item).unwrap();
        }
        let worker_queue = queue.clone();
        let worker = Thread::spawn(move || {
            for _ in 0..5 {
                worker_queue.get(None)?;
                threadmill::time::sleep(Duration::from_millis(5))?;
                worker_queue.task_done()?;
            }
            Ok(())
        })
        .unwrap();

        queue.join().unwrap();
        assert!(queue.is_empty());
        worker.join(None).unwrap();
    })
    .expect("runner scope");
}

#[test]
#[serial]
fn test_cancelled_get_surfaces_cancelled() {
    rt().run(|| {
        let queue: Queue<u32> = Queue::new(0);
        let consumer_queue = queue.clone();
        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        let consumer = Thread::spawn(move || {
            let err = consumer_queue.get(None).expect_err("cancelled get must fail");
            *seen.lock().unwrap() = Some(err.is_cancelled());
            Ok(())
        })
        .unwrap();

        threadmill::time::sleep(Duration::from_millis(30)).unwrap();
        consumer.cancel().unwrap();
        assert!(consumer.join(None).unwrap());
        assert_eq!(*outcome.lock().unwrap(), Some(true));

        // The cancelled waiter left no stale hold behind; the queue
        // keeps working for everyone else.
        queue.put_nowait(7).unwrap();
        assert_eq!(queue.get_nowait().unwrap(), 7);
    })
    .expect("runner scope");
}
