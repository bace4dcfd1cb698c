//! Background reclamation worker.
//!
//! A dedicated thread drains the index's weak-promotion queue (newest
//! first), yielding between items, then sleeps a short fixed interval and
//! requests a bounded slice of the engine's idle collection regardless of
//! queue state. A panicking promotion step is logged and skipped; the loop
//! itself never dies with an item.
//!
//! Pause/resume is cooperative with acknowledgement: `pause` returns only
//! once the worker has parked at its safe point, which is what makes the
//! collection pipeline deterministic under test.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rivet_core::NativeEngine;

use crate::index::ObjectIndex;

/// Sleep between drain passes.
const IDLE_INTERVAL: Duration = Duration::from_millis(10);
/// Reclamation requests allowed per idle slice.
const IDLE_BUDGET: usize = 8;

struct WorkerControl {
    run: AtomicBool,
    pause: AtomicBool,
    paused: AtomicBool,
}

pub struct ReclamationWorker {
    control: Arc<WorkerControl>,
    thread: Option<JoinHandle<()>>,
}

impl ReclamationWorker {
    pub(crate) fn spawn(
        index: Arc<ObjectIndex>,
        native: Arc<Mutex<NativeEngine>>,
    ) -> std::io::Result<Self> {
        let control = Arc::new(WorkerControl {
            run: AtomicBool::new(true),
            pause: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        });
        let thread_control = Arc::clone(&control);
        let thread = thread::Builder::new()
            .name("rivet-reclaim".to_string())
            .spawn(move || worker_loop(thread_control, index, native))?;
        Ok(Self { control, thread: Some(thread) })
    }

    /// Ask the worker to park and wait until it acknowledges.
    pub fn pause(&self) {
        self.control.pause.store(true, Ordering::Release);
        while !self.control.paused.load(Ordering::Acquire) {
            if self.thread.as_ref().is_none_or(|t| t.is_finished()) {
                return;
            }
            thread::sleep(Duration::from_micros(500));
        }
    }

    pub fn resume(&self) {
        self.control.pause.store(false, Ordering::Release);
    }

    fn stop(&mut self) {
        self.control.run.store(false, Ordering::Release);
        self.control.pause.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReclamationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(control: Arc<WorkerControl>, index: Arc<ObjectIndex>, native: Arc<Mutex<NativeEngine>>) {
    log::debug!("reclamation worker started");
    while control.run.load(Ordering::Acquire) {
        if control.pause.load(Ordering::Acquire) {
            control.paused.store(true, Ordering::Release);
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        control.paused.store(false, Ordering::Release);

        drain_promotion_queue(&index);

        thread::sleep(IDLE_INTERVAL);
        if control.run.load(Ordering::Acquire) && !control.pause.load(Ordering::Acquire) {
            let slice = catch_unwind(AssertUnwindSafe(|| {
                native.lock().unwrap().idle_notification(Some(IDLE_BUDGET))
            }));
            if slice.is_err() {
                log::warn!("idle collection slice panicked");
            }
        }
    }
    log::debug!("reclamation worker stopped");
}

/// Promote every currently queued record, newest first. Shared with the
/// synchronous pump the engine exposes for tests.
pub(crate) fn drain_promotion_queue(index: &Arc<ObjectIndex>) -> usize {
    let mut promoted = 0;
    loop {
        match catch_unwind(AssertUnwindSafe(|| index.promote_next())) {
            Ok(Some(_)) => {
                promoted += 1;
                thread::yield_now();
            }
            Ok(None) => return promoted,
            Err(_) => {
                log::warn!("weak promotion step panicked; skipping item");
            }
        }
    }
}
