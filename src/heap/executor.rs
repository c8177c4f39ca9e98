//! Background Executor
//!
//! A single worker thread that runs collector tasks (marking and sweeping
//! steps) submitted by the mutator. Tasks are serialized: a new collection
//! task queued while the previous one is winding down simply runs after
//! it. Dropping the executor drains the queue and joins the thread.

use crossbeam::channel::{unbounded, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Executor {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Executor {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let handle = std::thread::Builder::new()
            .name("hades-gc".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn GC background thread");
        Executor {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    pub fn add(&self, job: impl FnOnce() + Send + 'static) {
        self.sender
            .as_ref()
            .expect("executor already shut down")
            .send(Box::new(job))
            .expect("GC background thread died");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once queued jobs drain.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
