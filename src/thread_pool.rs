use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc as channel,
    },
    thread::{Builder, JoinHandle},
};

use crate::error::{NetworkError, Result};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum WorkerMessage {
    Task(Task),
    Terminate,
}

/// Round-robin pool for blocking work the loop thread must never do itself,
/// such as host name resolution.
pub struct ThreadPool {
    workers: Vec<Worker>,
    senders: Vec<channel::Sender<WorkerMessage>>,
    next_worker: AtomicUsize,
}

impl ThreadPool {
    pub fn new(name: &str, capacity: usize) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(capacity);
        let mut senders = Vec::with_capacity(capacity);

        for id in 0..capacity {
            let (sender, receiver) = channel::channel::<WorkerMessage>();
            workers.push(Worker::new(format!("{name}-{id}"), receiver)?);
            senders.push(sender);
        }

        Ok(Self {
            workers,
            senders,
            next_worker: AtomicUsize::new(0),
        })
    }

    pub fn exec<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.senders.is_empty() {
            return Err(NetworkError::ResolverGone);
        }
        // Round-robin dispatch
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index]
            .send(WorkerMessage::Task(Box::new(task)))
            .map_err(|_| NetworkError::ResolverGone)
    }

    pub fn workers_len(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerMessage::Terminate);
        }
        for worker in &mut self.workers {
            if let Some(t) = worker.take_thread() {
                let _ = t.join();
            }
        }
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(name: String, receiver: channel::Receiver<WorkerMessage>) -> io::Result<Self> {
        let thread = Builder::new().name(name).spawn(move || {
            while let Ok(message) = receiver.recv() {
                match message {
                    WorkerMessage::Task(task) => task(),
                    WorkerMessage::Terminate => break,
                }
            }
        })?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    fn take_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}
