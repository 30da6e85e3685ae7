//! Cooperative shutdown shared by the producer and consumer contexts
//!
//! `Listening` is created once by the caller and shared as an `Arc`. Both
//! contexts poll [`Listening::is_listening`] between operations, and every
//! blocking conduit wait also watches the wake channel, so [`Listening::stop`]
//! interrupts a wait that is already in progress.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Shared listening flag plus a wake channel for blocked waits
#[derive(Debug)]
pub struct Listening {
    flag: AtomicBool,
    // Never sent on; dropping it disconnects every receiver at once
    trigger: Mutex<Option<Sender<()>>>,
    wake: Receiver<()>,
}

impl Listening {
    pub fn new() -> Self {
        let (trigger, wake) = bounded(0);
        Self {
            flag: AtomicBool::new(true),
            trigger: Mutex::new(Some(trigger)),
            wake,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Stop listening and interrupt every blocked wait. Idempotent.
    pub fn stop(&self) {
        if self.flag.swap(false, Ordering::AcqRel) {
            debug!("Listening context stopped");
        }
        match self.trigger.lock() {
            Ok(mut trigger) => drop(trigger.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }

    /// Receiver that becomes ready once [`stop`](Self::stop) has been called
    pub fn wake_signal(&self) -> Receiver<()> {
        self.wake.clone()
    }
}

impl Default for Listening {
    fn default() -> Self {
        Self::new()
    }
}
