//! Bounded packet conduit between the capture and aggregation contexts
//!
//! The conduit is a fixed-capacity array channel. The producer blocks while
//! every slot is full and the consumer blocks while every slot is empty;
//! records come out in the order they went in and an unread record is never
//! overwritten.
//!
//! Exactly one producer and one consumer: [`Conduit::open`] hands out one
//! [`ConduitProducer`] and one [`ConduitConsumer`], and neither is `Clone`.
//! A blocked wait returns [`Interrupted::Shutdown`] when the shared
//! [`Listening`] context is stopped, and [`Interrupted::Closed`] when the
//! other half has been dropped.

use crate::error::ConduitError;
use crate::shutdown::Listening;
use crate::types::PacketRecord;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Why a blocking conduit operation returned without a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The listening context was stopped
    Shutdown,
    /// The other half of the conduit is gone (and nothing is left to read)
    Closed,
}

/// Counters shared by both halves
#[derive(Debug, Default)]
pub struct ConduitStats {
    produced: AtomicU64,
    processed: AtomicU64,
}

impl ConduitStats {
    /// Records written by the producer
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Records read by the consumer
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// Constructor for a producer/consumer pair
pub struct Conduit;

impl Conduit {
    /// Open a conduit holding up to `capacity` records
    ///
    /// # Errors
    ///
    /// `ZeroCapacity` when `capacity` is zero.
    pub fn open(
        capacity: usize,
        listening: &Listening,
    ) -> Result<(ConduitProducer, ConduitConsumer), ConduitError> {
        if capacity == 0 {
            return Err(ConduitError::ZeroCapacity);
        }

        let (tx, rx) = bounded(capacity);
        let stats = Arc::new(ConduitStats::default());
        debug!("Packet conduit opened with {} slots", capacity);

        Ok((
            ConduitProducer {
                tx,
                wake: listening.wake_signal(),
                stats: Arc::clone(&stats),
                capacity,
            },
            ConduitConsumer {
                rx,
                wake: listening.wake_signal(),
                stats,
                capacity,
            },
        ))
    }
}

/// Writing half, owned by the packet source
#[derive(Debug)]
pub struct ConduitProducer {
    tx: Sender<PacketRecord>,
    wake: Receiver<()>,
    stats: Arc<ConduitStats>,
    capacity: usize,
}

impl ConduitProducer {
    /// Write one record, blocking while the conduit is full
    ///
    /// The record is not written when the wait is interrupted, or when the
    /// listening context has already been stopped.
    pub fn produce(&self, record: PacketRecord) -> Result<(), Interrupted> {
        if let Err(TryRecvError::Disconnected) = self.wake.try_recv() {
            return Err(Interrupted::Shutdown);
        }

        match self.tx.try_send(record) {
            Ok(()) => {
                self.stats.produced.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(TrySendError::Disconnected(_)) => return Err(Interrupted::Closed),
            Err(TrySendError::Full(_)) => {}
        }

        select! {
            send(self.tx, record) -> sent => match sent {
                Ok(()) => {
                    self.stats.produced.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(_) => Err(Interrupted::Closed),
            },
            recv(self.wake) -> _ => Err(Interrupted::Shutdown),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records currently buffered
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn stats(&self) -> Arc<ConduitStats> {
        Arc::clone(&self.stats)
    }
}

/// Reading half, owned by the aggregation loop
#[derive(Debug)]
pub struct ConduitConsumer {
    rx: Receiver<PacketRecord>,
    wake: Receiver<()>,
    stats: Arc<ConduitStats>,
    capacity: usize,
}

impl ConduitConsumer {
    /// Read one record, blocking while the conduit is empty
    pub fn consume(&self) -> Result<PacketRecord, Interrupted> {
        match self.rx.try_recv() {
            Ok(record) => return Ok(self.processed(record)),
            Err(TryRecvError::Disconnected) => return Err(Interrupted::Closed),
            Err(TryRecvError::Empty) => {}
        }

        select! {
            recv(self.rx) -> record => match record {
                Ok(record) => Ok(self.processed(record)),
                Err(_) => Err(Interrupted::Closed),
            },
            recv(self.wake) -> _ => Err(Interrupted::Shutdown),
        }
    }

    /// Take every record still buffered without blocking
    pub fn drain(&self) -> impl Iterator<Item = PacketRecord> + '_ {
        self.rx.try_iter().map(|record| self.processed(record))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Records read so far
    pub fn processed_count(&self) -> u64 {
        self.stats.processed()
    }

    pub fn stats(&self) -> Arc<ConduitStats> {
        Arc::clone(&self.stats)
    }

    fn processed(&self, record: PacketRecord) -> PacketRecord {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowKey, Timestamp};
    use std::net::Ipv4Addr;
    use std::sync::mpsc;
    use std::time::Duration;

    fn record(i: u32) -> PacketRecord {
        PacketRecord::new(
            FlowKey::new(
                Ipv4Addr::from(0x0a00_0000 + i),
                Ipv4Addr::new(10, 1, 0, 1),
                (i % 60_000) as u16,
                443,
                6,
            ),
            (i % 64) as u16,
            (i % 1500) as u16,
            Timestamp::new(i, i % 1_000_000),
        )
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let listening = Listening::new();
        assert_eq!(
            Conduit::open(0, &listening).err(),
            Some(ConduitError::ZeroCapacity)
        );
    }

    #[test]
    fn test_round_trip_preserves_fifo_order_and_bytes() {
        let listening = Listening::new();
        let (producer, consumer) = Conduit::open(64, &listening).unwrap();

        let sent: Vec<PacketRecord> = (0..64).map(record).collect();
        for r in &sent {
            producer.produce(*r).unwrap();
        }
        assert_eq!(producer.len(), 64);

        for expected in &sent {
            let got = consumer.consume().unwrap();
            assert_eq!(got.to_bytes(), expected.to_bytes());
        }
        assert_eq!(consumer.processed_count(), 64);
        assert_eq!(producer.stats().produced(), 64);
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_full_conduit_blocks_producer_until_consumed() {
        let listening = Listening::new();
        let (producer, consumer) = Conduit::open(4, &listening).unwrap();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = std::thread::spawn(move || {
            for i in 0..5 {
                producer.produce(record(i)).unwrap();
                done_tx.send(i).unwrap();
            }
        });

        for i in 0..4 {
            assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(i));
        }
        // The fifth record has no slot
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

        assert_eq!(consumer.consume().unwrap().arrival, record(0).arrival);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(4));
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_interrupts_blocked_consumer() {
        let listening = Arc::new(Listening::new());
        let (_producer, consumer) = Conduit::open(4, &listening).unwrap();

        let stopper = Arc::clone(&listening);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.stop();
        });

        assert_eq!(consumer.consume().err(), Some(Interrupted::Shutdown));
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_interrupts_blocked_producer_without_writing() {
        let listening = Arc::new(Listening::new());
        let (producer, consumer) = Conduit::open(1, &listening).unwrap();
        producer.produce(record(1)).unwrap();

        let stopper = Arc::clone(&listening);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.stop();
        });

        assert_eq!(producer.produce(record(2)).err(), Some(Interrupted::Shutdown));
        handle.join().unwrap();

        let left: Vec<PacketRecord> = consumer.drain().collect();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].arrival, record(1).arrival);
        assert_eq!(producer.stats().produced(), 1);
    }

    #[test]
    fn test_stopped_producer_refuses_free_slots() {
        let listening = Listening::new();
        let (producer, consumer) = Conduit::open(8, &listening).unwrap();
        producer.produce(record(1)).unwrap();
        listening.stop();

        assert_eq!(producer.produce(record(2)).err(), Some(Interrupted::Shutdown));
        assert_eq!(producer.stats().produced(), 1);
        assert_eq!(consumer.drain().count(), 1);
    }

    #[test]
    fn test_dropped_producer_closes_after_drain() {
        let listening = Listening::new();
        let (producer, consumer) = Conduit::open(8, &listening).unwrap();
        producer.produce(record(1)).unwrap();
        producer.produce(record(2)).unwrap();
        drop(producer);

        assert!(consumer.consume().is_ok());
        assert!(consumer.consume().is_ok());
        assert_eq!(consumer.consume().err(), Some(Interrupted::Closed));
    }

    #[test]
    fn test_dropped_consumer_closes_producer() {
        let listening = Listening::new();
        let (producer, consumer) = Conduit::open(8, &listening).unwrap();
        drop(consumer);
        assert_eq!(producer.produce(record(1)).err(), Some(Interrupted::Closed));
    }
}
