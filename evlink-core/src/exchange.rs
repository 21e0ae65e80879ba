//! Handoff of committed containers from the acquisition path to a consumer.
//!
//! [`DataExchange`] holds the configuration that outlives a single run (ring
//! capacity, blocking mode, notification callbacks). Each data-start builds a
//! fresh ring buffer and splits it into an [`ExchangeSender`] for the producer
//! and an [`ExchangeReceiver`] for the consumer. Both halves watch the same
//! "transfers running" flag.

use crate::config::AcquisitionSettings;
use crate::container::{ContainerSink, EventPacketContainer};
use crate::ringbuffer::{ring_buffer, Consumer, Producer, RingBufferError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sleep between polls of a blocking get.
pub const BLOCKING_GET_POLL: Duration = Duration::from_millis(1);

/// Sleep between attempts of a forced put.
pub const FORCED_PUT_POLL: Duration = Duration::from_micros(100);

/// Callback run after a container enters (increase) or leaves (decrease) the buffer.
pub type NotifyFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct Notifications {
    pub increase: Option<NotifyFn>,
    pub decrease: Option<NotifyFn>,
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifications")
            .field("increase", &self.increase.is_some())
            .field("decrease", &self.decrease.is_some())
            .finish()
    }
}

/// Shared "transfers running" flag.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct DataExchange {
    settings: Arc<AcquisitionSettings>,
    notifications: Notifications,
}

impl DataExchange {
    pub fn new(settings: Arc<AcquisitionSettings>) -> Self {
        Self {
            settings,
            notifications: Notifications::default(),
        }
    }

    /// Installs notification callbacks; they apply from the next start on.
    pub fn set_notifications(&mut self, notifications: Notifications) {
        self.notifications = notifications;
    }

    /// Allocates a ring buffer sized from the current settings.
    pub fn start(&self, running: RunFlag) -> Result<(ExchangeSender, ExchangeReceiver), RingBufferError> {
        let (producer, consumer) = ring_buffer(self.settings.ring_size() as usize)?;

        Ok((
            ExchangeSender {
                producer,
                running: running.clone(),
                notify_increase: self.notifications.increase.clone(),
            },
            ExchangeReceiver {
                consumer,
                running,
                settings: Arc::clone(&self.settings),
                notify_decrease: self.notifications.decrease.clone(),
            },
        ))
    }
}

/// Producer half of the exchange.
pub struct ExchangeSender {
    producer: Producer<EventPacketContainer>,
    running: RunFlag,
    notify_increase: Option<NotifyFn>,
}

impl ExchangeSender {
    pub fn full(&self) -> bool {
        self.producer.full()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    fn notify(&self) {
        if let Some(notify) = &self.notify_increase {
            notify();
        }
    }
}

impl ContainerSink for ExchangeSender {
    fn put(&mut self, container: Box<EventPacketContainer>) -> Result<(), Box<EventPacketContainer>> {
        self.producer.put(container)?;
        self.notify();
        Ok(())
    }

    fn put_force(&mut self, mut container: Box<EventPacketContainer>) -> bool {
        loop {
            if !self.running.is_running() {
                return false;
            }
            match self.producer.put(container) {
                Ok(()) => {
                    self.notify();
                    return true;
                }
                Err(back) => {
                    container = back;
                    std::thread::sleep(FORCED_PUT_POLL);
                }
            }
        }
    }
}

/// Consumer half of the exchange.
pub struct ExchangeReceiver {
    consumer: Consumer<EventPacketContainer>,
    running: RunFlag,
    settings: Arc<AcquisitionSettings>,
    notify_decrease: Option<NotifyFn>,
}

impl ExchangeReceiver {
    /// Takes the next container.
    ///
    /// In blocking mode this polls until a container arrives or acquisition
    /// stops; otherwise it returns `None` right away when nothing is queued.
    pub fn get(&mut self) -> Option<Box<EventPacketContainer>> {
        loop {
            if let Some(container) = self.consumer.get() {
                if let Some(notify) = &self.notify_decrease {
                    notify();
                }
                return Some(container);
            }

            if !self.settings.blocking() || !self.running.is_running() {
                return None;
            }
            std::thread::sleep(BLOCKING_GET_POLL);
        }
    }

    /// Peeks at the next container without taking it.
    pub fn look(&self) -> Option<&EventPacketContainer> {
        self.consumer.look()
    }

    /// Takes everything still queued, without blocking.
    pub fn drain(&mut self) -> Vec<Box<EventPacketContainer>> {
        let drained = self.consumer.drain();
        if let Some(notify) = &self.notify_decrease {
            drained.iter().for_each(|_| notify());
        }
        drained
    }
}
