//! Lock-free single-producer/single-consumer ring buffer of owned elements.
//!
//! Each slot holds either a pointer to a boxed element or null, which marks
//! the slot as empty. A slot only ever goes empty -> occupied (producer) or
//! occupied -> empty (consumer). The put and get cursors live inside the
//! [`Producer`] and [`Consumer`] halves, so each is owned by exactly one side
//! and only slot contents need atomic access.

use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("Ring buffer size must be a nonzero power of two, got {0}")]
    InvalidSize(usize),
}

struct Slots<T> {
    slots: Box<[CachePadded<AtomicPtr<T>>]>,
    mask: usize,
}

impl<T> Slots<T> {
    #[inline]
    fn slot(&self, pos: usize) -> &AtomicPtr<T> {
        &self.slots[pos & self.mask]
    }
}

impl<T> Drop for Slots<T> {
    fn drop(&mut self) {
        // Both halves are gone, so nothing can touch the slots any more.
        for slot in self.slots.iter_mut() {
            let elem = *slot.get_mut();
            if !elem.is_null() {
                // SAFETY: non-null slot pointers always come from Box::into_raw in put().
                drop(unsafe { Box::from_raw(elem) });
            }
        }
    }
}

// SAFETY: elements are moved between threads as Box<T>, which needs T: Send.
unsafe impl<T: Send> Send for Slots<T> {}
unsafe impl<T: Send> Sync for Slots<T> {}

/// Allocates a ring buffer of `size` slots and returns its two halves.
pub fn ring_buffer<T: Send>(size: usize) -> Result<(Producer<T>, Consumer<T>), RingBufferError> {
    if size == 0 || !size.is_power_of_two() {
        return Err(RingBufferError::InvalidSize(size));
    }

    let slots = (0..size)
        .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Slots {
        slots,
        mask: size - 1,
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
            put_pos: 0,
        },
        Consumer {
            shared,
            get_pos: 0,
        },
    ))
}

/// Writing half. Not cloneable: there is exactly one producer.
pub struct Producer<T> {
    shared: Arc<Slots<T>>,
    put_pos: usize,
}

impl<T: Send> Producer<T> {
    /// Stores `elem` if the slot at the put cursor is free.
    ///
    /// Never blocks. A full buffer hands the element back so the caller can
    /// decide between dropping and retrying.
    #[inline]
    pub fn put(&mut self, elem: Box<T>) -> Result<(), Box<T>> {
        let slot = self.shared.slot(self.put_pos);

        if !slot.load(Ordering::Acquire).is_null() {
            return Err(elem);
        }

        slot.store(Box::into_raw(elem), Ordering::Release);
        self.put_pos = (self.put_pos + 1) & self.shared.mask;
        Ok(())
    }

    /// Whether the next [`put`](Self::put) would fail.
    #[inline]
    pub fn full(&self) -> bool {
        !self
            .shared
            .slot(self.put_pos)
            .load(Ordering::Acquire)
            .is_null()
    }

    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

/// Reading half. Not cloneable: there is exactly one consumer.
pub struct Consumer<T> {
    shared: Arc<Slots<T>>,
    get_pos: usize,
}

impl<T: Send> Consumer<T> {
    /// Removes the element at the get cursor, or returns `None` when empty.
    #[inline]
    pub fn get(&mut self) -> Option<Box<T>> {
        let slot = self.shared.slot(self.get_pos);
        let elem = slot.load(Ordering::Acquire);

        if elem.is_null() {
            return None;
        }

        slot.store(ptr::null_mut(), Ordering::Release);
        self.get_pos = (self.get_pos + 1) & self.shared.mask;

        // SAFETY: the producer published this pointer with Release and will not
        // touch the slot again until it observes it empty.
        Some(unsafe { Box::from_raw(elem) })
    }

    /// Peeks at the element at the get cursor without removing it.
    #[inline]
    pub fn look(&self) -> Option<&T> {
        let elem = self.shared.slot(self.get_pos).load(Ordering::Acquire);

        // SAFETY: an occupied slot is only cleared by get(), which needs &mut self,
        // so the element outlives this borrow.
        unsafe { elem.as_ref() }
    }

    /// Removes and returns every element currently in the buffer, oldest first.
    pub fn drain(&mut self) -> Vec<Box<T>> {
        std::iter::from_fn(|| self.get()).collect()
    }

    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_invalid_sizes() {
        assert_eq!(
            ring_buffer::<u32>(0).err(),
            Some(RingBufferError::InvalidSize(0))
        );
        assert_eq!(
            ring_buffer::<u32>(6).err(),
            Some(RingBufferError::InvalidSize(6))
        );
        assert!(ring_buffer::<u32>(1).is_ok());
    }

    #[test]
    fn test_full_after_capacity_puts() {
        let (mut tx, mut rx) = ring_buffer::<u32>(4).unwrap();
        for i in 0..4 {
            assert!(!tx.full());
            tx.put(Box::new(i)).unwrap();
        }

        assert!(tx.full());
        let rejected = tx.put(Box::new(99)).unwrap_err();
        assert_eq!(*rejected, 99);

        assert_eq!(rx.get().map(|b| *b), Some(0));
        assert!(!tx.full());
        tx.put(Box::new(4)).unwrap();
        assert!(tx.full());
    }

    #[test]
    fn test_look_does_not_remove() {
        let (mut tx, mut rx) = ring_buffer::<&'static str>(2).unwrap();
        assert!(rx.look().is_none());

        tx.put(Box::new("first")).unwrap();
        assert_eq!(rx.look(), Some(&"first"));
        assert_eq!(rx.look(), Some(&"first"));
        assert_eq!(rx.get().map(|b| *b), Some("first"));
        assert!(rx.get().is_none());
    }

    #[test]
    fn test_leftover_elements_dropped_with_buffer() {
        let marker = Arc::new(());
        {
            let (mut tx, _rx) = ring_buffer::<Arc<()>>(4).unwrap();
            tx.put(Box::new(Arc::clone(&marker))).unwrap();
            tx.put(Box::new(Arc::clone(&marker))).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_cross_thread_order() {
        let (mut tx, mut rx) = ring_buffer::<u64>(8).unwrap();
        const N: u64 = 10_000;

        let producer = std::thread::spawn(move || {
            for i in 0..N {
                let mut elem = Box::new(i);
                loop {
                    match tx.put(elem) {
                        Ok(()) => break,
                        Err(back) => {
                            elem = back;
                            std::thread::yield_now();
                        }
                    }
                }
            }
        });

        let mut expected = 0;
        while expected < N {
            if let Some(value) = rx.get() {
                assert_eq!(*value, expected);
                expected += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert!(rx.get().is_none());
    }

    proptest! {
        #[test]
        fn prop_fifo_no_loss_no_duplication(
            size_exp in 0u32..6,
            values in proptest::collection::vec(any::<u32>(), 0..64),
        ) {
            let size = 1usize << size_exp;
            let (mut tx, mut rx) = ring_buffer::<u32>(size).unwrap();
            let batch: Vec<u32> = values.into_iter().take(size).collect();

            for v in &batch {
                prop_assert!(tx.put(Box::new(*v)).is_ok());
            }
            let out: Vec<u32> = rx.drain().into_iter().map(|b| *b).collect();
            prop_assert_eq!(out, batch);
        }

        #[test]
        fn prop_interleaved_puts_and_gets_keep_order(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let (mut tx, mut rx) = ring_buffer::<u32>(8).unwrap();
            let mut model = std::collections::VecDeque::new();
            let mut next = 0u32;

            for put in ops {
                if put {
                    let accepted = tx.put(Box::new(next)).is_ok();
                    prop_assert_eq!(accepted, model.len() < 8);
                    if accepted {
                        model.push_back(next);
                    }
                    next += 1;
                } else {
                    prop_assert_eq!(rx.get().map(|b| *b), model.pop_front());
                }
            }
        }
    }
}
