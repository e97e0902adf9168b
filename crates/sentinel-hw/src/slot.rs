//! Single-writer, multi-reader latest-value slot.

use std::sync::{Arc, Mutex, PoisonError};

/// Holds the most recently published value.
///
/// Publishing swaps an `Arc` under the lock; reading clones the `Arc` under the
/// lock and any deep copy happens after it is released, so a reader never holds
/// the writer up for longer than a pointer swap and never sees a partial value.
#[derive(Debug)]
pub struct FrameSlot<T> {
    latest: Mutex<Option<Arc<T>>>,
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self {
            latest: Mutex::new(None),
        }
    }
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, value: T) {
        let value = Arc::new(value);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Shared handle to the latest value, without copying it.
    pub fn latest_shared(&self) -> Option<Arc<T>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<T: Clone> FrameSlot<T> {
    /// Independent copy of the latest value.
    pub fn latest(&self) -> Option<T> {
        self.latest_shared().map(|v| T::clone(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_then_publish() {
        let slot = FrameSlot::new();
        assert_eq!(slot.latest(), None::<Vec<u8>>);
        slot.publish(vec![1u8, 2, 3]);
        assert_eq!(slot.latest(), Some(vec![1, 2, 3]));
        slot.clear();
        assert_eq!(slot.latest(), None);
    }

    #[test]
    fn test_copies_are_independent() {
        let slot = FrameSlot::new();
        slot.publish(vec![0u8; 4]);
        let mut copy = slot.latest().unwrap();
        copy[0] = 9;
        assert_eq!(slot.latest().unwrap()[0], 0);
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for i in 0..500u32 {
                    slot.publish(vec![i; 256]);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(v) = slot.latest() {
                            assert!(v.iter().all(|x| *x == v[0]));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
