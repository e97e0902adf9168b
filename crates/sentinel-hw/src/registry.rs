//! Registry of live frame sources, one per source key.

use crate::camera::CaptureConfig;
use crate::device::{DeviceOpener, SourceKey, SystemDevices};
use crate::frame::Frame;
use crate::source::FrameSource;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Sources {
    live: HashMap<SourceKey, Arc<FrameSource>>,
    /// Keys whose capture thread is being joined. `open` waits on these so a new
    /// thread never races the old one for the device.
    stopping: HashSet<SourceKey>,
}

/// Owns every open [`FrameSource`]. Opening a key that is already live returns the
/// existing source, so each physical device has at most one capture thread.
pub struct SourceRegistry {
    opener: Arc<dyn DeviceOpener>,
    sources: Mutex<Sources>,
    stopped: Condvar,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemDevices))
    }
}

impl SourceRegistry {
    pub fn new(opener: Arc<dyn DeviceOpener>) -> Self {
        Self {
            opener,
            sources: Mutex::new(Sources::default()),
            stopped: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sources> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the live source for `key`, starting one if needed. `config` only applies
    /// when a new source is started. Blocks while a `stop` of the same key is joining.
    pub fn open(&self, key: &SourceKey, config: CaptureConfig) -> io::Result<Arc<FrameSource>> {
        let mut sources = self.lock();
        while sources.stopping.contains(key) {
            sources = self.stopped.wait(sources).unwrap_or_else(PoisonError::into_inner);
        }

        if let Some(existing) = sources.live.get(key) {
            if existing.is_running() {
                return Ok(Arc::clone(existing));
            }
            // Stopped through its own handle.
            existing.stop();
        }

        let source = Arc::new(FrameSource::spawn(key.clone(), config, Arc::clone(&self.opener))?);
        tracing::info!(source = %key, "frame source started");
        sources.live.insert(key.clone(), Arc::clone(&source));
        Ok(source)
    }

    pub fn get(&self, key: &SourceKey) -> Option<Arc<FrameSource>> {
        self.lock().live.get(key).cloned()
    }

    /// Latest frame of an already-open source. Never starts one.
    pub fn read(&self, key: &SourceKey) -> Option<Frame> {
        self.get(key)?.read()
    }

    pub fn keys(&self) -> Vec<SourceKey> {
        self.lock().live.keys().cloned().collect()
    }

    /// Stop and forget the source for `key`. Returns whether one was registered.
    ///
    /// The join happens outside the lock so other keys stay usable; the key is
    /// marked as stopping until it finishes.
    pub fn stop(&self, key: &SourceKey) -> bool {
        let removed = {
            let mut sources = self.lock();
            let removed = sources.live.remove(key);
            if removed.is_some() {
                sources.stopping.insert(key.clone());
            }
            removed
        };

        match removed {
            Some(source) => {
                source.stop();
                self.lock().stopping.remove(key);
                self.stopped.notify_all();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<_> = {
            let mut sources = self.lock();
            let drained: Vec<_> = sources.live.drain().collect();
            sources.stopping.extend(drained.iter().map(|(key, _)| key.clone()));
            drained
        };

        for (key, source) in drained {
            source.stop();
            self.lock().stopping.remove(&key);
            self.stopped.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, CaptureDevice};
    use crate::source::tests::{counting_opener, wait_for, CountingDevice};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_open_is_idempotent_per_key() {
        let opens = Arc::new(AtomicU32::new(0));
        let opener: Arc<dyn DeviceOpener> = {
            let opens = Arc::clone(&opens);
            Arc::new(move |_: &SourceKey, _: CaptureConfig| -> Result<Box<dyn CaptureDevice>, CameraError> {
                opens.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(CountingDevice { next: 0, fail_every: None }))
            })
        };
        let registry = SourceRegistry::new(opener);

        let a = registry.open(&SourceKey::Index(0), CaptureConfig::default()).unwrap();
        let b = registry.open(&SourceKey::Index(0), CaptureConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.open(&SourceKey::Index(1), CaptureConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        wait_for(|| a.read()).unwrap();
        wait_for(|| c.read()).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        registry.stop_all();
    }

    #[test]
    fn test_stop_then_reopen_starts_fresh() {
        let registry = SourceRegistry::new(counting_opener());
        let key = SourceKey::Path("/dev/video0".into());

        let first = registry.open(&key, CaptureConfig::default()).unwrap();
        assert!(registry.stop(&key));
        assert!(!registry.stop(&key));
        assert!(first.read().is_none());
        assert!(registry.get(&key).is_none());

        let second = registry.open(&key, CaptureConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(wait_for(|| registry.read(&key)).is_some());
        registry.stop_all();
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_stopped_source_is_replaced_on_open() {
        let registry = SourceRegistry::new(counting_opener());
        let key = SourceKey::Index(4);

        let first = registry.open(&key, CaptureConfig::default()).unwrap();
        first.stop();
        let second = registry.open(&key, CaptureConfig::default()).unwrap();
        assert!(second.is_running());
        assert!(!Arc::ptr_eq(&first, &second));
        registry.stop_all();
    }

    /// Counts devices alive at once; dropping one is slow so a racing open would overlap.
    fn exclusive_opener(live: Arc<AtomicU32>, peak: Arc<AtomicU32>) -> Arc<dyn DeviceOpener> {
        struct Held {
            live: Arc<AtomicU32>,
        }

        impl CaptureDevice for Held {
            fn grab(&mut self) -> Result<image::RgbImage, CameraError> {
                std::thread::sleep(std::time::Duration::from_millis(2));
                Ok(image::RgbImage::new(2, 2))
            }
        }

        impl Drop for Held {
            fn drop(&mut self) {
                std::thread::sleep(std::time::Duration::from_millis(50));
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }

        Arc::new(move |_: &SourceKey, _: CaptureConfig| -> Result<Box<dyn CaptureDevice>, CameraError> {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(Held { live: Arc::clone(&live) }))
        })
    }

    #[test]
    fn test_open_during_stop_waits_for_device_release() {
        let live = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let registry = Arc::new(SourceRegistry::new(exclusive_opener(Arc::clone(&live), Arc::clone(&peak))));
        let key = SourceKey::Index(0);

        for _ in 0..5 {
            let source = registry.open(&key, CaptureConfig::default()).unwrap();
            wait_for(|| source.read()).unwrap();

            let stopper = {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                std::thread::spawn(move || registry.stop(&key))
            };
            // Races the stop: gets either the old source or waits for its release.
            std::thread::sleep(std::time::Duration::from_millis(5));
            registry.open(&key, CaptureConfig::default()).unwrap();
            assert!(stopper.join().unwrap());

            let reopened = registry.open(&key, CaptureConfig::default()).unwrap();
            wait_for(|| reopened.read()).unwrap();
        }

        registry.stop_all();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
