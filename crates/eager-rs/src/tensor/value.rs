//! Physical tensor value: device storage plus a lazily fetched host copy.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use lru::LruCache;
use once_cell::sync::{Lazy, OnceCell};

use super::{
    comp_node::CompNode, device_tensor::DeviceTensor, host_tensor::HostTensor, layout::Layout,
};

/// Number of distinct constants retained by the caching factory.
const CONST_CACHE_CAPACITY: usize = 128;

/// Largest element count eligible for constant caching; bigger tensors are
/// always materialized fresh.
const CONST_CACHE_MAX_ELEMS: usize = 64;

static CONST_CACHE: Lazy<Mutex<LruCache<u64, Arc<TensorValue>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(CONST_CACHE_CAPACITY).expect("cache capacity is non-zero"),
    ))
});

/// Materialized tensor produced by the worker.
///
/// Holds the device storage and memoizes the host-side readback requested by
/// value fetches. Values are shared through `Arc`; a strong count of one at
/// kernel entry signals that an input is a last use and its storage may be
/// reused in place.
#[derive(Debug)]
pub struct TensorValue {
    dev: DeviceTensor,
    value: OnceCell<HostTensor>,
}

impl TensorValue {
    /// Caching factory: small host constants resolve to a shared value so
    /// repeated puts of the same literal do not re-upload it.
    pub fn make(host: &HostTensor) -> Arc<TensorValue> {
        if host.layout().num_elements() > CONST_CACHE_MAX_ELEMS {
            return Arc::new(TensorValue::from_host(host));
        }
        let key = host.content_key();
        let mut cache = CONST_CACHE.lock().expect("constant cache poisoned");
        if let Some(hit) = cache.get(&key) {
            if hit.layout() == host.layout() && hit.comp_node() == host.comp_node() {
                return Arc::clone(hit);
            }
        }
        let value = Arc::new(TensorValue::from_host(host));
        cache.put(key, Arc::clone(&value));
        value
    }

    /// Non-caching factory: uploads the host value into a fresh, uniquely
    /// owned device buffer.
    pub fn from_host(host: &HostTensor) -> TensorValue {
        let dev = DeviceTensor::from_host(host);
        let value = OnceCell::new();
        let _ = value.set(host.clone());
        TensorValue { dev, value }
    }

    /// Wraps existing device storage; no host copy is available until fetched.
    pub fn from_device(dev: DeviceTensor) -> TensorValue {
        TensorValue {
            dev,
            value: OnceCell::new(),
        }
    }

    /// Provides access to the tensor layout.
    pub fn layout(&self) -> &Layout {
        self.dev.layout()
    }

    /// Returns the compute node owning the device storage.
    pub fn comp_node(&self) -> &CompNode {
        self.dev.comp_node()
    }

    /// Borrows the device storage without touching its reference count.
    pub fn dev(&self) -> &DeviceTensor {
        &self.dev
    }

    /// Returns a shared view of the device storage.
    pub fn dev_tensor(&self) -> DeviceTensor {
        self.dev.clone()
    }

    /// Consumes the value and returns its device storage, discarding any
    /// memoized host copy.
    pub fn into_dev_tensor(self) -> DeviceTensor {
        self.dev
    }

    /// Reports whether a host-readable copy has been realized.
    pub fn value_fetched(&self) -> bool {
        self.value.get().is_some()
    }

    /// Realizes the host-readable copy, blocking on the device readback the
    /// first time.
    pub fn fetch_value(&self) -> &HostTensor {
        self.value.get_or_init(|| HostTensor::copy_from(&self.dev))
    }

    /// Returns the previously fetched host value.
    ///
    /// Panics when no fetch has happened; callers gate on
    /// [`TensorValue::value_fetched`] first.
    pub fn get_value(&self) -> HostTensor {
        self.value
            .get()
            .cloned()
            .expect("host value requested before it was fetched")
    }

    /// Blocks until all outstanding work on the owning compute node is done.
    pub fn sync(&self) -> Result<()> {
        self.dev.comp_node().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caching_factory_shares_small_constants() {
        let host = HostTensor::from_vec([2], vec![7.25, -1.5]).unwrap();
        let first = TensorValue::make(&host);
        let second = TensorValue::make(&host);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn caching_factory_skips_large_tensors() {
        let host = HostTensor::zeros([CONST_CACHE_MAX_ELEMS + 1]);
        let first = TensorValue::make(&host);
        let second = TensorValue::make(&host);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn non_caching_factory_is_uniquely_owned() {
        let host = HostTensor::scalar(3.0);
        let value = Arc::new(TensorValue::from_host(&host));
        assert_eq!(Arc::strong_count(&value), 1);
        assert!(value.value_fetched());
        assert_eq!(value.get_value().data(), &[3.0]);
    }

    #[test]
    fn fetch_value_reads_back_device_storage() {
        let host = HostTensor::from_vec([3], vec![1.0, 2.0, 3.0]).unwrap();
        let value = TensorValue::from_device(DeviceTensor::from_host(&host));
        assert!(!value.value_fetched());
        assert_eq!(value.fetch_value().data(), &[1.0, 2.0, 3.0]);
        assert!(value.value_fetched());
    }
}
