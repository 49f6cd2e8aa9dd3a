use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use curaflow_core::ClinicId;

/// Clinic-isolated key/value store abstraction for disposable read models.
pub trait ClinicStore<K, V>: Send + Sync {
    fn get(&self, clinic_id: ClinicId, key: &K) -> Option<V>;
    fn upsert(&self, clinic_id: ClinicId, key: K, value: V);
    fn list(&self, clinic_id: ClinicId) -> Vec<V>;
}

impl<K, V, S> ClinicStore<K, V> for Arc<S>
where
    S: ClinicStore<K, V> + ?Sized,
{
    fn get(&self, clinic_id: ClinicId, key: &K) -> Option<V> {
        (**self).get(clinic_id, key)
    }

    fn upsert(&self, clinic_id: ClinicId, key: K, value: V) {
        (**self).upsert(clinic_id, key, value)
    }

    fn list(&self, clinic_id: ClinicId) -> Vec<V> {
        (**self).list(clinic_id)
    }
}

/// In-memory clinic-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryClinicStore<K, V> {
    inner: RwLock<HashMap<(ClinicId, K), V>>,
}

impl<K, V> InMemoryClinicStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl<K, V> Default for InMemoryClinicStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ClinicStore<K, V> for InMemoryClinicStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, clinic_id: ClinicId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(clinic_id, key.clone())).cloned()
    }

    fn upsert(&self, clinic_id: ClinicId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((clinic_id, key), value);
        }
    }

    fn list(&self, clinic_id: ClinicId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((c, _k), v)| if *c == clinic_id { Some(v.clone()) } else { None })
            .collect()
    }
}
