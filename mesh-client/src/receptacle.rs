//! Result Marshalling Helper (spec.md §4.6), redesigned per the REDESIGN
//! FLAG in spec.md §9: rather than reflecting over "pointer to value" vs.
//! "map" at runtime, the clone/copy-back contract is an explicit trait
//! parameterized on the caller's output type. A hedged attempt clones a
//! fresh, blank receptacle of the same shape, decodes into it, and only the
//! winning attempt's clone is merged back into the caller's original — this
//! is what lets parallel attempts race without one attempt's partial write
//! corrupting another's.
//!
//! `ValueReceptacle<T>` is the "location handle" case (spec.md: overwrite
//! semantics); `MapReceptacle<K, V>` is the "mapping handle" case (union
//! merge, caller's existing entries left intact unless overwritten). The
//! "any other shape is a programmer error" case from the distilled spec
//! does not arise here: a caller who needs a new shape implements
//! [`Receptacle`] themselves, so there is nothing left to abort on at
//! runtime.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A caller-provided destination for a decoded RPC output, and the
/// clone/merge operations the hedge controller needs to race attempts
/// safely against it (spec.md §4.6).
pub trait Receptacle: Send {
    /// The type an attempt decodes its output into. Distinct from `Self` so
    /// a single attempt's clone never aliases the caller's receptacle.
    type Clone: Send + Serialize + DeserializeOwned + 'static;

    /// A fresh, blank value of the same shape as this receptacle, handed to
    /// an attempt task to decode into. Never touches `self`.
    fn blank(&self) -> Self::Clone;

    /// Overwrites this receptacle with the winning attempt's clone. Called
    /// exactly once, by the controller, after it has selected the first
    /// successful attempt (spec.md §5 "Caller's output receptacle: written
    /// only by the controller, and only once").
    fn merge(&mut self, clone: Self::Clone);
}

/// The "location handle" case: `T` overwrites `T` wholesale.
pub struct ValueReceptacle<'a, T> {
    pub value: &'a mut T,
}

impl<'a, T> ValueReceptacle<'a, T> {
    pub fn new(value: &'a mut T) -> Self {
        ValueReceptacle { value }
    }
}

impl<'a, T> Receptacle for ValueReceptacle<'a, T>
where
    T: Default + Send + Serialize + DeserializeOwned,
{
    type Clone = T;

    fn blank(&self) -> Self::Clone {
        T::default()
    }

    fn merge(&mut self, clone: Self::Clone) {
        *self.value = clone;
    }
}

/// The "mapping handle" case: entries of the winning clone are written into
/// the caller's map; pre-existing entries the clone does not mention are
/// left untouched (spec.md §4.6 copy-back rule).
pub struct MapReceptacle<'a, K, V> {
    pub map: &'a mut HashMap<K, V>,
}

impl<'a, K, V> MapReceptacle<'a, K, V> {
    pub fn new(map: &'a mut HashMap<K, V>) -> Self {
        MapReceptacle { map }
    }
}

impl<'a, K, V> Receptacle for MapReceptacle<'a, K, V>
where
    K: Eq + Hash + Clone + Send + Serialize + DeserializeOwned,
    V: Send + Serialize + DeserializeOwned,
{
    type Clone = HashMap<K, V>;

    fn blank(&self) -> Self::Clone {
        HashMap::new()
    }

    fn merge(&mut self, clone: Self::Clone) {
        for (k, v) in clone {
            self.map.insert(k, v);
        }
    }
}
