use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::{ArcStr, Dynamic, NodeRef};
use crate::engine::Inputs;
use crate::error::ValueError;

/// A handle over a value that becomes available at some later point of the
/// provisioning run.
///
/// `AsyncValue<T>` carries no data of its own. It remembers which requests it
/// was produced by (its *origins*) and how to compute `T` once those requests
/// have finished. Combinators such as [`map`](Self::map),
/// [`combine`](crate::combine) and [`index`](Self::index) only declare new
/// data dependencies; nothing is evaluated until the provisioner resolves the
/// inputs of a request that reads the value.
///
/// Once a value resolves, it stays resolved: derived values memoize their
/// result, and a failure is propagated unchanged to everything derived from it.
pub struct AsyncValue<T> {
    origins: Arc<BTreeSet<NodeRef>>,
    cell: Arc<dyn Resolve<T>>,
}

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            origins: self.origins.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T> std::fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AsyncValue<{}>({:?})", type_name::<T>(), self.origins)
    }
}

pub(crate) trait Resolve<T>: Send + Sync {
    fn resolve(&self) -> Result<T, ValueError>;
}

/// Write-once output cell of a single request. Filled by the provisioner when
/// the request finishes, never by the holder of a value.
pub(crate) struct Slot {
    pub(crate) node: NodeRef,
    pub(crate) name: ArcStr,
    cell: OnceLock<Result<Dynamic, ValueError>>,
}

impl Slot {
    pub(crate) fn new(node: NodeRef, name: ArcStr) -> Self {
        Self {
            node,
            name,
            cell: OnceLock::new(),
        }
    }

    /// Returns `false` if the slot was already filled.
    pub(crate) fn fill(&self, result: Result<Dynamic, ValueError>) -> bool {
        self.cell.set(result).is_ok()
    }
}

struct Known<T>(T);

impl<T> Resolve<T> for Known<T>
where
    T: Clone + Send + Sync,
{
    fn resolve(&self) -> Result<T, ValueError> {
        Ok(self.0.clone())
    }
}

struct Projected<T> {
    slot: Arc<Slot>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Resolve<T> for Projected<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn resolve(&self) -> Result<T, ValueError> {
        match self.slot.cell.get() {
            None => Err(ValueError::Unresolved(self.slot.name.clone())),
            Some(Err(err)) => Err(err.clone()),
            Some(Ok(output)) => output.downcast_ref::<T>().cloned().ok_or_else(|| {
                ValueError::TypeMismatch {
                    request: self.slot.name.clone(),
                    expected: type_name::<T>(),
                }
            }),
        }
    }
}

type Thunk<T> = Box<dyn Fn() -> Result<T, ValueError> + Send + Sync>;

struct Derived<T> {
    thunk: Thunk<T>,
    memo: OnceLock<Result<T, ValueError>>,
}

impl<T> Resolve<T> for Derived<T>
where
    T: Clone + Send + Sync,
{
    fn resolve(&self) -> Result<T, ValueError> {
        if let Some(result) = self.memo.get() {
            return result.clone();
        }

        let result = (self.thunk)();

        // an input that is still pending must not freeze the result
        if let Err(ValueError::Unresolved(_)) = result {
            return result;
        }

        self.memo.get_or_init(|| result).clone()
    }
}

impl<T> AsyncValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wraps a value that is already known at declaration time. Known values
    /// have no origins, so any request may read them without declaring a
    /// dependency.
    pub fn known(value: T) -> Self {
        Self {
            origins: Arc::default(),
            cell: Arc::new(Known(value)),
        }
    }

    pub(crate) fn from_slot(slot: Arc<Slot>) -> Self {
        Self {
            origins: Arc::new(BTreeSet::from([slot.node])),
            cell: Arc::new(Projected {
                slot,
                _phantom: PhantomData,
            }),
        }
    }

    pub(crate) fn derived<F>(origins: BTreeSet<NodeRef>, thunk: F) -> Self
    where
        F: Fn() -> Result<T, ValueError> + Send + Sync + 'static,
    {
        Self {
            origins: Arc::new(origins),
            cell: Arc::new(Derived {
                thunk: Box::new(thunk),
                memo: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn origins(&self) -> &BTreeSet<NodeRef> {
        &self.origins
    }

    pub(crate) fn resolve(&self) -> Result<T, ValueError> {
        self.cell.resolve()
    }

    /// Returns a value resolving to `f(v)` once this value resolves to `v`.
    /// `f` is never called if this value fails.
    pub fn map<U, F>(&self, f: F) -> AsyncValue<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let input = self.clone();
        AsyncValue::derived(self.origins.as_ref().clone(), move || {
            input.resolve().map(&f)
        })
    }

    /// Like [`map`](Self::map), but `f` may fail; its error becomes the
    /// failure of the resulting value.
    pub fn try_map<U, F>(&self, f: F) -> AsyncValue<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        let input = self.clone();
        AsyncValue::derived(self.origins.as_ref().clone(), move || {
            f(input.resolve()?).map_err(ValueError::callback)
        })
    }

    /// Projects a mapping-valued value to one of its entries. The result
    /// fails with [`ValueError::MissingKey`] if the key is absent once this
    /// value resolves.
    pub fn index(&self, key: impl Into<String>) -> AsyncValue<T::Item>
    where
        T: Lookup,
    {
        let key = key.into();
        let input = self.clone();
        AsyncValue::derived(self.origins.as_ref().clone(), move || {
            let map = input.resolve()?;
            map.lookup(&key)
                .ok_or_else(|| ValueError::MissingKey(key.clone()))
        })
    }
}

impl AsyncValue<Value> {
    /// Decodes a JSON value into a concrete type.
    pub fn decode<U>(&self) -> AsyncValue<U>
    where
        U: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let input = self.clone();
        AsyncValue::derived(self.origins.as_ref().clone(), move || {
            serde_json::from_value(input.resolve()?)
                .map_err(|err| ValueError::Decode(Arc::new(err)))
        })
    }
}

/// Combines any set of values (a single value, a tuple of values, or a `Vec`
/// of values) into one value resolving to all of them. The result fails with
/// the first failing input it observes.
pub fn combine<I>(inputs: I) -> AsyncValue<I::Output>
where
    I: Inputs,
    I::Output: Clone,
{
    let mut origins = BTreeSet::new();
    inputs.origins(&mut origins);
    AsyncValue::derived(origins, move || inputs.resolve())
}

/// Structured values which can be projected by key with
/// [`AsyncValue::index`].
pub trait Lookup {
    type Item: Clone + Send + Sync + 'static;

    fn lookup(&self, key: &str) -> Option<Self::Item>;
}

impl<V> Lookup for BTreeMap<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    type Item = V;

    fn lookup(&self, key: &str) -> Option<V> {
        self.get(key).cloned()
    }
}

impl<V> Lookup for HashMap<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    type Item = V;

    fn lookup(&self, key: &str) -> Option<V> {
        self.get(key).cloned()
    }
}

impl Lookup for serde_json::Map<String, Value> {
    type Item = Value;

    fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

impl Lookup for Value {
    type Item = Value;

    fn lookup(&self, key: &str) -> Option<Value> {
        self.as_object().and_then(|map| map.get(key)).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::PlanId;
    use petgraph::graph::NodeIndex;
    use proptest::prelude::*;

    /// Creates a pending value backed by a fresh slot.
    pub(crate) fn pending<T>(index: usize) -> (Arc<Slot>, AsyncValue<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let node = NodeRef {
            plan: PlanId::next(),
            index: NodeIndex::new(index),
        };
        let slot = Arc::new(Slot::new(node, format!("request-{index}").into()));
        (slot.clone(), AsyncValue::from_slot(slot))
    }

    fn failure(name: &str) -> ValueError {
        ValueError::Failed {
            request: name.into(),
            cause: Arc::new(anyhow::anyhow!("{name} exploded")),
        }
    }

    #[test]
    fn test_map_waits_for_input() {
        let (slot, value) = pending::<String>(0);
        let upper = value.map(|s| s.to_uppercase());

        assert!(matches!(upper.resolve(), Err(ValueError::Unresolved(_))));

        slot.fill(Ok(Arc::new(String::from("domain"))));
        assert_eq!(upper.resolve().unwrap(), "DOMAIN");
    }

    #[test]
    fn test_map_skips_callback_on_failure() {
        let (slot, value) = pending::<String>(0);
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let mapped = value.map(move |s| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            s
        });

        slot.fill(Err(failure("bucket")));

        let err = mapped.resolve().unwrap_err();
        assert!(err.to_string().contains("bucket exploded"));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_try_map_failure() {
        let value = AsyncValue::known(3u32);
        let checked = value.try_map(|n| {
            if n > 2 {
                anyhow::bail!("too large: {n}")
            }
            Ok(n)
        });

        let err = checked.resolve().unwrap_err();
        assert!(matches!(err, ValueError::Callback(_)));
        assert!(err.to_string().contains("too large: 3"));
    }

    #[test]
    fn test_resolution_is_memoized() {
        let (slot, value) = pending::<u32>(0);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let doubled = value.map(move |n| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            n * 2
        });

        slot.fill(Ok(Arc::new(21u32)));
        assert_eq!(doubled.resolve().unwrap(), 42);
        assert_eq!(doubled.resolve().unwrap(), 42);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_is_write_once() {
        let (slot, value) = pending::<u32>(0);
        assert!(slot.fill(Ok(Arc::new(1u32))));
        assert!(!slot.fill(Ok(Arc::new(2u32))));
        assert_eq!(value.resolve().unwrap(), 1);
    }

    #[test]
    fn test_type_mismatch() {
        let (slot, value) = pending::<u32>(0);
        slot.fill(Ok(Arc::new(String::from("not a number"))));
        assert!(matches!(
            value.resolve(),
            Err(ValueError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_index_present_key() {
        let (slot, value) = pending::<BTreeMap<String, String>>(0);
        let arn = value.index("arn");

        let mut map = BTreeMap::new();
        map.insert("arn".to_string(), "arn:aws:iam::1:oidc-provider/x".to_string());
        slot.fill(Ok(Arc::new(map)));

        assert_eq!(arn.resolve().unwrap(), "arn:aws:iam::1:oidc-provider/x");
    }

    #[test]
    fn test_index_missing_key() {
        let value = AsyncValue::known(serde_json::json!({ "domainName": "example" }));
        let arn = value.index("arn");

        match arn.resolve() {
            Err(ValueError::MissingKey(key)) => assert_eq!(key, "arn"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode() {
        let value = AsyncValue::known(serde_json::json!({ "name": "kind-aws" }));
        let name = value.index("name").decode::<String>();
        assert_eq!(name.resolve().unwrap(), "kind-aws");

        let broken = value.index("name").decode::<u32>();
        assert!(matches!(broken.resolve(), Err(ValueError::Decode(_))));
    }

    #[test]
    fn test_combinators_union_origins() {
        let (_, a) = pending::<u32>(0);
        let (_, b) = pending::<u32>(1);
        let both = combine((a.clone(), b.map(|n| n + 1)));

        let expected: BTreeSet<_> = a.origins().union(b.origins()).cloned().collect();
        assert_eq!(both.origins(), &expected);
        assert!(AsyncValue::known(1u8).origins().is_empty());
    }

    #[test]
    fn test_combine_tuple() {
        let (slot_a, a) = pending::<String>(0);
        let (slot_b, b) = pending::<u32>(1);
        let both = combine((a, b));

        slot_a.fill(Ok(Arc::new(String::from("x"))));
        assert!(both.resolve().is_err());

        slot_b.fill(Ok(Arc::new(7u32)));
        assert_eq!(both.resolve().unwrap(), (String::from("x"), 7));
    }

    proptest! {
        #[test]
        fn test_prop_combine_fails_iff_any_input_fails(pattern in prop::collection::vec(any::<bool>(), 1..16)) {
            let mut slots = Vec::new();
            let mut values = Vec::new();
            for (i, _) in pattern.iter().enumerate() {
                let (slot, value) = pending::<usize>(i);
                slots.push(slot);
                values.push(value);
            }

            let all = combine(values);

            for (i, (slot, ok)) in slots.iter().zip(&pattern).enumerate() {
                if *ok {
                    slot.fill(Ok(Arc::new(i)));
                } else {
                    slot.fill(Err(failure(&format!("request-{i}"))));
                }
            }

            let result = all.resolve();
            if pattern.iter().all(|ok| *ok) {
                let expected: Vec<usize> = (0..pattern.len()).collect();
                prop_assert_eq!(result.unwrap(), expected);
            } else {
                let failed = matches!(result, Err(ValueError::Failed { .. }));
                prop_assert!(failed, "expected a failure, got {:?}", result);
            }
        }
    }
}
