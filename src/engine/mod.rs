//! The dependency-graph execution model.
//!
//! A [`Plan`](crate::Plan) is a directed acyclic graph of requests. Each
//! request either creates an external resource (yielding a
//! [`ResourceHandle`]) or runs a local side-effecting step (yielding a
//! [`Step`]). Requests exchange data exclusively through [`AsyncValue`]s,
//! which are type-safe tokens for outputs that do not exist yet.
//!
//! ## Phantom values
//!
//! Under the hood request outputs are type-erased and stored as
//! `Arc<dyn Any + Send + Sync>` in write-once slots. `AsyncValue<T>` keeps `T`
//! in the type system, so a request reading a value receives exactly the type
//! the producing request declared, and the downcast happens in one place.

mod handle;
mod runner;
mod task;
mod value;

use std::collections::BTreeSet;

use crate::core::NodeRef;
use crate::error::ValueError;

pub use crate::engine::handle::{Dependency, ResourceHandle, Step};
pub use crate::engine::runner::{Execution, RunContext, RunOptions, RunReport};
pub use crate::engine::value::{AsyncValue, Lookup, combine};

pub(crate) use crate::engine::task::{Failure, ResourceTask, StepTask, Task};
pub(crate) use crate::engine::value::Slot;

/// A set of [`AsyncValue`]s consumed together.
///
/// Implemented for a single value, for `()`, for `Vec`s and for tuples of up
/// to twelve elements, each of which may itself be a set. Requests receive the
/// resolved `Output` of their inputs; [`combine`] turns any set into a single
/// value.
pub trait Inputs: Send + Sync + 'static {
    /// The resolved shape, e.g. `(String, Vec<String>)` for
    /// `(AsyncValue<String>, AsyncValue<Vec<String>>)`.
    type Output: Send + Sync + 'static;

    /// Collects the requests the inputs were produced by.
    fn origins(&self, acc: &mut BTreeSet<NodeRef>);

    /// Resolves every input, failing with the first failure observed.
    fn resolve(&self) -> Result<Self::Output, ValueError>;
}

impl Inputs for () {
    type Output = ();

    fn origins(&self, _: &mut BTreeSet<NodeRef>) {}

    fn resolve(&self) -> Result<(), ValueError> {
        Ok(())
    }
}

impl<T> Inputs for AsyncValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn origins(&self, acc: &mut BTreeSet<NodeRef>) {
        acc.extend(AsyncValue::origins(self).iter().copied());
    }

    fn resolve(&self) -> Result<T, ValueError> {
        AsyncValue::resolve(self)
    }
}

impl<I> Inputs for Vec<I>
where
    I: Inputs,
{
    type Output = Vec<I::Output>;

    fn origins(&self, acc: &mut BTreeSet<NodeRef>) {
        for input in self {
            input.origins(acc);
        }
    }

    fn resolve(&self) -> Result<Self::Output, ValueError> {
        self.iter().map(Inputs::resolve).collect()
    }
}

macro_rules! impl_inputs {
    ($($I:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($I),*> Inputs for ($($I,)*)
        where
            $($I: Inputs),* {
            type Output = ($($I::Output,)*);

            fn origins(&self, acc: &mut BTreeSet<NodeRef>) {
                let ($($I,)*) = self;
                $($I.origins(acc);)*
            }

            fn resolve(&self) -> Result<Self::Output, ValueError> {
                let ($($I,)*) = self;
                Ok(($($I.resolve()?,)*))
            }
        }
    };
}

impl_inputs!(A);
impl_inputs!(A, B);
impl_inputs!(A, B, C);
impl_inputs!(A, B, C, D);
impl_inputs!(A, B, C, D, E);
impl_inputs!(A, B, C, D, E, F);
impl_inputs!(A, B, C, D, E, F, G);
impl_inputs!(A, B, C, D, E, F, G, H);
impl_inputs!(A, B, C, D, E, F, G, H, I);
impl_inputs!(A, B, C, D, E, F, G, H, I, J);
impl_inputs!(A, B, C, D, E, F, G, H, I, J, K);
impl_inputs!(A, B, C, D, E, F, G, H, I, J, K, L);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sets_resolve() {
        let inputs = (
            AsyncValue::known(String::from("a")),
            (AsyncValue::known(1u8), vec![AsyncValue::known(true)]),
        );
        assert_eq!(
            Inputs::resolve(&inputs).unwrap(),
            (String::from("a"), (1u8, vec![true]))
        );
    }

    #[test]
    fn test_known_values_have_no_origins() {
        let mut acc = BTreeSet::new();
        (AsyncValue::known(1u8), AsyncValue::known(2u8)).origins(&mut acc);
        assert!(acc.is_empty());
    }
}
