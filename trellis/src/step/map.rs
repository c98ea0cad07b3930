//! Per-element sequential composition over collections.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Result;
use crate::step::{AnyStep, Step};

/// Runs a built step on each element of a `Vec`, in order.
///
/// For each element and its zero-based index the builder constructs a step,
/// which is then run on the element. Execution is strictly sequential and
/// fail-fast, and output order matches input order. Parallel mapping is
/// expressed as [`Parallel`](crate::step::Parallel) over the elements.
pub struct Map<I, O> {
    build: Arc<dyn Fn(usize, &I) -> AnyStep<I, O> + Send + Sync>,
}

impl<I, O> Clone for Map<I, O> {
    fn clone(&self) -> Self {
        Self {
            build: Arc::clone(&self.build),
        }
    }
}

impl<I, O> Map<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a map from a per-element step builder.
    #[must_use]
    pub fn new(build: impl Fn(usize, &I) -> AnyStep<I, O> + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
        }
    }

    /// Create a map that runs the same step on every element.
    #[must_use]
    pub fn uniform(step: AnyStep<I, O>) -> Self {
        Self::new(move |_index, _element| step.clone())
    }
}

impl<I, O> Step for Map<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    type Input = Vec<I>;
    type Output = Vec<O>;

    async fn run(&self, input: Vec<I>) -> Result<Vec<O>> {
        let mut outputs = Vec::with_capacity(input.len());
        for (index, element) in input.into_iter().enumerate() {
            let step = (self.build)(index, &element);
            outputs.push(step.run(element).await?);
        }
        Ok(outputs)
    }
}

impl<I, O> std::fmt::Debug for Map<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map").finish_non_exhaustive()
    }
}

/// Folds a `Vec` into an accumulator, one element at a time.
///
/// The body step consumes `(accumulator, element)` pairs and produces the
/// next accumulator. Strictly sequential and fail-fast.
pub struct Reduce<I, O, S> {
    initial: O,
    body: S,
    _marker: PhantomData<fn(I)>,
}

impl<I, O, S> Reduce<I, O, S>
where
    O: Clone + Send + Sync + 'static,
    S: Step<Input = (O, I), Output = O>,
{
    /// Create a fold starting from `initial`.
    #[must_use]
    pub const fn new(initial: O, body: S) -> Self {
        Self {
            initial,
            body,
            _marker: PhantomData,
        }
    }
}

impl<I, O, S> Step for Reduce<I, O, S>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
    S: Step<Input = (O, I), Output = O>,
{
    type Input = Vec<I>;
    type Output = O;

    async fn run(&self, input: Vec<I>) -> Result<O> {
        let mut accumulator = self.initial.clone();
        for element in input {
            accumulator = self.body.run((accumulator, element)).await?;
        }
        Ok(accumulator)
    }
}

impl<I, O: std::fmt::Debug, S> std::fmt::Debug for Reduce<I, O, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reduce")
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::step::{StepExt as _, Transform};

    #[tokio::test]
    async fn map_preserves_order() {
        let map = Map::new(|index, _element: &i32| {
            Transform::new(move |value: i32| async move { Ok(value * 10 + index as i32) }).boxed()
        });

        assert_eq!(map.run(vec![1, 2, 3]).await.expect("run"), vec![10, 21, 32]);
    }

    #[tokio::test]
    async fn map_is_fail_fast() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let map = Map::new(move |_index, element: &i32| {
            let fail = *element < 0;
            let counter = Arc::clone(&counter);
            Transform::new(move |value: i32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        Err(Error::blocked("negative"))
                    } else {
                        Ok(value)
                    }
                }
            })
            .boxed()
        });

        assert!(map.run(vec![1, -2, 3]).await.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reduce_folds_left_to_right() {
        let concat = Transform::new(|(acc, item): (String, i32)| async move {
            Ok(format!("{acc}{item}"))
        });
        let reduce = Reduce::new(String::from(">"), concat);

        assert_eq!(reduce.run(vec![1, 2, 3]).await.expect("run"), ">123");
    }
}
