use std::{future::Future, marker::PhantomData};

use typed_builder::TypedBuilder;

use crate::{aggregate::Aggregate, metric::Dispatch};

/// The action being measured, plus a name for the logs.
///
/// The action receives the [`Dispatch`] it serves and resolves to one metric.
/// Create heavy objects such as HTTP clients outside of it and move clones in.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Scenario<A, F, Fut>
where
    A: Aggregate,
    F: Fn(Dispatch) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send + 'static,
{
    #[builder(setter(into))]
    pub name: String,
    pub action: F,
    #[builder(default, setter(skip))]
    marker: PhantomData<fn() -> (A, Fut)>,
}
