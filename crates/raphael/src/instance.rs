//! Instance-level async operations.
//!
//! [`AsyncModel`] is implemented for every [`Model`], so a source instance can
//! be saved, deleted or refreshed directly:
//!
//! ```ignore
//! let mut book = Book { title: "Dune".into(), ..Default::default() };
//! book.async_save(&cx, &rt).await;
//! book.pages = Some(412);
//! book.async_save_with(&cx, &rt, &SaveOptions::new().update_fields(["pages"])).await;
//! ```

use std::future::Future;
use std::sync::Arc;

use raphael_core::{Cx, Error, Model, Outcome};

use crate::backend::Backend;
use crate::manager::Manager;
use crate::runtime::Raphael;

/// How [`Manager::save`] persists an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Always insert, even when the instance has a key.
    pub force_insert: bool,
    /// Restrict an update to these fields.
    pub update_fields: Option<Vec<String>>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_insert(mut self, value: bool) -> Self {
        self.force_insert = value;
        self
    }

    pub fn update_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.update_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Async persistence for source-model instances.
pub trait AsyncModel: Model {
    /// The manager for this model in `rt`.
    fn objects<B: Backend>(rt: &Raphael<B>) -> Arc<Manager<Self, B>> {
        rt.manager::<Self>()
    }

    /// Insert or update this instance.
    fn async_save<'a, B: Backend>(
        &'a mut self,
        cx: &'a Cx,
        rt: &'a Raphael<B>,
    ) -> impl Future<Output = Outcome<(), Error>> + Send + 'a {
        async move {
            let manager = rt.manager::<Self>();
            manager.save(cx, self, &SaveOptions::default()).await
        }
    }

    /// Persist with explicit [`SaveOptions`].
    fn async_save_with<'a, B: Backend>(
        &'a mut self,
        cx: &'a Cx,
        rt: &'a Raphael<B>,
        options: &'a SaveOptions,
    ) -> impl Future<Output = Outcome<(), Error>> + Send + 'a {
        async move {
            let manager = rt.manager::<Self>();
            manager.save(cx, self, options).await
        }
    }

    /// Delete this instance's row. Returns the number of rows removed.
    fn async_delete<'a, B: Backend>(
        &'a mut self,
        cx: &'a Cx,
        rt: &'a Raphael<B>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send + 'a {
        async move {
            let manager = rt.manager::<Self>();
            manager.delete_instance(cx, self).await
        }
    }

    /// Reload `fields` (all when `None`) from storage.
    fn async_refresh<'a, B: Backend>(
        &'a mut self,
        cx: &'a Cx,
        rt: &'a Raphael<B>,
        fields: Option<&'a [&'a str]>,
    ) -> impl Future<Output = Outcome<(), Error>> + Send + 'a {
        async move {
            let manager = rt.manager::<Self>();
            manager.refresh(cx, self, fields).await
        }
    }
}

impl<M: Model> AsyncModel for M {}
