//! Service bindings
//!
//! A [`ServiceBinding`] records which operations of a service are
//! transactional. A marker may be declared on the whole service, on single
//! operations, or both; the most specific declaration wins and a call is
//! wrapped at most once. Excluded operations (helpers and plumbing that
//! happen to live on the service) are never wrapped, whatever is declared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use txguard_core::TransactionalError;

use crate::interceptor::TransactionalInterceptor;
use crate::marker::Transactional;

/// Transactional declarations of one service
#[derive(Debug)]
pub struct ServiceBinding {
    name: String,
    interceptor: Arc<TransactionalInterceptor>,
    service_marker: Option<Transactional>,
    method_markers: HashMap<String, Transactional>,
    excluded: HashSet<String>,
}

impl ServiceBinding {
    /// Binding with no declarations
    pub fn new(name: impl Into<String>, interceptor: Arc<TransactionalInterceptor>) -> Self {
        Self {
            name: name.into(),
            interceptor,
            service_marker: None,
            method_markers: HashMap::new(),
            excluded: HashSet::new(),
        }
    }

    /// Declare a marker for every operation of the service
    pub fn annotate_service(mut self, marker: Transactional) -> Self {
        self.service_marker = Some(marker);
        self
    }

    /// Declare a marker for one operation
    pub fn annotate_method(mut self, method: impl Into<String>, marker: Transactional) -> Self {
        self.method_markers.insert(method.into(), marker);
        self
    }

    /// Never intercept `method`
    pub fn exclude(mut self, method: impl Into<String>) -> Self {
        self.excluded.insert(method.into());
        self
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interceptor applying the markers
    pub fn interceptor(&self) -> &Arc<TransactionalInterceptor> {
        &self.interceptor
    }

    /// Marker governing `method`, if it is intercepted at all
    pub fn resolve(&self, method: &str) -> Option<&Transactional> {
        if self.excluded.contains(method) {
            return None;
        }
        self.method_markers
            .get(method)
            .or(self.service_marker.as_ref())
    }

    /// Whether calls to `method` are wrapped
    pub fn is_intercepted(&self, method: &str) -> bool {
        self.resolve(method).is_some()
    }

    /// Call `method` with its declared demarcation
    ///
    /// Operations without a marker run as-is; their failures are still
    /// reported as [`TransactionalError::Method`] so callers handle one
    /// error type.
    pub fn invoke<T, E, F>(&self, method: &str, body: F) -> Result<T, TransactionalError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        match self.resolve(method) {
            Some(marker) => self.interceptor.invoke(marker, body),
            None => body().map_err(TransactionalError::method),
        }
    }
}
