//! Typed operations shared by every API resource.
//!
//! # Design
//! A resource only declares where it lives and which JSON keys carry it.
//! `Service<R>` then provides the complete operation set on top of the
//! generic `Client` pipeline, so adding a resource means adding a struct and
//! a `Resource` impl rather than another hand-written client module.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;

use crate::client::{Client, RequestOptions};
use crate::error::Error;
use crate::pagination::Paginator;
use crate::types::Page;

/// An API resource served under `PATH`.
pub trait Resource: DeserializeOwned {
    /// Collection path, e.g. `/payments`.
    const PATH: &'static str;
    /// Key wrapping single payloads in requests and responses.
    const KEY: &'static str;
    /// Key wrapping the item list in list responses.
    const LIST_KEY: &'static str;
}

/// List, get, create, update and action calls for resource `R`.
pub struct Service<R> {
    client: Client,
    resource: PhantomData<fn() -> R>,
}

impl<R: Resource> Service<R> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: PhantomData,
        }
    }

    /// # Errors
    ///
    /// See [`Client::list`].
    pub fn list<P: Serialize + ?Sized>(&self, params: &P, options: &RequestOptions) -> Result<Page<R>, Error> {
        self.client.list(R::PATH, params, R::LIST_KEY, options)
    }

    /// Every page matching `params`, fetched lazily.
    ///
    /// # Errors
    ///
    /// See [`Client::paginate`].
    pub fn all<P: Serialize + ?Sized>(&self, params: &P, options: RequestOptions) -> Result<Paginator<R>, Error> {
        self.client.paginate(R::PATH, params, R::LIST_KEY, options)
    }

    /// # Errors
    ///
    /// See [`Client::get`].
    pub fn get(&self, id: &str, options: &RequestOptions) -> Result<R, Error> {
        self.client.get(&member_path(R::PATH, id), R::KEY, options)
    }

    /// Create a resource.
    ///
    /// If the server rejects the request because its idempotency key already
    /// created a resource, and the client follows idempotent conflicts, the
    /// existing resource is fetched and returned instead.
    ///
    /// # Errors
    ///
    /// See [`Client::create`].
    pub fn create<P: Serialize + ?Sized>(&self, params: &P, options: &RequestOptions) -> Result<R, Error> {
        let err = match self.client.create(R::PATH, R::KEY, params, options) {
            Err(Error::Api(err)) if err.status == 409 && self.client.config().follow_idempotent_conflicts() => err,
            other => return other,
        };
        let Some(id) = err.conflicting_resource_id().map(str::to_string) else {
            return Err(Error::Api(err));
        };
        tracing::info!(resource = R::KEY, id = %id, "idempotency key already used, fetching existing resource");
        self.get(&id, &options.for_read())
    }

    /// # Errors
    ///
    /// See [`Client::update`].
    pub fn update<P: Serialize + ?Sized>(&self, id: &str, params: &P, options: &RequestOptions) -> Result<R, Error> {
        self.client.update(&member_path(R::PATH, id), R::KEY, params, options)
    }

    /// Trigger the parameterless action `name`, e.g. `cancel`.
    ///
    /// # Errors
    ///
    /// See [`Client::action`].
    pub fn action(&self, id: &str, name: &str, options: &RequestOptions) -> Result<R, Error> {
        self.action_with(id, name, &Map::new(), options)
    }

    /// # Errors
    ///
    /// See [`Client::action`].
    pub fn action_with<P: Serialize + ?Sized>(
        &self,
        id: &str,
        name: &str,
        params: &P,
        options: &RequestOptions,
    ) -> Result<R, Error> {
        let path = format!("{}/actions/{}", member_path(R::PATH, id), encode_segment(name));
        self.client.action(&path, R::KEY, params, options)
    }
}

impl<R> Clone for Service<R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            resource: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Service<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("resource", &std::any::type_name::<R>())
            .finish_non_exhaustive()
    }
}

fn member_path(collection: &str, id: &str) -> String {
    format!("{collection}/{}", encode_segment(id))
}

/// Percent-encode everything but unreserved characters, so `/`, `?`, `+` and
/// spaces stay inside the segment.
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
