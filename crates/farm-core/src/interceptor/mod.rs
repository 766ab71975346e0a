//! Header interceptors for both ends of a call.
//!
//! Interceptors are transparent decorators over the HTTP/2 transport. They
//! never see payload messages; they only read and write the header map of a
//! call, which makes them behave identically for unary, server-streaming,
//! client-streaming and bidirectional calls.
//!
//! ## Composition
//!
//! Interceptors are collected into an ordered [`Chain`] and installed as a
//! `tower` layer ([`ClientInterceptorLayer`] or [`ServerInterceptorLayer`]).
//! The first interceptor pushed is the outermost: its request-side hook runs
//! first and its response-side hook runs last. Every hook runs exactly once
//! per call.
//!
//! ## Built-in interceptors
//!
//! - [`HeaderClientInterceptor`] injects [`CLIENT_HEADER_KEY`] into every
//!   outgoing call and logs the header keys the server sent back.
//! - [`HeaderServerInterceptor`] logs the header keys a client sent and
//!   injects [`SERVER_HEADER_KEY`] into every response.

mod client;
mod server;

pub use client::{
    ClientChain, ClientInterceptor, ClientInterceptorLayer, ClientInterceptorService,
    HeaderClientInterceptor,
};
pub use server::{
    HeaderServerInterceptor, ServerChain, ServerInterceptor, ServerInterceptorLayer,
    ServerInterceptorService,
};

use core::fmt;
use std::sync::Arc;
use tonic::codegen::http::HeaderMap;

/// Header injected by [`HeaderClientInterceptor`] on every outgoing call.
pub const CLIENT_HEADER_KEY: &str = "client-metadata";
pub const CLIENT_HEADER_VALUE: &str = "customRequestValueInClientInterceptor";

/// Header injected by [`HeaderServerInterceptor`] on every response.
pub const SERVER_HEADER_KEY: &str = "server-metadata";
pub const SERVER_HEADER_VALUE: &str = "customRespondValueFrom ServerInterceptor";

/// An ordered list of interceptors, outermost first.
pub struct Chain<I: ?Sized> {
    links: Vec<Arc<I>>,
}

impl<I: ?Sized> Chain<I> {
    pub const fn new() -> Self {
        Self { links: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Request path order: outermost to innermost.
    pub(crate) fn outer_to_inner(&self) -> impl Iterator<Item = &I> {
        self.links.iter().map(|link| &**link)
    }

    /// Response path order: innermost to outermost.
    pub(crate) fn inner_to_outer(&self) -> impl Iterator<Item = &I> {
        self.links.iter().rev().map(|link| &**link)
    }

    fn push_arc(mut self, link: Arc<I>) -> Self {
        self.links.push(link);
        self
    }
}

impl<I: ?Sized> Default for Chain<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ?Sized> Clone for Chain<I> {
    fn clone(&self) -> Self {
        Self {
            links: self.links.clone(),
        }
    }
}

impl<I: ?Sized> fmt::Debug for Chain<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.len()).finish()
    }
}

/// Header names in wire order, for logging.
fn header_keys(headers: &HeaderMap) -> Vec<&str> {
    headers.keys().map(|key| key.as_str()).collect()
}
