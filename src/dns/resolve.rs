//! Core DNS resolution types and traits.

use crate::base::neterror::NetError;
use std::{collections::HashMap, fmt, future::Future, net::SocketAddr, pin::Pin, sync::Arc};

/// A host name to resolve into socket addresses.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }

    /// Host with IPv6 brackets removed, as `Url::host_str` keeps them.
    pub fn unbracketed(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Ordered candidate addresses; the connect path tries them front to back.
pub type Addrs = Vec<SocketAddr>;

/// Alias for the `Future` type returned by a resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, NetError>> + Send>>;

/// Host resolution used by the connect path.
///
/// Implementations return addresses with `port` already applied.
pub trait Resolve: Send + Sync {
    fn resolve(&self, name: Name, port: u16) -> Resolving;
}

impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, name: Name, port: u16) -> Resolving {
        (**self).resolve(name, port)
    }
}

/// Resolver backed by a fixed table, falling back to an inner resolver.
///
/// Hosts missing from the table fail with `NameNotResolvedFor` when no
/// fallback is configured.
#[derive(Clone, Default)]
pub struct StaticResolver {
    table: Arc<HashMap<String, Vec<SocketAddr>>>,
    fallback: Option<Arc<dyn Resolve>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to the given addresses (ports are replaced at lookup time).
    pub fn with_host(mut self, host: &str, addrs: Vec<SocketAddr>) -> Self {
        Arc::make_mut(&mut self.table).insert(host.to_ascii_lowercase(), addrs);
        self
    }

    pub fn with_fallback(mut self, inner: Arc<dyn Resolve>) -> Self {
        self.fallback = Some(inner);
        self
    }
}

impl Resolve for StaticResolver {
    fn resolve(&self, name: Name, port: u16) -> Resolving {
        if let Some(addrs) = self.table.get(&name.as_str().to_ascii_lowercase()) {
            let addrs: Addrs = addrs
                .iter()
                .map(|a| SocketAddr::new(a.ip(), port))
                .collect();
            return Box::pin(std::future::ready(Ok(addrs)));
        }
        match &self.fallback {
            Some(inner) => inner.resolve(name, port),
            None => Box::pin(std::future::ready(Err(NetError::NameNotResolvedFor {
                domain: name.as_str().to_string(),
            }))),
        }
    }
}

impl fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticResolver")
            .field("hosts", &self.table.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
