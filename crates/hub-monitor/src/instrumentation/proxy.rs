//! Transparent instrumentation of a whole storage implementation.
//!
//! `Instrumented<S>` wraps any `S` and routes each named method through
//! `OperationInstrumentation`. Each method name maps to an `OperationTag`
//! (kind plus resource) through an `OperationTable` that is built once when
//! the wrapper is created.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use super::operation::{OperationInstrumentation, OperationKind};

/// Operation kind and resource recorded for one storage method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTag {
    pub kind: OperationKind,
    pub resource: Cow<'static, str>,
}

impl OperationTag {
    pub const UNKNOWN: OperationTag = OperationTag {
        kind: OperationKind::Unknown,
        resource: Cow::Borrowed("unknown"),
    };

    pub fn new(kind: OperationKind, resource: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            resource: resource.into(),
        }
    }

    /// Infer a tag from a method name.
    ///
    /// Recognized prefixes are `get` (SELECT), `create`/`add` (INSERT),
    /// `update` (UPDATE) and `delete` (DELETE), in either `getHostContacts`
    /// or `get_host_contacts` form. The rest of the name becomes the
    /// snake_case resource. Anything else is `unknown`/`unknown`.
    ///
    /// ```
    /// use hub_monitor::instrumentation::{OperationKind, OperationTag};
    ///
    /// let tag = OperationTag::infer("getHostContacts");
    /// assert_eq!(tag, OperationTag::new(OperationKind::Select, "host_contacts"));
    /// assert_eq!(OperationTag::infer("archive_host"), OperationTag::UNKNOWN);
    /// ```
    pub fn infer(method: &str) -> Self {
        let (verb, rest) = split_verb(method);
        let kind = match verb {
            "get" => OperationKind::Select,
            "create" | "add" => OperationKind::Insert,
            "update" => OperationKind::Update,
            "delete" => OperationKind::Delete,
            _ => return Self::UNKNOWN,
        };

        let resource = to_snake_case(rest);
        if resource.is_empty() {
            return Self::UNKNOWN;
        }
        Self::new(kind, resource)
    }
}

fn split_verb(method: &str) -> (&str, &str) {
    if let Some((verb, rest)) = method.split_once('_') {
        return (verb, rest);
    }
    match method.find(|c: char| c.is_ascii_uppercase()) {
        Some(i) => method.split_at(i),
        None => (method, ""),
    }
}

fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut snake = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let next = chars.get(i + 1);
            let boundary = prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
                || (prev.is_some_and(char::is_ascii_uppercase)
                    && next.is_some_and(char::is_ascii_lowercase));
            if boundary && !snake.ends_with('_') {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }

    snake.trim_matches('_').to_string()
}

/// Method name to `OperationTag` lookup. Unlisted methods map to `unknown`.
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    tags: HashMap<&'static str, OperationTag>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag a method explicitly.
    #[must_use]
    pub fn tag(
        mut self,
        method: &'static str,
        kind: OperationKind,
        resource: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.tags.insert(method, OperationTag::new(kind, resource));
        self
    }

    /// Tag a method from its name via `OperationTag::infer`.
    #[must_use]
    pub fn infer(mut self, method: &'static str) -> Self {
        self.tags.insert(method, OperationTag::infer(method));
        self
    }

    pub fn lookup(&self, method: &str) -> OperationTag {
        self.tags
            .get(method)
            .cloned()
            .unwrap_or(OperationTag::UNKNOWN)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Types that can describe their own operations for `Instrumented`.
pub trait Instrumentable {
    fn operation_table() -> OperationTable;
}

impl<S: Instrumentable> Instrumentable for std::sync::Arc<S> {
    fn operation_table() -> OperationTable {
        S::operation_table()
    }
}

/// Wrapper that instruments every call made through it.
///
/// Non-method data stays reachable through `inner()`.
#[derive(Clone)]
pub struct Instrumented<S> {
    inner: S,
    table: OperationTable,
    instrumentation: OperationInstrumentation,
}

impl<S: fmt::Debug> fmt::Debug for Instrumented<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("inner", &self.inner)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<S: Instrumentable> Instrumented<S> {
    pub fn new(inner: S, instrumentation: OperationInstrumentation) -> Self {
        Self::with_table(inner, S::operation_table(), instrumentation)
    }
}

impl<S> Instrumented<S> {
    pub fn with_table(
        inner: S,
        table: OperationTable,
        instrumentation: OperationInstrumentation,
    ) -> Self {
        Self {
            inner,
            table,
            instrumentation,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn table(&self) -> &OperationTable {
        &self.table
    }

    /// Run an async method of the wrapped value under its tag.
    pub async fn call<'a, T, E, F, Fut>(&'a self, method: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce(&'a S) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let tag = self.table.lookup(method);
        self.instrumentation
            .run_async(tag.kind, &tag.resource, || operation(&self.inner))
            .await
    }

    /// Run a synchronous method of the wrapped value under its tag.
    pub fn call_sync<T, E, F>(&self, method: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce(&S) -> Result<T, E>,
        E: fmt::Display,
    {
        let tag = self.table.lookup(method);
        self.instrumentation
            .run_sync(tag.kind, &tag.resource, || operation(&self.inner))
    }
}
