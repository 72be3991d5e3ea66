//! The application registry (C4): binds event names to handlers without
//! inheritance.
//!
//! The C++ original dispatches through `base_handler_t`/`base_factory_t`
//! virtual tables bound by `dynamic_cast`; Rust has no equivalent runtime
//! cast, so this module uses two sibling traits instead — `Handler` for the
//! downstream side of a session, `Factory` for producing one per invocation
//! — and a two-phase bind step (`UnboundFactory::bind`) standing in for the
//! original's factory/application linkage (spec.md §9).

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Error;
use crate::upstream::Upstream;

/// A session's downstream half.
///
/// `invoke` runs once when the session opens; then `write` once per inbound
/// chunk, in wire order; then exactly one of `close` (clean end-of-input)
/// terminates the handler's involvement. Handlers may write to `upstream`
/// at any point during any of these calls (spec.md §9 open question,
/// resolved permissively as the source does).
pub trait Handler {
    /// Called once when the session opens, before any `write`.
    fn invoke(&mut self, event: &str, upstream: &mut Upstream) -> Result<(), Error>;

    /// Called once per inbound chunk, in wire order.
    fn write(&mut self, upstream: &mut Upstream, bytes: Vec<u8>) -> Result<(), Error>;

    /// Called once when the engine signals end-of-input.
    fn close(&mut self, upstream: &mut Upstream) -> Result<(), Error>;
}

/// Produces a fresh [`Handler`] for each invocation of the event it's bound
/// to.
pub trait Factory {
    /// Construct the handler for one invocation. Implementations that need
    /// an owning application but were never bound to one fail with
    /// [`Error::BadFactory`] (spec.md §4.4 step 4).
    fn make_handler(&self, event: &str) -> Result<Box<dyn Handler>, Error>;
}

/// A [`Factory`] that has not yet been bound to an owning application.
///
/// Exists so application authors can build factories before the
/// application's name is known (e.g. at static-initialization time in the
/// original), then bind them all at once in [`Application::new`] — mirroring
/// the original's two-step "register factory, then attach to app" sequence
/// without needing a `dynamic_cast`-style downcast to recover identity.
pub struct UnboundFactory {
    build: Box<dyn Fn(&str) -> Rc<dyn Factory>>,
}

impl UnboundFactory {
    /// Wrap a factory constructor. `build` receives the owning application's
    /// name once bound.
    pub fn new(build: impl Fn(&str) -> Rc<dyn Factory> + 'static) -> Self {
        Self {
            build: Box::new(build),
        }
    }

    /// Bind this factory to an application, producing the concrete
    /// [`Factory`] the registry will invoke.
    #[must_use]
    pub fn bind(self, app_name: &str) -> Rc<dyn Factory> {
        (self.build)(app_name)
    }
}

/// A factory wrapping a plain function: buffers every chunk for a session,
/// then calls the function once with the event name and full input on
/// close (spec.md §4.4's "function factory" style, R1).
struct FnFactory<F> {
    f: Rc<F>,
}

impl<F> Factory for FnFactory<F>
where
    F: Fn(&str, Vec<Vec<u8>>) -> Result<Vec<u8>, Error> + 'static,
{
    fn make_handler(&self, _event: &str) -> Result<Box<dyn Handler>, Error> {
        Ok(Box::new(FnHandler {
            f: Rc::clone(&self.f),
            event: String::new(),
            chunks: Vec::new(),
        }))
    }
}

struct FnHandler<F> {
    f: Rc<F>,
    event: String,
    chunks: Vec<Vec<u8>>,
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&str, Vec<Vec<u8>>) -> Result<Vec<u8>, Error>,
{
    fn invoke(&mut self, event: &str, _upstream: &mut Upstream) -> Result<(), Error> {
        self.event = event.to_string();
        Ok(())
    }

    fn write(&mut self, _upstream: &mut Upstream, bytes: Vec<u8>) -> Result<(), Error> {
        self.chunks.push(bytes);
        Ok(())
    }

    fn close(&mut self, upstream: &mut Upstream) -> Result<(), Error> {
        let chunks = std::mem::take(&mut self.chunks);
        let output = (self.f)(&self.event, chunks)?;
        upstream.write(output)?;
        upstream.close()
    }
}

/// Wrap a plain function `(event, chunks) -> output` as an
/// [`UnboundFactory`] — the common case for simple request/response events.
pub fn function_factory(
    f: impl Fn(&str, Vec<Vec<u8>>) -> Result<Vec<u8>, Error> + 'static,
) -> UnboundFactory {
    let f = Rc::new(f);
    UnboundFactory::new(move |_app_name| Rc::new(FnFactory { f: Rc::clone(&f) }) as Rc<dyn Factory>)
}

/// The event→factory bindings for one application, plus an optional default
/// used when no exact binding matches.
pub struct Application {
    name: String,
    factories: HashMap<String, Rc<dyn Factory>>,
    default: Option<Rc<dyn Factory>>,
}

impl Application {
    /// Build a registry from a name and its (as yet unbound) event
    /// factories, binding each one to `name` (spec.md §9 two-phase bind).
    /// Registering the same event name twice takes the later binding (R2).
    #[must_use]
    pub fn new(name: impl Into<String>, bindings: Vec<(String, UnboundFactory)>) -> Self {
        let name = name.into();
        let factories = bindings
            .into_iter()
            .map(|(event, factory)| (event, factory.bind(&name)))
            .collect();
        Self {
            name,
            factories,
            default: None,
        }
    }

    /// Set a default factory used for any event with no explicit binding.
    #[must_use]
    pub fn with_default(mut self, factory: UnboundFactory) -> Self {
        self.default = Some(factory.bind(&self.name));
        self
    }

    /// Application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve `event` to a handler and run its `invoke` (spec.md §4.4
    /// steps 1-6): look up an exact binding, falling back to the default
    /// factory, failing with [`Error::NoSuchEvent`] if neither matches;
    /// construct the handler; call `handler.invoke(event, upstream)`;
    /// return the handler ready to receive chunks.
    pub fn invoke(&self, event: &str, upstream: &mut Upstream) -> Result<Box<dyn Handler>, Error> {
        let factory = self
            .factories
            .get(event)
            .or(self.default.as_ref())
            .ok_or_else(|| Error::NoSuchEvent(event.to_string()))?;
        let mut handler = factory.make_handler(event)?;
        handler.invoke(event, upstream)?;
        Ok(handler)
    }
}
