use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::backend::{Backend, DeviceInfo};
use crate::errors::{SfError, SfResult, Status, StatusCode};
use crate::graph::{Graph, NodeRef};
use crate::types::TensorValue;

/// Parses a fetch name of the form `op` or `op:idx`. A missing `:` means
/// output 0; a non-integer suffix is an error.
pub fn parse_fetch(name: &str) -> SfResult<(&str, usize)> {
    match name.split_once(':') {
        None => Ok((name, 0)),
        Some((op, idx)) => idx
            .parse::<usize>()
            .map(|i| (op, i))
            .map_err(|_| SfError::ParseError(name.to_string())),
    }
}

#[derive(Debug)]
struct PartialState {
    inputs: Vec<NodeRef>,
    outputs: Vec<NodeRef>,
    targets: Vec<NodeRef>,
    feeds: Vec<(NodeRef, TensorValue)>,
}

type PartialRegistry = Rc<RefCell<HashMap<u64, PartialState>>>;

/// Owns the handle of a stepwise execution set up by `partial_run_setup`.
/// The handle is released exactly once, on `release` or on drop.
pub struct PartialRunToken {
    handle: u64,
    registry: PartialRegistry,
    released: Cell<bool>,
}

impl PartialRunToken {
    pub fn release(&self) {
        if !self.released.replace(true) {
            self.registry.borrow_mut().remove(&self.handle);
        }
    }
}

impl Drop for PartialRunToken {
    fn drop(&mut self) {
        self.release();
    }
}

/// An execution context over a lowered graph. A run is a blocking call that
/// returns when the backend finishes; the session holds no DSL state across
/// runs.
#[derive(Debug)]
pub struct Session {
    graph: Graph,
    backend: Box<dyn Backend>,
    closed: Cell<bool>,
    partials: PartialRegistry,
    next_handle: Cell<u64>,
}

impl Session {
    pub fn new(graph: Graph, backend: Box<dyn Backend>) -> Session {
        Session {
            graph,
            backend,
            closed: Cell::new(false),
            partials: Rc::new(RefCell::new(HashMap::new())),
            next_handle: Cell::new(1),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn check_open(&self) -> SfResult<()> {
        if self.closed.get() {
            Err(SfError::DisposedHandle("session"))
        } else {
            Ok(())
        }
    }

    /// Releases the session; later calls report a disposed handle.
    pub fn close(&self) {
        self.closed.set(true);
        self.partials.borrow_mut().clear();
    }

    pub fn run(
        &self,
        feeds: &[(NodeRef, TensorValue)],
        fetches: &[NodeRef],
        targets: &[NodeRef],
    ) -> SfResult<Vec<TensorValue>> {
        self.check_open()?;
        self.backend.execute(&self.graph, feeds, fetches, targets)
    }

    /// As `run`, but reports the outcome through the status sink instead of
    /// raising.
    pub fn run_with_status(
        &self,
        feeds: &[(NodeRef, TensorValue)],
        fetches: &[NodeRef],
        targets: &[NodeRef],
        status: &mut Status,
    ) -> Option<Vec<TensorValue>> {
        match self.run(feeds, fetches, targets) {
            Ok(values) => {
                status.set_ok();
                Some(values)
            }
            Err(err) => {
                status.set_error(&err);
                None
            }
        }
    }

    pub fn devices(&self) -> SfResult<Vec<DeviceInfo>> {
        self.check_open()?;
        self.backend.devices()
    }

    /// Capability slot for engines that restore exported models. The CPU
    /// engine does not implement it.
    pub fn load_saved_model(&self, export_dir: &Path, tags: &[&str]) -> SfResult<()> {
        self.check_open()?;
        Err(SfError::backend(
            StatusCode::Unimplemented,
            format!("saved-model loading ({}, tags {tags:?}) is not available in this engine", export_dir.display()),
        ))
    }

    /// Declares the feeds, fetches and targets of a stepwise execution and
    /// returns the owning token.
    pub fn partial_run_setup(
        &self,
        inputs: &[NodeRef],
        outputs: &[NodeRef],
        targets: &[NodeRef],
    ) -> SfResult<PartialRunToken> {
        self.check_open()?;
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.partials.borrow_mut().insert(
            handle,
            PartialState {
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
                targets: targets.to_vec(),
                feeds: Vec::new(),
            },
        );
        Ok(PartialRunToken {
            handle,
            registry: Rc::clone(&self.partials),
            released: Cell::new(false),
        })
    }

    /// Executes one step against the token: feeds accumulate across steps,
    /// and each fetch must have been declared at setup.
    pub fn partial_run(
        &self,
        token: &PartialRunToken,
        feeds: &[(NodeRef, TensorValue)],
        fetches: &[NodeRef],
    ) -> SfResult<Vec<TensorValue>> {
        self.check_open()?;
        let (all_feeds, targets) = {
            let mut registry = self.partials.borrow_mut();
            let state = registry
                .get_mut(&token.handle)
                .ok_or(SfError::DisposedHandle("partial-run token"))?;
            for (port, value) in feeds {
                if !state.inputs.contains(port) {
                    return Err(SfError::bad("partial_run", "fed a port not declared at setup"));
                }
                state.feeds.push((*port, value.clone()));
            }
            for port in fetches {
                if !state.outputs.contains(port) {
                    return Err(SfError::bad("partial_run", "fetched a port not declared at setup"));
                }
            }
            (state.feeds.clone(), state.targets.clone())
        };
        self.backend.execute(&self.graph, &all_feeds, fetches, &targets)
    }

    pub fn runner(&self) -> Runner<'_> {
        Runner {
            session: self,
            feeds: Vec::new(),
            fetches: Vec::new(),
            targets: Vec::new(),
            run_options: None,
            run_metadata: None,
        }
    }
}

/// A fluent builder that accumulates feeds, fetches and targets before
/// triggering a session run. Inputs are stored with their values, so the
/// two lists cannot fall out of step.
#[derive(Debug)]
pub struct Runner<'s> {
    session: &'s Session,
    feeds: Vec<(NodeRef, TensorValue)>,
    fetches: Vec<NodeRef>,
    targets: Vec<NodeRef>,
    run_options: Option<Vec<u8>>,
    run_metadata: Option<Vec<u8>>,
}

impl<'s> Runner<'s> {
    fn resolve(&self, name: &str) -> SfResult<NodeRef> {
        let (op, index) = parse_fetch(name)?;
        let operation = self.session.graph().operation_by_name(op).ok_or_else(|| {
            SfError::backend(StatusCode::NotFound, format!("no operation named {op:?}"))
        })?;
        Ok(operation.output(index))
    }

    pub fn add_input(&mut self, port: NodeRef, value: TensorValue) -> &mut Self {
        self.feeds.push((port, value));
        self
    }

    /// Resolves the port from the name at add time and stores it with the
    /// value.
    pub fn add_input_named(&mut self, name: &str, value: TensorValue) -> SfResult<&mut Self> {
        let port = self.resolve(name)?;
        Ok(self.add_input(port, value))
    }

    pub fn fetch(&mut self, port: NodeRef) -> &mut Self {
        self.fetches.push(port);
        self
    }

    pub fn fetch_named(&mut self, name: &str) -> SfResult<&mut Self> {
        let port = self.resolve(name)?;
        Ok(self.fetch(port))
    }

    pub fn add_target(&mut self, port: NodeRef) -> &mut Self {
        self.targets.push(port);
        self
    }

    pub fn add_target_named(&mut self, name: &str) -> SfResult<&mut Self> {
        let port = self.resolve(name)?;
        Ok(self.add_target(port))
    }

    /// Engine-specific run options; the CPU engine has no use for them.
    pub fn set_run_options(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.run_options = Some(bytes);
        self
    }

    /// Metadata buffer filled by engines that produce one.
    pub fn run_metadata(&self) -> Option<&[u8]> {
        self.run_metadata.as_deref()
    }

    pub fn run(&mut self) -> SfResult<Vec<TensorValue>> {
        self.session.run(&self.feeds, &self.fetches, &self.targets)
    }

    /// Convenience single-fetch run: clears the fetch list, fetches only
    /// `port`, and returns its value.
    pub fn run_single(&mut self, port: NodeRef) -> SfResult<TensorValue> {
        self.fetches.clear();
        self.fetches.push(port);
        let mut values = self.run()?;
        values
            .pop()
            .ok_or_else(|| SfError::internal("single-fetch run returned nothing"))
    }
}
