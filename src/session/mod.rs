//! Building, executing and differentiating a computation.
//!
//! A [`Session`] accepts feeds, parameters and operator applications while it
//! is `Building`. Every application is validated immediately and hands back
//! handles to its inferred outputs. `run` executes the whole computation once,
//! after which `backward` can differentiate any recorded value.

use std::{collections::BTreeMap, env, fmt};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    tensor_grad::{GradStore, Tensor, TensorMeta},
    tensor_op::{
        chain_gradient::backward_from,
        error::{OpError, Result},
        invocation::Invocation,
        operation_ir::{AttrValue, Attributes},
        registry::Registry,
        Value, ValueMeta,
    },
    utility::parallel_map,
};

/// Environment variable read by [`SessionConfig::from_env`].
pub const WORKERS_VAR: &str = "OPGRAD_WORKERS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Building,
    Executed,
    Differentiated,
    /// An operator produced outputs that disagree with its own inference.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Building => "building",
            SessionState::Executed => "executed",
            SessionState::Differentiated => "differentiated",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Threads used for independent invocations; 1 runs everything inline.
    pub workers: usize,
    /// Log a warning whenever an output or gradient holds NaN or infinity.
    pub check_finite: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            workers: 1,
            check_finite: false,
        }
    }
}

impl SessionConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_check_finite(mut self, check_finite: bool) -> Self {
        self.check_finite = check_finite;
        self
    }

    /// Defaults overridden by `OPGRAD_WORKERS`. Unparsable values are logged
    /// and ignored.
    pub fn from_env() -> Self {
        let config = SessionConfig::default();
        match env::var(WORKERS_VAR) {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => config.with_workers(workers),
                _ => {
                    warn!(
                        "Ignoring {}={:?}, expected a positive integer",
                        WORKERS_VAR, raw
                    );
                    config
                }
            },
            Err(_) => config,
        }
    }
}

/// A value issued by one session. Handles from another session are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    session: Uuid,
    index: usize,
}

/// One input of [`Session::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Tensor(Handle),
    Tuple(Vec<Handle>),
    Const(AttrValue),
}

impl From<Handle> for Arg {
    fn from(handle: Handle) -> Self {
        Arg::Tensor(handle)
    }
}

impl From<&Handle> for Arg {
    fn from(handle: &Handle) -> Self {
        Arg::Tensor(*handle)
    }
}

impl From<Vec<Handle>> for Arg {
    fn from(handles: Vec<Handle>) -> Self {
        Arg::Tuple(handles)
    }
}

#[derive(Debug, Clone)]
enum Source {
    Feed,
    Parameter(String),
    Output { step: usize },
}

#[derive(Debug, Clone)]
struct Node {
    meta: TensorMeta,
    source: Source,
    tensor: Option<Tensor>,
}

#[derive(Debug, Clone)]
struct Wiring {
    inputs: Vec<Arg>,
    outputs: Vec<Handle>,
}

pub struct Session<'r> {
    id: Uuid,
    registry: &'r Registry,
    config: SessionConfig,
    state: SessionState,
    nodes: Vec<Node>,
    invocations: Vec<Invocation>,
    wiring: Vec<Wiring>,
    grads: GradStore,
}

impl Session<'static> {
    /// A session over the built-in operators.
    pub fn with_config(config: SessionConfig) -> Self {
        Session::new(Registry::global(), config)
    }
}

impl<'r> Session<'r> {
    pub fn new(registry: &'r Registry, config: SessionConfig) -> Self {
        Session {
            id: Uuid::new_v4(),
            registry,
            config,
            state: SessionState::Building,
            nodes: vec![],
            invocations: vec![],
            wiring: vec![],
            grads: GradStore::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ensure(&self, action: &str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(OpError::session(action, self.state))
        }
    }

    fn node(&self, handle: Handle) -> Result<&Node> {
        if handle.session != self.id {
            return Err(OpError::session(
                "use a handle issued by another session",
                self.state,
            ));
        }
        self.nodes
            .get(handle.index)
            .ok_or_else(|| OpError::session("use an unknown handle", self.state))
    }

    fn push(&mut self, meta: TensorMeta, source: Source, tensor: Option<Tensor>) -> Handle {
        self.nodes.push(Node {
            meta,
            source,
            tensor,
        });
        Handle {
            session: self.id,
            index: self.nodes.len() - 1,
        }
    }

    /// Adds an input value.
    ///
    /// The session keeps its own identity for the value, so feeding one
    /// tensor twice yields two handles with separate gradients.
    pub fn feed(&mut self, tensor: Tensor) -> Result<Handle> {
        self.ensure("feed a value", &[SessionState::Building])?;
        Ok(self.push(tensor.meta(), Source::Feed, Some(tensor.detached())))
    }

    /// Adds a named, trainable value. Names are unique within a session.
    pub fn parameter(&mut self, name: &str, tensor: Tensor) -> Result<Handle> {
        self.ensure("add a parameter", &[SessionState::Building])?;
        if self
            .nodes
            .iter()
            .any(|node| matches!(&node.source, Source::Parameter(existing) if existing == name))
        {
            return Err(OpError::attribute_type(
                "Session",
                "name",
                "a unique parameter name",
                name,
            ));
        }
        let tensor = tensor.detached().trainable();
        Ok(self.push(
            tensor.meta(),
            Source::Parameter(name.to_string()),
            Some(tensor),
        ))
    }

    fn input_metas(&self, inputs: &[Arg]) -> Result<Vec<ValueMeta>> {
        inputs
            .iter()
            .map(|arg| match arg {
                Arg::Tensor(handle) => Ok(ValueMeta::Tensor(self.node(*handle)?.meta.clone())),
                Arg::Tuple(handles) => Ok(ValueMeta::Tuple(
                    handles
                        .iter()
                        .map(|&handle| Ok(self.node(handle)?.meta.clone()))
                        .collect::<Result<_>>()?,
                )),
                Arg::Const(value) => Ok(ValueMeta::Const(value.clone())),
            })
            .collect()
    }

    /// Appends an operator application and returns handles to its outputs.
    ///
    /// Attributes, input kinds, dtypes and shapes are validated here; nothing
    /// runs until [`Session::run`].
    pub fn apply(&mut self, op: &str, inputs: &[Arg], attrs: &Attributes) -> Result<Vec<Handle>> {
        self.ensure(&format!("apply {}", op), &[SessionState::Building])?;
        let metas = self.input_metas(inputs)?;
        let invocation = Invocation::new(self.registry, op, attrs)?;
        let outputs = invocation.infer(self.registry, &metas)?;
        let step = self.invocations.len();
        let handles: Vec<Handle> = outputs
            .into_iter()
            .map(|meta| self.push(meta, Source::Output { step }, None))
            .collect();
        debug!("Session step {} applies {}", step, op);
        self.invocations.push(invocation);
        self.wiring.push(Wiring {
            inputs: inputs.to_vec(),
            outputs: handles.clone(),
        });
        Ok(handles)
    }

    /// [`Session::apply`] for single-output operators.
    pub fn apply1(&mut self, op: &str, inputs: &[Arg], attrs: &Attributes) -> Result<Handle> {
        let outputs = self.apply(op, inputs, attrs)?;
        outputs.into_iter().next().ok_or_else(|| OpError::ArityError {
            op: op.to_string(),
            expected: "at least 1 output".to_string(),
            actual: 0,
        })
    }

    /// Inferred shape and dtype of a value.
    pub fn meta(&self, handle: Handle) -> Result<&TensorMeta> {
        Ok(&self.node(handle)?.meta)
    }

    fn tensor(&self, handle: Handle) -> Result<Tensor> {
        self.node(handle)?
            .tensor
            .clone()
            .ok_or_else(|| OpError::session("read an output before run", self.state))
    }

    fn input_values(&self, step: usize) -> Result<Vec<Value>> {
        self.wiring[step]
            .inputs
            .iter()
            .map(|arg| match arg {
                Arg::Tensor(handle) => Ok(Value::Tensor(self.tensor(*handle)?)),
                Arg::Tuple(handles) => Ok(Value::Tuple(
                    handles
                        .iter()
                        .map(|&handle| self.tensor(handle))
                        .collect::<Result<_>>()?,
                )),
                Arg::Const(value) => Ok(Value::Const(value.clone())),
            })
            .collect()
    }

    /// Groups steps so each one only reads values produced by earlier levels.
    fn forward_levels(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0_usize; self.wiring.len()];
        for step in 0..self.wiring.len() {
            depth[step] = self.wiring[step]
                .inputs
                .iter()
                .flat_map(|arg| match arg {
                    Arg::Tensor(handle) => vec![*handle],
                    Arg::Tuple(handles) => handles.clone(),
                    Arg::Const(_) => vec![],
                })
                .filter_map(|handle| match self.nodes[handle.index].source {
                    Source::Output { step: producer } => Some(depth[producer] + 1),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
        }
        let mut levels: Vec<Vec<usize>> = vec![vec![]; depth.iter().max().map_or(0, |d| d + 1)];
        for (step, &level) in depth.iter().enumerate() {
            levels[level].push(step);
        }
        levels
    }

    fn execute_levels(&mut self) -> Result<()> {
        let levels = self.forward_levels();
        debug!(
            "Running {} steps in {} levels on {} workers",
            self.invocations.len(),
            levels.len(),
            self.config.workers
        );
        for level in levels {
            let records = {
                let session = &*self;
                parallel_map(&level, session.config.workers, |step| {
                    let inputs = session.input_values(step)?;
                    session.invocations[step].run(session.registry, &inputs)
                })?
            };
            for (&step, record) in level.iter().zip(records) {
                for (handle, output) in self.wiring[step].outputs.iter().zip(&record.outputs) {
                    if self.config.check_finite && !output.all_finite() {
                        warn!(
                            "{} (step {}) produced non-finite values",
                            self.invocations[step].name(),
                            step
                        );
                    }
                    self.nodes[handle.index].tensor = Some(output.clone());
                }
                self.invocations[step].store(record);
            }
        }
        Ok(())
    }

    fn clear_outputs(&mut self) {
        for invocation in self.invocations.iter_mut() {
            invocation.reset();
        }
        for node in self.nodes.iter_mut() {
            if let Source::Output { .. } = node.source {
                node.tensor = None;
            }
        }
    }

    /// Inference disagreeing with execution poisons the session.
    fn fail(&mut self, err: OpError) -> OpError {
        if let OpError::InternalInferenceMismatch { .. } = err {
            error!("Session failed: {}", err);
            self.state = SessionState::Failed;
        }
        err
    }

    /// Executes every step once. Independent steps share a level and run on
    /// the configured workers.
    pub fn run(&mut self) -> Result<()> {
        self.ensure("run", &[SessionState::Building])?;
        match self.execute_levels() {
            Ok(()) => {
                info!("Executed {} steps", self.invocations.len());
                self.state = SessionState::Executed;
                Ok(())
            }
            Err(err) => {
                self.clear_outputs();
                Err(self.fail(err))
            }
        }
    }

    /// Concrete value behind a handle. Outputs are available after `run`.
    pub fn value(&self, handle: Handle) -> Result<Tensor> {
        self.ensure(
            "read a value",
            &[
                SessionState::Building,
                SessionState::Executed,
                SessionState::Differentiated,
            ],
        )?;
        self.tensor(handle)
    }

    /// Differentiates `target`, seeded with `upstream` or ones shaped like the
    /// target. Differentiating again replaces the previous gradients.
    pub fn backward(&mut self, target: Handle, upstream: Option<Tensor>) -> Result<()> {
        self.ensure(
            "differentiate",
            &[SessionState::Executed, SessionState::Differentiated],
        )?;
        let target = self.tensor(target)?;
        let upstream = upstream.unwrap_or_else(|| Tensor::ones(target.dtype(), target.shape()));
        match backward_from(
            self.registry,
            &self.invocations,
            &target,
            &upstream,
            self.config.workers,
        ) {
            Ok(grads) => {
                if self.config.check_finite {
                    for (id, grad) in grads.iter() {
                        if !grad.all_finite() {
                            warn!("Gradient of {} holds non-finite values", id);
                        }
                    }
                }
                self.grads = grads;
                self.state = SessionState::Differentiated;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Sensitivity of the last differentiated target with respect to `handle`,
    /// or `None` when no path connects them.
    pub fn grad(&self, handle: Handle) -> Result<Option<Tensor>> {
        self.ensure("read a gradient", &[SessionState::Differentiated])?;
        let tensor = self.tensor(handle)?;
        Ok(self.grads.get(&tensor).cloned())
    }

    fn named_parameters(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.nodes.iter().filter_map(|node| match (&node.source, &node.tensor) {
            (Source::Parameter(name), Some(tensor)) => Some((name.as_str(), tensor)),
            _ => None,
        })
    }

    /// Snapshot of every parameter by name.
    pub fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.named_parameters()
            .map(|(name, tensor)| (name.to_string(), tensor.clone()))
            .collect()
    }

    /// Gradient of every parameter by name. Parameters the target does not
    /// depend on get zeros.
    pub fn parameter_grads(&self) -> Result<BTreeMap<String, Tensor>> {
        self.ensure("read parameter gradients", &[SessionState::Differentiated])?;
        Ok(self
            .named_parameters()
            .map(|(name, tensor)| {
                let grad = self
                    .grads
                    .get(tensor)
                    .cloned()
                    .unwrap_or_else(|| Tensor::zeros(tensor.dtype(), tensor.shape()));
                (name.to_string(), grad)
            })
            .collect())
    }
}
