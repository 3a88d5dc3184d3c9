//! In-process named services.
//!
//! A [`NamedService`] declares each operation's parameter types and return
//! type up front. Incoming string parameters are checked against that
//! declaration before the handler runs, and the handler's result is checked
//! against the declared return type before it is serialized.

use super::{Backend, BackendKind};
use async_trait::async_trait;
use futures::future::BoxFuture;
use num_bigint::BigUint;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use wsgate_core::{FunctionCall, GatewayError, GatewayResult};

/// Declared type of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Signed 64-bit integer.
    Int,
    /// Unbounded natural number.
    Nat,
    /// Finite 64-bit float.
    Float,
    Bool,
    Text,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::Int => "int",
            ParamType::Nat => "nat",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Text => "text",
        };
        f.write_str(s)
    }
}

/// A typed argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Nat(BigUint),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Arg {
    pub fn param_type(&self) -> ParamType {
        match self {
            Arg::Int(_) => ParamType::Int,
            Arg::Nat(_) => ParamType::Nat,
            Arg::Float(_) => ParamType::Float,
            Arg::Bool(_) => ParamType::Bool,
            Arg::Text(_) => ParamType::Text,
        }
    }

    /// Parse a wire parameter as `ty`.
    pub fn parse(raw: &str, ty: ParamType) -> GatewayResult<Self> {
        let mismatch = || GatewayError::Type(format!("'{raw}' is not a valid {ty}"));
        match ty {
            ParamType::Int => raw.trim().parse().map(Arg::Int).map_err(|_| mismatch()),
            ParamType::Nat => raw.trim().parse().map(Arg::Nat).map_err(|_| mismatch()),
            ParamType::Float => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Arg::Float(v)),
                _ => Err(mismatch()),
            },
            ParamType::Bool => raw.trim().parse().map(Arg::Bool).map_err(|_| mismatch()),
            ParamType::Text => Ok(Arg::Text(raw.to_string())),
        }
    }

    /// JSON form of a return value. Naturals are rendered as decimal strings
    /// so that no precision is lost.
    pub fn into_json(self) -> GatewayResult<Value> {
        Ok(match self {
            Arg::Int(v) => Value::from(v),
            Arg::Nat(v) => Value::String(v.to_string()),
            Arg::Float(v) => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| GatewayError::Invocation(format!("result {v} is not finite")))?,
            Arg::Bool(v) => Value::Bool(v),
            Arg::Text(v) => Value::String(v),
        })
    }
}

/// Arguments handed to an operation, already checked against its
/// declared parameter list.
#[derive(Debug, Clone)]
pub struct Args(Vec<Arg>);

impl Args {
    fn get(&self, index: usize) -> GatewayResult<&Arg> {
        self.0
            .get(index)
            .ok_or_else(|| GatewayError::Invocation(format!("missing argument {index}")))
    }

    fn wrong(index: usize, want: ParamType, got: &Arg) -> GatewayError {
        GatewayError::Invocation(format!(
            "argument {index} is {}, handler expected {want}",
            got.param_type()
        ))
    }

    pub fn int(&self, index: usize) -> GatewayResult<i64> {
        match self.get(index)? {
            Arg::Int(v) => Ok(*v),
            other => Err(Self::wrong(index, ParamType::Int, other)),
        }
    }

    pub fn nat(&self, index: usize) -> GatewayResult<&BigUint> {
        match self.get(index)? {
            Arg::Nat(v) => Ok(v),
            other => Err(Self::wrong(index, ParamType::Nat, other)),
        }
    }

    pub fn float(&self, index: usize) -> GatewayResult<f64> {
        match self.get(index)? {
            Arg::Float(v) => Ok(*v),
            other => Err(Self::wrong(index, ParamType::Float, other)),
        }
    }

    pub fn bool(&self, index: usize) -> GatewayResult<bool> {
        match self.get(index)? {
            Arg::Bool(v) => Ok(*v),
            other => Err(Self::wrong(index, ParamType::Bool, other)),
        }
    }

    pub fn text(&self, index: usize) -> GatewayResult<&str> {
        match self.get(index)? {
            Arg::Text(v) => Ok(v),
            other => Err(Self::wrong(index, ParamType::Text, other)),
        }
    }
}

type OperationFn = Arc<dyn Fn(Args) -> BoxFuture<'static, GatewayResult<Arg>> + Send + Sync>;

/// One declared operation.
#[derive(Clone)]
struct Operation {
    params: Vec<ParamType>,
    returns: ParamType,
    handler: OperationFn,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// An in-process service addressed by operation name.
#[derive(Debug, Clone)]
pub struct NamedService {
    name: String,
    operations: HashMap<String, Operation>,
}

impl NamedService {
    pub fn builder(name: impl Into<String>) -> NamedServiceBuilder {
        NamedServiceBuilder {
            service: NamedService {
                name: name.into(),
                operations: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke `operation` with raw wire parameters.
    pub async fn call(&self, operation: &str, raw: &[String]) -> GatewayResult<Value> {
        let op = self.operations.get(operation).ok_or_else(|| {
            GatewayError::Resolution(format!(
                "service '{}' has no operation '{operation}'",
                self.name
            ))
        })?;

        if raw.len() != op.params.len() {
            return Err(GatewayError::Argument(format!(
                "'{operation}' takes {} argument(s), got {}",
                op.params.len(),
                raw.len()
            )));
        }

        let args = raw
            .iter()
            .zip(&op.params)
            .enumerate()
            .map(|(i, (value, ty))| {
                Arg::parse(value, *ty).map_err(|e| {
                    GatewayError::Type(format!("argument {i} of '{operation}': {}", e.message()))
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        debug!(service = %self.name, operation, "invoking operation");
        let result = (op.handler)(Args(args)).await?;

        if result.param_type() != op.returns {
            return Err(GatewayError::Invocation(format!(
                "'{operation}' returned {} but declares {}",
                result.param_type(),
                op.returns
            )));
        }
        result.into_json()
    }
}

#[async_trait]
impl Backend for NamedService {
    fn kind(&self) -> BackendKind {
        BackendKind::NamedService
    }

    async fn invoke(&self, call_name: &str, call: &FunctionCall) -> GatewayResult<Value> {
        self.call(call_name, &call.parameters).await
    }
}

pub struct NamedServiceBuilder {
    service: NamedService,
}

impl NamedServiceBuilder {
    /// Declare an operation. Redeclaring a name replaces the earlier one.
    pub fn operation<F, Fut>(
        mut self,
        name: &str,
        params: &[ParamType],
        returns: ParamType,
        op: F,
    ) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Arg>> + Send + 'static,
    {
        let handler: OperationFn =
            Arc::new(move |args| -> BoxFuture<'static, GatewayResult<Arg>> { Box::pin(op(args)) });
        self.service.operations.insert(
            name.to_string(),
            Operation {
                params: params.to_vec(),
                returns,
                handler,
            },
        );
        self
    }

    pub fn build(self) -> NamedService {
        self.service
    }
}
