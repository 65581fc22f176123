//! Contract descriptors built once from an ABI
//!
//! Method lookup goes through a static map keyed by method name. Each entry
//! knows whether it reads or writes (from `stateMutability` alone) and how to
//! encode its inputs and decode its outputs.

pub mod codec;

use crate::error::{GatewayError, GatewayResult};

use ethers::abi::{Abi, Function, ParamType, StateMutability};
use ethers::types::{Address, Bytes};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Whether a method can run as a plain call or needs a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

impl From<StateMutability> for Access {
    fn from(mutability: StateMutability) -> Self {
        match mutability {
            StateMutability::View | StateMutability::Pure => Access::Read,
            StateMutability::NonPayable | StateMutability::Payable => Access::Write,
        }
    }
}

/// One callable ABI function with its classification
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    function: Function,
    access: Access,
}

impl MethodDescriptor {
    fn new(function: Function) -> Self {
        let access = Access::from(function.state_mutability);
        Self { function, access }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_payable(&self) -> bool {
        self.function.state_mutability == StateMutability::Payable
    }

    pub fn input_types(&self) -> Vec<ParamType> {
        self.function.inputs.iter().map(|p| p.kind.clone()).collect()
    }

    /// Canonical signature, e.g. `transfer(address,uint256)`
    pub fn signature(&self) -> String {
        self.function.signature()
    }

    /// Selector plus ABI-encoded arguments
    pub fn encode_call(&self, args: &[Value]) -> GatewayResult<Bytes> {
        let tokens = codec::tokenize_all(&self.input_types(), args)?;
        self.function
            .encode_input(&tokens)
            .map(Bytes::from)
            .map_err(|e| {
                GatewayError::Validation(format!(
                    "Failed to encode arguments for {}: {}",
                    self.signature(),
                    e
                ))
            })
    }

    /// Decode return data into JSON
    pub fn decode_output(&self, data: &[u8]) -> GatewayResult<Value> {
        if data.is_empty() && !self.function.outputs.is_empty() {
            return Err(GatewayError::ContractLogic {
                message: format!(
                    "{} returned no data; the address may not hold this contract",
                    self.signature()
                ),
            });
        }
        let tokens = self.function.decode_output(data).map_err(|e| {
            GatewayError::Internal(format!(
                "Failed to decode output of {}: {}",
                self.signature(),
                e
            ))
        })?;
        Ok(codec::detokenize_outputs(&tokens))
    }
}

/// A contract address together with its parsed ABI
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    address: Address,
    methods: HashMap<String, Vec<MethodDescriptor>>,
}

impl ContractDescriptor {
    pub fn new(address: Address, abi: &Abi) -> Self {
        let methods = abi
            .functions
            .iter()
            .map(|(name, overloads)| {
                let descriptors = overloads.iter().cloned().map(MethodDescriptor::new).collect();
                (name.clone(), descriptors)
            })
            .collect();

        Self { address, methods }
    }

    /// Parse the address and ABI JSON supplied by a caller
    pub fn from_json(address: &str, abi: &Value) -> GatewayResult<Self> {
        let address = codec::parse_address_str(address)?;
        let abi = parse_abi(abi)?;
        Ok(Self::new(address, &abi))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Names of all functions in the ABI
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a method by name, picking the overload that takes `arg_count` arguments
    pub fn lookup(&self, name: &str, arg_count: usize) -> GatewayResult<&MethodDescriptor> {
        let overloads = self
            .methods
            .get(name)
            .ok_or_else(|| {
                debug!("{} is not in the ABI; available: {:?}", name, self.method_names());
                GatewayError::MethodNotFound {
                    method: name.to_string(),
                }
            })?;

        overloads
            .iter()
            .find(|m| m.function.inputs.len() == arg_count)
            .ok_or_else(|| {
                let expected: Vec<String> = overloads
                    .iter()
                    .map(|m| m.function.inputs.len().to_string())
                    .collect();
                GatewayError::Validation(format!(
                    "Method '{}' takes {} argument(s), got {}",
                    name,
                    expected.join(" or "),
                    arg_count
                ))
            })
    }
}

/// Accepts a bare ABI array, a JSON string holding one, or a compiler
/// artifact with an `abi` field
pub fn parse_abi(abi: &Value) -> GatewayResult<Abi> {
    let entries = match abi {
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map_err(|e| GatewayError::Validation(format!("ABI is not valid JSON: {}", e)))?,
        Value::Object(artifact) => artifact
            .get("abi")
            .cloned()
            .ok_or_else(|| GatewayError::Validation("ABI object has no 'abi' field".to_string()))?,
        other => other.clone(),
    };

    if !entries.is_array() {
        return Err(GatewayError::Validation(
            "ABI must be a JSON array".to_string(),
        ));
    }

    serde_json::from_value(entries)
        .map_err(|e| GatewayError::Validation(format!("Invalid ABI: {}", e)))
}

/// Creation code with ABI-encoded constructor arguments appended
pub fn deployment_code(abi: &Abi, bytecode: Vec<u8>, args: &[Value]) -> GatewayResult<Bytes> {
    match &abi.constructor {
        Some(constructor) => {
            let kinds: Vec<ParamType> = constructor.inputs.iter().map(|p| p.kind.clone()).collect();
            let tokens = codec::tokenize_all(&kinds, args)?;
            constructor
                .encode_input(bytecode, &tokens)
                .map(Bytes::from)
                .map_err(|e| {
                    GatewayError::Validation(format!("Failed to encode constructor arguments: {}", e))
                })
        }
        None if args.is_empty() => Ok(Bytes::from(bytecode)),
        None => Err(GatewayError::Validation(format!(
            "ABI declares no constructor but {} argument(s) were supplied",
            args.len()
        ))),
    }
}
