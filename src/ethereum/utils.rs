use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::json_abi::Param;
use alloy::primitives::{Address, U256};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(Error::encoding("Address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(Error::encoding(format!(
            "Invalid address format: '{}'. Ethereum addresses must start with '0x'",
            address
        )));
    }

    if address.len() != 42 {
        return Err(Error::encoding(format!(
            "Invalid address length: '{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        )));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::encoding(format!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        )));
    }

    Address::from_str(address)
        .map_err(|e| Error::encoding(format!("Invalid Ethereum address: '{}'. Error: {}", address, e)))
}

/// Validates network name
pub fn validate_network(network: &str, available_networks: &[String]) -> Result<()> {
    if network.is_empty() {
        return Err(Error::encoding("Network name cannot be empty"));
    }

    if !available_networks.iter().any(|name| name == network) {
        return Err(Error::encoding(format!(
            "Unknown network: '{}'. Available networks: {}",
            network,
            available_networks.join(", ")
        )));
    }

    Ok(())
}

/// Parses a wei amount given in decimal or `0x`-prefixed hex
pub fn validate_hex_value(value_str: &str) -> Result<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(Error::encoding("Value cannot be empty"));
    }

    if value_str.starts_with("0x") || value_str.starts_with("0X") {
        U256::from_str_radix(&value_str[2..], 16)
            .map_err(|_| Error::encoding(format!("Invalid hexadecimal value: '{}'", value_str)))
    } else {
        U256::from_str(value_str).map_err(|_| {
            Error::encoding(format!(
                "Invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                value_str
            ))
        })
    }
}

/// Parses a block number given in decimal or `0x`-prefixed hex
pub fn parse_block_number(block: &str) -> Result<u64> {
    let block = block.trim();
    let parsed = match block.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => block.parse(),
    };

    parsed.map_err(|_| Error::encoding(format!("Invalid block number: '{}'", block)))
}

/// Convert a JSON argument into a value of the given Solidity type.
///
/// Scalars go through the ABI's own string coercion, so numbers may be given
/// as JSON numbers, decimal strings or hex strings. Arrays and tuples are
/// JSON arrays.
pub fn json_to_dyn_sol_value(value: &Value, ty: &DynSolType) -> Result<DynSolValue> {
    match (ty, value) {
        (DynSolType::Array(inner), Value::Array(items)) => items
            .iter()
            .map(|item| json_to_dyn_sol_value(item, inner))
            .collect::<Result<Vec<_>>>()
            .map(DynSolValue::Array),
        (DynSolType::FixedArray(inner, len), Value::Array(items)) => {
            if items.len() != *len {
                return Err(Error::encoding(format!(
                    "Expected {} elements for type '{}', got {}",
                    len,
                    ty,
                    items.len()
                )));
            }
            items
                .iter()
                .map(|item| json_to_dyn_sol_value(item, inner))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::FixedArray)
        }
        (DynSolType::Tuple(types), Value::Array(items)) => {
            if items.len() != types.len() {
                return Err(Error::encoding(format!(
                    "Expected {} tuple components for type '{}', got {}",
                    types.len(),
                    ty,
                    items.len()
                )));
            }
            types
                .iter()
                .zip(items)
                .map(|(ty, item)| json_to_dyn_sol_value(item, ty))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::Tuple)
        }
        (_, Value::String(s)) => coerce(ty, s),
        (_, Value::Number(n)) => coerce(ty, &n.to_string()),
        (_, Value::Bool(b)) => coerce(ty, if *b { "true" } else { "false" }),
        _ => Err(Error::encoding(format!(
            "Cannot convert {} to Solidity type '{}'",
            value, ty
        ))),
    }
}

fn coerce(ty: &DynSolType, s: &str) -> Result<DynSolValue> {
    ty.coerce_str(s)
        .map_err(|e| Error::encoding(format!("Invalid value '{}' for type '{}': {}", s, ty, e)))
}

/// Convert JSON call parameters to values for `inputs`.
///
/// Parameters are a positional array, or an object keyed by parameter name.
pub fn json_to_args(inputs: &[Param], parameters: &Value) -> Result<Vec<DynSolValue>> {
    let expected = || {
        inputs
            .iter()
            .map(|input| format!("{} {}", input.ty, input.name))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let ordered: Vec<&Value> = match parameters {
        Value::Array(params) => {
            if params.len() != inputs.len() {
                return Err(Error::encoding(format!(
                    "Parameter count mismatch: expected {} parameters, got {}. Expected parameters: [{}]",
                    inputs.len(),
                    params.len(),
                    expected()
                )));
            }
            params.iter().collect()
        }
        Value::Object(obj) => inputs
            .iter()
            .map(|input| {
                obj.get(&input.name).ok_or_else(|| {
                    Error::encoding(format!(
                        "Missing required parameter '{}' of type '{}'. Expected parameters: [{}]",
                        input.name,
                        input.ty,
                        expected()
                    ))
                })
            })
            .collect::<Result<_>>()?,
        Value::Null if inputs.is_empty() => Vec::new(),
        other => {
            return Err(Error::encoding(format!(
                "Parameters must be a JSON array or object, got {}",
                other
            )))
        }
    };

    inputs
        .iter()
        .zip(ordered)
        .enumerate()
        .map(|(i, (input, value))| {
            let ty = input.resolve().map_err(|e| {
                Error::encoding(format!("Cannot resolve type '{}': {}", input.ty, e))
            })?;
            json_to_dyn_sol_value(value, &ty).map_err(|e| {
                Error::encoding(format!(
                    "Invalid parameter #{} ('{}' of type '{}'): {}",
                    i + 1,
                    input.name,
                    input.ty,
                    e
                ))
            })
        })
        .collect()
}

/// Convert a decoded value to JSON. Integers become decimal strings, byte
/// strings and addresses become 0x-prefixed hex.
pub fn dyn_sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Uint(num, _) => Value::String(num.to_string()),
        DynSolValue::Int(num, _) => Value::String(num.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(dyn_sol_value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

/// A single return value as itself, several as an array
pub fn dyn_sol_values_to_json(values: &[DynSolValue]) -> Value {
    match values {
        [single] => dyn_sol_value_to_json(single),
        many => Value::Array(many.iter().map(dyn_sol_value_to_json).collect()),
    }
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("execution reverted") {
        format!(
            "Execution reverted: the contract rejected the call. {}",
            error
        )
    } else if error.contains("insufficient funds") {
        "Transaction failed: Insufficient funds to cover gas costs. Make sure your account has enough ETH for gas fees.".to_string()
    } else if error.contains("gas required exceeds allowance") {
        "Transaction failed: Gas limit too low. Try increasing the gas limit for this transaction."
            .to_string()
    } else if error.contains("nonce too low") {
        "Transaction failed: Nonce too low. This usually means another transaction was already mined with this nonce.".to_string()
    } else if error.contains("replacement transaction underpriced") {
        "Transaction failed: Gas price too low to replace pending transaction. Increase the gas price.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Network error: Cannot connect to RPC endpoint. Check your internet connection and RPC URL configuration.".to_string()
    } else if error.contains("timeout") || error.contains("timed out") {
        "Network error: Request timed out. The RPC endpoint may be overloaded or unreachable."
            .to_string()
    } else if error.contains("rate limit") {
        "Rate limit error: Too many requests to the RPC endpoint. Try again in a few moments or use a different endpoint.".to_string()
    } else if error.contains("method not found") {
        "RPC error: The requested method is not supported by this RPC endpoint. Try using a different endpoint.".to_string()
    } else if error.contains("filter not found") {
        "RPC error: The node dropped the log filter. Re-subscribe to continue watching.".to_string()
    } else {
        format!("RPC error: {}", error)
    }
}
