//! Revert data decoding

use std::fmt;

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::JsonAbi;
use alloy::primitives::U256;
use alloy::sol_types::{Panic, Revert, SolError};

/// Why an execution reverted, as far as the ABI can tell
#[derive(Debug, Clone, PartialEq)]
pub enum RevertReason {
    /// One of the contract's declared custom errors
    Custom {
        name: String,
        args: Vec<(String, DynSolValue)>,
    },
    /// `require(..., "message")` / `revert("message")`
    Message(String),
    /// Compiler-inserted panic, e.g. 0x11 for arithmetic overflow
    Panic(U256),
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::Custom { name, args } => {
                write!(f, "{}(", name)?;
                for (i, (arg, value)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:?}", arg, value)?;
                }
                write!(f, ")")
            }
            RevertReason::Message(msg) => write!(f, "reverted: {}", msg),
            RevertReason::Panic(code) => write!(f, "panic: 0x{:x}", code),
        }
    }
}

/// Match the revert selector against the ABI's custom errors
pub fn decode_custom_error(abi: &JsonAbi, data: &[u8]) -> Option<RevertReason> {
    if data.len() < 4 {
        return None;
    }

    let (selector, payload) = data.split_at(4);
    let error = abi
        .errors()
        .find(|error| error.selector().as_slice() == selector)?;
    let values = error.abi_decode_input(payload, true).ok()?;

    let args = error
        .inputs
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (param, value))| {
            let name = if param.name.is_empty() {
                i.to_string()
            } else {
                param.name.clone()
            };
            (name, value)
        })
        .collect();

    Some(RevertReason::Custom {
        name: error.name.clone(),
        args,
    })
}

/// Decode the compiler's builtin `Error(string)` and `Panic(uint256)` payloads
pub fn decode_builtin(data: &[u8]) -> Option<RevertReason> {
    if let Ok(revert) = Revert::abi_decode(data, true) {
        return Some(RevertReason::Message(revert.reason));
    }

    Panic::abi_decode(data, true)
        .ok()
        .map(|panic| RevertReason::Panic(panic.code))
}

/// Custom errors first, then the builtins
pub fn decode_revert(abi: &JsonAbi, data: &[u8]) -> Option<RevertReason> {
    decode_custom_error(abi, data).or_else(|| decode_builtin(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::abi::parse_abi;
    use alloy::primitives::Address;

    alloy::sol! {
        error Unauthorized(address caller);
    }

    const GUARDED_ABI: &str = r#"[
        {"type":"error","name":"Unauthorized","inputs":[{"name":"caller","type":"address","internalType":"address"}]},
        {"type":"error","name":"Paused","inputs":[]}
    ]"#;

    #[test]
    fn test_decode_custom_error() {
        let abi = parse_abi(GUARDED_ABI).unwrap();
        let caller = Address::repeat_byte(0x07);
        let data = Unauthorized { caller }.abi_encode();

        let reason = decode_revert(&abi, &data).unwrap();
        assert_eq!(
            reason,
            RevertReason::Custom {
                name: "Unauthorized".to_string(),
                args: vec![("caller".to_string(), DynSolValue::Address(caller))],
            }
        );
        assert!(reason.to_string().starts_with("Unauthorized(caller: "));
    }

    #[test]
    fn test_decode_builtin_reasons() {
        let abi = parse_abi(GUARDED_ABI).unwrap();

        let message = Revert {
            reason: "insufficient allowance".to_string(),
        }
        .abi_encode();
        assert_eq!(
            decode_revert(&abi, &message),
            Some(RevertReason::Message("insufficient allowance".to_string()))
        );

        let panic = Panic {
            code: U256::from(0x11),
        }
        .abi_encode();
        let reason = decode_revert(&abi, &panic).unwrap();
        assert_eq!(reason, RevertReason::Panic(U256::from(0x11)));
        assert_eq!(reason.to_string(), "panic: 0x11");
    }

    #[test]
    fn test_unknown_selector() {
        let abi = parse_abi(GUARDED_ABI).unwrap();
        assert!(decode_revert(&abi, &[0xde, 0xad, 0xbe, 0xef]).is_none());
        assert!(decode_revert(&abi, &[]).is_none());
    }
}
