use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy::json_abi::{Function, JsonAbi, StateMutability};
use alloy::primitives::{Address, Bytes};
use alloy::sol_types::{SolCall, SolEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::abi::parse_abi;
use super::backend::Backend;
use super::events::{self, EventStream, FilterCriteria};
use super::iterator::LogIterator;
use super::revert::{self, RevertReason};
use super::subscription::LogSubscription;
use super::{
    utils, CallOptions, FilterOptions, LogRecord, TransactOptions, TxHandle, TypedEvent,
    WatchOptions,
};
use crate::error::{BackendError, Error, Result};

/// Client binding for one deployed contract.
///
/// Every operation is driven by the ABI the binding was built with: method
/// arguments are checked and encoded against it, results and logs are decoded
/// with it. The binding holds no mutable state, so clones and concurrent
/// calls share the same ABI and backend.
#[derive(Clone)]
pub struct ContractBinding {
    address: Address,
    abi: Arc<JsonAbi>,
    backend: Arc<dyn Backend>,
    events: EventStream,
}

impl std::fmt::Debug for ContractBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractBinding")
            .field("address", &self.address)
            .field("functions", &self.abi.functions().count())
            .field("events", &self.abi.events().count())
            .finish_non_exhaustive()
    }
}

impl ContractBinding {
    pub fn new(address: Address, abi: JsonAbi, backend: Arc<dyn Backend>) -> Self {
        Self::with_shared_abi(address, Arc::new(abi), backend)
    }

    /// Bind with an ABI already shared elsewhere, e.g. from an [`AbiRegistry`](super::abi::AbiRegistry)
    pub fn with_shared_abi(address: Address, abi: Arc<JsonAbi>, backend: Arc<dyn Backend>) -> Self {
        let events = EventStream::new(address, abi.clone(), backend.clone());
        Self {
            address,
            abi,
            backend,
            events,
        }
    }

    /// Bind using ABI JSON (a bare array or a compiler artifact)
    pub fn from_json(address: Address, abi_json: &str, backend: Arc<dyn Backend>) -> Result<Self> {
        Ok(Self::new(address, parse_abi(abi_json)?, backend))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    /// Resolve `method` for `args`.
    ///
    /// `method` is a plain name or a full signature such as
    /// `transfer(address,uint256)`. Overloads sharing a name are told apart by
    /// argument count and types.
    pub fn function(&self, method: &str, args: &[DynSolValue]) -> Result<&Function> {
        let function = if method.contains('(') {
            self.abi
                .functions()
                .find(|function| function.signature() == method)
                .ok_or_else(|| self.unknown_method(method))?
        } else {
            let overloads = self
                .abi
                .function(method)
                .filter(|overloads| !overloads.is_empty())
                .ok_or_else(|| self.unknown_method(method))?;

            match overloads.as_slice() {
                [only] => only,
                _ => {
                    let matching: Vec<&Function> = overloads
                        .iter()
                        .filter(|function| check_args(function, args).is_ok())
                        .collect();
                    match matching.as_slice() {
                        [function] => *function,
                        _ => {
                            let signatures: Vec<String> =
                                overloads.iter().map(Function::signature).collect();
                            return Err(Error::encoding(format!(
                                "{} overloads of '{}' accept the given arguments, use a full signature: {}",
                                if matching.is_empty() { "No" } else { "Several" },
                                method,
                                signatures.join(", ")
                            )));
                        }
                    }
                }
            }
        };

        check_args(function, args)?;
        Ok(function)
    }

    fn unknown_method(&self, method: &str) -> Error {
        let available: Vec<String> = self.abi.functions().map(|f| f.name.clone()).collect();

        if available.is_empty() {
            Error::encoding(format!(
                "Function '{}' not found. The contract ABI contains no functions.",
                method
            ))
        } else {
            Error::encoding(format!(
                "Function '{}' not found in contract ABI. Available functions: {}",
                method,
                available.join(", ")
            ))
        }
    }

    /// Convert JSON parameters for `method`, picking the overload they fit.
    ///
    /// Returns the full signature of the chosen function alongside the values,
    /// ready to be passed to [`call`](Self::call) or [`transact`](Self::transact).
    pub fn json_args(&self, method: &str, parameters: &Value) -> Result<(String, Vec<DynSolValue>)> {
        let candidates: Vec<&Function> = if method.contains('(') {
            self.abi
                .functions()
                .filter(|function| function.signature() == method)
                .collect()
        } else {
            self.abi
                .function(method)
                .map(|overloads| overloads.iter().collect())
                .unwrap_or_default()
        };

        if candidates.is_empty() {
            return Err(self.unknown_method(method));
        }

        let mut converted = Vec::new();
        let mut last_err = None;
        for function in candidates {
            match utils::json_to_args(&function.inputs, parameters) {
                Ok(values) => converted.push((function.signature(), values)),
                Err(e) => last_err = Some(e),
            }
        }

        match converted.len() {
            1 => Ok(converted.remove(0)),
            0 => Err(last_err.unwrap_or_else(|| self.unknown_method(method))),
            _ => {
                let signatures: Vec<String> = converted.into_iter().map(|(sig, _)| sig).collect();
                Err(Error::encoding(format!(
                    "Parameters fit several overloads of '{}', use a full signature: {}",
                    method,
                    signatures.join(", ")
                )))
            }
        }
    }

    /// Invoke a `view` or `pure` method and decode its outputs
    pub async fn call(
        &self,
        opts: &CallOptions,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let function = self.function(method, args)?;
        if !matches!(
            function.state_mutability,
            StateMutability::View | StateMutability::Pure
        ) {
            return Err(Error::encoding(format!(
                "Function '{}' is {} and changes state; use transact or simulate",
                function.signature(),
                mutability_name(function.state_mutability)
            )));
        }

        self.execute(opts, function, args).await
    }

    /// Execute any method, state-changing ones included, as an eth_call.
    /// Nothing is submitted; the outputs show what a transaction would return.
    pub async fn simulate(
        &self,
        opts: &CallOptions,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let function = self.function(method, args)?;
        self.execute(opts, function, args).await
    }

    async fn execute(
        &self,
        opts: &CallOptions,
        function: &Function,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let input = encode_input(function, args)?;
        debug!(
            "Calling {} on {:?} ({} bytes of calldata)",
            function.signature(),
            self.address,
            input.len()
        );

        let output = self.raw_call(opts, input).await?;
        decode_output(function, &output)
    }

    /// Submit a transaction invoking `method`
    pub async fn transact(
        &self,
        opts: &TransactOptions,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<TxHandle> {
        let function = self.function(method, args)?;
        check_value(function, opts)?;
        let input = encode_input(function, args)?;

        let tx = self.submit(opts, input).await?;
        info!(
            "Submitted {} to {:?}: {:?}",
            function.signature(),
            self.address,
            tx.hash
        );
        Ok(tx)
    }

    /// eth_call with caller-built calldata
    pub async fn raw_call(&self, opts: &CallOptions, calldata: Bytes) -> Result<Bytes> {
        let call = self.backend.call(self.address, calldata, opts);
        with_timeout(opts.timeout, "Call", call).await
    }

    /// Transaction with caller-built calldata
    pub async fn raw_transact(&self, opts: &TransactOptions, calldata: Bytes) -> Result<TxHandle> {
        let tx = self.submit(opts, calldata).await?;
        info!("Submitted raw transaction to {:?}: {:?}", self.address, tx.hash);
        Ok(tx)
    }

    async fn submit(&self, opts: &TransactOptions, input: Bytes) -> Result<TxHandle> {
        let tx = self.backend.transact(Some(self.address), input, opts);
        with_timeout(opts.timeout, "Transaction", tx).await
    }

    /// Plain value transfer with empty calldata, which reaches the contract's
    /// `receive` function or its payable `fallback`
    pub async fn transfer(&self, opts: &TransactOptions) -> Result<TxHandle> {
        let payable_fallback = self
            .abi
            .fallback
            .as_ref()
            .is_some_and(|fallback| fallback.state_mutability == StateMutability::Payable);

        if self.abi.receive.is_none() && !payable_fallback {
            return Err(Error::encoding(
                "Contract declares neither a receive function nor a payable fallback",
            ));
        }

        let tx = self.submit(opts, Bytes::new()).await?;
        info!("Submitted plain transfer to {:?}: {:?}", self.address, tx.hash);
        Ok(tx)
    }

    fn declared(&self, selector: [u8; 4], signature: &str) -> Result<&Function> {
        self.abi
            .functions()
            .find(|function| function.selector().0 == selector)
            .ok_or_else(|| {
                Error::encoding(format!(
                    "Function {} is not declared by the bound ABI",
                    signature
                ))
            })
    }

    /// Statically typed call through a `sol!`-generated call type
    pub async fn call_typed<C: SolCall>(&self, opts: &CallOptions, call: &C) -> Result<C::Return> {
        let function = self.declared(C::SELECTOR, C::SIGNATURE)?;
        let output = self.raw_call(opts, call.abi_encode().into()).await?;

        if output.is_empty() && !function.outputs.is_empty() {
            return Err(no_output(function));
        }

        C::abi_decode_returns(&output, true).map_err(|e| {
            Error::decoding(format!("Failed to decode output of {}: {}", C::SIGNATURE, e))
        })
    }

    /// Statically typed transaction through a `sol!`-generated call type
    pub async fn transact_typed<C: SolCall>(
        &self,
        opts: &TransactOptions,
        call: &C,
    ) -> Result<TxHandle> {
        let function = self.declared(C::SELECTOR, C::SIGNATURE)?;
        check_value(function, opts)?;

        let tx = self.submit(opts, call.abi_encode().into()).await?;
        info!("Submitted {} to {:?}: {:?}", C::SIGNATURE, self.address, tx.hash);
        Ok(tx)
    }

    /// Name the revert carried by `err` using this contract's custom errors
    pub fn decode_revert(&self, err: &Error) -> Option<RevertReason> {
        revert::decode_revert(&self.abi, err.revert_data()?)
    }

    pub async fn filter_logs(
        &self,
        opts: FilterOptions,
        criteria: &FilterCriteria,
    ) -> Result<LogIterator> {
        self.events.filter_logs(opts, criteria).await
    }

    pub async fn watch_logs(
        &self,
        opts: WatchOptions,
        criteria: &FilterCriteria,
        sink: mpsc::Sender<TypedEvent>,
    ) -> Result<LogSubscription> {
        self.events.watch_logs(opts, criteria, sink).await
    }

    pub fn parse_log(&self, event: &str, record: &LogRecord) -> Result<TypedEvent> {
        self.events.parse_log(event, record)
    }

    /// Decode `record` into a `sol!`-generated event declared by this ABI
    pub fn parse_log_as<E: SolEvent>(&self, record: &LogRecord) -> Result<E> {
        if !self.abi.events().any(|event| event.selector() == E::SIGNATURE_HASH) {
            return Err(Error::decoding(format!(
                "Event {} is not declared by the bound ABI",
                E::SIGNATURE
            )));
        }
        events::decode_log_as(record)
    }

    /// Read-only session with pre-set call options
    pub fn caller(&self, opts: CallOptions) -> CallerSession {
        CallerSession {
            binding: self.clone(),
            opts,
        }
    }

    /// Write session with pre-set transaction options
    pub fn transactor(&self, opts: TransactOptions) -> TransactorSession {
        TransactorSession {
            binding: self.clone(),
            opts,
        }
    }
}

/// A binding paired with the call options every call should use
#[derive(Debug, Clone)]
pub struct CallerSession {
    binding: ContractBinding,
    opts: CallOptions,
}

impl CallerSession {
    pub fn options(&self) -> &CallOptions {
        &self.opts
    }

    pub async fn call(&self, method: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        self.binding.call(&self.opts, method, args).await
    }

    pub async fn call_typed<C: SolCall>(&self, call: &C) -> Result<C::Return> {
        self.binding.call_typed(&self.opts, call).await
    }

    pub async fn simulate(&self, method: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        self.binding.simulate(&self.opts, method, args).await
    }
}

/// A binding paired with the transaction options every submission should use
#[derive(Debug, Clone)]
pub struct TransactorSession {
    binding: ContractBinding,
    opts: TransactOptions,
}

impl TransactorSession {
    pub fn options(&self) -> &TransactOptions {
        &self.opts
    }

    pub async fn transact(&self, method: &str, args: &[DynSolValue]) -> Result<TxHandle> {
        self.binding.transact(&self.opts, method, args).await
    }

    pub async fn transact_typed<C: SolCall>(&self, call: &C) -> Result<TxHandle> {
        self.binding.transact_typed(&self.opts, call).await
    }

    pub async fn raw_transact(&self, calldata: Bytes) -> Result<TxHandle> {
        self.binding.raw_transact(&self.opts, calldata).await
    }

    pub async fn transfer(&self) -> Result<TxHandle> {
        self.binding.transfer(&self.opts).await
    }
}

fn mutability_name(mutability: StateMutability) -> &'static str {
    match mutability {
        StateMutability::Pure => "pure",
        StateMutability::View => "view",
        StateMutability::NonPayable => "nonpayable",
        StateMutability::Payable => "payable",
    }
}

/// Check `args` against the declared inputs of `function`
fn check_args(function: &Function, args: &[DynSolValue]) -> Result<()> {
    if args.len() != function.inputs.len() {
        let expected: Vec<String> = function
            .inputs
            .iter()
            .map(|input| format!("{} {}", input.ty, input.name))
            .collect();
        return Err(Error::encoding(format!(
            "Parameter count mismatch for function '{}': expected {} parameters, got {}. Expected parameters: [{}]",
            function.name,
            function.inputs.len(),
            args.len(),
            expected.join(", ")
        )));
    }

    for (i, (input, arg)) in function.inputs.iter().zip(args).enumerate() {
        let ty = input.resolve().map_err(|e| {
            Error::encoding(format!("Cannot resolve type '{}': {}", input.ty, e))
        })?;
        if !ty.matches(arg) {
            return Err(Error::encoding(format!(
                "Invalid parameter #{} ('{}' of type '{}') for function '{}': got {:?}",
                i + 1,
                input.name,
                input.ty,
                function.name,
                arg
            )));
        }
    }

    Ok(())
}

fn check_value(function: &Function, opts: &TransactOptions) -> Result<()> {
    if opts.sends_value() && function.state_mutability != StateMutability::Payable {
        return Err(Error::encoding(format!(
            "Function '{}' is not payable but the transaction sends value",
            function.signature()
        )));
    }
    Ok(())
}

fn encode_input(function: &Function, args: &[DynSolValue]) -> Result<Bytes> {
    function
        .abi_encode_input(args)
        .map(Bytes::from)
        .map_err(|e| {
            Error::encoding(format!(
                "Failed to encode inputs of {}: {}",
                function.signature(),
                e
            ))
        })
}

fn decode_output(function: &Function, output: &[u8]) -> Result<Vec<DynSolValue>> {
    if output.is_empty() && !function.outputs.is_empty() {
        return Err(no_output(function));
    }

    function.abi_decode_output(output, true).map_err(|e| {
        Error::decoding(format!(
            "Failed to decode output of {}: {}",
            function.signature(),
            e
        ))
    })
}

fn no_output(function: &Function) -> Error {
    Error::decoding(format!(
        "Empty return data for {}; there may be no contract code at the given address",
        function.signature()
    ))
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    what: &str,
    request: impl Future<Output = std::result::Result<T, BackendError>>,
) -> Result<T> {
    let outcome = match limit {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| BackendError::new(format!("{} timed out after {:?}", what, limit)))?,
        None => request.await,
    };

    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::testing::{
        balanceOfCall, mintCall, nameCall, transferCall, InsufficientAllowance, MockBackend,
        ERC20_ABI, TOKEN,
    };
    use alloy::primitives::{B256, U256};
    use alloy::sol_types::{Revert, SolError, SolValue};

    fn setup() -> (Arc<MockBackend>, ContractBinding) {
        let backend = Arc::new(MockBackend::new());
        let binding = ContractBinding::from_json(TOKEN, ERC20_ABI, backend.clone()).unwrap();
        (backend, binding)
    }

    fn addr(value: Address) -> DynSolValue {
        DynSolValue::Address(value)
    }

    fn uint(value: u64) -> DynSolValue {
        DynSolValue::Uint(U256::from(value), 256)
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (backend, binding) = setup();
        let owner = Address::repeat_byte(0x42);
        backend.push_call_response(Ok(U256::from(1_000u64).abi_encode().into()));

        let opts = CallOptions::at_block(17).from(owner);
        let out = binding.call(&opts, "balanceOf", &[addr(owner)]).await.unwrap();
        assert_eq!(out, vec![uint(1_000)]);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let (to, input, sent_opts) = &calls[0];
        assert_eq!(*to, TOKEN);
        assert_eq!(input.as_ref(), balanceOfCall { owner }.abi_encode().as_slice());
        assert_eq!(sent_opts.from, Some(owner));
        assert_eq!(sent_opts.block_id(), opts.block_id());
    }

    alloy::sol! {
        struct Meta {
            uint256 version;
            string label;
        }

        function snapshot() external view returns (address owner, bytes32 root, bytes blob, uint8[] levels, Meta meta);
    }

    const REGISTRY_ABI: &str = r#"[
        {"type":"function","name":"snapshot","stateMutability":"view","inputs":[],
         "outputs":[
            {"name":"owner","type":"address","internalType":"address"},
            {"name":"root","type":"bytes32","internalType":"bytes32"},
            {"name":"blob","type":"bytes","internalType":"bytes"},
            {"name":"levels","type":"uint8[]","internalType":"uint8[]"},
            {"name":"meta","type":"tuple","internalType":"struct Meta","components":[
                {"name":"version","type":"uint256","internalType":"uint256"},
                {"name":"label","type":"string","internalType":"string"}]}]}
    ]"#;

    #[tokio::test]
    async fn test_call_decodes_composite_outputs() {
        let backend = Arc::new(MockBackend::new());
        let binding = ContractBinding::from_json(TOKEN, REGISTRY_ABI, backend.clone()).unwrap();

        let owner = Address::repeat_byte(0x42);
        let root = B256::repeat_byte(0x99);
        let blob = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x01]);
        let levels: Vec<u8> = vec![1, 2, 255];
        let meta = Meta {
            version: U256::from(3),
            label: "genesis".to_string(),
        };
        let encoded = (owner, root, blob.clone(), levels, meta).abi_encode_params();
        backend.push_call_response(Ok(encoded.into()));

        let out = binding
            .call(&CallOptions::default(), "snapshot", &[])
            .await
            .unwrap();

        assert_eq!(
            out,
            vec![
                DynSolValue::Address(owner),
                DynSolValue::FixedBytes(root, 32),
                DynSolValue::Bytes(blob.to_vec()),
                DynSolValue::Array(vec![
                    DynSolValue::Uint(U256::from(1), 8),
                    DynSolValue::Uint(U256::from(2), 8),
                    DynSolValue::Uint(U256::from(255), 8),
                ]),
                DynSolValue::Tuple(vec![
                    uint(3),
                    DynSolValue::String("genesis".to_string()),
                ]),
            ]
        );
        assert_eq!(
            backend.calls()[0].1.as_ref(),
            snapshotCall {}.abi_encode().as_slice()
        );
    }

    #[tokio::test]
    async fn test_call_typed() {
        let (backend, binding) = setup();
        backend.push_call_response(Ok("Token".to_string().abi_encode().into()));

        let name = binding.call_typed(&CallOptions::default(), &nameCall {}).await.unwrap();
        assert_eq!(name._0, "Token");

        let mint = mintCall {
            to: Address::ZERO,
            amount: U256::from(1),
        };
        let err = binding
            .transact_typed(&TransactOptions::default(), &mint)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        assert!(backend.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_transact_encodes_call() {
        let (backend, binding) = setup();
        let to = Address::repeat_byte(0xbb);
        let from = Address::repeat_byte(0xcc);
        let opts = TransactOptions {
            from: Some(from),
            ..Default::default()
        };

        let tx = binding
            .transact(&opts, "transfer", &[addr(to), uint(5)])
            .await
            .unwrap();
        assert_eq!(tx.to, Some(TOKEN));
        assert_eq!(tx.from, Some(from));

        let expected = transferCall {
            to,
            value: U256::from(5),
        }
        .abi_encode();
        let sent = backend.transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.as_ref(), expected.as_slice());
        assert_eq!(tx.input, sent[0].1);

        let typed = binding
            .transact_typed(&opts, &transferCall { to, value: U256::from(5) })
            .await
            .unwrap();
        assert_eq!(typed.input, tx.input);
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let (backend, binding) = setup();
        let to = Address::repeat_byte(0xbb);

        let unknown = binding
            .transact(&TransactOptions::default(), "burn", &[uint(1)])
            .await
            .unwrap_err();
        assert!(matches!(unknown, Error::Encoding(msg) if msg.contains("Available functions")));

        let arity = binding
            .transact(&TransactOptions::default(), "transfer", &[addr(to)])
            .await
            .unwrap_err();
        assert!(matches!(arity, Error::Encoding(msg) if msg.contains("expected 2 parameters")));

        let wrong_type = binding
            .call(&CallOptions::default(), "balanceOf", &[DynSolValue::Bool(true)])
            .await
            .unwrap_err();
        assert!(matches!(wrong_type, Error::Encoding(_)));

        let paid = TransactOptions::default().with_value(U256::from(1));
        let not_payable = binding
            .transact(&paid, "transfer", &[addr(to), uint(1)])
            .await
            .unwrap_err();
        assert!(matches!(not_payable, Error::Encoding(msg) if msg.contains("not payable")));

        let mutating = binding
            .call(&CallOptions::default(), "transfer", &[addr(to), uint(1)])
            .await
            .unwrap_err();
        assert!(matches!(mutating, Error::Encoding(_)));

        assert!(backend.calls().is_empty());
        assert!(backend.transactions().is_empty());

        // Zero value is fine for non-payable methods, any value for payable ones
        let zero = TransactOptions::default().with_value(U256::ZERO);
        binding.transact(&zero, "transfer", &[addr(to), uint(1)]).await.unwrap();
        binding.transact(&paid, "deposit", &[]).await.unwrap();
        assert_eq!(backend.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_overloads() {
        let (backend, binding) = setup();
        let to = Address::repeat_byte(0xbb);
        let opts = TransactOptions::default();

        let short = binding
            .transact(&opts, "safeTransfer", &[addr(to), uint(1)])
            .await
            .unwrap();
        let long = binding
            .transact(
                &opts,
                "safeTransfer",
                &[addr(to), uint(1), DynSolValue::Bytes(vec![1, 2])],
            )
            .await
            .unwrap();
        assert_ne!(short.input[..4], long.input[..4]);

        let by_signature = binding
            .transact(&opts, "safeTransfer(address,uint256)", &[addr(to), uint(1)])
            .await
            .unwrap();
        assert_eq!(by_signature.input, short.input);

        let none = binding
            .transact(&opts, "safeTransfer", &[addr(to)])
            .await
            .unwrap_err();
        assert!(matches!(none, Error::Encoding(msg) if msg.contains("safeTransfer(address,uint256,bytes)")));
        assert_eq!(backend.transactions().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_output_is_decoding_error() {
        let (backend, binding) = setup();
        backend.push_call_response(Ok(Bytes::new()));

        let err = binding
            .call(&CallOptions::default(), "decimals", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decoding(msg) if msg.contains("no contract code")));

        backend.push_call_response(Ok(Bytes::from(vec![0u8; 7])));
        let err = binding
            .call(&CallOptions::default(), "decimals", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decoding(_)));
    }

    #[tokio::test]
    async fn test_simulate_mutating_method() {
        let (backend, binding) = setup();
        backend.push_call_response(Ok(true.abi_encode().into()));

        let out = binding
            .simulate(
                &CallOptions::default(),
                "transfer",
                &[addr(Address::repeat_byte(1)), uint(1)],
            )
            .await
            .unwrap();
        assert_eq!(out, vec![DynSolValue::Bool(true)]);
        assert!(backend.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_revert_is_backend_error() {
        let (backend, binding) = setup();
        let spender = Address::repeat_byte(0x99);
        let data = InsufficientAllowance {
            spender,
            allowance: U256::from(1),
            needed: U256::from(2),
        }
        .abi_encode();
        backend.push_call_response(Err(BackendError::reverted(
            "execution reverted",
            data.into(),
        )));

        let err = binding
            .call(&CallOptions::default(), "balanceOf", &[addr(spender)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));

        match binding.decode_revert(&err) {
            Some(RevertReason::Custom { name, args }) => {
                assert_eq!(name, "InsufficientAllowance");
                assert_eq!(args.len(), 3);
                assert_eq!(args[2], ("needed".to_string(), uint(2)));
            }
            other => panic!("unexpected revert decode: {:?}", other),
        }

        let message = Revert {
            reason: "paused".to_string(),
        }
        .abi_encode();
        backend.push_call_response(Err(BackendError::reverted("execution reverted", message.into())));
        let err = binding
            .call(&CallOptions::default(), "decimals", &[])
            .await
            .unwrap_err();
        assert_eq!(
            binding.decode_revert(&err),
            Some(RevertReason::Message("paused".to_string()))
        );
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let backend = Arc::new(MockBackend::new().with_call_delay(Duration::from_secs(5)));
        let binding = ContractBinding::from_json(TOKEN, ERC20_ABI, backend.clone()).unwrap();

        let opts = CallOptions::default().with_timeout(Duration::from_millis(20));
        let err = binding.call(&opts, "decimals", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Backend(e) if e.message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_transfer_requires_receive() {
        let (backend, binding) = setup();
        let paid = TransactOptions::default().with_value(U256::from(10));
        assert!(matches!(
            binding.transfer(&paid).await,
            Err(Error::Encoding(_))
        ));

        let payable = r#"[{"type":"receive","stateMutability":"payable"}]"#;
        let wallet = ContractBinding::from_json(TOKEN, payable, backend.clone()).unwrap();
        let tx = wallet.transactor(paid).transfer().await.unwrap();
        assert!(tx.input.is_empty());
        assert_eq!(tx.value, U256::from(10));

        let fallback = r#"[{"type":"fallback","stateMutability":"nonpayable"}]"#;
        let strict = ContractBinding::from_json(TOKEN, fallback, backend.clone()).unwrap();
        assert!(strict.transfer(&TransactOptions::default()).await.is_err());
        assert_eq!(backend.transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_carry_options() {
        let (backend, binding) = setup();
        let owner = Address::repeat_byte(0x42);
        backend.push_call_response(Ok(U256::from(3u64).abi_encode().into()));
        backend.push_call_response(Ok(U256::from(4u64).abi_encode().into()));

        let caller = binding.caller(CallOptions::at_block(9));
        assert_eq!(caller.call("balanceOf", &[addr(owner)]).await.unwrap(), vec![uint(3)]);
        let typed = caller.call_typed(&balanceOfCall { owner }).await.unwrap();
        assert_eq!(typed._0, U256::from(4));
        assert!(backend
            .calls()
            .iter()
            .all(|(_, _, opts)| opts.block_id() == CallOptions::at_block(9).block_id()));

        let transactor = binding.transactor(TransactOptions::default().with_gas_limit(90_000));
        transactor.raw_transact(Bytes::from(vec![0xab])).await.unwrap();
        assert_eq!(backend.transactions()[0].2.gas_limit, Some(90_000));
    }

    #[test]
    fn test_json_args_pick_overload() {
        let (_backend, binding) = setup();
        let to = "0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e";

        let (signature, values) = binding
            .json_args("safeTransfer", &serde_json::json!([to, "7", "0x01"]))
            .unwrap();
        assert_eq!(signature, "safeTransfer(address,uint256,bytes)");
        assert_eq!(values[2], DynSolValue::Bytes(vec![1]));

        let (signature, _) = binding
            .json_args("transfer", &serde_json::json!({"to": to, "value": 1}))
            .unwrap();
        assert_eq!(signature, "transfer(address,uint256)");

        assert!(binding.json_args("approve", &serde_json::json!([])).is_err());
        assert!(binding.json_args("balanceOf", &serde_json::json!(["nope"])).is_err());
    }
}
