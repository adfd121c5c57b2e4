//! Service registration.
//!
//! A [`Service`] is a named set of methods over one receiver value,
//! built with [`Service::builder`]. Each method is a typed closure
//! `Fn(&R, Args) -> Result<Reply>`; registration erases the types
//! behind a handler that decodes the argument frame, invokes with the
//! receiver bound, and encodes the reply per the connection's codec.
//! Invocations are counted atomically per method.

use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use zrpc_common::{CodecKind, Result, RpcError};

type BoxedHandler = Box<dyn Fn(CodecKind, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// One registered method: the erased handler and its call count.
pub struct MethodDescriptor {
    handler: BoxedHandler,
    calls: AtomicU64,
}

impl MethodDescriptor {
    /// Completed invocations of this method, monotonic.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn invoke(&self, kind: CodecKind, argv: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(kind, argv)
    }
}

/// A named set of methods over a receiver.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl Service {
    /// Starts building a service around `receiver`.
    ///
    /// The service name is the receiver's type name and must start with
    /// an uppercase letter.
    pub fn builder<R: Send + Sync + 'static>(receiver: R) -> Result<ServiceBuilder<R>> {
        let name = short_type_name::<R>();
        if !name.chars().next().map(char::is_uppercase).unwrap_or(false) {
            return Err(RpcError::InvalidServiceName(name));
        }
        Ok(ServiceBuilder {
            name,
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    /// Invokes a method on the receiver with an encoded argument frame,
    /// returning the encoded reply.
    pub fn invoke(&self, method: &str, kind: CodecKind, argv: &[u8]) -> Result<Vec<u8>> {
        let descriptor = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
        descriptor.invoke(kind, argv)
    }
}

/// Builder binding typed methods to a shared receiver.
pub struct ServiceBuilder<R> {
    name: String,
    receiver: Arc<R>,
    methods: HashMap<String, MethodDescriptor>,
}

impl<R: Send + Sync + 'static> ServiceBuilder<R> {
    /// Registers `name` as a typed method.
    ///
    /// The argument value is materialised fresh from the request frame
    /// on every invocation; the reply is whatever the closure returns,
    /// so container replies start from the empty values the closure
    /// builds. A returned error travels back to the caller as the
    /// response header's error text.
    pub fn method<A, Reply, F>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned,
        Reply: Serialize,
        F: Fn(&R, A) -> Result<Reply> + Send + Sync + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let handler = move |kind: CodecKind, argv: &[u8]| -> Result<Vec<u8>> {
            let args: A = kind.decode(argv)?;
            let reply = f(&receiver, args)?;
            kind.encode(&reply)
        };
        debug!("rpc server: register {}.{}", self.name, name);
        self.methods.insert(
            name.to_string(),
            MethodDescriptor {
                handler: Box::new(handler),
                calls: AtomicU64::new(0),
            },
        );
        self
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

fn short_type_name<R>() -> String {
    let full = type_name::<R>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct Foo;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    fn sum_service() -> Service {
        Service::builder(Foo)
            .unwrap()
            .method("Sum", |_foo: &Foo, args: Args| Ok(args.num1 + args.num2))
            .build()
    }

    #[test]
    fn test_service_name_from_receiver_type() {
        let service = sum_service();
        assert_eq!(service.name(), "Foo");
        assert_eq!(service.method_names(), vec!["Sum".to_string()]);
    }

    #[test]
    fn test_unexported_receiver_is_rejected() {
        #[allow(non_camel_case_types)]
        struct foo;
        match Service::builder(foo) {
            Err(RpcError::InvalidServiceName(name)) => assert_eq!(name, "foo"),
            _ => panic!("expected InvalidServiceName"),
        }
    }

    #[test]
    fn test_invoke_matches_direct_call() {
        let service = sum_service();
        let kind = CodecKind::Json;

        let argv = kind.encode(&Args { num1: 1, num2: 2 }).unwrap();
        let reply = service.invoke("Sum", kind, &argv).unwrap();
        let sum: i64 = kind.decode(&reply).unwrap();

        assert_eq!(sum, 3);
        assert_eq!(service.method("Sum").unwrap().num_calls(), 1);
    }

    #[test]
    fn test_call_count_is_monotonic() {
        let service = sum_service();
        let kind = CodecKind::Json;
        let argv = kind.encode(&Args { num1: 2, num2: 3 }).unwrap();

        for _ in 0..5 {
            service.invoke("Sum", kind, &argv).unwrap();
        }
        assert_eq!(service.method("Sum").unwrap().num_calls(), 5);
    }

    #[test]
    fn test_invoke_unknown_method() {
        let service = sum_service();
        match service.invoke("Missing", CodecKind::Json, b"{}") {
            Err(RpcError::MethodNotFound(name)) => assert_eq!(name, "Missing"),
            _ => panic!("expected MethodNotFound"),
        }
    }

    #[test]
    fn test_handler_error_propagates() {
        let service = Service::builder(Foo)
            .unwrap()
            .method("Div", |_foo: &Foo, args: Args| {
                if args.num2 == 0 {
                    return Err(RpcError::Handler("division by zero".to_string()));
                }
                Ok(args.num1 / args.num2)
            })
            .build();

        let kind = CodecKind::Json;
        let argv = kind.encode(&Args { num1: 1, num2: 0 }).unwrap();
        let err = service.invoke("Div", kind, &argv).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
        // Failed invocations still count.
        assert_eq!(service.method("Div").unwrap().num_calls(), 1);
    }

    #[test]
    fn test_malformed_argv_is_a_decode_error() {
        let service = sum_service();
        assert!(service.invoke("Sum", CodecKind::Json, b"not json").is_err());
    }

    #[test]
    fn test_invoke_with_postcard_codec() {
        let service = sum_service();
        let kind = CodecKind::Postcard;

        let argv = kind.encode(&Args { num1: 4, num2: 5 }).unwrap();
        let reply = service.invoke("Sum", kind, &argv).unwrap();
        let sum: i64 = kind.decode(&reply).unwrap();
        assert_eq!(sum, 9);
    }
}
