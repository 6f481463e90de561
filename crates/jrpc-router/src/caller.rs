use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::args::{default_decoders, ArgsDecoder, DecoderChain};
use crate::env::EnvValue;
use crate::error::Result;
use crate::handler::{erase, ErasedHandler, Handler};
use crate::payload::Payload;
use crate::reply::{BoxFuture, Output, Reply};

/// A handler bound to its own environment and decoders.
///
/// Invoking a caller binds parameters from its environment followed by
/// whatever the call site adds, decodes the rest from the payload, then
/// resolves the reply: deferred work is awaited and continuations run
/// against what is left of the payload.
#[derive(Clone)]
pub struct Caller {
    handler: Arc<dyn ErasedHandler>,
    env: Vec<EnvValue>,
    decoders: Vec<Arc<dyn ArgsDecoder>>,
}

impl Caller {
    pub fn new<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        Self::from_erased(erase(handler))
    }

    pub(crate) fn from_erased(handler: Arc<dyn ErasedHandler>) -> Self {
        Self {
            handler,
            env: Vec::new(),
            decoders: default_decoders(),
        }
    }

    /// Append a value to the caller's environment.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.env.push(EnvValue::new(value));
        self
    }

    /// Append an already erased environment value.
    pub fn with_value(mut self, value: EnvValue) -> Self {
        self.env.push(value);
        self
    }

    /// Try `decoder` after the ones already configured.
    pub fn decoder(mut self, decoder: impl ArgsDecoder + 'static) -> Self {
        self.decoders.push(Arc::new(decoder));
        self
    }

    /// Replace the decoder chain.
    pub fn decoders(mut self, decoders: Vec<Arc<dyn ArgsDecoder>>) -> Self {
        self.decoders = decoders;
        self
    }

    /// Invoke with `env` appended to the caller's own environment.
    pub async fn call(&self, env: &[EnvValue], payload: &mut Payload) -> Result<Vec<Output>> {
        let mut full = self.env.clone();
        full.extend_from_slice(env);
        let reply = self.invoke(&full, payload)?;
        self.resolve(reply, &full, payload).await
    }

    /// Parse-and-call shorthand over a payload string.
    pub async fn call_str(&self, env: &[EnvValue], payload: &str) -> Result<Vec<Output>> {
        self.call(env, &mut Payload::new(payload)).await
    }

    fn invoke(&self, env: &[EnvValue], payload: &mut Payload) -> Result<Reply> {
        let mut args = DecoderChain {
            payload,
            decoders: &self.decoders,
        };
        self.handler.invoke(env, &mut args)
    }

    fn resolve<'a>(
        &'a self,
        reply: Reply,
        env: &'a [EnvValue],
        payload: &'a mut Payload,
    ) -> BoxFuture<'a, Result<Vec<Output>>> {
        Box::pin(async move {
            match reply {
                Reply::Empty => Ok(Vec::new()),
                Reply::Value(value) => Ok(vec![Output::Value(value)]),
                Reply::Stream(stream) => Ok(vec![Output::Stream(stream)]),
                Reply::Deferred(future) => {
                    let reply = future.await?;
                    self.resolve(reply, env, payload).await
                }
                Reply::Continue(chain) => {
                    let nested = Caller {
                        handler: chain.handler,
                        env: Vec::new(),
                        decoders: self.decoders.clone(),
                    };
                    let reply = nested.invoke(env, payload)?;
                    nested.resolve(reply, env, payload).await
                }
                Reply::Many(items) => {
                    let mut outputs = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Reply::Empty => outputs.push(Output::Value(Value::Null)),
                            item => outputs.extend(self.resolve(item, env, payload).await?),
                        }
                    }
                    Ok(outputs)
                }
            }
        })
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("env", &self.env)
            .field("decoders", &self.decoders.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::args::JsonArgs;
    use crate::context::Context;
    use crate::env::{Env, Query};
    use crate::error::Error;
    use crate::reply::Chain;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StructI {
        i: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StructB {
        b: bool,
    }

    fn values(outputs: Vec<Output>) -> Vec<Value> {
        outputs
            .into_iter()
            .map(|output| match output {
                Output::Value(value) => value,
                Output::Stream(_) => panic!("unexpected stream"),
            })
            .collect()
    }

    #[tokio::test]
    async fn decodes_json_and_flags() {
        let caller = Caller::new(|b: bool, i: i64, s: String| (b, i, s));
        let out = caller.call_str(&[], r#"[true, 1, "a"]"#).await.unwrap();
        assert_eq!(values(out), vec![json!([true, 1, "a"])]);
        let out = caller.call_str(&[], "true 1 a").await.unwrap();
        assert_eq!(values(out), vec![json!([true, 1, "a"])]);
    }

    #[tokio::test]
    async fn object_fills_every_struct_parameter() {
        let caller = Caller::new(|i: StructI, b: StructB| {
            json!({"i": i.i, "b": b.b})
        });
        let out = caller.call_str(&[], "-i 1 -b true").await.unwrap();
        assert_eq!(values(out), vec![json!({"i": 1, "b": true})]);

        let out = caller.call_str(&[], r#"[{"i":1},{"b":true}]"#).await.unwrap();
        assert_eq!(values(out), vec![json!({"i": 1, "b": true})]);
    }

    #[tokio::test]
    async fn environment_binds_before_decoding() {
        let caller = Caller::new(|ctx: Context, Query(q): Query, n: i64| {
            assert!(!ctx.is_cancelled());
            format!("{q}:{n}")
        });
        let env = [
            EnvValue::new(Context::new()),
            EnvValue::new(Query("svc.f".into())),
        ];
        let out = caller.call_str(&env, "[5]").await.unwrap();
        assert_eq!(values(out), vec![json!("svc.f:5")]);
    }

    #[tokio::test]
    async fn own_environment_comes_first() {
        let caller = Caller::new(|Env(label): Env<&'static str>, n: i64| format!("{label}{n}"))
            .with("n=");
        let out = caller.call_str(&[EnvValue::new(9_i64)], "").await.unwrap();
        // The i64 in the call environment binds before any decoding.
        assert_eq!(values(out), vec![json!("n=9")]);
    }

    #[tokio::test]
    async fn env_only_parameter_out_of_order_fails() {
        let caller = Caller::new(|_: Env<Query>, _: Context| ());
        let env = [
            EnvValue::new(Context::new()),
            EnvValue::new(Query("q".into())),
        ];
        let err = caller.call_str(&env, "").await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn missing_optional_arguments_are_none() {
        let caller = Caller::new(|i: StructI, b: Option<StructB>| (i, b));
        let out = caller.call_str(&[], r#"[{"i":1}]"#).await.unwrap();
        assert_eq!(values(out), vec![json!([{"i": 1}, null])]);

        let caller = Caller::new(|i: Option<StructI>| i);
        assert_eq!(values(caller.call_str(&[], "[]").await.unwrap()), vec![Value::Null]);
        assert_eq!(values(caller.call_str(&[], " ").await.unwrap()), vec![Value::Null]);
    }

    #[tokio::test]
    async fn handler_errors_and_unit() {
        let caller = Caller::new(|ok: bool| -> Result<bool> {
            if ok {
                Ok(true)
            } else {
                Err(Error::invocation("test error 4"))
            }
        });
        assert_eq!(values(caller.call_str(&[], "[true]").await.unwrap()), vec![json!(true)]);
        let err = caller.call_str(&[], "false").await.unwrap_err();
        assert_eq!(err.to_string(), "test error 4");

        let caller = Caller::new(|| ());
        assert!(caller.call_str(&[], "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn continuation_decodes_the_rest() {
        let caller = Caller::new(|prefix: String| {
            Chain::new(move |n: i64| format!("{prefix}{n}"))
        });
        let mut payload = Payload::new(r#""id-" 7"#);
        let out = caller.call(&[], &mut payload).await.unwrap();
        assert_eq!(values(out), vec![json!("id-7")]);
    }

    #[tokio::test]
    async fn deferred_and_many() {
        let caller = Caller::new(|n: i64| {
            Reply::deferred(async move {
                tokio::task::yield_now().await;
                Reply::many(vec![Reply::Value(json!(n)), Reply::Empty])
            })
        });
        let out = caller.call_str(&[], "3").await.unwrap();
        assert_eq!(values(out), vec![json!(3)]);
    }

    #[tokio::test]
    async fn decoder_chain_is_configurable() {
        let caller = Caller::new(|n: i64| n).decoders(vec![Arc::new(JsonArgs)]);
        assert!(caller.call_str(&[], "-n 1").await.is_err());
        assert_eq!(values(caller.call_str(&[], "[2]").await.unwrap()), vec![json!(2)]);
    }
}
