use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::args::ArgSource;
use crate::env::{ArgError, EnvCursor, EnvValue, Param};
use crate::error::{DecodeError, Result};
use crate::reply::{IntoReply, Reply};

/// A function that can serve a route.
///
/// Implemented for `Fn` closures and functions of up to eight [`Param`]
/// arguments returning anything [`IntoReply`]. Parameters bind from the call
/// environment first, left to right; the rest are decoded from the payload.
pub trait Handler<Args>: Send + Sync + 'static {
    fn invoke(&self, env: &[EnvValue], args: &mut dyn ArgSource) -> Result<Reply>;
}

/// Object-safe form of [`Handler`].
pub(crate) trait ErasedHandler: Send + Sync {
    fn invoke(&self, env: &[EnvValue], args: &mut dyn ArgSource) -> Result<Reply>;
}

struct HandlerFn<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> ErasedHandler for HandlerFn<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn invoke(&self, env: &[EnvValue], args: &mut dyn ArgSource) -> Result<Reply> {
        self.handler.invoke(env, args)
    }
}

pub(crate) fn erase<H, Args>(handler: H) -> Arc<dyn ErasedHandler>
where
    H: Handler<Args>,
    Args: 'static,
{
    Arc::new(HandlerFn {
        handler,
        _args: PhantomData,
    })
}

fn convert<P: Param>(index: usize, value: Value) -> std::result::Result<P, DecodeError> {
    P::from_arg(value).map_err(|err| match err {
        ArgError::Json(source) => DecodeError::Param { index, source },
        ArgError::EnvOnly(type_name) => DecodeError::Unbound { index, type_name },
    })
}

impl<F, R> Handler<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoReply,
{
    fn invoke(&self, _env: &[EnvValue], _args: &mut dyn ArgSource) -> Result<Reply> {
        (self)().into_reply()
    }
}

macro_rules! impl_handler {
    ($($ty:ident $slot:ident),+) => {
        #[allow(non_snake_case, unused_assignments)]
        impl<F, R, $($ty,)+> Handler<($($ty,)+)> for F
        where
            F: Fn($($ty,)+) -> R + Send + Sync + 'static,
            R: IntoReply,
            $($ty: Param,)+
        {
            fn invoke(&self, env: &[EnvValue], args: &mut dyn ArgSource) -> Result<Reply> {
                let mut cursor = EnvCursor::new(env);
                $(let mut $slot: Option<$ty> = cursor.bind::<$ty>();)+

                let pending = [$($slot.is_none(),)+].iter().filter(|open| **open).count();
                if pending > 0 {
                    args.fill(
                        pending,
                        &mut |values: Vec<Value>| -> std::result::Result<(), DecodeError> {
                            let mut values = values.into_iter();
                            let mut index = 0;
                            $(
                                let $ty = match &$slot {
                                    Some(_) => None,
                                    None => Some(convert::<$ty>(
                                        index,
                                        values.next().unwrap_or(Value::Null),
                                    )?),
                                };
                                index += 1;
                            )+
                            // Commit only once every open parameter converted.
                            $(
                                if let Some(value) = $ty {
                                    $slot = Some(value);
                                }
                            )+
                            Ok(())
                        },
                    )?;
                }

                $(
                    let Some($ty) = $slot else {
                        return Err(DecodeError::NoDecoder.into());
                    };
                )+
                (self)($($ty,)+).into_reply()
            }
        }
    };
}

impl_handler!(A1 a1);
impl_handler!(A1 a1, A2 a2);
impl_handler!(A1 a1, A2 a2, A3 a3);
impl_handler!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);
