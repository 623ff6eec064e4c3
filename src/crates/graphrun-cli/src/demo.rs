//! Handlers available to `graphrun run`.
//!
//! | type          | behaviour                                                    |
//! |---------------|--------------------------------------------------------------|
//! | `passthrough` | outputs its inputs unchanged                                 |
//! | `uppercase`   | upper-cases `text`                                           |
//! | `counter`     | emits `n + 1` on `n` until `limit` (default 3), then `done`  |
//! | `prompt`      | asks the consumer for `answer` and outputs it                |
//! | `fail`        | fails with its `message` configuration                       |

use graphrun_core::{HandlerError, HandlerOutput, InputValues, Kit, NodeHandlerContext};
use serde_json::{json, Value};

pub const DEMO_KIT: &str = "demo";

pub fn demo_kit() -> Kit {
    Kit::new(DEMO_KIT)
        .with_handler("passthrough", |inputs: InputValues, _ctx| {
            Box::pin(async move { Ok(HandlerOutput::Values(inputs)) })
        })
        .with_handler("uppercase", |inputs: InputValues, _ctx| {
            Box::pin(async move {
                let text = inputs
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| HandlerError::invalid_input("text", "expected a string"))?;
                Ok(HandlerOutput::json(json!({"text": text.to_uppercase()})))
            })
        })
        .with_handler("counter", |inputs: InputValues, _ctx| {
            Box::pin(async move {
                let n = inputs.get("n").and_then(Value::as_u64).unwrap_or(0);
                let limit = inputs.get("limit").and_then(Value::as_u64).unwrap_or(3);
                if n < limit {
                    Ok(HandlerOutput::json(json!({"n": n + 1})))
                } else {
                    Ok(HandlerOutput::json(json!({"done": n})))
                }
            })
        })
        .with_handler("prompt", |inputs: InputValues, ctx: NodeHandlerContext| {
            Box::pin(async move {
                let schema = inputs.get("schema").cloned().unwrap_or_else(|| {
                    json!({"type": "object", "properties": {"answer": {"type": "string"}}, "required": ["answer"]})
                });
                let reply = ctx.request_input(schema).await?;
                Ok(HandlerOutput::json(json!({"answer": reply.get("answer").cloned()})))
            })
        })
        .with_handler("fail", |inputs: InputValues, _ctx| {
            Box::pin(async move {
                let message = inputs
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("failed on purpose");
                Err(HandlerError::failed(message))
            })
        })
}
