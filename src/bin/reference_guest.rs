//! Reference guest for the bridge.
//!
//! Squares numbers: `{"n": 5}` → `{"result": 25}`. An `"action"` field
//! switches to misbehaviors used to exercise the bridge:
//!
//! | action               | behavior                                              |
//! |----------------------|-------------------------------------------------------|
//! | `crash`              | exits with `code` (default 1) without replying        |
//! | `hang`               | never replies                                         |
//! | `error`              | replies with an error envelope of type `ValueError`   |
//! | `garbage`            | replies with a frame the bridge cannot decode         |
//! | `garbage_then_reply` | sends an undecodable frame, then squares `n`          |
//! | `big`                | replies with `size` bytes of filler                   |
//! | `reply_then_exit`    | replies normally, then exits 0                        |
//! | `context`            | replies with its request id and context headers       |
//!
//! `REFERENCE_GUEST_INIT` changes startup: `fail` reports an init error,
//! `exit` exits before connecting, `hang` never signals readiness.

use std::process;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use bridgevisor::ErrorEnvelope;
use bridgevisor::guest::runtime::Runtime;

const GARBAGE: &[u8] = b"\xee not a frame";

#[derive(Deserialize, Default)]
struct Request {
    #[serde(default)]
    n: i64,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    size: Option<usize>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), bridgevisor::GuestError> {
    let init = std::env::var("REFERENCE_GUEST_INIT").unwrap_or_default();
    if init == "exit" {
        process::exit(4);
    }

    let mut rt = Runtime::connect().await?;
    match init.as_str() {
        "fail" => {
            rt.init_error(ErrorEnvelope::custom("HandlerNotFound", "no handler named 'missing'"))
                .await?;
            return Ok(());
        }
        "hang" => std::future::pending::<()>().await,
        _ => rt.ready().await?,
    }

    while let Some((ctx, payload)) = rt.next_invocation().await? {
        let req: Request = match serde_json::from_slice(&payload) {
            Ok(req) => req,
            Err(e) => {
                rt.fail(ErrorEnvelope::custom("InvalidInput", e.to_string()))
                    .await?;
                continue;
            }
        };

        match req.action.as_deref() {
            Some("crash") => process::exit(req.code.unwrap_or(1)),
            Some("hang") => std::future::pending::<()>().await,
            Some("error") => {
                let env = ErrorEnvelope::custom("ValueError", format!("cannot handle {}", req.n))
                    .with_stack_trace(vec!["reference_guest::handle".to_string()]);
                rt.fail(env).await?;
            }
            Some("garbage") => rt.send_raw(Bytes::from_static(GARBAGE)).await?,
            Some("garbage_then_reply") => {
                rt.send_raw(Bytes::from_static(GARBAGE)).await?;
                rt.respond(square(req.n)).await?
            }
            Some("big") => {
                rt.respond(Bytes::from(vec![b'x'; req.size.unwrap_or(1024)]))
                    .await?
            }
            Some("context") => {
                let body = json!({ "request_id": ctx.request_id, "headers": ctx.headers });
                rt.respond(Bytes::from(body.to_string())).await?
            }
            Some("reply_then_exit") => {
                rt.respond(square(req.n)).await?;
                process::exit(0);
            }
            _ => rt.respond(square(req.n)).await?,
        }
    }
    Ok(())
}

fn square(n: i64) -> Bytes {
    Bytes::from(json!({ "result": n.saturating_mul(n) }).to_string())
}
