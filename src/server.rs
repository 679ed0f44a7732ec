//! HTTP trigger surface
//! Cloud Scheduler(or anything else) POSTs here to execute one pipeline
//! pass, GET answers a liveness string. One request is handled at a time,
//! which is what serializes the runs.
use std::io::Cursor;

use anyhow::Result;
use log::{error, info};
use tiny_http::{Header, Method, Response, Server};

use crate::cursor_store::{CursorStore, SecretStore};
use crate::discord_client::WebhookTrait;
use crate::fwd_app;
use crate::x_client::SearchClientTrait;

pub fn run_server<S: SecretStore>(
    port: u16,
    x_client: &impl SearchClientTrait,
    webhook: &impl WebhookTrait,
    cursor_store: &CursorStore<S>,
) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let server =
        Server::http(&addr).map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    info!("Listening on {}", addr);

    for request in server.incoming_requests() {
        info!("HTTP {} {}", request.method(), request.url());
        let response = match request.method() {
            Method::Get => Response::from_string("xfwd is running"),
            Method::Post => {
                match fwd_app::fetch_and_forward(x_client, webhook, cursor_store) {
                    Ok(()) => json_response(200, r#"{"status": "success"}"#.to_string()),
                    Err(e) => {
                        error!("The pass failed: {:#}", e);
                        let body =
                            serde_json::json!({ "status": "error", "message": format!("{:#}", e) });
                        json_response(500, body.to_string())
                    }
                }
            }
            _ => Response::from_string("method not allowed").with_status_code(405),
        };
        if let Err(e) = request.respond(response) {
            error!("Failed to respond: {}", e);
        }
    }
    Ok(())
}

fn json_response(code: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_string(body).with_status_code(code);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    response
}
