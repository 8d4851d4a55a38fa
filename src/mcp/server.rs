//! MCP server - stdio transport

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::protocol::{
    id_key, Request, Response, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};
use super::tools::{self, ToolCall};
use crate::reasoning::CancelToken;

pub const KNOWLEDGE_BASE_URI: &str = "prolog://knowledgeBase";

type InFlight = Arc<Mutex<HashMap<String, CancelToken>>>;

/// Run MCP server over stdio
pub fn run_mcp_server(dispatcher: Dispatcher, name: &str) -> Result<()> {
    let stdin = std::io::stdin();
    let reader = BufReader::new(stdin.lock());
    info!(server = name, "MCP server ready");
    serve(reader, std::io::stdout(), dispatcher, name)
}

/// Serve requests from `reader` until end of input.
///
/// Tool calls run on the session worker while this loop keeps reading, so
/// cancellation notifications arrive in time. Every response line is written
/// under one lock.
pub fn serve<R, W>(reader: R, writer: W, dispatcher: Dispatcher, name: &str) -> Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let server = Server {
        name: name.to_string(),
        dispatcher,
        out: Arc::new(Mutex::new(writer)),
        in_flight: Arc::new(Mutex::new(HashMap::new())),
    };

    for line in reader.lines() {
        let line = line.context("failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }
        server.handle_line(&line)?;
    }

    info!("stdin closed, shutting down");
    server.shutdown();
    Ok(())
}

struct Server<W> {
    name: String,
    dispatcher: Dispatcher,
    out: Arc<Mutex<W>>,
    in_flight: InFlight,
}

fn write_response<W: Write>(out: &Mutex<W>, response: &Response) -> Result<()> {
    let line = serde_json::to_string(response)?;
    let mut out = out.lock();
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

impl<W: Write + Send + 'static> Server<W> {
    fn handle_line(&self, line: &str) -> Result<()> {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let resp = Response::error(None, PARSE_ERROR, &format!("Parse error: {}", e));
                return write_response(&self.out, &resp);
            }
        };

        // Validate JSON-RPC version
        if request.jsonrpc != "2.0" {
            if request.is_notification() {
                return Ok(());
            }
            let resp = Response::error(
                request.id.clone(),
                INVALID_REQUEST,
                &format!(
                    "Invalid JSON-RPC version: expected 2.0, got {}",
                    request.jsonrpc
                ),
            );
            return write_response(&self.out, &resp);
        }

        if request.is_notification() {
            self.handle_notification(&request);
            return Ok(());
        }

        if let Some(response) = self.dispatch(&request) {
            write_response(&self.out, &response)?;
        }
        Ok(())
    }

    fn handle_notification(&self, req: &Request) {
        match req.method.as_str() {
            "notifications/initialized" | "initialized" => debug!("client initialized"),
            "notifications/cancelled" => {
                let Some(id) = req.params.get("requestId") else {
                    return;
                };
                if let Some(token) = self.in_flight.lock().get(&id_key(id)) {
                    info!(request = %id, "cancelling tool call");
                    token.cancel();
                }
            }
            other => debug!(method = other, "ignoring notification"),
        }
    }

    /// `None` when the reply is written later by the session worker.
    fn dispatch(&self, req: &Request) -> Option<Response> {
        let id = req.id.clone();
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "initialized" | "ping" => Response::success(id, json!({})),
            "tools/list" => Response::success(id, tools::definitions()),
            "tools/call" => return self.handle_tool_call(req),
            "resources/list" => handle_list_resources(req),
            "resources/read" => return self.handle_read_resource(req),
            _ => Response::error(id, METHOD_NOT_FOUND, "Method not found"),
        };
        Some(response)
    }

    fn handle_initialize(&self, req: &Request) -> Response {
        Response::success(
            req.id.clone(),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {}
                },
                "serverInfo": {
                    "name": self.name,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tool_call(&self, req: &Request) -> Option<Response> {
        let name = req
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let args = req.params.get("arguments").cloned().unwrap_or_default();

        let call = match ToolCall::parse(name, args) {
            Ok(call) => call,
            Err(e) => {
                warn!(tool = name, error = %e, "rejected tool call");
                return Some(Response::error(req.id.clone(), INVALID_PARAMS, &e.to_string()));
            }
        };

        let token = CancelToken::new();
        let key = req.id_key();
        if let Some(key) = &key {
            self.in_flight.lock().insert(key.clone(), token.clone());
        }

        let id = req.id.clone();
        let out = Arc::clone(&self.out);
        let in_flight = Arc::clone(&self.in_flight);
        let queued = self.dispatcher.submit(call, token, move |reply| {
            if let Some(key) = &key {
                in_flight.lock().remove(key);
            }
            if let Err(e) = write_response(&out, &Response::success(id, reply.to_value())) {
                warn!(error = %e, "failed to write tool reply");
            }
        });

        if queued {
            None
        } else {
            if let Some(key) = req.id_key() {
                self.in_flight.lock().remove(&key);
            }
            let reply = tools::ToolReply::error("session worker is not running");
            Some(Response::success(req.id.clone(), reply.to_value()))
        }
    }

    /// The listing is queued behind running calls, so like tool calls it is
    /// answered from the session worker.
    fn handle_read_resource(&self, req: &Request) -> Option<Response> {
        let uri = req.params.get("uri").and_then(|v| v.as_str()).unwrap_or("");
        if uri != KNOWLEDGE_BASE_URI {
            return Some(Response::error(
                req.id.clone(),
                INVALID_PARAMS,
                &format!("Unknown resource: {}", uri),
            ));
        }

        let id = req.id.clone();
        let out = Arc::clone(&self.out);
        let queued = self.dispatcher.submit_listing(move |listing| {
            let text = if listing.is_empty() {
                "% The knowledge base is empty.\n".to_string()
            } else {
                listing
            };
            if let Err(e) = write_response(&out, &knowledge_base_contents(id, text)) {
                warn!(error = %e, "failed to write resource contents");
            }
        });

        if queued {
            None
        } else {
            let text = "% The session worker is not running.\n".to_string();
            Some(knowledge_base_contents(req.id.clone(), text))
        }
    }

    /// Cancel whatever is still running, then wait for the worker to drain.
    fn shutdown(self) {
        for token in self.in_flight.lock().values() {
            token.cancel();
        }
        drop(self.dispatcher);
    }
}

fn knowledge_base_contents(id: Option<Value>, text: String) -> Response {
    Response::success(
        id,
        json!({
            "contents": [{
                "uri": KNOWLEDGE_BASE_URI,
                "mimeType": "text/x-prolog",
                "text": text
            }]
        }),
    )
}

fn handle_list_resources(req: &Request) -> Response {
    Response::success(
        req.id.clone(),
        json!({
            "resources": [{
                "uri": KNOWLEDGE_BASE_URI,
                "name": "Knowledge Base",
                "description": "Clauses and directives applied through assertz and loadProgram since the session was created or last reset. Database changes made by goals run through the query tool are not listed.",
                "mimeType": "text/x-prolog"
            }]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{ScryerFactory, SessionOptions};
    use serde_json::Value;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn reply_text(response: &Value) -> Option<&str> {
        response["result"]["content"][0]["text"].as_str()
    }

    fn run(input: &str) -> Vec<Value> {
        run_with(SessionOptions::default(), input)
    }

    fn run_with(options: SessionOptions, input: &str) -> Vec<Value> {
        let dispatcher = Dispatcher::spawn(ScryerFactory, options).unwrap();
        let buf = SharedBuf::default();
        serve(Cursor::new(input.to_string()), buf.clone(), dispatcher, "prolog-mcp").unwrap();
        let bytes = buf.0.lock().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_initialize_and_notifications() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n"
        ));
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"]["protocolVersion"], json!("2024-11-05"));
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!("prolog-mcp"));
        assert_eq!(responses[1]["id"], json!(2));
    }

    #[test]
    fn test_protocol_errors() {
        let responses = run(concat!(
            "not json\n",
            r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"prompts/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"retract","arguments":{}}}"#,
            "\n"
        ));
        let codes: Vec<i64> = responses
            .iter()
            .map(|r| r["error"]["code"].as_i64().unwrap())
            .collect();
        assert_eq!(codes, vec![-32700, -32600, -32601, -32602]);
    }

    #[test]
    fn test_tool_calls_answer_in_order() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"assertz","arguments":{"predicate":"parent(david, eve)"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"findRelation","arguments":{"relation":"parent","person":"david"}}}"#,
            "\n"
        ));
        assert_eq!(responses.len(), 2);
        assert_eq!(
            reply_text(&responses[0]),
            Some("Added to knowledge base: parent(david, eve)")
        );
        assert_eq!(reply_text(&responses[1]), Some("parent of david: eve"));
    }

    #[test]
    fn test_knowledge_base_resource() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"resources/read","params":{"uri":"prolog://knowledgeBase"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/read","params":{"uri":"prolog://other"}}"#,
            "\n"
        ));
        assert_eq!(
            responses[0]["result"]["resources"][0]["uri"],
            json!(KNOWLEDGE_BASE_URI)
        );
        let description = responses[0]["result"]["resources"][0]["description"]
            .as_str()
            .unwrap();
        assert!(description.contains("query tool are not listed"));
        let text = responses[1]["result"]["contents"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("parent(john, bob).\n"));
        assert_eq!(responses[2]["error"]["code"], json!(-32602));
    }

    #[test]
    fn test_resource_read_does_not_block_cancellation() {
        let options = SessionOptions {
            max_solutions: 50_000_000,
            ..Default::default()
        };
        let responses = run_with(options, concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"loadProgram","arguments":{"program":"nat(0). nat(N) :- nat(M), N is M + 1."}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"query","arguments":{"query":"nat(N)"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/read","params":{"uri":"prolog://knowledgeBase"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":2}}"#,
            "\n"
        ));
        assert_eq!(responses.len(), 3);

        let by_id = |id: i64| {
            responses
                .iter()
                .find(|r| r["id"] == json!(id))
                .unwrap_or_else(|| panic!("no response for id {}", id))
        };
        assert!(reply_text(by_id(2)).unwrap().contains("cancelled"));
        let listing = by_id(3)["result"]["contents"][0]["text"].as_str().unwrap();
        assert!(listing.ends_with("nat(N) :- nat(M), N is M + 1.\n"), "{}", listing);
    }
}
