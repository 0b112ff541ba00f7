//! MCP (Model Context Protocol) server for the RomWBW emulator.
//!
//! Exposes the machine as a JSON-RPC 2.0 server over stdin/stdout. Tools
//! allow scripts and agents to load a ROM and disks, run batches, type
//! input, and read console output. Headless: no terminal handling.
//!
//! # Protocol
//!
//! Reads newline-delimited JSON-RPC 2.0 requests from stdin, writes
//! responses to stdout.

use std::io::{self, BufRead, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use emu_core::Observable;

use crate::config::RomWbwConfig;
use crate::delegate::CaptureDelegate;
use crate::machine::{ControlifyMode, RomWbw};

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn ok(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The MCP server: one machine, one capture buffer.
pub struct McpServer {
    machine: RomWbw,
    console: CaptureDelegate,
}

impl McpServer {
    #[must_use]
    pub fn new() -> Self {
        let console = CaptureDelegate::new();
        let machine = RomWbw::new(&RomWbwConfig::default(), Box::new(console.clone()));
        Self { machine, console }
    }

    /// Access the machine, for preloading ROM and disks before serving.
    pub fn machine_mut(&mut self) -> &mut RomWbw {
        &mut self.machine
    }

    /// Serve requests until stdin closes.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from stdin/stdout.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => self.handle(request),
                Err(e) => RpcResponse::err(JsonValue::Null, -32700, format!("parse error: {e}")),
            };
            serde_json::to_writer(&mut stdout, &response)?;
            stdout.write_all(b"\n")?;
            stdout.flush()?;
        }
        Ok(())
    }

    fn handle(&mut self, request: RpcRequest) -> RpcResponse {
        match request.method.as_str() {
            "initialize" => RpcResponse::ok(
                request.id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": { "name": "emu-romwbw", "version": env!("CARGO_PKG_VERSION") },
                    "capabilities": { "tools": {} }
                }),
            ),
            "tools/list" => RpcResponse::ok(request.id, json!({ "tools": tool_list() })),
            "tools/call" => {
                let name = request.params["name"].as_str().unwrap_or_default().to_string();
                let args = request.params["arguments"].clone();
                match self.call_tool(&name, &args) {
                    Ok(result) => RpcResponse::ok(
                        request.id,
                        json!({ "content": [{ "type": "text", "text": result.to_string() }] }),
                    ),
                    Err(message) => RpcResponse::err(request.id, -32000, message),
                }
            }
            other => RpcResponse::err(request.id, -32601, format!("unknown method: {other}")),
        }
    }

    fn call_tool(&mut self, name: &str, args: &JsonValue) -> Result<JsonValue, String> {
        match name {
            "load_rom" => {
                let data = decode_b64(&args["data"])?;
                self.machine.load_rom(&data)?;
                Ok(json!({ "loaded": data.len() }))
            }
            "load_disk" => {
                let unit = args["unit"].as_u64().ok_or("missing unit")? as usize;
                let data = decode_b64(&args["data"])?;
                self.machine.load_disk(unit, &data)?;
                if let Some(slices) = args["slices"].as_u64() {
                    self.machine.set_slice_count(unit, slices as u8)?;
                }
                Ok(json!({ "unit": unit, "loaded": data.len() }))
            }
            "save_disk" => {
                let unit = args["unit"].as_u64().ok_or("missing unit")? as usize;
                let data = self.machine.save_disk(unit).ok_or("no media attached")?;
                Ok(json!({ "unit": unit, "data": BASE64.encode(&data) }))
            }
            "start" => {
                if let Some(boot) = args["boot_string"].as_str() {
                    self.machine.set_boot_string(boot);
                }
                self.machine.start();
                Ok(json!({ "running": true }))
            }
            "reset" => {
                self.machine.reset();
                Ok(json!({ "running": false }))
            }
            "run_batch" => {
                let count = args["count"].as_u64().unwrap_or(50_000) as u32;
                self.machine.run_batch(count);
                Ok(json!({
                    "running": self.machine.is_running(),
                    "waiting_for_input": self.machine.is_waiting_for_input(),
                    "instruction_count": self.machine.instruction_count(),
                }))
            }
            "send_text" => {
                let text = args["text"].as_str().ok_or("missing text")?;
                for byte in text.bytes() {
                    self.machine.queue_input(byte);
                }
                Ok(json!({ "queued": text.len() }))
            }
            "set_controlify" => {
                let mode = match args["mode"].as_str().ok_or("missing mode")? {
                    "off" => ControlifyMode::Off,
                    "one_shot" => ControlifyMode::OneShot,
                    "sticky" => ControlifyMode::Sticky,
                    other => return Err(format!("unknown controlify mode: {other}")),
                };
                self.machine.set_controlify(mode);
                Ok(json!({ "mode": args["mode"] }))
            }
            "read_output" => Ok(json!({
                "text": String::from_utf8_lossy(&self.console.take_output()),
            })),
            "query" => {
                let path = args["path"].as_str().ok_or("missing path")?;
                let value = self
                    .machine
                    .query(path)
                    .ok_or_else(|| format!("unknown path: {path}"))?;
                Ok(json!({ "path": path, "value": value.as_u64() }))
            }
            "status" => Ok(json!({
                "pc": self.machine.pc(),
                "sp": self.machine.sp(),
                "instruction_count": self.machine.instruction_count(),
                "running": self.machine.is_running(),
                "waiting_for_input": self.machine.is_waiting_for_input(),
                "statuses": self.console.statuses(),
            })),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_b64(value: &JsonValue) -> Result<Vec<u8>, String> {
    let text = value.as_str().ok_or("missing base64 data")?;
    BASE64.decode(text).map_err(|e| format!("bad base64: {e}"))
}

fn tool_list() -> JsonValue {
    json!([
        { "name": "load_rom", "description": "Load a ROM image (base64)",
          "inputSchema": { "type": "object", "properties": { "data": { "type": "string" } }, "required": ["data"] } },
        { "name": "load_disk", "description": "Attach a disk image (base64) to a unit",
          "inputSchema": { "type": "object", "properties": { "unit": { "type": "integer" }, "data": { "type": "string" }, "slices": { "type": "integer" } }, "required": ["unit", "data"] } },
        { "name": "save_disk", "description": "Read back a unit's media as base64",
          "inputSchema": { "type": "object", "properties": { "unit": { "type": "integer" } }, "required": ["unit"] } },
        { "name": "start", "description": "Start execution from ROM bank 0, optionally with a boot string",
          "inputSchema": { "type": "object", "properties": { "boot_string": { "type": "string" } } } },
        { "name": "reset", "description": "Reset to the stopped state",
          "inputSchema": { "type": "object", "properties": {} } },
        { "name": "run_batch", "description": "Execute up to `count` instructions",
          "inputSchema": { "type": "object", "properties": { "count": { "type": "integer" } } } },
        { "name": "send_text", "description": "Queue console input characters",
          "inputSchema": { "type": "object", "properties": { "text": { "type": "string" } }, "required": ["text"] } },
        { "name": "set_controlify", "description": "Set the Ctrl-key input transform: off, one_shot, sticky",
          "inputSchema": { "type": "object", "properties": { "mode": { "type": "string" } }, "required": ["mode"] } },
        { "name": "read_output", "description": "Drain console output produced so far",
          "inputSchema": { "type": "object", "properties": {} } },
        { "name": "query", "description": "Query machine state by path (pc, sp, bank, cpu.a, ...)",
          "inputSchema": { "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] } },
        { "name": "status", "description": "Execution status summary",
          "inputSchema": { "type": "object", "properties": {} } }
    ])
}
