//! MCP (Model Context Protocol) server implementation.
//!
//! Exposes one live studio session as tools, one tool per user action.

use crate::image::{CandidateFile, ImageId, ImageRole};
use crate::studio::{Outcome, Studio};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Splits an optional data URI prefix off a base64 payload and decodes it.
///
/// Returns the MIME type from the prefix, if there was one. Tolerates
/// embedded whitespace and missing padding.
fn decode_inline_image(input: &str) -> Result<(Option<String>, Vec<u8>), base64::DecodeError> {
    use base64::Engine;

    let (mime, b64) = match input.find(";base64,") {
        Some(pos) => {
            let mime = input[..pos].strip_prefix("data:").map(str::to_string);
            (mime, &input[pos + 8..])
        }
        None => (None, input),
    };

    let cleaned: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let data = match base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        Ok(data) => data,
        Err(_) => base64::engine::general_purpose::STANDARD_NO_PAD.decode(&cleaned)?,
    };
    Ok((mime, data))
}

/// Validates that an output path is safe to write to.
///
/// Rejects paths containing directory traversal (`..`) components
/// to prevent writing outside the intended directory.
fn validate_output_path(path: &str) -> std::result::Result<(), String> {
    let path = std::path::Path::new(path);
    for component in path.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err("Path must not contain '..' components".into());
        }
    }
    Ok(())
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Wraps a JSON payload as MCP text content.
    fn content(id: Value, payload: &Value) -> Self {
        let content = json!([{
            "type": "text",
            "text": serde_json::to_string_pretty(payload).unwrap_or_default()
        }]);
        Self::success(id, json!({ "content": content }))
    }
}

/// MCP tool definition.
#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct InlineImageParam {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AddImagesParams {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    images: Vec<InlineImageParam>,
}

#[derive(Debug, Deserialize)]
struct ImageIdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SetRoleParams {
    id: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct ExpandPromptParams {
    #[serde(default)]
    idea: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComposeImageParams {
    #[serde(default)]
    output_path: Option<String>,
}

/// MCP server around one studio session.
pub struct McpServer {
    studio: Arc<Studio>,
    initialized: bool,
}

impl McpServer {
    /// Creates a server for the given session.
    pub fn new(studio: Arc<Studio>) -> Self {
        Self {
            studio,
            initialized: false,
        }
    }

    /// Run the MCP server, reading from stdin and writing to stdout.
    pub async fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            let response = self.handle_message(&line).await;
            if let Some(resp) = response {
                let json = serde_json::to_string(&resp).unwrap_or_else(|e| {
                    json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32603, "message": e.to_string()}}).to_string()
                });
                writeln!(stdout, "{}", json)?;
                stdout.flush()?;
            }
        }

        Ok(())
    }

    async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    -32700,
                    format!("Parse error: {}", e),
                ));
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                -32600,
                "Invalid JSON-RPC version",
            ));
        }

        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id, &request.params)),
            "initialized" | "notifications/initialized" => {
                // Notification, no response
                None
            }
            "tools/list" => Some(self.handle_tools_list(id)),
            "tools/call" => Some(self.handle_tools_call(id, &request.params).await),
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            _ => Some(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    fn handle_initialize(&mut self, id: Value, params: &Value) -> JsonRpcResponse {
        self.initialized = true;

        if let Some(client_info) = params.get("clientInfo") {
            tracing::info!(
                client = client_info
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                version = client_info
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                "MCP client connected"
            );
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "compose-studio",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        let image_id = json!({
            "type": "string",
            "description": "Image id as returned by add_images or get_state"
        });
        let tools = vec![
            Tool {
                name: "add_images",
                description: "Upload up to 5 reference images (jpg, png, webp). Unsupported files and files beyond the limit are ignored. Returns the full image list.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "paths": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Paths of image files to upload"
                        },
                        "images": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "mime_type": { "type": "string" },
                                    "data": {
                                        "type": "string",
                                        "description": "Base64 image data or a data URI"
                                    }
                                },
                                "required": ["data"]
                            },
                            "description": "Inline images"
                        }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "remove_image",
                description: "Remove an uploaded image",
                input_schema: json!({
                    "type": "object",
                    "properties": { "id": image_id },
                    "required": ["id"]
                }),
            },
            Tool {
                name: "set_role",
                description: "Set how an image is used in the composition",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": image_id,
                        "role": {
                            "type": "string",
                            "enum": ["primary", "background", "element"]
                        }
                    },
                    "required": ["id", "role"]
                }),
            },
            Tool {
                name: "set_idea",
                description: "Describe the idea in a few words",
                input_schema: json!({
                    "type": "object",
                    "properties": { "idea": { "type": "string" } },
                    "required": ["idea"]
                }),
            },
            Tool {
                name: "expand_prompt",
                description: "Expand the idea into a detailed image prompt, replacing the final prompt",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "idea": {
                            "type": "string",
                            "description": "Sets the idea first (optional)"
                        }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "set_prompt",
                description: "Edit the final prompt directly",
                input_schema: json!({
                    "type": "object",
                    "properties": { "prompt": { "type": "string" } },
                    "required": ["prompt"]
                }),
            },
            Tool {
                name: "compose_image",
                description: "Compose the uploaded images with the final prompt into one image",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "output_path": {
                            "type": "string",
                            "description": "Path to save the image (optional, returns a data URI if not provided)"
                        }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "get_state",
                description: "Show images, prompts, statuses, result and error",
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        ];

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match tool_name {
            "add_images" => self.add_images(id, arguments),
            "remove_image" => self.remove_image(id, arguments),
            "set_role" => self.set_role(id, arguments),
            "set_idea" => self.set_text(id, arguments, "idea"),
            "set_prompt" => self.set_text(id, arguments, "prompt"),
            "expand_prompt" => self.expand_prompt(id, arguments).await,
            "compose_image" => self.compose_image(id, arguments).await,
            "get_state" => self.get_state(id),
            _ => JsonRpcResponse::error(id, -32602, format!("Unknown tool: {}", tool_name)),
        }
    }

    fn get_state(&self, id: Value) -> JsonRpcResponse {
        match serde_json::to_value(self.studio.snapshot()) {
            Ok(state) => JsonRpcResponse::content(id, &state),
            Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
        }
    }

    fn add_images(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: AddImagesParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };

        let mut candidates: Vec<CandidateFile> =
            params.paths.iter().map(CandidateFile::from_path).collect();

        for (i, image) in params.images.into_iter().enumerate() {
            match decode_inline_image(&image.data) {
                Ok((uri_mime, data)) => candidates.push(CandidateFile::from_bytes(
                    image.name.unwrap_or_else(|| format!("image-{}", i + 1)),
                    image.mime_type.or(uri_mime),
                    data,
                )),
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        format!("Invalid base64 in images[{}]: {}", i, e),
                    );
                }
            }
        }

        let images = self.studio.add_images(candidates);
        JsonRpcResponse::content(id, &json!({ "images": images }))
    }

    fn parse_id(raw: &str) -> Result<ImageId, String> {
        raw.parse()
            .map_err(|e| format!("Invalid image id '{}': {}", raw, e))
    }

    fn remove_image(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: ImageIdParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };
        let image_id = match Self::parse_id(&params.id) {
            Ok(image_id) => image_id,
            Err(msg) => return JsonRpcResponse::error(id, -32602, msg),
        };

        let removed = self.studio.remove_image(&image_id);
        JsonRpcResponse::content(
            id,
            &json!({ "removed": removed, "images": self.studio.images() }),
        )
    }

    fn set_role(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: SetRoleParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };
        let image_id = match Self::parse_id(&params.id) {
            Ok(image_id) => image_id,
            Err(msg) => return JsonRpcResponse::error(id, -32602, msg),
        };
        let role: ImageRole = match params.role.parse() {
            Ok(role) => role,
            Err(e) => return JsonRpcResponse::error(id, -32602, e.to_string()),
        };

        let updated = self.studio.set_role(&image_id, role);
        JsonRpcResponse::content(
            id,
            &json!({ "updated": updated, "images": self.studio.images() }),
        )
    }

    fn set_text(&self, id: Value, arguments: Value, field: &str) -> JsonRpcResponse {
        let Some(text) = arguments.get(field).and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(
                id,
                -32602,
                format!("Invalid parameters: missing string field `{}`", field),
            );
        };

        if field == "idea" {
            self.studio.set_idea(text);
        } else {
            self.studio.set_final_prompt(text);
        }
        JsonRpcResponse::content(id, &json!({ "prompt": self.studio.prompt() }))
    }

    async fn expand_prompt(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: ExpandPromptParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };
        if let Some(idea) = params.idea {
            self.studio.set_idea(idea);
        }

        match self.studio.expand_prompt().await {
            Ok(Outcome::Failed(message)) => JsonRpcResponse::error(
                id,
                -32603,
                format!("Prompt expansion failed: {}", message),
            ),
            Ok(outcome) => JsonRpcResponse::content(
                id,
                &json!({ "outcome": outcome, "prompt": self.studio.prompt() }),
            ),
            Err(e) => JsonRpcResponse::error(id, -32602, e.to_string()),
        }
    }

    async fn compose_image(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: ComposeImageParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };

        // Validate output path safety
        if let Some(path) = &params.output_path {
            if let Err(msg) = validate_output_path(path) {
                return JsonRpcResponse::error(id, -32602, msg);
            }
        }

        let outcome = match self.studio.compose().await {
            Ok(outcome) => outcome,
            Err(e) => return JsonRpcResponse::error(id, -32602, e.to_string()),
        };

        let image = match outcome {
            Outcome::Succeeded => match self.studio.result() {
                Some(image) => image,
                None => {
                    return JsonRpcResponse::content(id, &json!({ "outcome": Outcome::Superseded }));
                }
            },
            Outcome::Failed(message) => {
                return JsonRpcResponse::error(
                    id,
                    -32603,
                    format!("Image composition failed: {}", message),
                );
            }
            Outcome::Superseded => {
                return JsonRpcResponse::content(id, &json!({ "outcome": outcome }));
            }
        };

        let output = if let Some(path) = &params.output_path {
            match image.save(path) {
                Ok(size) => json!({ "saved_to": path, "size_bytes": size }),
                Err(e) => {
                    return JsonRpcResponse::error(id, -32603, format!("Failed to save: {}", e));
                }
            }
        } else {
            json!({
                "data_url": image.to_data_url(),
                "mime_type": image.mime_type,
                "download_filename": image.suggested_filename(),
            })
        };

        JsonRpcResponse::content(
            id,
            &json!({ "outcome": Outcome::Succeeded, "output": output }),
        )
    }
}
