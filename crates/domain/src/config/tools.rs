use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub http: Vec<HttpToolConfig>,
}

/// A tool backed by a plain HTTP endpoint. The model's arguments are sent
/// as the JSON body (POST) or query string (GET); the response body is
/// returned to the model verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// JSON Schema of the arguments.
    #[serde(default = "d_parameters")]
    pub parameters: serde_json::Value,
    #[serde(default = "d_15000")]
    pub timeout_ms: u64,
    /// Environment variable holding a bearer token for the endpoint.
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

fn d_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
fn d_15000() -> u64 {
    15_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_tool_parses_with_schema() {
        let toml_str = r#"
            [[http]]
            name = "list_employees"
            url = "http://hr.local/api/employees"
            method = "GET"

            [http.parameters]
            type = "object"
            properties = { department = { type = "string" } }
        "#;
        let cfg: ToolsConfig = toml::from_str(toml_str).unwrap();
        let tool = &cfg.http[0];
        assert_eq!(tool.method, HttpMethod::Get);
        assert_eq!(tool.timeout_ms, 15_000);
        assert_eq!(tool.parameters["properties"]["department"]["type"], "string");
    }

    #[test]
    fn method_defaults_to_post() {
        let toml_str = r#"
            [[http]]
            name = "generate_csv"
            url = "http://hr.local/api/export"
        "#;
        let cfg: ToolsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.http[0].method, HttpMethod::Post);
        assert_eq!(cfg.http[0].parameters["type"], "object");
    }
}
