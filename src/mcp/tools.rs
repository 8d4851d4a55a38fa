//! Tool set exposed over MCP: argument schemas, typed calls and reply shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::reasoning::{quote_atom, Drained, LoadDiagnostic, SessionError};

/// Relations `findRelation` can look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Parent,
    Grandparent,
    Sibling,
}

impl Relation {
    pub const ALL: [Relation; 3] = [Relation::Parent, Relation::Grandparent, Relation::Sibling];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Parent => "parent",
            Relation::Grandparent => "grandparent",
            Relation::Sibling => "sibling",
        }
    }

    /// Goal binding `X` to every related person.
    pub fn goal(&self, person: &str) -> String {
        format!("{}({}, X)", self.as_str(), quote_atom(person))
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
}

/// One validated tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Query {
        query: String,
        limit: Option<usize>,
    },
    FindRelation {
        relation: Relation,
        person: String,
    },
    Assertz {
        predicate: String,
    },
    LoadProgram {
        program: String,
    },
    ResetProlog,
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct FindRelationArgs {
    relation: Relation,
    person: String,
}

#[derive(Deserialize)]
struct AssertzArgs {
    predicate: String,
}

#[derive(Deserialize)]
struct LoadProgramArgs {
    program: String,
}

fn decode<T: for<'de> Deserialize<'de>>(tool: &'static str, arguments: Value) -> Result<T, ToolCallError> {
    serde_json::from_value(arguments).map_err(|e| ToolCallError::InvalidArguments {
        tool,
        reason: e.to_string(),
    })
}

fn require_text(tool: &'static str, field: &str, value: String) -> Result<String, ToolCallError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolCallError::InvalidArguments {
            tool,
            reason: format!("{} must not be empty", field),
        });
    }
    Ok(trimmed.to_string())
}

impl ToolCall {
    /// Validate `arguments` against the schema of tool `name`.
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ToolCallError> {
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };

        match name {
            "query" => {
                let args: QueryArgs = decode("query", arguments)?;
                if args.limit == Some(0) {
                    return Err(ToolCallError::InvalidArguments {
                        tool: "query",
                        reason: "limit must be at least 1".to_string(),
                    });
                }
                Ok(ToolCall::Query {
                    query: require_text("query", "query", args.query)?,
                    limit: args.limit,
                })
            }
            "findRelation" => {
                let args: FindRelationArgs = decode("findRelation", arguments)?;
                Ok(ToolCall::FindRelation {
                    relation: args.relation,
                    person: require_text("findRelation", "person", args.person)?,
                })
            }
            "assertz" => {
                let args: AssertzArgs = decode("assertz", arguments)?;
                Ok(ToolCall::Assertz {
                    predicate: require_text("assertz", "predicate", args.predicate)?,
                })
            }
            "loadProgram" => {
                let args: LoadProgramArgs = decode("loadProgram", arguments)?;
                Ok(ToolCall::LoadProgram {
                    program: args.program,
                })
            }
            "resetProlog" => Ok(ToolCall::ResetProlog),
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Query { .. } => "query",
            ToolCall::FindRelation { .. } => "findRelation",
            ToolCall::Assertz { .. } => "assertz",
            ToolCall::LoadProgram { .. } => "loadProgram",
            ToolCall::ResetProlog => "resetProlog",
        }
    }
}

/// `tools/list` payload.
pub fn definitions() -> Value {
    let relations: Vec<&str> = Relation::ALL.iter().map(Relation::as_str).collect();
    json!({
        "tools": [
            {
                "name": "query",
                "description": "Run a Prolog query against the knowledge base and return every solution's variable bindings (up to the configured cap).",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Prolog goal, e.g. grandparent(john, X). The trailing period is optional."
                        },
                        "limit": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Maximum solutions to return (clamped to the server cap)"
                        }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "findRelation",
                "description": "List everyone related to a person by a family relation.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "relation": {
                            "type": "string",
                            "enum": relations,
                            "description": "Relation to look up"
                        },
                        "person": {
                            "type": "string",
                            "description": "Person to look up, e.g. john"
                        }
                    },
                    "required": ["relation", "person"]
                }
            },
            {
                "name": "assertz",
                "description": "Add a fact or rule to the end of the knowledge base.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "predicate": {
                            "type": "string",
                            "description": "Clause to add, e.g. parent(david, eve) or ancestor(X, Y) :- parent(X, Y)"
                        }
                    },
                    "required": ["predicate"]
                }
            },
            {
                "name": "loadProgram",
                "description": "Load a multi-clause Prolog program. Each clause is reported as loaded or rejected; directives run once.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "program": {
                            "type": "string",
                            "description": "Prolog source text"
                        }
                    },
                    "required": ["program"]
                }
            },
            {
                "name": "resetProlog",
                "description": "Discard the knowledge base and start a fresh, empty engine.",
                "inputSchema": {
                    "type": "object",
                    "properties": {}
                }
            }
        ]
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// Reply shape of every tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolReply {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError", skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ToolReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent {
                kind: "text",
                text: text.into(),
            }],
            is_error: false,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            is_error: true,
            ..Self::text(format!("Error: {}", message))
        }
    }

    /// Text of the first content block.
    pub fn first_text(&self) -> &str {
        self.content.first().map_or("", |c| c.text.as_str())
    }

    pub fn to_value(&self) -> Value {
        json!(self)
    }
}

impl From<SessionError> for ToolReply {
    fn from(err: SessionError) -> Self {
        ToolReply::error(err)
    }
}

pub fn query_reply(query: &str, drained: &Drained) -> ToolReply {
    let payload = json!({
        "query": query,
        "solutions": drained.solutions,
        "count": drained.solutions.len(),
        "status": drained.status,
    });
    ToolReply::text(format!("{:#}", payload))
}

pub fn relation_reply(relation: Relation, person: &str, drained: &Drained) -> ToolReply {
    let related: Vec<&str> = drained
        .solutions
        .iter()
        .filter_map(|b| b.get("X"))
        .collect();

    if related.is_empty() {
        return ToolReply::text(format!("No {} relation found for {}.", relation, person));
    }

    let mut text = format!("{} of {}: {}", relation, person, related.join(", "));
    if drained.is_capped() {
        text.push_str(&format!(" (showing first {})", related.len()));
    }
    ToolReply::text(text)
}

pub fn assert_reply(predicate: &str) -> ToolReply {
    ToolReply::text(format!("Added to knowledge base: {}", predicate))
}

pub fn load_reply(diagnostics: &[LoadDiagnostic]) -> ToolReply {
    let rejected = diagnostics.iter().filter(|d| d.is_rejected()).count();
    let payload = json!(diagnostics);
    ToolReply::text(format!(
        "Program load results: {} loaded, {} rejected\n{:#}",
        diagnostics.len() - rejected,
        rejected,
        payload
    ))
}

pub fn reset_reply(reseeded: bool) -> ToolReply {
    if reseeded {
        ToolReply::text("Prolog session reset. The default knowledge base was reloaded.")
    } else {
        ToolReply::text(
            "Prolog session reset. The knowledge base is now empty; use assertz or loadProgram to add clauses.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{Bindings, CursorStatus};

    fn drained(values: &[&str], status: CursorStatus) -> Drained {
        Drained {
            solutions: values
                .iter()
                .map(|v| Bindings::solved([("X", v.to_string())]))
                .collect(),
            status,
        }
    }

    #[test]
    fn test_parse_find_relation() {
        let call = ToolCall::parse(
            "findRelation",
            json!({"relation": "grandparent", "person": " john "}),
        )
        .unwrap();
        assert_eq!(
            call,
            ToolCall::FindRelation {
                relation: Relation::Grandparent,
                person: "john".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_relation() {
        let err = ToolCall::parse("findRelation", json!({"relation": "cousin", "person": "john"}))
            .unwrap_err();
        assert!(matches!(
            err,
            ToolCallError::InvalidArguments {
                tool: "findRelation",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_requires_fields() {
        assert!(ToolCall::parse("assertz", json!({})).is_err());
        assert!(ToolCall::parse("query", json!({"query": "   "})).is_err());
        assert!(ToolCall::parse("query", json!({"query": "true", "limit": 0})).is_err());
        assert!(ToolCall::parse("query", json!({"query": 42})).is_err());
    }

    #[test]
    fn test_parse_reset_without_arguments() {
        assert_eq!(
            ToolCall::parse("resetProlog", Value::Null).unwrap(),
            ToolCall::ResetProlog
        );
    }

    #[test]
    fn test_parse_unknown_tool() {
        assert_eq!(
            ToolCall::parse("retract", json!({})).unwrap_err(),
            ToolCallError::UnknownTool("retract".to_string())
        );
    }

    #[test]
    fn test_relation_goal_quotes_person() {
        assert_eq!(Relation::Parent.goal("john"), "parent(john, X)");
        assert_eq!(
            Relation::Parent.goal("x), halt, parent(y"),
            "parent('x), halt, parent(y', X)"
        );
    }

    #[test]
    fn test_definitions_cover_tool_set() {
        let defs = definitions();
        let names: Vec<&str> = defs["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec!["query", "findRelation", "assertz", "loadProgram", "resetProlog"]
        );
        assert_eq!(
            defs["tools"][1]["inputSchema"]["properties"]["relation"]["enum"],
            json!(["parent", "grandparent", "sibling"])
        );
    }

    #[test]
    fn test_reply_shapes() {
        let ok = ToolReply::text("fine").to_value();
        assert_eq!(ok, json!({"content": [{"type": "text", "text": "fine"}]}));

        let err = ToolReply::from(SessionError::SessionUninitialized).to_value();
        assert_eq!(err["isError"], json!(true));
        assert!(err["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Error: session is uninitialized"));
    }

    #[test]
    fn test_relation_reply_texts() {
        let found = relation_reply(
            Relation::Grandparent,
            "john",
            &drained(&["charlie", "david"], CursorStatus::Exhausted),
        );
        assert_eq!(found.first_text(), "grandparent of john: charlie, david");

        let none = relation_reply(Relation::Parent, "john", &drained(&[], CursorStatus::Exhausted));
        assert_eq!(none.first_text(), "No parent relation found for john.");
        assert!(!none.is_error);

        let capped = relation_reply(Relation::Parent, "x", &drained(&["a"], CursorStatus::Capped));
        assert_eq!(capped.first_text(), "parent of x: a (showing first 1)");
    }

    #[test]
    fn test_query_reply_payload() {
        let reply = query_reply("p(X)", &drained(&["a", "b"], CursorStatus::Capped));
        let payload: Value = serde_json::from_str(reply.first_text()).unwrap();
        assert_eq!(payload["count"], json!(2));
        assert_eq!(payload["status"], json!("capped"));
        assert_eq!(
            payload["solutions"][0],
            json!({"solved": true, "bindings": {"X": "a"}})
        );
    }
}
