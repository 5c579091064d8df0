//! Recursive-descent parser for the plan DSL.
//!
//! Grammar (informal):
//!
//! ```text
//! plan      := (node | task)*
//! node      := 'node' STRING-or-IDENT '{' attrs '}'
//! task      := 'task' STRING-or-IDENT 'on' hostlist '{' resource* '}'
//! hostlist  := STRING-or-IDENT | '[' STRING-or-IDENT (',' STRING-or-IDENT)* ']'
//! resource  := IDENT '{' value ':' attrs '}'
//! attrs     := (IDENT '=>' value)*
//! value     := STRING | NUMBER | IDENT | list | map
//! list      := '[' value (',' value)* ']'
//! map       := '{' (IDENT-or-STRING '=>' value)* '}'
//! ```
//!
//! Inside a resource body, `ensure` aliases to `state` (first write wins),
//! `depends_on` accumulates into the dependency set, and
//! `on_success`/`on_failure` take brace-enclosed nested resource
//! declarations rather than plain maps.

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::Value;

use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{Error, Result};
use crate::plan::{Action, ActionData, Connection, Host, Plan, Task};

/// Recursive-descent parser consuming an eagerly collected token stream.
pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    /// Tokenizes `source` and prepares a parser over it.
    pub fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tokens: Lexer::tokenize(source)?,
            index: 0,
        })
    }

    /// Parses the whole token stream into a [`Plan`].
    pub fn parse(mut self) -> Result<Plan> {
        let mut plan = Plan::new();
        while !self.check(TokenKind::Eof, None) {
            if self.check(TokenKind::Ident, Some("node")) {
                let host = self.parse_node()?;
                plan.hosts.insert(host.name.clone(), host);
            } else if self.check(TokenKind::Ident, Some("task")) {
                plan.tasks.push(self.parse_task()?);
            } else {
                let token = self.peek();
                return Err(Error::parse(
                    token.line,
                    token.column,
                    format!("unexpected token '{}' (expected 'node' or 'task')", token.value),
                ));
            }
        }
        if plan.hosts.is_empty() {
            let local = Host::new("local");
            plan.hosts.insert(local.name.clone(), local);
        }
        Ok(plan)
    }

    fn parse_node(&mut self) -> Result<Host> {
        self.consume(TokenKind::Ident, Some("node"))?;
        let name_token = self.peek().clone();
        let name = self.parse_string_like()?;
        self.consume(TokenKind::LBrace, None)?;
        let mut attrs = self.parse_attrs()?;
        self.consume(TokenKind::RBrace, None)?;

        let connection = match attrs.remove("connection") {
            Some(Value::String(s)) => Connection::from_str(&s).map_err(|e| {
                Error::parse(name_token.line, name_token.column, e.to_string())
            })?,
            Some(other) => {
                return Err(Error::parse(
                    name_token.line,
                    name_token.column,
                    format!("connection attribute must be a string, got {other}"),
                ))
            }
            None => Connection::Local,
        };
        let address = attrs.remove("address").map(|v| stringify(&v));
        let mut variables: HashMap<String, Value> = match attrs.remove("variables") {
            Some(Value::Object(map)) => map.into_iter().collect(),
            Some(_) => {
                return Err(Error::parse(
                    name_token.line,
                    name_token.column,
                    "variables attribute must be a map",
                ))
            }
            None => HashMap::new(),
        };
        // Every remaining attribute folds into the host's variables.
        for (key, value) in attrs {
            variables.insert(key, value);
        }
        Ok(Host {
            name,
            connection,
            address,
            variables,
        })
    }

    fn parse_task(&mut self) -> Result<Task> {
        self.consume(TokenKind::Ident, Some("task"))?;
        let name = self.parse_string_like()?;
        self.consume(TokenKind::Ident, Some("on"))?;
        let hosts = self.parse_host_list()?;
        self.consume(TokenKind::LBrace, None)?;
        let mut actions = Vec::new();
        while !self.check(TokenKind::RBrace, None) {
            actions.push(self.parse_resource()?);
        }
        self.consume(TokenKind::RBrace, None)?;
        Ok(Task {
            name,
            hosts,
            actions,
        })
    }

    fn parse_host_list(&mut self) -> Result<Vec<String>> {
        if self.matches(TokenKind::LBracket, None) {
            let mut hosts = Vec::new();
            while !self.check(TokenKind::RBracket, None) {
                hosts.push(self.parse_string_like()?);
                self.matches(TokenKind::Comma, None);
            }
            self.consume(TokenKind::RBracket, None)?;
            return Ok(hosts);
        }
        Ok(vec![self.parse_string_like()?])
    }

    fn parse_resource(&mut self) -> Result<Action> {
        let kind_token = self.consume(TokenKind::Ident, None)?.clone();
        let kind = kind_token.value.clone();
        self.consume(TokenKind::LBrace, None)?;
        let title = self.parse_value()?;
        self.consume(TokenKind::Colon, None)?;

        let mut action = Action::new(&kind);
        match title {
            // Only the package resource kind accepts a list title; it
            // populates the packages collection instead of a singular name.
            Value::Array(items) => {
                if kind != "package" {
                    return Err(Error::parse(
                        kind_token.line,
                        kind_token.column,
                        format!("only package resources accept list titles, not '{kind}'"),
                    ));
                }
                let packages: Vec<Value> = items
                    .iter()
                    .map(|item| Value::String(stringify(item)))
                    .collect();
                action
                    .data
                    .insert("packages".to_string(), Value::Array(packages));
            }
            scalar => {
                let name = stringify(&scalar);
                action
                    .data
                    .insert("name".to_string(), Value::String(name.clone()));
                if kind == "file" {
                    action
                        .data
                        .entry("path".to_string())
                        .or_insert(Value::String(name));
                }
            }
        }

        while !self.check(TokenKind::RBrace, None) {
            let key_token = self.consume(TokenKind::Ident, None)?.clone();
            self.consume(TokenKind::Arrow, None)?;
            match key_token.value.as_str() {
                "ensure" => {
                    let value = self.parse_value()?;
                    // Alias for state; never overwrites an explicit state.
                    action.data.entry("state".to_string()).or_insert(value);
                }
                "depends_on" => match self.parse_value()? {
                    Value::Array(items) => action
                        .depends_on
                        .extend(items.iter().map(stringify)),
                    scalar => action.depends_on.push(stringify(&scalar)),
                },
                "on_success" => action.on_success = self.parse_branch(&key_token)?,
                "on_failure" => action.on_failure = self.parse_branch(&key_token)?,
                key => {
                    let value = self.parse_value()?;
                    action.data.insert(key.to_string(), value);
                }
            }
            self.matches(TokenKind::Comma, None);
        }
        self.consume(TokenKind::RBrace, None)?;
        Ok(action)
    }

    /// Parses a `{ resource* }` block following `on_success =>` or
    /// `on_failure =>`.
    fn parse_branch(&mut self, key_token: &Token) -> Result<Vec<Action>> {
        if !self.check(TokenKind::LBrace, None) {
            return Err(Error::parse(
                key_token.line,
                key_token.column,
                format!("{} must be a block of nested resources", key_token.value),
            ));
        }
        self.consume(TokenKind::LBrace, None)?;
        let mut actions = Vec::new();
        while !self.check(TokenKind::RBrace, None) {
            actions.push(self.parse_resource()?);
        }
        self.consume(TokenKind::RBrace, None)?;
        Ok(actions)
    }

    fn parse_attrs(&mut self) -> Result<ActionData> {
        let mut attrs = ActionData::new();
        while !self.check(TokenKind::RBrace, None) {
            let key = self.consume(TokenKind::Ident, None)?.value.clone();
            self.consume(TokenKind::Arrow, None)?;
            let value = self.parse_value()?;
            attrs.insert(key, value);
            self.matches(TokenKind::Comma, None);
        }
        Ok(attrs)
    }

    fn parse_value(&mut self) -> Result<Value> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Str => {
                self.advance();
                Ok(Value::String(token.value))
            }
            TokenKind::Ident => {
                self.advance();
                match token.value.to_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Ok(Value::String(token.value)),
                }
            }
            TokenKind::Number => {
                self.advance();
                let n: i64 = token.value.parse().map_err(|_| {
                    Error::parse(
                        token.line,
                        token.column,
                        format!("integer literal '{}' out of range", token.value),
                    )
                })?;
                Ok(Value::Number(n.into()))
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_map(),
            _ => Err(Error::parse(
                token.line,
                token.column,
                format!("unexpected {} where a value was expected", token.kind),
            )),
        }
    }

    fn parse_list(&mut self) -> Result<Value> {
        self.consume(TokenKind::LBracket, None)?;
        let mut values = Vec::new();
        while !self.check(TokenKind::RBracket, None) {
            values.push(self.parse_value()?);
            self.matches(TokenKind::Comma, None);
        }
        self.consume(TokenKind::RBracket, None)?;
        Ok(Value::Array(values))
    }

    fn parse_map(&mut self) -> Result<Value> {
        self.consume(TokenKind::LBrace, None)?;
        let mut map = serde_json::Map::new();
        while !self.check(TokenKind::RBrace, None) {
            let token = self.peek().clone();
            let key = match token.kind {
                TokenKind::Ident | TokenKind::Str => {
                    self.advance();
                    token.value
                }
                _ => {
                    return Err(Error::parse(
                        token.line,
                        token.column,
                        format!("unexpected {} where a map key was expected", token.kind),
                    ))
                }
            };
            self.consume(TokenKind::Arrow, None)?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.matches(TokenKind::Comma, None);
        }
        self.consume(TokenKind::RBrace, None)?;
        Ok(Value::Object(map))
    }

    fn parse_string_like(&mut self) -> Result<String> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Str | TokenKind::Ident => {
                self.advance();
                Ok(token.value)
            }
            _ => Err(Error::parse(
                token.line,
                token.column,
                format!("expected identifier or string, found {}", token.kind),
            )),
        }
    }

    fn matches(&mut self, kind: TokenKind, value: Option<&str>) -> bool {
        if self.check(kind, value) {
            self.advance();
            return true;
        }
        false
    }

    fn check(&self, kind: TokenKind, value: Option<&str>) -> bool {
        let token = self.peek();
        token.kind == kind && value.is_none_or(|v| token.value == v)
    }

    fn consume(&mut self, kind: TokenKind, value: Option<&str>) -> Result<&Token> {
        if !self.check(kind, value) {
            let token = self.peek();
            let wanted = match value {
                Some(v) => format!("{kind} '{v}'"),
                None => kind.to_string(),
            };
            return Err(Error::parse(
                token.line,
                token.column,
                format!("expected {wanted}, found '{}'", token.value),
            ));
        }
        Ok(self.advance())
    }

    fn advance(&mut self) -> &Token {
        let index = self.index;
        if self.tokens[index].kind != TokenKind::Eof {
            self.index += 1;
        }
        &self.tokens[index]
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }
}

/// Renders a scalar value the way the DSL writes it, for contexts that
/// require strings (titles, host names, dependency identifiers).
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
