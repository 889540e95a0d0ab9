//! CSS-like model configuration system for pipeline graphs.
//!
//! Parses stylesheet rules with selectors (`*`, `#id`, `.class`) and declarations
//! (`llm_model`, `llm_provider`, `reasoning_effort`), then applies them to pipeline
//! graph nodes respecting specificity ordering.

use crate::graph::{PipelineGraph, PipelineNode};
use attractor_types::AttractorError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub selector: Selector,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// `*` — matches every node.
    Universal,
    /// `#node_id` — matches a node by its id.
    Id(String),
    /// `.class_name` — matches nodes that contain the class.
    Class(String),
}

impl Selector {
    pub fn specificity(&self) -> u8 {
        match self {
            Selector::Universal => 0,
            Selector::Class(_) => 1,
            Selector::Id(_) => 2,
        }
    }

    pub fn matches(&self, node: &PipelineNode) -> bool {
        match self {
            Selector::Universal => true,
            Selector::Id(id) => node.id == *id,
            Selector::Class(class) => node.classes.contains(class),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            // Skip whitespace
            while self.pos < self.input.len()
                && self.input.as_bytes()[self.pos].is_ascii_whitespace()
            {
                self.pos += 1;
            }
            // Skip line comments (// ...)
            if self.remaining().starts_with("//") {
                while self.pos < self.input.len() && self.input.as_bytes()[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            // Skip block comments (/* ... */)
            if self.remaining().starts_with("/*") {
                self.pos += 2;
                while self.pos + 1 < self.input.len() {
                    if &self.input[self.pos..self.pos + 2] == "*/" {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, ch: u8) -> Result<(), AttractorError> {
        self.skip_whitespace_and_comments();
        match self.peek() {
            Some(c) if c == ch => {
                self.pos += 1;
                Ok(())
            }
            other => Err(self.error(format!(
                "expected '{}', found '{}'",
                ch as char,
                other.map(|c| c as char).unwrap_or('\0')
            ))),
        }
    }

    fn parse_identifier(&mut self) -> Result<String, AttractorError> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while self.pos < self.input.len() {
            let c = self.input.as_bytes()[self.pos];
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected identifier".to_string()));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_value(&mut self) -> Result<String, AttractorError> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while self.pos < self.input.len() {
            let c = self.input.as_bytes()[self.pos];
            if c == b';' || c == b'}' {
                break;
            }
            self.pos += 1;
        }
        let val = self.input[start..self.pos].trim();
        if val.is_empty() {
            return Err(self.error("expected property value".to_string()));
        }
        Ok(val.to_string())
    }

    fn error(&self, message: String) -> AttractorError {
        // Compute line/col from pos
        let consumed = &self.input[..self.pos];
        let line = consumed.chars().filter(|&c| c == '\n').count() + 1;
        let col = consumed.rfind('\n').map(|i| self.pos - i).unwrap_or(self.pos + 1);
        AttractorError::ParseError {
            line,
            col,
            message,
            source_snippet: None,
        }
    }

    fn parse_selector(&mut self) -> Result<Selector, AttractorError> {
        self.skip_whitespace_and_comments();
        match self.peek() {
            Some(b'*') => {
                self.pos += 1;
                Ok(Selector::Universal)
            }
            Some(b'#') => {
                self.pos += 1;
                let id = self.parse_identifier()?;
                Ok(Selector::Id(id))
            }
            Some(b'.') => {
                self.pos += 1;
                let class = self.parse_identifier()?;
                Ok(Selector::Class(class))
            }
            other => Err(self.error(format!(
                "expected selector ('*', '#', or '.'), found '{}'",
                other.map(|c| c as char).unwrap_or('\0')
            ))),
        }
    }

    fn parse_declaration(&mut self) -> Result<Declaration, AttractorError> {
        let property = self.parse_identifier()?;
        self.expect(b':')?;
        let value = self.parse_value()?;
        Ok(Declaration { property, value })
    }

    fn parse_rule(&mut self) -> Result<Rule, AttractorError> {
        let selector = self.parse_selector()?;
        self.expect(b'{')?;

        let mut declarations = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.error("unexpected end of input in rule body".to_string())),
                _ => {
                    let decl = self.parse_declaration()?;
                    declarations.push(decl);
                    // Consume optional semicolon
                    self.skip_whitespace_and_comments();
                    if self.peek() == Some(b';') {
                        self.pos += 1;
                    }
                }
            }
        }

        Ok(Rule {
            selector,
            declarations,
        })
    }

    fn parse_stylesheet(&mut self) -> Result<Stylesheet, AttractorError> {
        let mut rules = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.pos >= self.input.len() {
                break;
            }
            rules.push(self.parse_rule()?);
        }
        if rules.is_empty() {
            return Err(self.error("stylesheet must contain at least one rule".to_string()));
        }
        Ok(Stylesheet { rules })
    }
}

/// Parse a CSS-like model stylesheet from a string.
pub fn parse_stylesheet(input: &str) -> Result<Stylesheet, AttractorError> {
    let mut parser = Parser::new(input);
    parser.parse_stylesheet()
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply a stylesheet to a `PipelineGraph`, mutating nodes in-place.
///
/// Rules are applied in specificity order (Universal < Class < Id).
/// Within the same specificity level, later rules in the stylesheet win.
/// Explicit node attributes (fields that are already `Some`) are never overwritten.
pub fn apply_stylesheet(graph: &mut PipelineGraph, stylesheet: &Stylesheet) {
    for node in graph.all_nodes_mut() {
        // Save which fields were explicitly set on the node before stylesheet application.
        let had_llm_model = node.llm_model.is_some();
        let had_llm_provider = node.llm_provider.is_some();
        let had_reasoning_effort = node.reasoning_effort.is_some();

        // Collect matching rules, sorted by specificity ascending so that
        // higher-specificity rules overwrite lower-specificity ones.
        let mut matching: Vec<&Rule> = stylesheet
            .rules
            .iter()
            .filter(|r| r.selector.matches(node))
            .collect();
        matching.sort_by_key(|r| r.selector.specificity());

        // Apply declarations from lowest to highest specificity.
        // Higher specificity overwrites lower specificity values.
        // Explicit node attributes are never overwritten.
        for rule in matching {
            for decl in &rule.declarations {
                match decl.property.as_str() {
                    "llm_model" if !had_llm_model => {
                        node.llm_model = Some(decl.value.clone());
                    }
                    "llm_provider" if !had_llm_provider => {
                        node.llm_provider = Some(decl.value.clone());
                    }
                    "reasoning_effort" if !had_reasoning_effort => {
                        node.reasoning_effort = Some(decl.value.clone());
                    }
                    _ => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
