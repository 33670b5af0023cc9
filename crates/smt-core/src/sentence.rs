//! Input sentences and inline directives.
//!
//! A line is either plain text, a `<seg id="N">text</seg>` segment, or a
//! directive `@name args`. A directive line may carry text to translate after
//! ` ||| `.

use thiserror::Error;

use crate::vocab::{Vocabulary, WordId, START_ID, STOP_ID};

/// Separator between the fields of `add_rule` and `remove_rule`.
pub const DIRECTIVE_FIELD_SEP: &str = " ,,, ";

#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    id: u32,
    text: String,
    metadata: Option<Metadata>,
}

impl Sentence {
    pub fn new(id: u32, text: &str) -> Self {
        Self {
            id,
            text: text.trim().to_string(),
            metadata: None,
        }
    }

    /// Parse one input line; `default_id` is used unless the line is a
    /// segment carrying its own id.
    pub fn parse(default_id: u32, line: &str) -> Self {
        let line = line.trim();
        let (id, body) = match parse_segment(line) {
            Some((id, body)) => (id.unwrap_or(default_id), body),
            None => (default_id, line),
        };
        match body.strip_prefix('@') {
            Some(directive) => {
                let (head, text) = match directive.split_once(" ||| ") {
                    Some((head, text)) => (head, text),
                    None => (directive, ""),
                };
                let (kind, args) = match head.trim().split_once(char::is_whitespace) {
                    Some((kind, args)) => (kind, args.trim()),
                    None => (head.trim(), ""),
                };
                Self {
                    id,
                    text: text.trim().to_string(),
                    metadata: Some(Metadata {
                        kind: kind.to_string(),
                        args: args.to_string(),
                    }),
                }
            }
            None => Self::new(id, body),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }
}

/// Split a `<seg ...>body</seg>` line into its id attribute, if any, and
/// its body.
fn parse_segment(line: &str) -> Option<(Option<u32>, &str)> {
    let rest = line.strip_prefix("<seg")?;
    if !rest.starts_with(|c: char| c == '>' || c.is_whitespace()) {
        return None;
    }
    let close = rest.find('>')?;
    let attrs = &rest[..close];
    let body = rest[close + 1..].trim_end();
    let body = body.strip_suffix("</seg>").unwrap_or(body);
    let id = attrs
        .split_once("id=")
        .map(|(_, v)| v.trim_start_matches(['"', '\'']))
        .and_then(|v| {
            let end = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
            v[..end].parse().ok()
        });
    Some((id, body.trim()))
}

/// A raw directive attached to a sentence; parsed when it is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    kind: String,
    args: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    SetWeights(Vec<(String, f32)>),
    AddRule {
        source: String,
        target: String,
        features: String,
    },
    ListRules,
    RemoveRule {
        source: String,
        target: String,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum DirectiveError {
    #[error("unknown directive @{0}")]
    Unknown(String),
    #[error("malformed @{kind}: {reason}")]
    Malformed { kind: String, reason: String },
}

impl Metadata {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn args(&self) -> &str {
        &self.args
    }

    pub fn parse(&self) -> Result<Directive, DirectiveError> {
        let malformed = |reason: &str| DirectiveError::Malformed {
            kind: self.kind.clone(),
            reason: reason.to_string(),
        };
        match self.kind.as_str() {
            "set_weights" => {
                let tokens: Vec<&str> = self.args.split_whitespace().collect();
                if tokens.is_empty() || tokens.len() % 2 != 0 {
                    return Err(malformed("expected `name value` pairs"));
                }
                tokens
                    .chunks(2)
                    .map(|pair| {
                        let value = pair[1]
                            .parse::<f32>()
                            .map_err(|_| malformed(&format!("{:?} is not a number", pair[1])))?;
                        Ok((pair[0].to_string(), value))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Directive::SetWeights)
            }
            "add_rule" => {
                let fields = split_fields(&self.args);
                if !(2..=3).contains(&fields.len()) || fields[..2].iter().any(|f| f.is_empty()) {
                    return Err(malformed("expected `source ,,, target [,,, features]`"));
                }
                Ok(Directive::AddRule {
                    source: fields[0].to_string(),
                    target: fields[1].to_string(),
                    features: fields.get(2).map(|f| f.to_string()).unwrap_or_default(),
                })
            }
            "list_rules" => Ok(Directive::ListRules),
            "remove_rule" => {
                let fields = split_fields(&self.args);
                if fields.len() != 2 || fields.iter().any(|f| f.is_empty()) {
                    return Err(malformed("expected `source ,,, target`"));
                }
                Ok(Directive::RemoveRule {
                    source: fields[0].to_string(),
                    target: fields[1].to_string(),
                })
            }
            other => Err(DirectiveError::Unknown(other.to_string())),
        }
    }
}

fn split_fields(args: &str) -> Vec<&str> {
    if args.trim().is_empty() {
        return Vec::new();
    }
    args.split(DIRECTIVE_FIELD_SEP.trim()).map(str::trim).collect()
}

/// A sentence as the search sees it: interned and wrapped in `<s>` `</s>`.
#[derive(Debug, Clone)]
pub struct SourceSentence {
    id: u32,
    words: Vec<WordId>,
}

impl SourceSentence {
    pub fn new(id: u32, words: Vec<WordId>) -> Self {
        Self { id, words }
    }

    pub fn intern(sentence: &Sentence, vocab: &Vocabulary) -> Self {
        let mut words = vec![START_ID];
        words.extend(sentence.tokens().map(|t| vocab.id(t)));
        words.push(STOP_ID);
        Self::new(sentence.id(), words)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// All positions including the boundary markers.
    pub fn words(&self) -> &[WordId] {
        &self.words
    }

    /// Number of real source words.
    pub fn num_words(&self) -> usize {
        self.words.len().saturating_sub(2)
    }
}
