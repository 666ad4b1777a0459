//! Recipe parser.
//!
//! A recipe is a line-oriented list of directives. The first directive must
//! be `from <ref>` or `create <name>`. Argument values may span lines inside
//! `"""…"""` or `"…"` blocks.

use std::io::Read;
use std::path::Path;

use a3s_model_core::error::{ModelError, Result};

/// Recipe directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    /// `create <name>`: start from an empty model
    Create,
    /// `from <ref>`: inherit a base model
    From,
    Name,
    Family,
    Architecture,
    License,
    Description,
    Format,
    Precision,
    Quantization,
    ParamSize,
    Weights,
    Config,
    Tokenizer,
}

impl Directive {
    pub fn parse(keyword: &str) -> Option<Self> {
        let directive = match keyword.to_ascii_lowercase().as_str() {
            "create" => Directive::Create,
            "from" => Directive::From,
            "name" => Directive::Name,
            "family" => Directive::Family,
            "architecture" => Directive::Architecture,
            "license" => Directive::License,
            "description" => Directive::Description,
            "format" => Directive::Format,
            "precision" => Directive::Precision,
            "quantization" => Directive::Quantization,
            "param_size" => Directive::ParamSize,
            "weights" => Directive::Weights,
            "config" => Directive::Config,
            "tokenizer" => Directive::Tokenizer,
            _ => return None,
        };
        Some(directive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Create => "create",
            Directive::From => "from",
            Directive::Name => "name",
            Directive::Family => "family",
            Directive::Architecture => "architecture",
            Directive::License => "license",
            Directive::Description => "description",
            Directive::Format => "format",
            Directive::Precision => "precision",
            Directive::Quantization => "quantization",
            Directive::ParamSize => "param_size",
            Directive::Weights => "weights",
            Directive::Config => "config",
            Directive::Tokenizer => "tokenizer",
        }
    }

    /// `from` or `create`.
    pub fn is_base(&self) -> bool {
        matches!(self, Directive::From | Directive::Create)
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed recipe instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub directive: Directive,
    /// Argument text, quote delimiters removed, embedded newlines kept
    pub args: String,
    /// 1-based line where the directive starts
    pub line: usize,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.directive.as_str()
    }
}

/// Parsed recipe: commands in source order, led by `from` or `create`.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub commands: Vec<Command>,
}

impl Recipe {
    /// Parse a recipe from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let mut commands: Vec<Command> = Vec::new();

        for (line, token) in scan(content)? {
            let (keyword, rest) = split_first_word(&token);
            if keyword.is_empty() || keyword.starts_with('#') {
                continue;
            }

            let Some(directive) = Directive::parse(keyword) else {
                tracing::warn!(line, directive = keyword, "Unknown recipe directive, skipping");
                continue;
            };

            let args = rest.trim();
            if args.is_empty() {
                return Err(ModelError::ParseError {
                    line,
                    message: format!("{} requires an argument", directive),
                });
            }

            match commands.first() {
                None if !directive.is_base() => {
                    return Err(ModelError::ParseError {
                        line,
                        message: format!(
                            "first directive must be FROM or CREATE, found '{}'",
                            keyword
                        ),
                    });
                }
                Some(_) if directive.is_base() => {
                    return Err(ModelError::ParseError {
                        line,
                        message: format!("only one FROM or CREATE is allowed, found '{}'", keyword),
                    });
                }
                _ => {}
            }

            commands.push(Command {
                directive,
                args: args.to_string(),
                line,
            });
        }

        if commands.is_empty() {
            return Err(ModelError::ParseError {
                line: content.lines().count().max(1),
                message: "no FROM or CREATE line was specified".to_string(),
            });
        }

        Ok(Recipe { commands })
    }

    pub fn parse_reader(mut reader: impl Read) -> Result<Self> {
        let mut content = String::new();
        reader.read_to_string(&mut content).map_err(|e| {
            ModelError::BuildError(format!("Failed to read recipe: {}", e))
        })?;
        Self::parse(&content)
    }

    /// Parse a recipe from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModelError::BuildError(format!(
                "Failed to read recipe at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// The leading `from`/`create` command.
    pub fn base(&self) -> Option<&Command> {
        self.commands.first().filter(|c| c.directive.is_base())
    }

    /// Commands after the base.
    pub fn body(&self) -> &[Command] {
        self.commands.get(1..).unwrap_or_default()
    }
}

const TRIPLE_QUOTE: &str = "\"\"\"";
const QUOTE: &str = "\"";

/// Split content into logical lines, folding quoted blocks.
///
/// Returns `(start line, token)` pairs.
fn scan(content: &str) -> Result<Vec<(usize, String)>> {
    let mut tokens = Vec::new();
    let mut rest = content;
    let mut line = 1;

    while !rest.is_empty() {
        let end = rest.find('\n').unwrap_or(rest.len());
        let whole_line = || (rest[..end].to_string(), (end + 1).min(rest.len()));

        // Quotes inside a comment never open a block.
        let (token, consumed) = if rest[..end].trim_start().starts_with('#') {
            whole_line()
        } else {
            match scan_quoted(rest, TRIPLE_QUOTE, line)? {
                Some(found) => found,
                None => match scan_quoted(rest, QUOTE, line)? {
                    Some(found) => found,
                    None => whole_line(),
                },
            }
        };

        tokens.push((line, token.trim_end_matches('\r').to_string()));
        line += rest[..consumed].matches('\n').count();
        rest = &rest[consumed..];
    }

    Ok(tokens)
}

/// Fold a `delim`-quoted block opening on the first line of `data`.
///
/// Returns the token with delimiters removed and the number of bytes
/// consumed, through the end of the line holding the closing delimiter.
fn scan_quoted(data: &str, delim: &str, line: usize) -> Result<Option<(String, usize)>> {
    let newline = data.find('\n').unwrap_or(data.len());
    let Some(start) = data[..newline].find(delim) else {
        return Ok(None);
    };

    let body_start = start + delim.len();
    let Some(body_len) = data[body_start..].find(delim) else {
        return Err(ModelError::ParseError {
            line,
            message: format!("unterminated {}: expecting {}", delim, delim),
        });
    };

    let close_end = body_start + body_len + delim.len();
    let line_end = data[close_end..]
        .find('\n')
        .map(|i| close_end + i)
        .unwrap_or(data.len());

    let mut token = String::with_capacity(line_end);
    token.push_str(&data[..start]);
    token.push_str(&data[body_start..body_start + body_len]);
    token.push_str(&data[close_end..line_end]);

    Ok(Some((token, (line_end + 1).min(data.len()))))
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    }
}
