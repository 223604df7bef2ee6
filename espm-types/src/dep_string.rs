//! Parsing of whole dependency strings into [`DepTree`]s.

use std::str::FromStr;

use crate::{
    BlockStrength,
    ChoiceName,
    DepTree,
    DependenciesClass,
    DependencyLabel,
    Error,
    PackageDep,
};

/// Parses one metadata value of `class` into its top-level tree nodes.
///
/// The grammar is whitespace-separated: `(`/`)` groups, `||` any-of markers,
/// `flag?`/`!flag?` conditionals (always followed by a group), `label:`
/// markers in dependency classes, `!`/`!!` block prefixes, and leaf tokens
/// interpreted according to `class` (package specs, `uri -> filename`
/// fetchables, licence names or plain text).
///
/// A `||` group directly behind a block prefix is not representable; it is
/// accepted with a warning and the block is distributed over every package
/// in the group.
///
/// # Errors
///
/// Returns [`Error::BadDependencyString`] on unbalanced parentheses, a `||`
/// or conditional marker without a following group, a blocker inside an
/// any-of group, or an unparsable leaf token.
///
/// ## Examples
/// ```
/// use espm_types::{DepTree, DependenciesClass, parse_dependency_string};
///
/// # fn main() -> Result<(), espm_types::Error> {
/// let nodes = parse_dependency_string(
///     DependenciesClass::Build,
///     "cat/one ssl? ( >=cat/two-1 ) || ( cat/three cat/four )",
/// )?;
/// assert_eq!(nodes.len(), 3);
/// assert_eq!(
///     DepTree::unparenthesised(&nodes),
///     "cat/one ssl? ( >=cat/two-1 ) || ( cat/three cat/four )"
/// );
/// # Ok(())
/// # }
/// ```
pub fn parse_dependency_string(
    class: DependenciesClass,
    input: &str,
) -> Result<Vec<DepTree>, Error> {
    let mut parser = Tokens {
        class,
        input,
        tokens: input.split_whitespace().collect(),
        index: 0,
    };
    let nodes = parser.group(false)?;
    if parser.index < parser.tokens.len() {
        return Err(parser.bad("unbalanced closing parenthesis"));
    }
    Ok(nodes)
}

struct Tokens<'a> {
    class: DependenciesClass,
    input: &'a str,
    tokens: Vec<&'a str>,
    index: usize,
}

impl<'a> Tokens<'a> {
    fn bad(&self, reason: impl Into<String>) -> Error {
        Error::BadDependencyString {
            input: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<&'a str> {
        self.tokens.get(self.index + 1).copied()
    }

    fn advance(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.index).copied();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect_open(&mut self, after: &str) -> Result<(), Error> {
        match self.advance() {
            Some("(") => Ok(()),
            _ => Err(self.bad(format!("expected a group after {after:?}"))),
        }
    }

    /// Parses nodes until the matching `)` (when `inside`) or the end of the
    /// token stream.
    fn group(&mut self, inside: bool) -> Result<Vec<DepTree>, Error> {
        let mut nodes = Vec::new();

        while let Some(token) = self.peek() {
            match token {
                ")" => {
                    if !inside {
                        return Err(self.bad("unbalanced closing parenthesis"));
                    }
                    self.advance();
                    return Ok(nodes);
                }
                "(" => {
                    self.advance();
                    nodes.push(DepTree::AllOf(self.group(true)?));
                }
                "||" => {
                    self.advance();
                    self.expect_open("||")?;
                    let children = self.group(true)?;
                    if children.iter().any(DepTree::contains_block) {
                        return Err(self.bad("a || group may not contain blockers"));
                    }
                    nodes.push(DepTree::AnyOf(children));
                }
                "!||" | "!!||" => {
                    let strength = if token == "!!||" {
                        BlockStrength::Strong
                    } else {
                        BlockStrength::Weak
                    };
                    log::warn!(
                        "block prefix applied to a || group in {:?}; \
                         treating the block as applying to every package in the group",
                        self.input
                    );
                    self.advance();
                    self.expect_open("!||")?;
                    for child in self.group(true)? {
                        match child {
                            DepTree::Package(spec) => {
                                nodes.push(DepTree::Block { strength, spec });
                            }
                            _ => {
                                return Err(
                                    self.bad("a blocked group may only contain package specs")
                                );
                            }
                        }
                    }
                }
                conditional
                    if conditional.ends_with('?') && self.peek_next() == Some("(") =>
                {
                    let marker = conditional.trim_end_matches('?');
                    let (negated, flag) = match marker.strip_prefix('!') {
                        Some(flag) => (true, flag),
                        None => (false, marker),
                    };
                    let choice =
                        ChoiceName::new(flag).map_err(|e| self.bad(e.to_string()))?;
                    self.advance();
                    self.expect_open("use conditional")?;
                    nodes.push(DepTree::Conditional {
                        choice,
                        negated,
                        children: self.group(true)?,
                    });
                }
                label
                    if self.class.holds_package_deps()
                        && label.ends_with(':')
                        && DependencyLabel::from_str(label.trim_end_matches(':')).is_ok() =>
                {
                    // Unwrap checked by the guard.
                    let label = DependencyLabel::from_str(label.trim_end_matches(':'))
                        .unwrap_or(DependencyLabel::Build);
                    self.advance();
                    nodes.push(DepTree::Label(label));
                }
                _ => {
                    nodes.push(self.leaf()?);
                }
            }
        }

        if inside {
            return Err(self.bad("missing closing parenthesis"));
        }
        Ok(nodes)
    }

    /// Parses one leaf token according to the tree class.
    fn leaf(&mut self) -> Result<DepTree, Error> {
        let Some(token) = self.advance() else {
            return Err(self.bad("expected a token"));
        };

        match self.class {
            DependenciesClass::Fetches => {
                let filename = if self.peek() == Some("->") {
                    self.advance();
                    match self.advance() {
                        Some(name) if name != "(" && name != ")" => Some(name.to_string()),
                        _ => return Err(self.bad("expected a filename after ->")),
                    }
                } else {
                    None
                };
                Ok(DepTree::FetchableUri {
                    uri: token.to_string(),
                    filename,
                })
            }
            DependenciesClass::License => Ok(DepTree::License(token.to_string())),
            DependenciesClass::Restrict
            | DependenciesClass::Myoptions
            | DependenciesClass::Inherited => Ok(DepTree::SimpleText(token.to_string())),
            _ => {
                let (block, spec) =
                    PackageDep::parse_with_block(token).map_err(|e| match e {
                        Error::BadSpec { input, reason } => Error::BadDependencyString {
                            input: self.input.to_string(),
                            reason: format!("bad spec {input:?}: {reason}"),
                        },
                        other => other,
                    })?;
                Ok(match block {
                    Some(strength) => DepTree::Block { strength, spec },
                    None => DepTree::Package(spec),
                })
            }
        }
    }
}
