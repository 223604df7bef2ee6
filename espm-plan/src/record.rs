//! The self-describing record grammar of the plan stream.

use std::fmt::{Display, Formatter};

use winnow::{
    ModalResult,
    Parser,
    ascii::dec_int,
    combinator::{alt, cut_err, eof, repeat, terminated},
    error::{StrContext, StrContextValue},
    token::take_while,
};

use crate::Error;

/// One value of the plan stream grammar.
///
/// The grammar is `Type(field=value;...)` records with quoted strings,
/// integers, and `c(value;...)` lists:
///
/// ```text
/// value  := record | list | string | integer
/// record := ident '(' (ident '=' value ';')* ')'
/// list   := 'c' '(' (value ';')* ')'
/// string := '"' (escaped char)* '"'
/// ```
///
/// ## Examples
/// ```
/// use espm_plan::PlanValue;
///
/// # fn main() -> Result<(), espm_plan::Error> {
/// let value = PlanValue::parse(r#"Job(id=1;origin="cat/pkg";arrows=c(0;2;);)"#)?;
/// assert_eq!(value.to_string(), r#"Job(id=1;origin="cat/pkg";arrows=c(0;2;);)"#);
/// assert_eq!(value.field("id")?.as_int()?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanValue {
    /// A named record with ordered fields.
    Record {
        /// The record type name.
        name: String,
        /// The fields, in serialisation order.
        fields: Vec<(String, PlanValue)>,
    },
    /// An ordered list.
    List(Vec<PlanValue>),
    /// A string.
    Str(String),
    /// An integer.
    Int(i64),
}

impl PlanValue {
    /// Builds a record value.
    pub fn record(name: &str, fields: Vec<(String, PlanValue)>) -> Self {
        PlanValue::Record {
            name: name.to_string(),
            fields,
        }
    }

    /// Builds a string value.
    pub fn str(value: impl Into<String>) -> Self {
        PlanValue::Str(value.into())
    }

    /// Builds an integer value from anything int-like.
    pub fn int(value: impl Into<i64>) -> Self {
        PlanValue::Int(value.into())
    }

    /// Builds a boolean as the integers `0`/`1`.
    pub fn bool(value: bool) -> Self {
        PlanValue::Int(i64::from(value))
    }

    /// Parses a whole stream into one value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadStream`] if `input` does not follow the grammar.
    pub fn parse(input: &str) -> Result<Self, Error> {
        terminated(value_parser, eof)
            .parse(input.trim_end_matches(['\n', ' ']))
            .map_err(|e| Error::BadStream(e.inner().to_string()))
    }

    /// The record name, for error reporting; `None` for non-records.
    pub fn record_name(&self) -> Option<&str> {
        match self {
            PlanValue::Record { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Looks a field up in a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a record or has no such field.
    pub fn field(&self, wanted: &str) -> Result<&PlanValue, Error> {
        let PlanValue::Record { name, fields } = self else {
            return Err(Error::BadRecord {
                record: "value",
                reason: format!("expected a record with field {wanted:?}"),
            });
        };
        fields
            .iter()
            .find(|(field, _)| field == wanted)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::BadRecord {
                record: "value",
                reason: format!("record {name} has no field {wanted:?}"),
            })
    }

    /// Looks an optional field up in a record.
    pub fn field_opt(&self, wanted: &str) -> Option<&PlanValue> {
        match self {
            PlanValue::Record { fields, .. } => fields
                .iter()
                .find(|(field, _)| field == wanted)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Reads the value as a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a string.
    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            PlanValue::Str(value) => Ok(value),
            other => Err(Error::BadRecord {
                record: "value",
                reason: format!("expected a string, got {other}"),
            }),
        }
    }

    /// Reads the value as an integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an integer.
    pub fn as_int(&self) -> Result<i64, Error> {
        match self {
            PlanValue::Int(value) => Ok(*value),
            other => Err(Error::BadRecord {
                record: "value",
                reason: format!("expected an integer, got {other}"),
            }),
        }
    }

    /// Reads the value as a boolean (`0`/`1`).
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not `0` or `1`.
    pub fn as_bool(&self) -> Result<bool, Error> {
        match self.as_int()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::BadRecord {
                record: "value",
                reason: format!("expected a boolean, got {other}"),
            }),
        }
    }

    /// Reads the value as a list.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a list.
    pub fn as_list(&self) -> Result<&[PlanValue], Error> {
        match self {
            PlanValue::List(values) => Ok(values),
            other => Err(Error::BadRecord {
                record: "value",
                reason: format!("expected a list, got {other}"),
            }),
        }
    }
}

impl Display for PlanValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PlanValue::Record { name, fields } => {
                write!(f, "{name}(")?;
                for (field, value) in fields {
                    write!(f, "{field}={value};")?;
                }
                write!(f, ")")
            }
            PlanValue::List(values) => {
                write!(f, "c(")?;
                for value in values {
                    write!(f, "{value};")?;
                }
                write!(f, ")")
            }
            PlanValue::Str(value) => {
                write!(f, "\"")?;
                for c in value.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "\"")
            }
            PlanValue::Int(value) => write!(f, "{value}"),
        }
    }
}

fn ident(input: &mut &str) -> ModalResult<String> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        .map(str::to_string)
        .context(StrContext::Expected(StrContextValue::Description(
            "identifier",
        )))
        .parse_next(input)
}

fn string_parser(input: &mut &str) -> ModalResult<PlanValue> {
    let _ = '"'.parse_next(input)?;
    let mut out = String::new();
    loop {
        let chunk: &str = take_while(0.., |c: char| c != '"' && c != '\\').parse_next(input)?;
        out.push_str(chunk);
        let marker: char = alt(('"', '\\')).parse_next(input)?;
        if marker == '"' {
            return Ok(PlanValue::Str(out));
        }
        let escaped: char = cut_err(alt(('"', '\\', 'n')))
            .context(StrContext::Expected(StrContextValue::Description(
                "escape character",
            )))
            .parse_next(input)?;
        out.push(match escaped {
            'n' => '\n',
            other => other,
        });
    }
}

fn record_or_list_parser(input: &mut &str) -> ModalResult<PlanValue> {
    let name = ident.parse_next(input)?;
    let _ = '('.parse_next(input)?;
    if name == "c" {
        let values: Vec<PlanValue> =
            repeat(0.., terminated(value_parser, cut_err(';'))).parse_next(input)?;
        let _ = cut_err(')')
            .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
            .parse_next(input)?;
        Ok(PlanValue::List(values))
    } else {
        let fields: Vec<(String, PlanValue)> = repeat(
            0..,
            terminated((terminated(ident, '='), value_parser), cut_err(';'))
                .map(|(field, value)| (field, value)),
        )
        .parse_next(input)?;
        let _ = cut_err(')')
            .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
            .parse_next(input)?;
        Ok(PlanValue::Record { name, fields })
    }
}

fn value_parser(input: &mut &str) -> ModalResult<PlanValue> {
    if input.starts_with('"') {
        return string_parser(input);
    }
    if input.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        let value: i64 = dec_int.parse_next(input)?;
        return Ok(PlanValue::Int(value));
    }
    // Anything else must open a record or list; a soft failure here lets
    // enclosing repetitions end at `)`.
    record_or_list_parser
        .context(StrContext::Label("plan value"))
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    #[rstest]
    #[case(r#"Empty()"#)]
    #[case(r#"N(a=1;)"#)]
    #[case(r#"N(a=-12;b="x";)"#)]
    #[case(r#"c()"#)]
    #[case(r#"c(1;2;3;)"#)]
    #[case(r#"Outer(inner=Inner(deep=c("a";"b";););)"#)]
    #[case(r#""quoted \" and \\ and \n""#)]
    fn print_parse_round_trip(#[case] input: &str) -> TestResult {
        let value = PlanValue::parse(input)?;
        assert_eq!(value.to_string(), input);
        Ok(())
    }

    #[rstest]
    #[case("")]
    #[case("N(")]
    #[case("N(a=1)")]
    #[case("N(a=;)")]
    #[case(r#""unterminated"#)]
    #[case("N(a=1;) trailing")]
    fn bad_streams(#[case] input: &str) {
        assert!(matches!(PlanValue::parse(input), Err(Error::BadStream(_))));
    }

    #[rstest]
    fn accessors() -> TestResult {
        let value = PlanValue::parse(r#"Job(id=3;taken=1;origin="cat/pkg";list=c(1;);)"#)?;
        assert_eq!(value.record_name(), Some("Job"));
        assert_eq!(value.field("id")?.as_int()?, 3);
        assert!(value.field("taken")?.as_bool()?);
        assert_eq!(value.field("origin")?.as_str()?, "cat/pkg");
        assert_eq!(value.field("list")?.as_list()?.len(), 1);
        assert!(value.field("missing").is_err());
        assert!(value.field_opt("missing").is_none());
        Ok(())
    }

    /// Strings survive embedded grammar characters.
    #[rstest]
    #[case("a;b=c(d)")]
    #[case("newline\nhere")]
    #[case(r#"backslash \ and "quote""#)]
    fn string_escaping(#[case] text: &str) -> TestResult {
        let value = PlanValue::str(text);
        let parsed = PlanValue::parse(&value.to_string())?;
        assert_eq!(parsed.as_str()?, text);
        Ok(())
    }
}
