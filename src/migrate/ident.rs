//! SQL identifier parsing using nom.
//!
//! Handles the identifier shapes that show up in DDL heads:
//!
//! ```text
//! users            -> public.users
//! app.users        -> app.users
//! "App"."Users"    -> App.Users      (quoted: case kept)
//! App.Users        -> app.users      (bare: folded to lower case)
//! ```

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, value},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, tuple},
};

use crate::schema::DEFAULT_SCHEMA;

/// A possibly schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    pub schema: Option<String>,
    pub name: String,
}

impl ObjectName {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.into(),
        }
    }

    /// The explicit schema, or `public`.
    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema(), self.name)
    }
}

/// Parse a bare identifier, folded to lower case the way PostgreSQL does.
fn bare_identifier(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
        |s: &str| s.to_lowercase(),
    )(input)
}

/// Parse a double-quoted identifier; `""` inside stands for one quote.
fn quoted_identifier(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            many0(alt((is_not("\""), value("\"", tag("\"\""))))),
            char('"'),
        ),
        |parts: Vec<&str>| parts.concat(),
    )(input)
}

/// Parse one identifier, quoted or bare.
pub fn identifier(input: &str) -> IResult<&str, String> {
    alt((quoted_identifier, bare_identifier))(input)
}

/// Parse `name` or `schema.name`.
pub fn object_name(input: &str) -> IResult<&str, ObjectName> {
    let (input, first) = identifier(input)?;
    let (input, second) = opt(preceded(
        tuple((multispace0, char('.'), multispace0)),
        identifier,
    ))(input)?;

    let name = match second {
        Some(name) => ObjectName {
            schema: Some(first),
            name,
        },
        None => ObjectName {
            schema: None,
            name: first,
        },
    };
    Ok((input, name))
}

/// Parse a comma-separated list of object names.
pub fn object_name_list(input: &str) -> IResult<&str, Vec<ObjectName>> {
    separated_list1(delimited(multispace0, char(','), multispace0), object_name)(input)
}

/// Parse an identifier at the start of `input`, skipping leading whitespace.
///
/// Returns the identifier and the unparsed remainder.
pub fn parse_identifier(input: &str) -> Option<(String, &str)> {
    preceded(multispace0, identifier)(input)
        .ok()
        .map(|(rest, ident)| (ident, rest))
}

/// Parse an object name at the start of `input`, skipping leading whitespace.
pub fn parse_object_name(input: &str) -> Option<(ObjectName, &str)> {
    preceded(multispace0, object_name)(input)
        .ok()
        .map(|(rest, name)| (name, rest))
}

/// Parse a list of object names at the start of `input`.
pub fn parse_object_names(input: &str) -> Vec<ObjectName> {
    preceded(multispace0, object_name_list)(input)
        .map(|(_, names)| names)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unqualified_defaults_to_public() {
        let (name, rest) = parse_object_name("users (id int)").unwrap();
        assert_eq!(name.schema, None);
        assert_eq!(name.schema(), "public");
        assert_eq!(name.name, "users");
        assert_eq!(rest, " (id int)");
    }

    #[test]
    fn test_qualified_name() {
        let (name, _) = parse_object_name("  billing.Invoices").unwrap();
        assert_eq!(name.to_string(), "billing.invoices");
    }

    #[test]
    fn test_quoted_name_keeps_case() {
        let (name, _) = parse_object_name(r#""Billing"."Invoice ""Lines""""#).unwrap();
        assert_eq!(name.schema.as_deref(), Some("Billing"));
        assert_eq!(name.name, r#"Invoice "Lines""#);
    }

    #[test]
    fn test_name_list() {
        let names = parse_object_names("a, app.b ,c CASCADE");
        let rendered: Vec<String> = names.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["public.a", "app.b", "public.c"]);
    }

    #[test]
    fn test_no_identifier() {
        assert!(parse_identifier("(id)").is_none());
        assert!(parse_object_names("").is_empty());
    }
}
