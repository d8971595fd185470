//! Path patterns and captured parameters.
//!
//! A pattern is a `/`-separated list of segments:
//!
//! | Segment | Meaning |
//! |---|---|
//! | `users` | literal, matched exactly |
//! | `{id}` or `:id` | named parameter, one non-empty segment |
//! | `{*rest}` or `*rest` | catch-all, the remainder of the path; last segment only |
//!
//! The same grammar is used for route paths (compiled into the routing trees)
//! and for rewrite targets (rendered with the parameters a match captured).

use thiserror::Error;

use crate::error::RewriteError;

/// Why a pattern could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern must start with `/`")]
    MissingLeadingSlash,

    #[error("parameter without a name")]
    EmptyName,

    #[error("invalid parameter name `{0}`")]
    InvalidName(String),

    #[error("catch-all `{0}` must be the last segment")]
    CatchAllNotLast(String),

    #[error("parameter `{0}` appears more than once")]
    DuplicateName(String),

    #[error("segment `{0}` mixes literal text and a parameter")]
    MixedSegment(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, PatternError> {
        if let Some(name) = raw.strip_prefix(':') {
            return Ok(Self::Param(validate_name(name)?));
        }
        if let Some(name) = raw.strip_prefix('*') {
            return Ok(Self::CatchAll(validate_name(name)?));
        }
        if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            return match inner.strip_prefix('*') {
                Some(name) => Ok(Self::CatchAll(validate_name(name)?)),
                None => Ok(Self::Param(validate_name(inner)?)),
            };
        }
        if raw.contains(['{', '}']) {
            return Err(PatternError::MixedSegment(raw.to_owned()));
        }
        Ok(Self::Literal(raw.to_owned()))
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Param(name) | Self::CatchAll(name) => Some(name),
        }
    }
}

fn validate_name(name: &str) -> Result<String, PatternError> {
    if name.is_empty() {
        return Err(PatternError::EmptyName);
    }
    if name.contains(['{', '}', '*', ':', '/']) {
        return Err(PatternError::InvalidName(name.to_owned()));
    }
    Ok(name.to_owned())
}

/// A parsed path pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let rest = raw.strip_prefix('/').ok_or(PatternError::MissingLeadingSlash)?;
        let parts: Vec<&str> = rest.split('/').collect();
        let last = parts.len() - 1;

        let mut segments = Vec::with_capacity(parts.len());
        let mut names: Vec<String> = Vec::new();
        for (i, part) in parts.into_iter().enumerate() {
            let segment = Segment::parse(part)?;
            if let Segment::CatchAll(name) = &segment {
                if i != last {
                    return Err(PatternError::CatchAllNotLast(name.clone()));
                }
            }
            if let Some(name) = segment.name() {
                if names.iter().any(|n| n == name) {
                    return Err(PatternError::DuplicateName(name.to_owned()));
                }
                names.push(name.to_owned());
            }
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// The name of the trailing catch-all, if the pattern ends in one.
    pub fn catch_all(&self) -> Option<&str> {
        match self.segments.last() {
            Some(Segment::CatchAll(name)) => Some(name),
            _ => None,
        }
    }

    /// The pattern in routing-tree syntax (`{name}`, `{*name}`).
    pub fn to_route(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                Segment::CatchAll(name) => {
                    out.push_str("{*");
                    out.push_str(name);
                    out.push('}');
                }
            }
        }
        out
    }

    /// For `/prefix/{*rest}`, the route `/prefix/`: the path on which the
    /// catch-all captures nothing.
    pub fn empty_remainder_route(&self) -> Option<String> {
        self.catch_all()?;
        let prefix = Self { segments: self.segments[..self.segments.len() - 1].to_vec() };
        let mut route = if prefix.segments.is_empty() { String::new() } else { prefix.to_route() };
        route.push('/');
        Some(route)
    }

    /// Substitutes captured parameters into the pattern.
    pub fn render(&self, params: &Params) -> Result<String, RewriteError> {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) | Segment::CatchAll(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| RewriteError::MissingParam(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Parses `target` and renders it with `params`.
pub fn rewrite(target: &str, params: &Params) -> Result<String, RewriteError> {
    Pattern::parse(target)
        .map_err(|source| RewriteError::Pattern { target: target.to_owned(), source })?
        .render(params)
}

/// Parameters captured while matching a request path, in pattern order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_syntax_is_normalized() {
        let pattern = Pattern::parse("/users/:id/files/*path").unwrap();
        assert_eq!(pattern.to_route(), "/users/{id}/files/{*path}");
        assert_eq!(pattern.catch_all(), Some("path"));
    }

    #[test]
    fn brace_syntax_round_trips() {
        let pattern = Pattern::parse("/users/{id}").unwrap();
        assert_eq!(pattern.to_route(), "/users/{id}");
        assert_eq!(pattern.catch_all(), None);
    }

    #[test]
    fn root_and_trailing_slash_are_preserved() {
        assert_eq!(Pattern::parse("/").unwrap().to_route(), "/");
        assert_eq!(Pattern::parse("/items/").unwrap().to_route(), "/items/");
    }

    #[test]
    fn structural_errors_are_reported() {
        assert_eq!(Pattern::parse("items"), Err(PatternError::MissingLeadingSlash));
        assert_eq!(Pattern::parse("/a/{}"), Err(PatternError::EmptyName));
        assert_eq!(Pattern::parse("/a/:"), Err(PatternError::EmptyName));
        assert_eq!(
            Pattern::parse("/{*rest}/tail"),
            Err(PatternError::CatchAllNotLast("rest".into()))
        );
        assert_eq!(Pattern::parse("/{id}/{id}"), Err(PatternError::DuplicateName("id".into())));
        assert_eq!(Pattern::parse("/file.{ext}"), Err(PatternError::MixedSegment("file.{ext}".into())));
        assert_eq!(Pattern::parse("/{a"), Err(PatternError::MixedSegment("{a".into())));
    }

    #[test]
    fn empty_remainder_route_drops_the_catch_all() {
        let under = Pattern::parse("/static/{*path}").unwrap();
        assert_eq!(under.empty_remainder_route().as_deref(), Some("/static/"));

        let any = Pattern::parse("/{*path}").unwrap();
        assert_eq!(any.empty_remainder_route().as_deref(), Some("/"));

        assert_eq!(Pattern::parse("/static").unwrap().empty_remainder_route(), None);
    }

    #[test]
    fn render_substitutes_params() {
        let target = Pattern::parse("/api/v2/users/{id}/{*rest}").unwrap();
        let params: Params = [("id", "42"), ("rest", "avatar/large.png")].into_iter().collect();
        assert_eq!(target.render(&params).unwrap(), "/api/v2/users/42/avatar/large.png");
    }

    #[test]
    fn render_with_empty_catch_all_keeps_trailing_slash() {
        let target = Pattern::parse("/assets/{*path}").unwrap();
        let params: Params = [("path", "")].into_iter().collect();
        assert_eq!(target.render(&params).unwrap(), "/assets/");
    }

    #[test]
    fn rewrite_reports_unparsable_targets() {
        let err = rewrite("api/{id}", &Params::new()).unwrap_err();
        assert!(matches!(err, RewriteError::Pattern { target, .. } if target == "api/{id}"));
    }

    #[test]
    fn render_reports_missing_params() {
        let target = Pattern::parse("/api/{id}").unwrap();
        let err = target.render(&Params::new()).unwrap_err();
        assert!(matches!(err, RewriteError::MissingParam(name) if name == "id"));
    }
}
