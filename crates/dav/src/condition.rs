//! The `If` request header.
//!
//! The header is a list of condition lists, optionally tagged with the resource they apply
//! to. It holds when any list that applies to a resource holds; a list holds when all of its
//! conditions do. A condition names a lock token or an entity tag, possibly negated.
//!
//! Every lock token named in the header, negated ones aside, counts as submitted for the lock
//! checks of the request.

use crate::error::DavError;
use crate::path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKind {
    Token(String),
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub negated: bool,
    pub kind: ConditionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionList {
    /// the resource tag as sent, `None` for untagged lists
    pub tag: Option<String>,
    pub conditions: Vec<Condition>,
}

/// What a resource looks like when conditions are evaluated against it.
#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    pub etag: Option<String>,
    /// tokens of the locks protecting the resource
    pub tokens: Vec<String>,
}

fn unquote(etag: &str) -> &str {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.trim_matches('"')
}

impl Condition {
    fn holds(&self, state: &ResourceState, parent: Option<&ResourceState>) -> bool {
        let matched = match &self.kind {
            ConditionKind::Token(token) => {
                state.tokens.iter().any(|held| held == token) || parent.is_some_and(|parent| parent.tokens.iter().any(|held| held == token))
            }
            ConditionKind::ETag(etag) => state.etag.as_deref().is_some_and(|current| unquote(current) == unquote(etag)),
        };
        matched != self.negated
    }
}

/// Parses an `If` header value.
pub fn parse_if_header(value: &str) -> Result<Vec<ConditionList>, DavError> {
    let malformed = || DavError::bad_request(format!("malformed If header: {value}"));
    let mut lists = Vec::new();
    let mut tag: Option<String> = None;
    let mut rest = value.trim_start();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('<') {
            let (resource, after) = after.split_once('>').ok_or_else(malformed)?;
            tag = Some(resource.to_owned());
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            let (body, after) = after.split_once(')').ok_or_else(malformed)?;
            let conditions = parse_list(body).ok_or_else(malformed)?;
            lists.push(ConditionList { tag: tag.clone(), conditions });
            rest = after.trim_start();
        } else {
            return Err(malformed());
        }
    }

    if lists.is_empty() {
        return Err(malformed());
    }
    Ok(lists)
}

fn parse_list(mut body: &str) -> Option<Vec<Condition>> {
    let mut conditions = Vec::new();
    loop {
        body = body.trim_start();
        if body.is_empty() {
            break;
        }

        let negated = body.get(..3).is_some_and(|word| word.eq_ignore_ascii_case("not"));
        if negated {
            body = body[3..].trim_start();
        }

        let kind = if let Some(after) = body.strip_prefix('<') {
            let (token, after) = after.split_once('>')?;
            body = after;
            ConditionKind::Token(token.to_owned())
        } else if let Some(after) = body.strip_prefix('[') {
            let (etag, after) = after.split_once(']')?;
            body = after;
            ConditionKind::ETag(etag.to_owned())
        } else {
            return None;
        };
        conditions.push(Condition { negated, kind });
    }
    (!conditions.is_empty()).then_some(conditions)
}

/// The parsed `If` header of a request, with resource tags resolved to resource paths.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    /// lists with the resource path they apply to, `None` for the request target
    lists: Vec<(Option<Option<String>>, Vec<Condition>)>,
    tokens: Vec<String>,
}

impl Conditions {
    /// Parses `value`, resolving tags against the `mount` the handler serves.
    pub fn parse(value: Option<&str>, mount: &str) -> Result<Self, DavError> {
        let Some(value) = value else {
            return Ok(Self::default());
        };

        let mut tokens = Vec::new();
        let mut lists = Vec::new();
        for list in parse_if_header(value)? {
            for condition in &list.conditions {
                if let ConditionKind::Token(token) = &condition.kind
                    && !condition.negated
                    && !tokens.contains(token)
                {
                    tokens.push(token.clone());
                }
            }
            let scope = list.tag.map(|tag| path::resolve_href(mount, &tag));
            lists.push((scope, list.conditions));
        }
        Ok(Self { lists, tokens })
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// The lock tokens submitted with the request.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Returns true if some list names `path`, or is untagged while `path` is the target.
    pub fn applies_to(&self, path: &str, is_target: bool) -> bool {
        self.lists.iter().any(|(scope, _)| Self::scoped(scope.as_ref(), path, is_target))
    }

    fn scoped(scope: Option<&Option<String>>, path: &str, is_target: bool) -> bool {
        match scope {
            None => is_target,
            Some(tagged) => tagged.as_deref() == Some(path),
        }
    }

    /// Evaluates the lists that apply to `path` against its `state`.
    ///
    /// A resource no list applies to passes. When `parent` is given, a lock token of the
    /// parent collection also satisfies a token condition, so a client holding the
    /// collection's lock can create a member in it.
    pub fn evaluate(&self, path: &str, is_target: bool, state: &ResourceState, parent: Option<&ResourceState>) -> bool {
        let mut applicable = self.lists.iter().filter(|(scope, _)| Self::scoped(scope.as_ref(), path, is_target)).peekable();
        if applicable.peek().is_none() {
            return true;
        }
        applicable.any(|(_, conditions)| conditions.iter().all(|condition| condition.holds(state, parent)))
    }
}
