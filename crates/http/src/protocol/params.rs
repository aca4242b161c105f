use serde::de::DeserializeOwned;

use crate::protocol::ParseError;

/// Request parameters gathered from the query string and an url-encoded form body.
///
/// Repeated keys are kept in arrival order, query parameters first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn from_query(query: &str) -> Result<Self, ParseError> {
        let mut params = Self::default();
        params.extend_from_urlencoded(query.as_bytes())?;
        Ok(params)
    }

    pub fn extend_from_urlencoded(&mut self, input: &[u8]) -> Result<(), ParseError> {
        if input.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(input)
            .map_err(|e| ParseError::invalid_body(format!("malformed url-encoded parameters: {e}")))?;
        self.entries.extend(pairs);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.entries.iter().filter(move |(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deserializes the parameters into a typed value, the last value of a repeated key wins.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ParseError> {
        let encoded = serde_urlencoded::to_string(&self.entries)
            .map_err(|e| ParseError::invalid_body(format!("can't encode parameters: {e}")))?;
        serde_urlencoded::from_str(&encoded).map_err(|e| ParseError::invalid_body(format!("can't decode parameters: {e}")))
    }
}
