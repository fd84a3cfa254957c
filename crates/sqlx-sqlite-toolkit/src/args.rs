//! Statement arguments: positional and named scalar values, with the
//! placeholder-resolution rules SQLite's own bind API doesn't enforce for
//! mixed `?`, `?N`, and `:name`/`@name`/`$name` placeholder styles.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;

use crate::{Error, Result};

/// One of SQLite's five storage classes.
///
/// Equality and hashing treat `Int` and `Real` as equal when they represent
/// the same numeric value (`1` and `1.0` compare equal), since SQLite itself
/// performs this coercion losslessly for integers representable in `f64`.
#[derive(Debug, Clone)]
pub enum Scalar {
   Null,
   Int(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl PartialEq for Scalar {
   fn eq(&self, other: &Self) -> bool {
      match (self, other) {
         (Scalar::Null, Scalar::Null) => true,
         (Scalar::Int(a), Scalar::Int(b)) => a == b,
         (Scalar::Real(a), Scalar::Real(b)) => a == b,
         (Scalar::Int(a), Scalar::Real(b)) | (Scalar::Real(b), Scalar::Int(a)) => *a as f64 == *b,
         (Scalar::Text(a), Scalar::Text(b)) => a == b,
         (Scalar::Blob(a), Scalar::Blob(b)) => a == b,
         _ => false,
      }
   }
}
impl Eq for Scalar {}

impl std::hash::Hash for Scalar {
   fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
      match self {
         Scalar::Null => 0u8.hash(state),
         Scalar::Int(i) => {
            1u8.hash(state);
            (*i as f64).to_bits().hash(state);
         }
         Scalar::Real(r) => {
            1u8.hash(state);
            r.to_bits().hash(state);
         }
         Scalar::Text(s) => {
            2u8.hash(state);
            s.hash(state);
         }
         Scalar::Blob(b) => {
            3u8.hash(state);
            b.hash(state);
         }
      }
   }
}

impl From<serde_json::Value> for Scalar {
   fn from(value: serde_json::Value) -> Self {
      use serde_json::Value as J;
      match value {
         J::Null => Scalar::Null,
         J::Bool(b) => Scalar::Int(b as i64),
         J::Number(n) => {
            if let Some(i) = n.as_i64() {
               Scalar::Int(i)
            } else {
               Scalar::Real(n.as_f64().unwrap_or_default())
            }
         }
         J::String(s) => Scalar::Text(s),
         other => Scalar::Text(other.to_string()),
      }
   }
}

/// The positional and named values available for binding a statement.
///
/// Built up with `+` (fatal on named-key collisions) or [`append`](Self::append)
/// (right-biased overwrite).
#[derive(Debug, Clone, Default)]
pub struct StatementArguments {
   pub values: Vec<Scalar>,
   pub named: HashMap<String, Scalar>,
}

impl StatementArguments {
   pub fn new(values: Vec<Scalar>) -> Self {
      Self {
         values,
         named: HashMap::new(),
      }
   }

   pub fn with_named(mut self, named: HashMap<String, Scalar>) -> Self {
      self.named = named;
      self
   }

   /// Merges `other` into `self`, overwriting any colliding named keys and
   /// returning the values that were replaced.
   pub fn append(&mut self, other: StatementArguments) -> HashMap<String, Scalar> {
      self.values.extend(other.values);
      let mut replaced = HashMap::new();
      for (key, value) in other.named {
         if let Some(old) = self.named.insert(key.clone(), value) {
            replaced.insert(key, old);
         }
      }
      replaced
   }
}

impl std::ops::Add for StatementArguments {
   type Output = StatementArguments;

   /// Concatenates positional values and merges named maps.
   ///
   /// # Panics
   ///
   /// Panics if both sides define the same named key — unlike [`append`](StatementArguments::append),
   /// this operator treats that as a programmer error.
   fn add(mut self, rhs: StatementArguments) -> StatementArguments {
      for key in rhs.named.keys() {
         if self.named.contains_key(key) {
            panic!("duplicate named argument '{key}' in StatementArguments addition");
         }
      }
      self.values.extend(rhs.values);
      self.named.extend(rhs.named);
      self
   }
}

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"\?(\d+)?|[:@$]([A-Za-z_][A-Za-z0-9_]*)").expect("placeholder regex is valid")
});

/// Resolves every placeholder in `sql` against `args`, in the order sqlx's
/// positional `bind()` calls must supply them.
///
/// - An explicit `?N` consumes `args.values[N-1]` directly without advancing
///   the implicit cursor, but raises the cursor's floor to `N` so later bare
///   `?`/named-fallback placeholders don't re-consume an index already
///   spoken for explicitly.
/// - A named placeholder (`:name`, `@name`, `$name`) present in `args.named`
///   resolves from there without touching the cursor.
/// - Anything else (a bare `?`, or a named placeholder absent from
///   `args.named`) consumes the next positional value starting at the
///   cursor and advances it by one.
pub fn extract_bindings(sql: &str, args: &StatementArguments) -> Result<Vec<Scalar>> {
   let mut cursor = 0usize;
   let mut out = Vec::new();

   for caps in PLACEHOLDER_RE.captures_iter(sql) {
      if let Some(n) = caps.get(1) {
         let index: usize = n
            .as_str()
            .parse()
            .map_err(|_| Error::InvalidPlaceholderIndex(n.as_str().to_string()))?;
         if index == 0 {
            return Err(Error::InvalidPlaceholderIndex(n.as_str().to_string()));
         }
         let value = args
            .values
            .get(index - 1)
            .cloned()
            .ok_or_else(|| Error::MissingArgument(format!("?{index}")))?;
         out.push(value);
         cursor = cursor.max(index);
         continue;
      }

      if let Some(name_match) = caps.get(2) {
         let name = name_match.as_str();
         if let Some(value) = args.named.get(name) {
            out.push(value.clone());
            continue;
         }
         let value = args
            .values
            .get(cursor)
            .cloned()
            .ok_or_else(|| Error::MissingArgument(name.to_string()))?;
         cursor += 1;
         out.push(value);
         continue;
      }

      // Bare `?`.
      let value = args
         .values
         .get(cursor)
         .cloned()
         .ok_or(Error::ArgumentCountMismatch)?;
      cursor += 1;
      out.push(value);
   }

   Ok(out)
}
