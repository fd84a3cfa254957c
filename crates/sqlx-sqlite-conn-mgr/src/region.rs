//! Region algebra over database writes: tables, columns, and rowids.
//!
//! A [`DatabaseRegion`] describes the footprint a statement might touch or
//! an observer cares about. Regions form a lattice: [`DatabaseRegion::empty`]
//! is the bottom element, [`DatabaseRegion::full_database`] is the top
//! (absorbing) element, and everything else is a per-table breakdown.

use std::collections::{BTreeMap, BTreeSet};

/// A case-insensitive SQL identifier (table or column name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
   pub fn new(name: impl AsRef<str>) -> Self {
      Self(name.as_ref().to_ascii_lowercase())
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }
}

impl From<&str> for Identifier {
   fn from(value: &str) -> Self {
      Self::new(value)
   }
}

impl From<String> for Identifier {
   fn from(value: String) -> Self {
      Self::new(value)
   }
}

/// The portion of a single table a region covers.
///
/// `columns: None` means "all columns"; `columns: Some(set)` restricts to
/// those columns. Same for `rowids`. An empty (but `Some`) set means the
/// table contributes nothing and is pruned during union/intersection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableRegion {
   pub columns: Option<BTreeSet<Identifier>>,
   pub rowids: Option<BTreeSet<i64>>,
}

impl TableRegion {
   pub fn full() -> Self {
      Self {
         columns: None,
         rowids: None,
      }
   }

   pub fn columns(cols: impl IntoIterator<Item = Identifier>) -> Self {
      Self {
         columns: Some(cols.into_iter().collect()),
         rowids: None,
      }
   }

   pub fn rowids(ids: impl IntoIterator<Item = i64>) -> Self {
      Self {
         columns: None,
         rowids: Some(ids.into_iter().collect()),
      }
   }

   fn is_empty(&self) -> bool {
      matches!(&self.columns, Some(c) if c.is_empty()) || matches!(&self.rowids, Some(r) if r.is_empty())
   }

   fn union(&self, other: &Self) -> Self {
      let columns = match (&self.columns, &other.columns) {
         (None, _) | (_, None) => None,
         (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
      };
      let rowids = match (&self.rowids, &other.rowids) {
         (None, _) | (_, None) => None,
         (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
      };
      Self { columns, rowids }
   }

   fn intersection(&self, other: &Self) -> Self {
      let columns = match (&self.columns, &other.columns) {
         (None, b) => b.clone(),
         (a, None) => a.clone(),
         (Some(a), Some(b)) => Some(a.intersection(b).cloned().collect()),
      };
      let rowids = match (&self.rowids, &other.rowids) {
         (None, b) => b.clone(),
         (a, None) => a.clone(),
         (Some(a), Some(b)) => Some(a.intersection(b).cloned().collect()),
      };
      Self { columns, rowids }
   }

   fn contains_column(&self, col: &Identifier) -> bool {
      match &self.columns {
         None => true,
         Some(cols) => cols.contains(col),
      }
   }

   fn contains_rowid(&self, rowid: i64) -> bool {
      match &self.rowids {
         None => true,
         Some(ids) => ids.contains(&rowid),
      }
   }
}

/// The kind of change a write statement performs, used to derive the
/// region it would touch before execution (for authorizer-time filtering).
#[derive(Debug, Clone)]
pub enum DatabaseEventKind {
   Insert { table: Identifier },
   Delete { table: Identifier },
   Update { table: Identifier, columns: BTreeSet<Identifier> },
}

impl DatabaseEventKind {
   pub fn table(&self) -> &Identifier {
      match self {
         Self::Insert { table } | Self::Delete { table } => table,
         Self::Update { table, .. } => table,
      }
   }

   fn region(&self) -> DatabaseRegion {
      match self {
         Self::Insert { table } | Self::Delete { table } => DatabaseRegion::table(table.clone()),
         Self::Update { table, columns } => {
            DatabaseRegion::table_columns(table.clone(), columns.iter().cloned())
         }
      }
   }
}

/// A single realized change event (observed via the preupdate/commit hooks).
///
/// `table: None` represents an unadvertised shadow-table write (e.g. from a
/// virtual table module) that the authorizer could not attribute to a known
/// table name; such events conservatively intersect every non-empty region.
#[derive(Debug, Clone)]
pub struct DatabaseEvent {
   pub kind: EventKind,
   pub table: Option<Identifier>,
   pub rowid: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
   Insert,
   Update,
   Delete,
}

/// A footprint over the whole database: a set of tables (each with an
/// optional column/rowid restriction), or one of the two lattice extremes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseRegion {
   Empty,
   Full,
   Tables(BTreeMap<Identifier, TableRegion>),
}

impl DatabaseRegion {
   pub fn empty() -> Self {
      Self::Empty
   }

   pub fn full_database() -> Self {
      Self::Full
   }

   pub fn table(name: impl Into<Identifier>) -> Self {
      let mut map = BTreeMap::new();
      map.insert(name.into(), TableRegion::full());
      Self::Tables(map)
   }

   pub fn table_columns(name: impl Into<Identifier>, columns: impl IntoIterator<Item = Identifier>) -> Self {
      let mut map = BTreeMap::new();
      map.insert(name.into(), TableRegion::columns(columns));
      Self::Tables(map)
   }

   pub fn table_rowids(name: impl Into<Identifier>, rowids: impl IntoIterator<Item = i64>) -> Self {
      let mut map = BTreeMap::new();
      map.insert(name.into(), TableRegion::rowids(rowids));
      Self::Tables(map)
   }

   pub fn is_empty(&self) -> bool {
      matches!(self, Self::Empty) || matches!(self, Self::Tables(m) if m.is_empty())
   }

   pub fn union(&self, other: &Self) -> Self {
      match (self, other) {
         (Self::Full, _) | (_, Self::Full) => Self::Full,
         (Self::Empty, x) | (x, Self::Empty) => x.clone(),
         (Self::Tables(a), Self::Tables(b)) => {
            let mut out = a.clone();
            for (table, region) in b {
               out.entry(table.clone())
                  .and_modify(|existing| *existing = existing.union(region))
                  .or_insert_with(|| region.clone());
            }
            out.retain(|_, region| !region.is_empty());
            Self::Tables(out)
         }
      }
   }

   pub fn intersection(&self, other: &Self) -> Self {
      match (self, other) {
         (Self::Empty, _) | (_, Self::Empty) => Self::Empty,
         (Self::Full, x) | (x, Self::Full) => x.clone(),
         (Self::Tables(a), Self::Tables(b)) => {
            let mut out = BTreeMap::new();
            for (table, region) in a {
               if let Some(other_region) = b.get(table) {
                  let merged = region.intersection(other_region);
                  if !merged.is_empty() {
                     out.insert(table.clone(), merged);
                  }
               }
            }
            Self::Tables(out)
         }
      }
   }

   /// Whether a statement of this event kind could touch this region,
   /// judged before execution (used by the authorizer fast path).
   pub fn intersects_events_of_kind(&self, kind: &DatabaseEventKind) -> bool {
      !self.intersection(&kind.region()).is_empty()
   }

   /// Whether a realized change event falls inside this region.
   pub fn intersects_event(&self, event: &DatabaseEvent) -> bool {
      match self {
         Self::Empty => false,
         Self::Full => true,
         Self::Tables(map) => match &event.table {
            // Shadow-table writes with no attributable name conservatively match.
            None => true,
            Some(table) => match map.get(table) {
               None => false,
               Some(region) => region.contains_rowid(event.rowid),
            },
         },
      }
   }

   /// Whether this region includes a given column of a given table, used
   /// by the broker's per-row filtering of UPDATE events.
   pub fn contains_table_column(&self, table: &Identifier, column: &Identifier) -> bool {
      match self {
         Self::Empty => false,
         Self::Full => true,
         Self::Tables(map) => map.get(table).is_some_and(|r| r.contains_column(column)),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn empty_is_absorbing_for_intersection() {
      let full = DatabaseRegion::full_database();
      assert_eq!(DatabaseRegion::empty().intersection(&full), DatabaseRegion::Empty);
   }

   #[test]
   fn full_is_absorbing_for_union() {
      let t = DatabaseRegion::table("users");
      assert_eq!(t.union(&DatabaseRegion::full_database()), DatabaseRegion::Full);
   }

   #[test]
   fn table_identifiers_are_case_insensitive() {
      let a = DatabaseRegion::table("Users");
      let b = DatabaseRegion::table("USERS");
      assert_eq!(a, b);
   }

   #[test]
   fn column_restricted_union_keeps_narrowest_when_disjoint_then_unions() {
      let a = DatabaseRegion::table_columns("users", [Identifier::new("name")]);
      let b = DatabaseRegion::table_columns("users", [Identifier::new("email")]);
      let merged = a.union(&b);
      let event_name = DatabaseEvent {
         kind: EventKind::Update,
         table: Some(Identifier::new("users")),
         rowid: 1,
      };
      assert!(merged.intersects_event(&event_name));
   }

   #[test]
   fn unknown_table_shadow_write_always_matches_nonempty_region() {
      let region = DatabaseRegion::table("users");
      let event = DatabaseEvent {
         kind: EventKind::Insert,
         table: None,
         rowid: 42,
      };
      assert!(region.intersects_event(&event));
      assert!(!DatabaseRegion::empty().intersects_event(&event));
   }

   #[test]
   fn rowid_scoped_region_excludes_other_rowids() {
      let region = DatabaseRegion::table_rowids("users", [1, 2, 3]);
      let hit = DatabaseEvent {
         kind: EventKind::Update,
         table: Some(Identifier::new("users")),
         rowid: 2,
      };
      let miss = DatabaseEvent {
         kind: EventKind::Update,
         table: Some(Identifier::new("users")),
         rowid: 99,
      };
      assert!(region.intersects_event(&hit));
      assert!(!region.intersects_event(&miss));
   }
}
