//! Stored value types: subject data, rank ladders and context inheritance.
//!
//! All values are immutable snapshots. Modifiers consume the value and return
//! a new one; publishing the new value is the store's job.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reserved subject type (and identifier) holding fallback data.
pub const SUBJECTS_DEFAULTS: &str = "default";

/// Context key describing the address a connection originates from.
pub const LOCAL_IP_CONTEXT: &str = "localip";

/// Loopback address granted full access by the default data.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Identifies one subject record: `(subject type, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectDataKey {
    pub subject_type: String,
    pub identifier: String,
}

impl SubjectDataKey {
    /// Key of `identifier` within `subject_type`.
    pub fn new(subject_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for SubjectDataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.identifier)
    }
}

/// A single contextual qualifier, e.g. `world=nether` or `localip=127.0.0.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextValue {
    pub key: String,
    pub value: String,
}

impl ContextValue {
    /// Context `key=value`.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A set of contexts under which a segment of subject data applies.
/// The empty set is the global context.
pub type ContextSet = BTreeSet<ContextValue>;

/// Subject data that applies under one specific context set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub contexts: ContextSet,
    #[serde(default)]
    pub permissions: BTreeMap<String, i32>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub parents: Vec<SubjectDataKey>,
    #[serde(default)]
    pub default_value: i32,
}

impl Segment {
    fn new(contexts: ContextSet) -> Self {
        Self {
            contexts,
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.parents.is_empty()
            && self.default_value == 0
    }
}

/// Immutable snapshot of one subject's permissions, options and parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableSubjectData {
    #[serde(default)]
    segments: Vec<Segment>,
}

impl ImmutableSubjectData {
    /// Data with no segments.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no segment carries any data.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(Segment::is_empty)
    }

    /// Segment for exactly `contexts`.
    pub fn segment(&self, contexts: &ContextSet) -> Option<&Segment> {
        self.segments.iter().find(|s| &s.contexts == contexts)
    }

    /// Context sets that carry any data.
    pub fn active_contexts(&self) -> Vec<&ContextSet> {
        self.segments
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| &s.contexts)
            .collect()
    }

    /// Permission value set in `contexts`.
    pub fn permission(&self, contexts: &ContextSet, permission: &str) -> Option<i32> {
        self.segment(contexts)
            .and_then(|s| s.permissions.get(permission).copied())
    }

    /// Option value set in `contexts`.
    pub fn option(&self, contexts: &ContextSet, key: &str) -> Option<&str> {
        self.segment(contexts)
            .and_then(|s| s.options.get(key).map(String::as_str))
    }

    /// Parents in `contexts`, in order.
    pub fn parents(&self, contexts: &ContextSet) -> &[SubjectDataKey] {
        self.segment(contexts)
            .map(|s| s.parents.as_slice())
            .unwrap_or(&[])
    }

    pub fn default_value(&self, contexts: &ContextSet) -> i32 {
        self.segment(contexts).map(|s| s.default_value).unwrap_or(0)
    }

    /// Set a permission value; `0` unsets it.
    pub fn with_permission(self, contexts: ContextSet, permission: impl Into<String>, value: i32) -> Self {
        let permission = permission.into();
        self.update(contexts, |s| {
            if value == 0 {
                s.permissions.remove(&permission);
            } else {
                s.permissions.insert(permission, value);
            }
        })
    }

    /// Unset a permission.
    pub fn without_permission(self, contexts: ContextSet, permission: &str) -> Self {
        self.update(contexts, |s| {
            s.permissions.remove(permission);
        })
    }

    /// Set an option.
    pub fn with_option(self, contexts: ContextSet, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.update(contexts, |s| {
            s.options.insert(key, value);
        })
    }

    /// Unset an option.
    pub fn without_option(self, contexts: ContextSet, key: &str) -> Self {
        self.update(contexts, |s| {
            s.options.remove(key);
        })
    }

    /// Add a parent; parents added later take precedence, so it goes first.
    pub fn with_parent(self, contexts: ContextSet, parent: SubjectDataKey) -> Self {
        self.update(contexts, |s| {
            s.parents.retain(|p| p != &parent);
            s.parents.insert(0, parent);
        })
    }

    /// Remove a parent.
    pub fn without_parent(self, contexts: ContextSet, parent: &SubjectDataKey) -> Self {
        self.update(contexts, |s| s.parents.retain(|p| p != parent))
    }

    /// Set the fallback value for unset permissions.
    pub fn with_default_value(self, contexts: ContextSet, value: i32) -> Self {
        self.update(contexts, |s| s.default_value = value)
    }

    /// Drop everything set in `contexts`.
    pub fn without_segment(mut self, contexts: &ContextSet) -> Self {
        self.segments.retain(|s| &s.contexts != contexts);
        self
    }

    fn update(mut self, contexts: ContextSet, apply: impl FnOnce(&mut Segment)) -> Self {
        let idx = match self.segments.iter().position(|s| s.contexts == contexts) {
            Some(idx) => idx,
            None => {
                self.segments.push(Segment::new(contexts));
                self.segments.len() - 1
            }
        };
        apply(&mut self.segments[idx]);
        if self.segments[idx].is_empty() {
            self.segments.remove(idx);
        }
        self
    }
}

/// A named, ordered list of ranks used for promotion and demotion.
///
/// Index 0 is the lowest rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankLadder {
    name: String,
    #[serde(default)]
    ranks: Vec<SubjectDataKey>,
}

impl RankLadder {
    /// Empty ladder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ranks: Vec::new(),
        }
    }

    /// Ladder name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ranks from lowest to highest.
    pub fn ranks(&self) -> &[SubjectDataKey] {
        &self.ranks
    }

    /// True if the ladder has no ranks.
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Append a rank at the top of the ladder. Existing ranks are moved.
    pub fn with_rank(mut self, rank: SubjectDataKey) -> Self {
        self.ranks.retain(|r| r != &rank);
        self.ranks.push(rank);
        self
    }

    /// Insert `rank` at `index`, moving it if already present.
    pub fn with_rank_at(mut self, index: usize, rank: SubjectDataKey) -> Self {
        self.ranks.retain(|r| r != &rank);
        let index = index.min(self.ranks.len());
        self.ranks.insert(index, rank);
        self
    }

    /// Remove `rank` from the ladder.
    pub fn without_rank(mut self, rank: &SubjectDataKey) -> Self {
        self.ranks.retain(|r| r != rank);
        self
    }

    /// Index of `rank`, lowest first.
    pub fn position(&self, rank: &SubjectDataKey) -> Option<usize> {
        self.ranks.iter().position(|r| r == rank)
    }

    /// Rank a member of `current` would be promoted to.
    ///
    /// Subjects not on the ladder enter at the bottom.
    pub fn promote(&self, current: Option<&SubjectDataKey>) -> Option<&SubjectDataKey> {
        match current.and_then(|c| self.position(c)) {
            Some(idx) => self.ranks.get(idx + 1),
            None => self.ranks.first(),
        }
    }

    /// Rank a member of `current` would be demoted to; `None` at the bottom.
    pub fn demote(&self, current: &SubjectDataKey) -> Option<&SubjectDataKey> {
        match self.position(current) {
            Some(idx) if idx > 0 => self.ranks.get(idx - 1),
            _ => None,
        }
    }
}

/// Which contexts imply which others. One instance per store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInheritance {
    #[serde(default)]
    parents: Vec<(ContextValue, Vec<ContextValue>)>,
}

impl ContextInheritance {
    /// Inheritance with no parents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parents of `context`.
    pub fn parents(&self, context: &ContextValue) -> &[ContextValue] {
        self.parents
            .iter()
            .find(|(ctx, _)| ctx == context)
            .map(|(_, parents)| parents.as_slice())
            .unwrap_or(&[])
    }

    /// Replace the parents of `context`. An empty list removes the entry.
    pub fn with_parents(mut self, context: ContextValue, parents: Vec<ContextValue>) -> Self {
        self.parents.retain(|(ctx, _)| ctx != &context);
        if !parents.is_empty() {
            self.parents.push((context, parents));
        }
        self
    }

    /// Every context with its parents.
    pub fn all_parents(&self) -> impl Iterator<Item = (&ContextValue, &[ContextValue])> {
        self.parents.iter().map(|(ctx, p)| (ctx, p.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> ContextSet {
        pairs.iter().map(|(k, v)| ContextValue::new(*k, *v)).collect()
    }

    #[test]
    fn test_subject_key_display() {
        assert_eq!(SubjectDataKey::new("user", "alice").to_string(), "user:alice");
    }

    #[test]
    fn test_subject_data_modifiers_are_persistent() {
        let global = ContextSet::new();
        let base = ImmutableSubjectData::new();
        let updated = base
            .clone()
            .with_permission(global.clone(), "build.place", 1);

        assert!(base.is_empty());
        assert_eq!(updated.permission(&global, "build.place"), Some(1));
    }

    #[test]
    fn test_zero_permission_unsets_and_drops_segment() {
        let nether = ctx(&[("world", "nether")]);
        let data = ImmutableSubjectData::new()
            .with_permission(nether.clone(), "fly", 1)
            .with_permission(nether.clone(), "fly", 0);

        assert!(data.segment(&nether).is_none());
        assert!(data.is_empty());
    }

    #[test]
    fn test_default_value_is_scoped_to_contexts() {
        let local = ctx(&[(LOCAL_IP_CONTEXT, LOOPBACK_ADDRESS)]);
        let data = ImmutableSubjectData::new().with_default_value(local.clone(), 1);

        assert_eq!(data.default_value(&local), 1);
        assert_eq!(data.default_value(&ContextSet::new()), 0);
        assert_eq!(data.active_contexts(), vec![&local]);
    }

    #[test]
    fn test_parents_newest_first() {
        let global = ContextSet::new();
        let data = ImmutableSubjectData::new()
            .with_parent(global.clone(), SubjectDataKey::new("group", "member"))
            .with_parent(global.clone(), SubjectDataKey::new("group", "vip"))
            .with_parent(global.clone(), SubjectDataKey::new("group", "member"));

        let parents = data.parents(&global);
        assert_eq!(parents.len(), 2);
        assert_eq!(parents[0].identifier, "member");
    }

    #[test]
    fn test_options() {
        let global = ContextSet::new();
        let data = ImmutableSubjectData::new().with_option(global.clone(), "prefix", "[A]");
        assert_eq!(data.option(&global, "prefix"), Some("[A]"));

        let data = data.without_option(global.clone(), "prefix");
        assert_eq!(data.option(&global, "prefix"), None);
    }

    #[test]
    fn test_subject_data_json() {
        let data = ImmutableSubjectData::new()
            .with_permission(ctx(&[("world", "nether")]), "fly", -1)
            .with_option(ContextSet::new(), "suffix", "!");
        let json = serde_json::to_string(&data).unwrap();
        let loaded: ImmutableSubjectData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, loaded);
    }

    #[test]
    fn test_rank_ladder_promote_demote() {
        let member = SubjectDataKey::new("group", "member");
        let mod_ = SubjectDataKey::new("group", "moderator");
        let admin = SubjectDataKey::new("group", "admin");
        let ladder = RankLadder::new("staff")
            .with_rank(member.clone())
            .with_rank(mod_.clone())
            .with_rank(admin.clone());

        assert_eq!(ladder.promote(None), Some(&member));
        assert_eq!(ladder.promote(Some(&member)), Some(&mod_));
        assert_eq!(ladder.promote(Some(&admin)), None);
        assert_eq!(ladder.demote(&mod_), Some(&member));
        assert_eq!(ladder.demote(&member), None);
    }

    #[test]
    fn test_rank_ladder_reinsert_moves_rank() {
        let a = SubjectDataKey::new("group", "a");
        let b = SubjectDataKey::new("group", "b");
        let ladder = RankLadder::new("l")
            .with_rank(a.clone())
            .with_rank(b.clone())
            .with_rank_at(0, b.clone());

        assert_eq!(ladder.ranks(), &[b, a.clone()]);
        assert_eq!(ladder.without_rank(&a).ranks().len(), 1);
    }

    #[test]
    fn test_context_inheritance() {
        let nether = ContextValue::new("world", "nether");
        let overworld = ContextValue::new("world", "overworld");
        let inheritance = ContextInheritance::new().with_parents(nether.clone(), vec![overworld.clone()]);

        assert_eq!(inheritance.parents(&nether), &[overworld]);
        assert!(inheritance.parents(&ContextValue::new("world", "end")).is_empty());

        let cleared = inheritance.with_parents(nether.clone(), Vec::new());
        assert_eq!(cleared.all_parents().count(), 0);
    }
}
