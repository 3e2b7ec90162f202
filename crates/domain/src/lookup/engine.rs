use std::collections::{HashMap, HashSet};

use crate::policy::entity::{FlowPolicy, Operator, TagSelector};
use crate::policy::error::PolicyError;
use crate::policy::tags::TagStore;

/// Inverted-index database of tag selectors.
///
/// Selectors are assigned 1-based indexes in insertion order. Lookup cost is
/// proportional to the claim count times the number of prefixes per key, not
/// to the number of selectors.
///
/// Matching is evaluated in three steps: positive clauses are credited per
/// claim (exact value first, then prefixes longest-first, one credit per
/// selector and key), negative clauses are then verified against the whole
/// claim bag, and finally the lowest-index selector with a full credit count
/// and no violated clause wins. The result is independent of claim order.
#[derive(Debug, Default)]
pub struct PolicyDb {
    selectors: Vec<TagSelector>,
    clause_counts: Vec<usize>,
    equal_map: HashMap<String, HashMap<String, Vec<usize>>>,
    not_equal_map: HashMap<String, HashMap<String, Vec<usize>>>,
    /// Prefix lengths per key, descending. Length 0 encodes `KeyExists`
    /// (stored under the empty value).
    equal_prefixes: HashMap<String, Vec<usize>>,
    not_equal_prefixes: HashMap<String, Vec<usize>>,
    /// Selectors carrying a `NotEqual` clause, per key.
    not_equal_keys: HashMap<String, Vec<usize>>,
    /// Selectors carrying a `KeyNotExists` clause, per key.
    not_key_exists: HashMap<String, Vec<usize>>,
    /// Clause-ID force-match table.
    id_map: HashMap<String, Vec<usize>>,
}

/// Credit keys distinguish claim-key credits from rule-ID credits so a
/// selector clause is counted at most once per search.
#[derive(Hash, PartialEq, Eq)]
enum CreditKey<'a> {
    Key(&'a str),
    Id(&'a str),
}

impl PolicyDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of selectors loaded.
    pub fn policy_count(&self) -> usize {
        self.selectors.len()
    }

    /// Add a selector and return its 1-based index.
    pub fn add_policy(&mut self, selector: TagSelector) -> Result<usize, PolicyError> {
        selector.validate()?;

        let idx = self.selectors.len();
        for clause in &selector.clauses {
            match clause.operator {
                Operator::Equal => {
                    for value in &clause.values {
                        Self::index_value(
                            &mut self.equal_map,
                            &mut self.equal_prefixes,
                            &clause.key,
                            value,
                            idx,
                        );
                    }
                }
                Operator::NotEqual => {
                    push_unique(self.not_equal_keys.entry(clause.key.clone()).or_default(), idx);
                    for value in &clause.values {
                        Self::index_value(
                            &mut self.not_equal_map,
                            &mut self.not_equal_prefixes,
                            &clause.key,
                            value,
                            idx,
                        );
                    }
                }
                Operator::KeyExists => {
                    Self::index_value(
                        &mut self.equal_map,
                        &mut self.equal_prefixes,
                        &clause.key,
                        "*",
                        idx,
                    );
                }
                Operator::KeyNotExists => {
                    push_unique(self.not_key_exists.entry(clause.key.clone()).or_default(), idx);
                }
            }

            if let Some(ref id) = clause.id {
                self.id_map.entry(id.clone()).or_default().push(idx);
            }
        }

        self.clause_counts.push(selector.clauses.len());
        self.selectors.push(selector);
        Ok(idx + 1)
    }

    /// Store a clause value under the stripped prefix (trailing `*`) or the
    /// exact value, and keep the per-key prefix list sorted descending so
    /// the longest prefix is tried first.
    fn index_value(
        map: &mut HashMap<String, HashMap<String, Vec<usize>>>,
        prefixes: &mut HashMap<String, Vec<usize>>,
        key: &str,
        value: &str,
        idx: usize,
    ) {
        let by_value = map.entry(key.to_string()).or_default();
        match value.strip_suffix('*') {
            Some(prefix) => {
                by_value.entry(prefix.to_string()).or_default().push(idx);
                let lengths = prefixes.entry(key.to_string()).or_default();
                if !lengths.contains(&prefix.len()) {
                    lengths.push(prefix.len());
                    lengths.sort_unstable_by(|a, b| b.cmp(a));
                }
            }
            None => by_value.entry(value.to_string()).or_default().push(idx),
        }
    }

    /// Find the lowest-index selector matched by the claim bag.
    ///
    /// Returns the 1-based index and the selector's policy, or `None` when
    /// no selector matches.
    pub fn search(&self, claims: &TagStore) -> Option<(usize, &FlowPolicy)> {
        fn credit<'a>(
            credited: &mut HashSet<(usize, CreditKey<'a>)>,
            sel: usize,
            key: CreditKey<'a>,
            counts: &mut Vec<usize>,
        ) {
            if credited.insert((sel, key)) {
                counts[sel] += 1;
            }
        }

        let n = self.selectors.len();
        let mut counts = vec![0usize; n];
        let mut violated = vec![false; n];
        let mut credited: HashSet<(usize, CreditKey<'_>)> = HashSet::new();

        // Positive and per-claim negative clauses.
        for (key, value) in claims.iter() {
            if let Some(by_value) = self.equal_map.get(key) {
                if let Some(sels) = by_value.get(value) {
                    for &s in sels {
                        credit(&mut credited, s, CreditKey::Key(key), &mut counts);
                    }
                }
                if let Some(lengths) = self.equal_prefixes.get(key) {
                    for &len in lengths {
                        if len > value.len() || !value.is_char_boundary(len) {
                            continue;
                        }
                        if let Some(sels) = by_value.get(&value[..len]) {
                            for &s in sels {
                                credit(&mut credited, s, CreditKey::Key(key), &mut counts);
                            }
                        }
                    }
                }
            }

            // A NotEqual clause is satisfied by a claim with the key present
            // and a non-matching value, and violated by a matching one.
            if let Some(ne_sels) = self.not_equal_keys.get(key) {
                let mut violators: HashSet<usize> = HashSet::new();
                if let Some(by_value) = self.not_equal_map.get(key) {
                    if let Some(sels) = by_value.get(value) {
                        violators.extend(sels.iter().copied());
                    }
                    if let Some(lengths) = self.not_equal_prefixes.get(key) {
                        for &len in lengths {
                            if len > value.len() || !value.is_char_boundary(len) {
                                continue;
                            }
                            if let Some(sels) = by_value.get(&value[..len]) {
                                violators.extend(sels.iter().copied());
                            }
                        }
                    }
                }
                for &s in ne_sels {
                    if violators.contains(&s) {
                        violated[s] = true;
                    } else {
                        credit(&mut credited, s, CreditKey::Key(key), &mut counts);
                    }
                }
            }

            if let Some(sels) = self.not_key_exists.get(key) {
                for &s in sels {
                    violated[s] = true;
                }
            }
        }

        // KeyNotExists clauses are satisfied when the key is absent.
        for (key, sels) in &self.not_key_exists {
            if claims.get(key).is_none() {
                for &s in sels {
                    credit(&mut credited, s, CreditKey::Key(key), &mut counts);
                }
            }
        }

        // Rule-ID claims force-match the clause carrying that ID.
        for id in claims.claim_ids() {
            if let Some(sels) = self.id_map.get(id) {
                for &s in sels {
                    credit(&mut credited, s, CreditKey::Id(id), &mut counts);
                }
            }
        }

        (0..n)
            .find(|&s| !violated[s] && counts[s] == self.clause_counts[s])
            .map(|s| (s + 1, &self.selectors[s].policy))
    }
}

fn push_unique(list: &mut Vec<usize>, idx: usize) {
    if list.last() != Some(&idx) {
        list.push(idx);
    }
}
