//! Transitive dependency resolution.
//!
//! Starting from one template, the resolver discovers and loads every
//! transitively referenced sub-template and returns them as a flat map keyed by
//! reference. Each reference is loaded at most once per resolution: before a
//! batch of loads starts, a pending slot is inserted for every new reference,
//! so a template that shows up again (directly, through another template, or
//! through a cycle) is never requested twice.
//!
//! The graph is walked breadth-first. Loads of one level run concurrently;
//! the next level starts only after the whole level has settled.

use std::collections::{BTreeMap, HashMap};

use futures::future::{BoxFuture, join_all};
use strsim::levenshtein;
use tracing::debug;

use crate::constants::MAX_SUGGESTION_DISTANCE;
use crate::templating::error::TemplateError;
use crate::templating::parsed::ParsedTemplate;

/// Resolved dependencies keyed by reference (local name or full identifier).
pub type DependencyMap = BTreeMap<String, ParsedTemplate>;

/// Source of sub-templates for the resolver.
///
/// A scope's loader answers from its registered partials first, then sends
/// remote references to the template source cache.
pub trait TemplateLoader: Send + Sync {
    /// Load the template a reference points to.
    fn load(&self, reference: &str) -> BoxFuture<'static, Result<ParsedTemplate, TemplateError>>;
}

enum Slot {
    Pending,
    Resolved(ParsedTemplate),
}

/// References seen so far during one resolution.
#[derive(Default)]
pub struct WorkingSet {
    slots: HashMap<String, Slot>,
}

impl WorkingSet {
    /// Whether `reference` has been seen (pending or resolved).
    pub fn contains(&self, reference: &str) -> bool {
        self.slots.contains_key(reference)
    }

    /// Whether `reference` is still waiting for its load to finish.
    pub fn is_pending(&self, reference: &str) -> bool {
        matches!(self.slots.get(reference), Some(Slot::Pending))
    }

    /// Number of references seen.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Mark the references of `template` that are new as pending, in order.
    fn claim_new(&mut self, template: &ParsedTemplate) -> Vec<String> {
        let mut batch = Vec::new();
        for reference in template.references() {
            if !self.contains(reference) {
                self.slots.insert(reference.clone(), Slot::Pending);
                batch.push(reference.clone());
            }
        }
        batch
    }

    fn resolve(&mut self, reference: &str, template: ParsedTemplate) {
        self.slots.insert(reference.to_string(), Slot::Resolved(template));
    }

    /// The resolved templates. Pending slots are dropped.
    pub fn into_dependencies(self) -> DependencyMap {
        self.slots
            .into_iter()
            .filter_map(|(reference, slot)| match slot {
                Slot::Resolved(template) => Some((reference, template)),
                Slot::Pending => None,
            })
            .collect()
    }
}

/// Resolve every transitive dependency of `template` through `loader`.
///
/// # Errors
///
/// The first failing load of a batch (in discovery order) is returned wrapped
/// with its reference; failures inside a sub-template are additionally wrapped
/// with that sub-template's reference at each level.
pub async fn resolve<L>(template: &ParsedTemplate, loader: &L) -> Result<DependencyMap, TemplateError>
where
    L: TemplateLoader + ?Sized,
{
    let mut working = WorkingSet::default();
    resolve_into(template, &mut working, loader).await?;
    Ok(working.into_dependencies())
}

/// Resolve the dependencies of `template` into an existing working set.
///
/// Works one level of the graph at a time: every reference first discovered
/// at the same depth is loaded in a single concurrent batch.
pub async fn resolve_into<L>(
    template: &ParsedTemplate,
    working: &mut WorkingSet,
    loader: &L,
) -> Result<(), TemplateError>
where
    L: TemplateLoader + ?Sized,
{
    // reference -> the template it was discovered in (None for the root)
    let mut parents: HashMap<String, Option<String>> = HashMap::new();
    let mut batch: Vec<String> = working.claim_new(template);
    for reference in &batch {
        parents.insert(reference.clone(), None);
    }

    while !batch.is_empty() {
        debug!("Loading {} template reference(s): {:?}", batch.len(), batch);
        let outcomes = join_all(batch.iter().map(|reference| loader.load(reference))).await;

        let mut loaded = Vec::with_capacity(batch.len());
        for (reference, outcome) in batch.into_iter().zip(outcomes) {
            match outcome {
                Ok(dependency) => {
                    working.resolve(&reference, dependency.clone());
                    loaded.push((reference, dependency));
                }
                Err(e) => return Err(with_parent_chain(e.in_reference(&reference), &reference, &parents)),
            }
        }

        batch = Vec::new();
        for (reference, dependency) in &loaded {
            for discovered in working.claim_new(dependency) {
                parents.insert(discovered.clone(), Some(reference.clone()));
                batch.push(discovered);
            }
        }
    }
    Ok(())
}

/// Wrap `error` with every template between `reference` and the root.
fn with_parent_chain(
    mut error: TemplateError,
    reference: &str,
    parents: &HashMap<String, Option<String>>,
) -> TemplateError {
    let mut current = parents.get(reference).cloned().flatten();
    while let Some(parent) = current {
        current = parents.get(&parent).cloned().flatten();
        error = error.in_dependencies_of(parent);
    }
    error
}

/// Resolve dependencies against a fixed partial map, without remote loading.
///
/// # Errors
///
/// Returns [`TemplateError::ReferenceNotFound`] (wrapped with context) for the
/// first reference that is not in `partials`.
pub fn resolve_local(
    template: &ParsedTemplate,
    partials: &BTreeMap<String, ParsedTemplate>,
) -> Result<DependencyMap, TemplateError> {
    let mut working = WorkingSet::default();
    resolve_local_into(template, &mut working, partials)?;
    Ok(working.into_dependencies())
}

fn resolve_local_into(
    template: &ParsedTemplate,
    working: &mut WorkingSet,
    partials: &BTreeMap<String, ParsedTemplate>,
) -> Result<(), TemplateError> {
    let batch = working.claim_new(template);
    let mut loaded = Vec::with_capacity(batch.len());
    for reference in batch {
        let dependency = partials
            .get(&reference)
            .cloned()
            .ok_or_else(|| reference_not_found(&reference, partials.keys()).in_reference(&reference))?;
        working.resolve(&reference, dependency.clone());
        loaded.push((reference, dependency));
    }
    for (reference, dependency) in &loaded {
        resolve_local_into(dependency, working, partials).map_err(|e| e.in_dependencies_of(reference))?;
    }
    Ok(())
}

/// Build a not-found error with close matches among `candidates`.
pub(crate) fn reference_not_found<'a>(
    reference: &str,
    candidates: impl IntoIterator<Item = &'a String>,
) -> TemplateError {
    let mut scored: Vec<(usize, &String)> = candidates
        .into_iter()
        .map(|candidate| (levenshtein(reference, candidate), candidate))
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .collect();
    scored.sort();
    TemplateError::ReferenceNotFound {
        reference: reference.to_string(),
        suggestions: scored.into_iter().take(3).map(|(_, name)| name.clone()).collect(),
    }
}
