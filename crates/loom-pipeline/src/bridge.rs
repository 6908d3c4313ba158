//! Gap bridging: suggest intermediate activities for an incompatible pair.
//!
//! The catalog is treated as a graph whose edges are the activity pairs the
//! transform resolver can connect (`a.return_type` into `b`'s first parameter).
//! A breadth-first search from the start activity finds the shortest chain to
//! the end activity within a bounded number of intermediate hops, so the
//! suggestion with the fewest inserted steps always wins. Among equally short
//! chains the one found first in catalog registration order is returned.
//!
//! Suggestions are advisory. Nothing here mutates the catalog or any pipeline.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::catalog::{ActivityCatalog, ActivityDescriptor, ActivityKey};
use crate::error::{PipelineError, Result};
use crate::shape::ShapeTag;
use crate::transform::{PASSTHROUGH, TransformRegistry};
use crate::validate::BridgeRequest;

/// Default number of intermediate activities a suggestion may insert.
pub const DEFAULT_MAX_HOPS: usize = 2;

/// One edge of a suggested chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeHop {
    /// Producing activity. `None` for the pipeline's external input.
    pub from: Option<ActivityKey>,
    pub to: ActivityKey,
    /// Transform applied at this boundary.
    pub transform: String,
}

/// A suggested activity chain from start to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSuggestion {
    /// Full chain, start and end included. For input gaps the chain begins at
    /// the first inserted activity.
    pub chain: Vec<ActivityKey>,
    pub hops: Vec<BridgeHop>,
    /// Human-readable explanation, suitable for composition tooling.
    pub rationale: String,
}

impl BridgeSuggestion {
    /// Activities to insert between start and end.
    pub fn intermediates(&self) -> &[ActivityKey] {
        let skip_start = usize::from(self.hops.first().is_some_and(|h| h.from.is_some()));
        let end = self.chain.len().saturating_sub(1);
        self.chain.get(skip_start..end).unwrap_or(&[])
    }

    /// Whether start and end already connect without inserted steps.
    pub fn is_direct(&self) -> bool {
        self.intermediates().is_empty()
    }
}

/// Searches the catalog for bridging chains.
#[derive(Debug, Clone, Copy)]
pub struct GapBridger<'a> {
    catalog: &'a ActivityCatalog,
    transforms: &'a TransformRegistry,
    max_hops: usize,
}

struct Node<'a> {
    key: Option<&'a ActivityKey>,
    shape: &'a ShapeTag,
    path: Vec<BridgeHop>,
}

impl<'a> GapBridger<'a> {
    pub fn new(catalog: &'a ActivityCatalog, transforms: &'a TransformRegistry) -> Self {
        Self {
            catalog,
            transforms,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Cap the number of intermediate activities.
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Suggest a chain from `start` to `end`.
    ///
    /// Returns `Ok(None)` when no chain exists within the hop cap. Fails only
    /// if either endpoint is not in the catalog.
    pub fn suggest_bridge(
        &self,
        start: &ActivityKey,
        end: &ActivityKey,
    ) -> Result<Option<BridgeSuggestion>> {
        let start = self.catalog.get(start)?;
        let end = self.catalog.get(end)?;
        let found = self.search(Some(&start.key), &start.return_type, end);
        Ok(found.map(|hops| {
            let mut chain = vec![start.key.clone()];
            chain.extend(hops.iter().map(|h| h.to.clone()));
            let rationale = rationale(&start.key.to_string(), &start.return_type, end, &hops);
            BridgeSuggestion {
                chain,
                hops,
                rationale,
            }
        }))
    }

    /// Suggest a chain that turns an external payload of `shape` into `end`'s input.
    pub fn suggest_from_input(
        &self,
        shape: &ShapeTag,
        end: &ActivityKey,
    ) -> Result<Option<BridgeSuggestion>> {
        let end = self.catalog.get(end)?;
        let found = self.search(None, shape, end);
        Ok(found.map(|hops| {
            let chain = hops.iter().map(|h| h.to.clone()).collect();
            let rationale = rationale("the pipeline input", shape, end, &hops);
            BridgeSuggestion {
                chain,
                hops,
                rationale,
            }
        }))
    }

    /// Answer a gap reported by the validator.
    pub fn suggest_for(&self, request: &BridgeRequest) -> Result<Option<BridgeSuggestion>> {
        match &request.from {
            Some(from) => self.suggest_bridge(from, &request.to),
            None => self.suggest_from_input(&request.output_shape, &request.to),
        }
    }

    fn search<'b>(
        &self,
        start: Option<&'b ActivityKey>,
        start_shape: &'b ShapeTag,
        end: &'b ActivityDescriptor,
    ) -> Option<Vec<BridgeHop>>
    where
        'a: 'b,
    {
        let catalog: &'b ActivityCatalog = self.catalog;
        let mut visited: HashSet<&'b ActivityKey> = start.into_iter().collect();
        let mut queue = VecDeque::from([Node {
            key: start,
            shape: start_shape,
            path: Vec::new(),
        }]);

        while let Some(node) = queue.pop_front() {
            let hop = |to: &ActivityKey, transform: String| BridgeHop {
                from: node.key.cloned(),
                to: to.clone(),
                transform,
            };

            if let Some(transform) = self.edge(node.shape, end) {
                let mut path = node.path.clone();
                path.push(hop(&end.key, transform));
                debug!(end = %end.key, hops = path.len(), "Found bridge");
                return Some(path);
            }

            // Intermediates used so far equals path length; stop expanding at the cap.
            if node.path.len() >= self.max_hops {
                continue;
            }

            for candidate in catalog.all() {
                if candidate.key == end.key
                    || candidate.first_param_shape().is_none()
                    || visited.contains(&candidate.key)
                {
                    continue;
                }
                if let Some(transform) = self.edge(node.shape, candidate) {
                    visited.insert(&candidate.key);
                    let mut path = node.path.clone();
                    path.push(hop(&candidate.key, transform));
                    queue.push_back(Node {
                        key: Some(&candidate.key),
                        shape: &candidate.return_type,
                        path,
                    });
                }
            }
        }

        debug!(end = %end.key, max_hops = self.max_hops, "No bridge within hop cap");
        None
    }

    /// Transform connecting `shape` to `to`'s first parameter, if exactly one does.
    fn edge(&self, shape: &ShapeTag, to: &ActivityDescriptor) -> Option<String> {
        let Some(expected) = to.first_param_shape() else {
            return Some(PASSTHROUGH.to_string());
        };
        match self.transforms.resolve(shape, expected) {
            Ok(found) => found.map(|t| t.name.clone()),
            Err(PipelineError::AmbiguousTransform { candidates, .. }) => {
                debug!(
                    from = %shape,
                    to = %to.key,
                    ?candidates,
                    "Skipping ambiguous edge"
                );
                None
            }
            Err(_) => None,
        }
    }
}

fn rationale(
    start_label: &str,
    start_shape: &ShapeTag,
    end: &ActivityDescriptor,
    hops: &[BridgeHop],
) -> String {
    let expected = end
        .first_param_shape()
        .map(ShapeTag::as_str)
        .unwrap_or("anything");

    if let [only] = hops {
        return format!(
            "{start_label} returns '{start_shape}', which {} accepts directly via {}",
            end.key, only.transform
        );
    }

    let steps: Vec<String> = hops
        .iter()
        .map(|h| format!("{} (via {})", h.to, h.transform))
        .collect();
    format!(
        "{start_label} returns '{start_shape}' but {} expects '{expected}'; insert {} to connect them: {}",
        end.key,
        hops.len() - 1,
        steps.join(" -> ")
    )
}
