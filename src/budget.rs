//! Budget guard: decides whether the serialized tree fits a single
//! pre-filter pass or whether the two-stage filter is mandatory.
//!
//! The reasoning oracle has a fixed context budget; embedding the full tree
//! of a large repository can push the requested output allowance negative
//! and fail request construction. The guard sizes the payload up front so
//! that never happens.

/// Filtering path selected for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPlan {
    /// Tree fits the budget: one pre-filter pass over the full tree.
    SinglePass,
    /// Tree exceeds the budget: directory filter first, then a restricted
    /// pre-filter.
    TwoStage,
}

/// Pick the filtering path for a serialized tree.
///
/// `threshold` is the configured byte ceiling (`scan.large_repo_threshold`).
/// Trees at exactly the threshold still take the single pass.
pub fn plan_for_tree(tree: &str, threshold: usize) -> FilterPlan {
    if tree.len() <= threshold {
        FilterPlan::SinglePass
    } else {
        FilterPlan::TwoStage
    }
}
