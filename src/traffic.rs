use crate::{
    datafile::{Feature, Force, Traffic},
    Context, Datafile,
};

/// Find the first traffic rule, in declared order, whose segments match `context`.
///
/// Percentage is not part of matching. It only gates enablement once a rule is selected.
pub fn find_matched_traffic<'a>(
    traffic: &'a [Traffic],
    context: &Context,
    datafile: &Datafile,
) -> Option<&'a Traffic> {
    traffic
        .iter()
        .find(|traffic| traffic.segments.matches(context, datafile))
}

/// Find the first force entry of `feature` matching `context`, along with its index.
pub fn find_force<'a>(
    feature: &'a Feature,
    context: &Context,
    datafile: &Datafile,
) -> Option<(usize, &'a Force)> {
    feature
        .force
        .iter()
        .enumerate()
        .find(|(_, force)| force.matches(context, datafile))
}

impl Traffic {
    /// Return the variation value of the allocation whose range contains `bucket_value`.
    pub fn resolve_allocation(&self, bucket_value: u32) -> Option<&str> {
        self.allocation
            .iter()
            .find(|allocation| allocation.range.contains(bucket_value))
            .map(|allocation| allocation.variation.as_str())
    }
}
