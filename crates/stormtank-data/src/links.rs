//! Effective links: several monitored links combined into one series.
//!
//! An overflow often discharges through more than one pipe. The combined
//! link carries the summed flow of its components and, where any component
//! reports depth, the deepest reading at each step.

use stormtank_core::series::{LinkSeries, SeriesStore};
use tracing::debug;

use crate::loader::DataLoadError;
use crate::schema::EffectiveLinkData;

/// Combine `components` from `store` into one series.
pub fn aggregate(
    store: &SeriesStore,
    link: &str,
    components: &[String],
) -> Result<LinkSeries, DataLoadError> {
    if components.is_empty() {
        return Err(DataLoadError::EmptyEffectiveLink(link.to_string()));
    }

    let len = store.timeline().len();
    let mut flow = vec![0.0; len];
    let mut depth: Option<Vec<f64>> = None;
    for component in components {
        let series = store
            .get(component)
            .ok_or_else(|| DataLoadError::MissingComponent {
                link: link.to_string(),
                component: component.clone(),
            })?;
        for (total, q) in flow.iter_mut().zip(&series.flow) {
            *total += q;
        }
        if let Some(d) = &series.depth {
            match &mut depth {
                Some(deepest) => {
                    for (max, &x) in deepest.iter_mut().zip(d) {
                        *max = max.max(x);
                    }
                }
                None => depth = Some(d.clone()),
            }
        }
    }

    Ok(LinkSeries { flow, depth })
}

/// Add every effective link to `store`, in order, so a later link may use
/// an earlier one as a component.
pub fn apply_effective_links(
    store: &mut SeriesStore,
    links: &[EffectiveLinkData],
) -> Result<(), DataLoadError> {
    for link in links {
        if store.contains(&link.name) {
            return Err(DataLoadError::ShadowedLink(link.name.clone()));
        }
        let series = aggregate(store, &link.name, &link.components)?;
        debug!(
            link = %link.name,
            components = link.components.len(),
            has_depth = series.depth.is_some(),
            "effective link built"
        );
        store.insert(link.name.clone(), series)?;
    }
    Ok(())
}
