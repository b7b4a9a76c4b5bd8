//! One-parameter bifurcation diagram over the coupling strength.
//!
//! Both equilibria are known in closed form, so the sweep evaluates them at
//! evenly spaced coupling values instead of running a continuation. The two
//! branches meet at `coupling == decay`, where they exchange stability in a
//! transcritical bifurcation.

use crate::equilibrium::{equilibria, Stability};
use crate::error::{Error, Result};
use crate::model::ModelParameters;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchFamily {
    /// `I* = 0`, present for every coupling.
    Ghosting,
    /// `I* = 1 - decay / coupling`, present only for `coupling > decay`.
    Engaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchPoint {
    pub coupling: f64,
    /// Interest level of the (symmetric) equilibrium.
    pub level: f64,
    pub stability: Stability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifurcationBranch {
    pub family: BranchFamily,
    /// Points in increasing coupling order.
    pub points: Vec<BranchPoint>,
    /// Indices of points where the stability differs from the previous point.
    pub bifurcations: Vec<usize>,
}

impl BifurcationBranch {
    fn new(family: BranchFamily) -> Self {
        Self {
            family,
            points: Vec::new(),
            bifurcations: Vec::new(),
        }
    }

    fn push(&mut self, point: BranchPoint) {
        if self
            .points
            .last()
            .is_some_and(|prev| prev.stability != point.stability)
        {
            self.bifurcations.push(self.points.len());
        }
        self.points.push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Maximal runs of points sharing the same stability, in coupling order.
    pub fn segments(&self) -> impl Iterator<Item = &[BranchPoint]> + '_ {
        self.points.chunk_by(|a, b| a.stability == b.stability)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifurcationDiagram {
    pub decay: f64,
    pub ghosting: BifurcationBranch,
    pub engaged: BifurcationBranch,
    /// `Some(decay)` when the swept range contains the transcritical point.
    pub critical_coupling: Option<f64>,
}

/// Samples `sample_count` coupling values evenly across `coupling_range`
/// (both ends included) and records both equilibrium branches.
pub fn sweep(
    decay: f64,
    coupling_range: (f64, f64),
    sample_count: usize,
) -> Result<BifurcationDiagram> {
    let (start, end) = coupling_range;
    if !start.is_finite() || !end.is_finite() || end <= start {
        return Err(Error::InvalidRange {
            what: "coupling",
            start,
            end,
            reason: "bounds must be finite with end > start",
        });
    }
    if start < 0.0 {
        return Err(Error::InvalidRange {
            what: "coupling",
            start,
            end,
            reason: "coupling cannot be negative",
        });
    }
    if sample_count < 2 {
        return Err(Error::InvalidParameter {
            name: "sample_count",
            value: sample_count as f64,
            reason: "at least two samples are required",
        });
    }
    let base = ModelParameters::new(decay, start)?;

    let mut ghosting = BifurcationBranch::new(BranchFamily::Ghosting);
    let mut engaged = BifurcationBranch::new(BranchFamily::Engaged);
    let last = (sample_count - 1) as f64;

    for i in 0..sample_count {
        let coupling = if i + 1 == sample_count {
            end
        } else {
            start + (end - start) * (i as f64 / last)
        };
        let parameters = base.with_coupling(coupling)?;
        let set = equilibria(&parameters);

        ghosting.push(BranchPoint {
            coupling,
            level: set.ghosting.state.interest_a,
            stability: set.ghosting.stability,
        });
        if let Some(point) = set.engaged {
            engaged.push(BranchPoint {
                coupling,
                level: point.state.interest_a,
                stability: point.stability,
            });
        }
    }

    let critical_coupling = (start..=end).contains(&decay).then_some(decay);

    debug!(
        decay,
        start,
        end,
        sample_count,
        engaged_points = engaged.points.len(),
        ?critical_coupling,
        "bifurcation sweep complete"
    );

    Ok(BifurcationDiagram {
        decay,
        ghosting,
        engaged,
        critical_coupling,
    })
}
