//! Traversability cost over the horizontal field of view.

use crawler_types::CrawlerError;
use serde::{Deserialize, Serialize};

/// Cost assigned to every slot when no evidence is available this tick.
pub const UNKNOWN_COST: f32 = 0.5;

/// How the slots of a [`CostField`] map onto the scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldLayout {
    /// One slot per candidate heading, in degrees, ordered left to right.
    Headings(Vec<i32>),
    /// One slot per image column.
    Columns,
}

/// Ordered costs in `[0, 1]`, higher meaning more obstructed.
///
/// Constructors clamp every value and replace NaN with 1.0, so a field that
/// exists never holds an out-of-range cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostField {
    layout: FieldLayout,
    costs: Vec<f32>,
}

fn sanitize(v: f32) -> f32 {
    if v.is_nan() { 1.0 } else { v.clamp(0.0, 1.0) }
}

impl CostField {
    /// Heading field. `angles` and `costs` must have the same non-zero length.
    pub fn headings(angles: Vec<i32>, costs: Vec<f32>) -> Result<Self, CrawlerError> {
        if angles.is_empty() || angles.len() != costs.len() {
            return Err(CrawlerError::InvalidGeometry(format!(
                "{} headings for {} costs",
                angles.len(),
                costs.len()
            )));
        }
        Ok(Self {
            layout: FieldLayout::Headings(angles),
            costs: costs.into_iter().map(sanitize).collect(),
        })
    }

    /// Per-column cost line.
    pub fn columns(costs: Vec<f32>) -> Result<Self, CrawlerError> {
        if costs.is_empty() {
            return Err(CrawlerError::InvalidGeometry("empty cost line".to_string()));
        }
        Ok(Self {
            layout: FieldLayout::Columns,
            costs: costs.into_iter().map(sanitize).collect(),
        })
    }

    /// An all-[`UNKNOWN_COST`] field with the same layout and arity.
    pub fn unknown_like(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            costs: vec![UNKNOWN_COST; self.costs.len()],
        }
    }

    /// An all-unknown cost line of `n` columns.
    pub fn unknown_columns(n: usize) -> Result<Self, CrawlerError> {
        Self::columns(vec![UNKNOWN_COST; n])
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn costs(&self) -> &[f32] {
        &self.costs
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Costs at the left and right edges of the view.
    ///
    /// Heading fields report the outermost headings. Cost lines average the
    /// outermost `span` columns on each side, so a single noisy border
    /// column does not decide the reading.
    pub fn extremes(&self, span: usize) -> Option<(f32, f32)> {
        match self.layout {
            FieldLayout::Headings(_) => Some((*self.costs.first()?, *self.costs.last()?)),
            FieldLayout::Columns => {
                if self.costs.is_empty() {
                    return None;
                }
                let span = span.clamp(1, self.costs.len());
                let mean = |s: &[f32]| s.iter().sum::<f32>() / s.len() as f32;
                Some((mean(&self.costs[..span]), mean(&self.costs[self.costs.len() - span..])))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_clamped_and_nan_is_blocked() -> Result<(), CrawlerError> {
        let field = CostField::columns(vec![-0.3, 0.4, 2.0, f32::NAN])?;
        assert_eq!(field.costs(), &[0.0, 0.4, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn heading_arity_must_match() {
        assert!(CostField::headings(vec![-10, 0, 10], vec![0.1, 0.2]).is_err());
        assert!(CostField::headings(vec![], vec![]).is_err());
        assert!(CostField::columns(vec![]).is_err());
    }

    #[test]
    fn unknown_keeps_layout_and_arity() -> Result<(), CrawlerError> {
        let field = CostField::headings(vec![-10, 0, 10], vec![0.9, 0.1, 0.3])?;
        let unknown = field.unknown_like();
        assert_eq!(unknown.layout(), field.layout());
        assert_eq!(unknown.costs(), &[0.5, 0.5, 0.5]);
        assert_eq!(CostField::unknown_columns(4)?.len(), 4);
        Ok(())
    }

    #[test]
    fn extremes_are_first_and_last() -> Result<(), CrawlerError> {
        let field = CostField::columns(vec![0.7, 0.1, 0.8])?;
        assert_eq!(field.extremes(1), Some((0.7, 0.8)));
        let field = CostField::headings(vec![-10, 0, 10], vec![0.7, 0.1, 0.8])?;
        assert_eq!(field.extremes(5), Some((0.7, 0.8)));
        Ok(())
    }

    #[test]
    fn column_extremes_average_the_border_span() -> Result<(), CrawlerError> {
        let field = CostField::columns(vec![1.0, 0.0, 0.0, 0.0, 0.2, 0.0, 0.0, 0.0, 1.0])?;
        assert_eq!(field.extremes(4), Some((0.25, 0.25)));
        // Span wider than the line covers all of it.
        let (l, r) = field.extremes(100).ok_or(CrawlerError::InvalidGeometry("empty".into()))?;
        assert!((l - 2.2 / 9.0).abs() < 1e-6 && (r - l).abs() < 1e-6);
        Ok(())
    }
}
