//! The boundary between a list of [`Peak`]s and the flat parameter vector a
//! solver works on.
use crate::peak::Peak;

/// The meaning of one entry of a flat parameter vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Center(usize),
    Height(usize),
    Width(usize),
    /// One width shared by every peak
    SharedWidth,
}

/// Maps peaks to parameter vectors and back.
///
/// Pinned centers are held by the layout and never appear in the parameter
/// vector. Free parameters are laid out peak by peak as
/// `[center, height, width]`, omitting what is pinned or shared; a shared
/// width comes last.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParameterLayout {
    pinned: Vec<Option<f64>>,
    shared_width: bool,
    slots: Vec<Slot>,
}

impl ParameterLayout {
    pub fn new(pinned: Vec<Option<f64>>, shared_width: bool) -> Self {
        let mut slots = Vec::with_capacity(pinned.len() * 3 + 1);
        for (i, center) in pinned.iter().enumerate() {
            if center.is_none() {
                slots.push(Slot::Center(i));
            }
            slots.push(Slot::Height(i));
            if !shared_width {
                slots.push(Slot::Width(i));
            }
        }
        if shared_width && !pinned.is_empty() {
            slots.push(Slot::SharedWidth);
        }
        Self {
            pinned,
            shared_width,
            slots,
        }
    }

    /// Every center free
    pub fn free(n_peaks: usize, shared_width: bool) -> Self {
        Self::new(vec![None; n_peaks], shared_width)
    }

    /// Every center pinned at `centers`
    pub fn pinned_at(centers: &[f64], shared_width: bool) -> Self {
        Self::new(centers.iter().copied().map(Some).collect(), shared_width)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn n_peaks(&self) -> usize {
        self.pinned.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn flatten(&self, peaks: &[Peak]) -> Vec<f64> {
        let shared = if self.shared_width && !peaks.is_empty() {
            peaks.iter().map(|p| p.width).sum::<f64>() / peaks.len() as f64
        } else {
            0.0
        };
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Center(i) => peaks[*i].center,
                Slot::Height(i) => peaks[*i].height,
                Slot::Width(i) => peaks[*i].width,
                Slot::SharedWidth => shared,
            })
            .collect()
    }

    pub fn unflatten(&self, params: &[f64]) -> Vec<Peak> {
        let mut peaks: Vec<Peak> = self
            .pinned
            .iter()
            .map(|c| Peak::new(c.unwrap_or_default(), 0.0, 0.0))
            .collect();
        for (slot, value) in self.slots.iter().zip(params.iter().copied()) {
            match slot {
                Slot::Center(i) => peaks[*i].center = value,
                Slot::Height(i) => peaks[*i].height = value,
                Slot::Width(i) => peaks[*i].width = value,
                Slot::SharedWidth => peaks.iter_mut().for_each(|p| p.width = value),
            }
        }
        peaks
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_free_layout() {
        let layout = ParameterLayout::free(2, false);
        let peaks = vec![Peak::new(0.2, 3.0, 1e-4), Peak::new(0.4, 2.0, 2e-4)];
        let params = layout.flatten(&peaks);
        assert_eq!(params, vec![0.2, 3.0, 1e-4, 0.4, 2.0, 2e-4]);
        assert_eq!(layout.unflatten(&params), peaks);
    }

    #[test]
    fn test_pinned_and_shared_layout() {
        let layout = ParameterLayout::new(vec![Some(0.2), None], true);
        assert_eq!(
            layout.slots(),
            &[
                Slot::Height(0),
                Slot::Center(1),
                Slot::Height(1),
                Slot::SharedWidth
            ]
        );
        let peaks = layout.unflatten(&[3.0, 0.41, 2.0, 5e-5]);
        assert_eq!(peaks[0], Peak::new(0.2, 3.0, 5e-5));
        assert_eq!(peaks[1], Peak::new(0.41, 2.0, 5e-5));

        let params = layout.flatten(&[Peak::new(0.2, 3.0, 1e-4), Peak::new(0.4, 2.0, 3e-4)]);
        assert_eq!(params.len(), 4);
        assert!((params[3] - 2e-4).abs() < 1e-18);
    }
}
