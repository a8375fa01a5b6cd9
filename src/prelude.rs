//! The types needed to configure and run an extraction
pub use crate::arrayops::Signal;
pub use crate::background::RobustBackgroundFitter;
pub use crate::fitter::{FitConfig, MultiPeakFitter};
pub use crate::peak::{FittedReflex, Peak};
pub use crate::reflex::{FitMode, ReflexConfig, ReflexOrchestrator};
pub use crate::shapes::{CompositeShape, PeakShape};
pub use crate::units::{Polarization, Wavelength, XUnits};
