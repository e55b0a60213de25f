//! Operation descriptors and the typed operations they validate into.
//!
//! A [`Descriptor`] is what callers build and store: an [`OperationKind`]
//! plus a loose parameter map. It has a textual form used by the CLI and
//! by history reports:
//!
//! ```text
//! grayscale
//! multi-otsu:classes=4
//! sobel:threshold=0.25
//! morph-snakes:iterations=50,smoothing=2
//! ```
//!
//! An [`Operation`] is the checked, typed counterpart produced by a
//! [`Handler`](crate::Handler). Only operations touch pixels, through the
//! [`ImageOperation`] trait.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::edge::{self, EdgeDetector};
use crate::params::{Limits, ParamKind, ParamSpec, ParamValue, Params};
use crate::types::{CancelToken, Image, OpError};
use crate::{chan_vese, conversion, morph_snakes, multi_otsu};

/// Group of related operations served by one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    /// Colour space conversions.
    Conversion,
    /// Region segmentation.
    Segmentation,
    /// Gradient edge maps.
    EdgeDetection,
}

impl Family {
    /// Every family, in menu order.
    pub const ALL: [Self; 3] = [Self::Conversion, Self::Segmentation, Self::EdgeDetection];

    /// Kebab-case family name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Conversion => "conversion",
            Self::Segmentation => "segmentation",
            Self::EdgeDetection => "edge-detection",
        }
    }

    /// Kinds belonging to this family.
    #[must_use]
    pub fn kinds(self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|kind| kind.family() == self)
            .collect()
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every operation the library knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Luminance grayscale.
    Grayscale,
    /// Hue visualisation.
    Hsv,
    /// Multi-level Otsu thresholding.
    MultiOtsu,
    /// Chan-Vese level-set segmentation.
    ChanVese,
    /// Morphological Chan-Vese (ACWE) snakes.
    MorphSnakes,
    /// Sobel edges.
    Sobel,
    /// Scharr edges.
    Scharr,
    /// Prewitt edges.
    Prewitt,
    /// Roberts cross edges.
    Roberts,
}

impl OperationKind {
    /// Every kind, grouped by family.
    pub const ALL: [Self; 9] = [
        Self::Grayscale,
        Self::Hsv,
        Self::MultiOtsu,
        Self::ChanVese,
        Self::MorphSnakes,
        Self::Sobel,
        Self::Scharr,
        Self::Prewitt,
        Self::Roberts,
    ];

    /// Family this kind belongs to.
    #[must_use]
    pub const fn family(self) -> Family {
        match self {
            Self::Grayscale | Self::Hsv => Family::Conversion,
            Self::MultiOtsu | Self::ChanVese | Self::MorphSnakes => Family::Segmentation,
            Self::Sobel | Self::Scharr | Self::Prewitt | Self::Roberts => Family::EdgeDetection,
        }
    }

    /// Canonical kebab-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Hsv => "hsv",
            Self::MultiOtsu => "multi-otsu",
            Self::ChanVese => "chan-vese",
            Self::MorphSnakes => "morph-snakes",
            Self::Sobel => "sobel",
            Self::Scharr => "scharr",
            Self::Prewitt => "prewitt",
            Self::Roberts => "roberts",
        }
    }

    /// Gradient operator for edge-detection kinds.
    #[must_use]
    pub const fn edge_detector(self) -> Option<EdgeDetector> {
        match self {
            Self::Sobel => Some(EdgeDetector::Sobel),
            Self::Scharr => Some(EdgeDetector::Scharr),
            Self::Prewitt => Some(EdgeDetector::Prewitt),
            Self::Roberts => Some(EdgeDetector::Roberts),
            _ => None,
        }
    }

    /// Parameters this kind accepts, with ranges taken from `limits`.
    #[must_use]
    pub fn schema(self, limits: &Limits) -> Vec<ParamSpec> {
        match self {
            Self::Grayscale | Self::Hsv => Vec::new(),
            Self::MultiOtsu => vec![ParamSpec {
                name: "classes",
                kind: ParamKind::Int,
                range: limits.otsu_classes,
                default: ParamValue::Int(Limits::DEFAULT_OTSU_CLASSES),
            }],
            Self::ChanVese => vec![ParamSpec {
                name: "iterations",
                kind: ParamKind::Int,
                range: limits.chan_vese_iterations,
                default: ParamValue::Int(Limits::DEFAULT_CHAN_VESE_ITERATIONS),
            }],
            Self::MorphSnakes => vec![
                ParamSpec {
                    name: "iterations",
                    kind: ParamKind::Int,
                    range: limits.snake_iterations,
                    default: ParamValue::Int(Limits::DEFAULT_SNAKE_ITERATIONS),
                },
                ParamSpec {
                    name: "smoothing",
                    kind: ParamKind::Int,
                    range: limits.snake_smoothing,
                    default: ParamValue::Int(Limits::DEFAULT_SNAKE_SMOOTHING),
                },
            ],
            Self::Sobel | Self::Scharr | Self::Prewitt | Self::Roberts => vec![ParamSpec {
                name: "threshold",
                kind: ParamKind::Float,
                range: limits.edge_threshold,
                default: ParamValue::Float(Limits::DEFAULT_EDGE_THRESHOLD),
            }],
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = OpError;

    /// Accepts canonical names case-insensitively, plus a few historical
    /// spellings (`gray`, `multiotsu`, `chanvese`, `morphsnake`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let kind = match lower.as_str() {
            "grayscale" | "gray" | "grey" | "greyscale" => Self::Grayscale,
            "hsv" => Self::Hsv,
            "multi-otsu" | "multiotsu" => Self::MultiOtsu,
            "chan-vese" | "chanvese" => Self::ChanVese,
            "morph-snakes" | "morphsnakes" | "morphsnake" => Self::MorphSnakes,
            "sobel" => Self::Sobel,
            "scharr" => Self::Scharr,
            "prewitt" => Self::Prewitt,
            "roberts" => Self::Roberts,
            _ => return Err(OpError::UnknownOperation(s.trim().to_owned())),
        };
        Ok(kind)
    }
}

/// Untyped request for an operation: a kind plus named parameters.
///
/// Descriptors are plain data. They are stored in history entries,
/// serialized into reports and parsed from the command line; none of
/// that requires the parameters to be valid. Validation happens in
/// [`Handler::validate`](crate::Handler::validate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Which operation to run.
    pub kind: OperationKind,
    /// Named parameters.
    #[serde(default)]
    pub params: Params,
}

impl Descriptor {
    /// Descriptor with no parameters.
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            params: Params::new(),
        }
    }

    /// Descriptor with every parameter set to its default.
    #[must_use]
    pub fn with_defaults(kind: OperationKind) -> Self {
        let params = kind
            .schema(&Limits::default())
            .into_iter()
            .map(|spec| (spec.name.to_owned(), spec.default))
            .collect();
        Self { kind, params }
    }

    /// Set a parameter, builder style.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_owned(), value.into());
        self
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.params.get(name).copied()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        let mut separator = ':';
        for (name, value) in &self.params {
            write!(f, "{separator}{name}={value}")?;
            separator = ',';
        }
        Ok(())
    }
}

impl FromStr for Descriptor {
    type Err = OpError;

    /// Parse `kind[:name=value,...]`. Parameters not mentioned keep their
    /// defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s.split_once(':').unwrap_or((s, ""));
        let mut descriptor = Self::with_defaults(kind.parse()?);
        for pair in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = pair.split_once('=') else {
                return Err(OpError::invalid(pair, "expected `name=value`"));
            };
            let name = name.trim();
            let value = value
                .parse::<ParamValue>()
                .map_err(|reason| OpError::invalid(name, reason))?;
            descriptor.params.insert(name.to_owned(), value);
        }
        Ok(descriptor)
    }
}

/// A validated operation with typed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Luminance grayscale.
    Grayscale,
    /// Hue visualisation.
    Hsv,
    /// Multi-level Otsu with `classes` output regions.
    MultiOtsu {
        /// Number of regions.
        classes: u8,
    },
    /// Chan-Vese with an iteration budget.
    ChanVese {
        /// Maximum iterations; the solver may converge earlier.
        iterations: u32,
    },
    /// Morphological snakes.
    MorphSnakes {
        /// Number of evolution steps.
        iterations: u32,
        /// Curvature smoothing rounds per step.
        smoothing: u32,
    },
    /// Thresholded gradient magnitude.
    EdgeDetection {
        /// Gradient operator.
        detector: EdgeDetector,
        /// Magnitude threshold in `[0, 1]`.
        threshold: f32,
    },
}

impl Operation {
    /// Kind this operation was validated from.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Grayscale => OperationKind::Grayscale,
            Self::Hsv => OperationKind::Hsv,
            Self::MultiOtsu { .. } => OperationKind::MultiOtsu,
            Self::ChanVese { .. } => OperationKind::ChanVese,
            Self::MorphSnakes { .. } => OperationKind::MorphSnakes,
            Self::EdgeDetection { detector, .. } => match detector {
                EdgeDetector::Sobel => OperationKind::Sobel,
                EdgeDetector::Scharr => OperationKind::Scharr,
                EdgeDetector::Prewitt => OperationKind::Prewitt,
                EdgeDetector::Roberts => OperationKind::Roberts,
            },
        }
    }

    /// Descriptor that validates back into this operation.
    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        let descriptor = Descriptor::new(self.kind());
        match *self {
            Self::Grayscale | Self::Hsv => descriptor,
            Self::MultiOtsu { classes } => descriptor.param("classes", u32::from(classes)),
            Self::ChanVese { iterations } => descriptor.param("iterations", iterations),
            Self::MorphSnakes {
                iterations,
                smoothing,
            } => descriptor
                .param("iterations", iterations)
                .param("smoothing", smoothing),
            Self::EdgeDetection { threshold, .. } => {
                descriptor.param("threshold", f64::from(threshold))
            }
        }
    }
}

/// The single contract every operation satisfies: produce a new image
/// from an input without modifying it.
pub trait ImageOperation {
    /// Run the operation.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] if the image is unsuitable, the kernel fails,
    /// or `cancel` is triggered while an iterative kernel is running.
    fn apply(&self, image: &Image, cancel: &CancelToken) -> Result<Image, OpError>;
}

impl ImageOperation for Operation {
    fn apply(&self, image: &Image, cancel: &CancelToken) -> Result<Image, OpError> {
        match *self {
            Self::Grayscale => conversion::grayscale(image),
            Self::Hsv => conversion::hsv(image),
            Self::MultiOtsu { classes } => multi_otsu::multi_otsu(image, classes),
            Self::ChanVese { iterations } => {
                chan_vese::chan_vese(image, &chan_vese::Config::new(iterations), cancel)
            }
            Self::MorphSnakes {
                iterations,
                smoothing,
            } => morph_snakes::morph_snakes(image, iterations, smoothing, cancel),
            Self::EdgeDetection {
                detector,
                threshold,
            } => Ok(edge::detect(image, detector, threshold)),
        }
    }
}
