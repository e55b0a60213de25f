//! Family handlers: descriptor validation and dispatch.
//!
//! A [`Handler`] is bound to one [`Family`] and one set of [`Limits`].
//! It is the only way a [`Descriptor`] becomes a runnable [`Operation`],
//! so every parameter that reaches a kernel has been checked against the
//! schema first.

use tracing::{debug, instrument};

use crate::operation::{Descriptor, Family, ImageOperation, Operation, OperationKind};
use crate::params::{Limits, ParamSpec, ParamValue};
use crate::types::{CancelToken, Image, OpError};

/// Validates and runs the operations of one family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Handler {
    family: Family,
    limits: Limits,
}

impl Handler {
    /// Handler for `family` using `limits` for parameter ranges.
    #[must_use]
    pub const fn new(family: Family, limits: Limits) -> Self {
        Self { family, limits }
    }

    /// Handler for the family `kind` belongs to.
    #[must_use]
    pub const fn for_kind(kind: OperationKind, limits: Limits) -> Self {
        Self::new(kind.family(), limits)
    }

    /// Family this handler serves.
    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }

    /// Parameter limits in force.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Kinds this handler accepts.
    #[must_use]
    pub fn kinds(&self) -> Vec<OperationKind> {
        self.family.kinds()
    }

    /// Parameter schema of `kind` under this handler's limits.
    #[must_use]
    pub fn schema(&self, kind: OperationKind) -> Vec<ParamSpec> {
        kind.schema(&self.limits)
    }

    /// Check `descriptor` and build the typed operation.
    ///
    /// # Errors
    ///
    /// - [`OpError::FamilyMismatch`] if the kind belongs to another family.
    /// - [`OpError::InvalidParameter`] for unknown, missing, mistyped or
    ///   out-of-range parameters.
    pub fn validate(&self, descriptor: &Descriptor) -> Result<Operation, OpError> {
        let kind = descriptor.kind;
        if kind.family() != self.family {
            return Err(OpError::FamilyMismatch {
                expected: self.family.to_string(),
                found: kind.to_string(),
            });
        }

        let schema = self.schema(kind);
        if let Some(name) = descriptor
            .params
            .keys()
            .find(|name| !schema.iter().any(|spec| spec.name == name.as_str()))
        {
            return Err(OpError::invalid(
                name.as_str(),
                format!("unknown parameter for {kind}"),
            ));
        }

        let value = |name: &str| -> Result<ParamValue, OpError> {
            let spec = schema
                .iter()
                .find(|spec| spec.name == name)
                .ok_or_else(|| OpError::Kernel(format!("{kind} has no `{name}` parameter")))?;
            spec.check(descriptor.get(name))
        };

        let operation = match kind {
            OperationKind::Grayscale => Operation::Grayscale,
            OperationKind::Hsv => Operation::Hsv,
            OperationKind::MultiOtsu => Operation::MultiOtsu {
                classes: int_param("classes", value("classes")?)?,
            },
            OperationKind::ChanVese => Operation::ChanVese {
                iterations: int_param("iterations", value("iterations")?)?,
            },
            OperationKind::MorphSnakes => Operation::MorphSnakes {
                iterations: int_param("iterations", value("iterations")?)?,
                smoothing: int_param("smoothing", value("smoothing")?)?,
            },
            OperationKind::Sobel
            | OperationKind::Scharr
            | OperationKind::Prewitt
            | OperationKind::Roberts => {
                let detector = kind
                    .edge_detector()
                    .ok_or_else(|| OpError::Kernel(format!("{kind} has no gradient operator")))?;
                #[allow(clippy::cast_possible_truncation)]
                let threshold = value("threshold")?.as_float() as f32;
                Operation::EdgeDetection {
                    detector,
                    threshold,
                }
            }
        };
        Ok(operation)
    }

    /// Validate `descriptor` and apply it to `image`.
    ///
    /// # Errors
    ///
    /// Any validation error from [`validate`](Self::validate), or the
    /// kernel's own error.
    #[instrument(skip_all, fields(op = %descriptor))]
    pub fn run(
        &self,
        descriptor: &Descriptor,
        image: &Image,
        cancel: &CancelToken,
    ) -> Result<Image, OpError> {
        let operation = self.validate(descriptor)?;
        let output = operation.apply(image, cancel)?;
        debug!(
            width = output.width(),
            height = output.height(),
            channels = output.channels(),
            "operation finished"
        );
        Ok(output)
    }
}

/// Narrow a checked integer to the kernel's parameter type. Fails only
/// when configured limits exceed what the kernel can represent.
fn int_param<T: TryFrom<i64>>(name: &str, value: ParamValue) -> Result<T, OpError> {
    value
        .as_int()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| OpError::invalid(name, format!("{value} is not representable")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::edge::EdgeDetector;
    use crate::params::Range;

    fn segmentation() -> Handler {
        Handler::new(Family::Segmentation, Limits::default())
    }

    #[test]
    fn validates_defaults_for_every_kind() {
        for kind in OperationKind::ALL {
            let handler = Handler::for_kind(kind, Limits::default());
            let op = handler.validate(&Descriptor::with_defaults(kind)).unwrap();
            assert_eq!(op.kind(), kind);
        }
    }

    #[test]
    fn builds_typed_operation() {
        let op = segmentation()
            .validate(
                &Descriptor::new(OperationKind::MorphSnakes)
                    .param("iterations", 7_i64)
                    .param("smoothing", 2_i64),
            )
            .unwrap();
        assert_eq!(
            op,
            Operation::MorphSnakes {
                iterations: 7,
                smoothing: 2
            }
        );
    }

    #[test]
    fn rejects_other_family() {
        let err = segmentation()
            .validate(&Descriptor::with_defaults(OperationKind::Sobel))
            .unwrap_err();
        assert!(matches!(err, OpError::FamilyMismatch { .. }));
    }

    #[test]
    fn rejects_unknown_parameter() {
        let d = Descriptor::with_defaults(OperationKind::MultiOtsu).param("sigma", 1.0);
        let err = segmentation().validate(&d).unwrap_err();
        assert!(matches!(err, OpError::InvalidParameter { ref name, .. } if name == "sigma"));
    }

    #[test]
    fn rejects_out_of_range_classes() {
        let d = Descriptor::new(OperationKind::MultiOtsu).param("classes", 9_i64);
        assert!(matches!(
            segmentation().validate(&d),
            Err(OpError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn limits_control_ranges() {
        let limits = Limits {
            otsu_classes: Range::new(2.0, 9.0),
            ..Limits::default()
        };
        let handler = Handler::new(Family::Segmentation, limits);
        let d = Descriptor::new(OperationKind::MultiOtsu).param("classes", 9_i64);
        assert_eq!(
            handler.validate(&d).unwrap(),
            Operation::MultiOtsu { classes: 9 }
        );
    }

    #[test]
    fn unrepresentable_value_is_rejected() {
        let limits = Limits {
            otsu_classes: Range::new(2.0, 1000.0),
            ..Limits::default()
        };
        let handler = Handler::new(Family::Segmentation, limits);
        let d = Descriptor::new(OperationKind::MultiOtsu).param("classes", 300_i64);
        assert!(matches!(
            handler.validate(&d),
            Err(OpError::InvalidParameter { ref name, .. }) if name == "classes"
        ));
    }

    #[test]
    fn edge_threshold_is_typed() {
        let handler = Handler::new(Family::EdgeDetection, Limits::default());
        let op = handler
            .validate(&Descriptor::new(OperationKind::Roberts).param("threshold", 0.5))
            .unwrap();
        assert_eq!(
            op,
            Operation::EdgeDetection {
                detector: EdgeDetector::Roberts,
                threshold: 0.5
            }
        );
    }

    #[test]
    fn run_leaves_input_untouched() {
        let handler = Handler::new(Family::Conversion, Limits::default());
        let input = Image::try_from(crate::types::RgbImage::from_pixel(
            3,
            3,
            image::Rgb([10, 200, 30]),
        ))
        .unwrap();
        let before = input.clone();
        let out = handler
            .run(
                &Descriptor::new(OperationKind::Grayscale),
                &input,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(input, before);
        assert_eq!(out.channels(), 1);
    }

    #[test]
    fn kinds_follow_family() {
        let handler = Handler::new(Family::EdgeDetection, Limits::default());
        assert_eq!(handler.kinds().len(), 4);
        assert_eq!(handler.schema(OperationKind::Sobel).len(), 1);
    }
}
