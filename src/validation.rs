//! The validation failure policy machine (C6) and its constraint
//! reporting types.
//!
//! The schema-validation library is treated as an optional capability
//! discovered once at first use: compiled in only when the `validation`
//! feature is enabled, and recorded via a `OnceLock<bool>` so a one-time
//! warning is logged rather than repeated on every message when the
//! capability is unavailable. This mirrors the teacher's
//! trait-with-default-implementation shape for its own optional
//! capabilities (`EnvVars`, `Clock`), generalised here to a capability
//! that may not be compiled in at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::logger::Logger;
use crate::message_context::MessageContext;

/// One constraint violation against a single property path.
#[derive(Debug, Clone)]
pub struct FieldViolation {
    /// Dotted for nested objects, numeric-indexed for array elements,
    /// e.g. `address.city` or `items.2.sku`.
    pub property_path: String,
    pub constraints: Vec<String>,
}

/// Raised when decoding succeeds but the decoded value fails validation.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub target_type: String,
    pub violations: Vec<FieldViolation>,
    raw_constraints: HashMap<String, Vec<String>>,
}

impl ValidationError {
    pub fn new(target_type: impl Into<String>, violations: Vec<FieldViolation>) -> Self {
        let raw_constraints = violations
            .iter()
            .map(|v| (v.property_path.clone(), v.constraints.clone()))
            .collect();
        ValidationError {
            target_type: target_type.into(),
            violations,
            raw_constraints,
        }
    }

    /// The raw per-property constraint map, as validator backends
    /// typically return it.
    pub fn constraints_by_property(&self) -> &HashMap<String, Vec<String>> {
        &self.raw_constraints
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "validation failed for {}: {} violation(s)",
            self.target_type,
            self.violations.len()
        )?;
        for violation in &self.violations {
            writeln!(
                f,
                "  {}: {}",
                violation.property_path,
                violation.constraints.join(", ")
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Policy applied when a decoded value fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationFailureMode {
    /// Fail with `ConvertError::Validation`; the message is left for retry.
    #[default]
    Throw,
    /// Log the error, acknowledge (delete) the message via the context,
    /// and fail with `ConvertError::AlreadyHandled`.
    Acknowledge,
    /// Log the error and fail with `ConvertError::AlreadyHandled`,
    /// leaving the message for retry.
    Reject,
}

/// Validator-backend flags forwarded verbatim; this crate does not
/// interpret them itself, since their exact meaning is backend-specific.
#[derive(Debug, Clone, Default)]
pub struct ValidatorOptions {
    pub whitelist: bool,
    pub forbid_non_whitelisted: bool,
    pub skip_missing_properties: bool,
    pub groups: Vec<String>,
    pub stop_at_first_error: bool,
    pub validation_error_target: bool,
    pub validation_error_value: bool,
    pub dismiss_default_messages: bool,
}

/// Configuration governing whether and how validation runs.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub enable_validation: bool,
    pub failure_mode: ValidationFailureMode,
    pub validator_options: ValidatorOptions,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        ValidationOptions {
            enable_validation: false,
            failure_mode: ValidationFailureMode::default(),
            validator_options: ValidatorOptions::default(),
        }
    }
}

static VALIDATION_CAPABILITY_WARNED: OnceLock<()> = OnceLock::new();

/// Whether the `validator` crate is compiled into this build. When it
/// isn't, validation is skipped (fail-open) and a one-time warning is
/// logged the first time validation is attempted.
fn validator_capability_available(logger: &dyn Logger) -> bool {
    let available = cfg!(feature = "validation");
    if !available {
        VALIDATION_CAPABILITY_WARNED.get_or_init(|| {
            logger.warn(
                "schema validation was requested but the `validation` feature is not \
                 compiled in; validation will be skipped for the lifetime of this process",
            );
        });
    }
    available
}

/// Flattens a single field's [`validator::ValidationErrorsKind`] into zero
/// or more [`FieldViolation`]s, prefixing `property_path` onto every
/// path produced below it. `Field` is a leaf; `Struct` and `List` recurse
/// into the nested `ValidationErrors`, joining with `.` for nested
/// objects and `.<index>` for array elements — e.g. `address.city` or
/// `items.2.sku`.
#[cfg(feature = "validation")]
fn flatten_field_errors(
    property_path: &str,
    kind: &validator::ValidationErrorsKind,
    out: &mut Vec<FieldViolation>,
) {
    use validator::ValidationErrorsKind;

    match kind {
        ValidationErrorsKind::Field(field_errors) => {
            out.push(FieldViolation {
                property_path: property_path.to_string(),
                constraints: field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect(),
            });
        }
        ValidationErrorsKind::Struct(nested) => {
            flatten_validation_errors(property_path, nested, out);
        }
        ValidationErrorsKind::List(entries) => {
            for (index, nested) in entries {
                let indexed_path = format!("{property_path}.{index}");
                flatten_validation_errors(&indexed_path, nested, out);
            }
        }
    }
}

#[cfg(feature = "validation")]
fn flatten_validation_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<FieldViolation>,
) {
    for (field, kind) in errors.errors() {
        let property_path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        flatten_field_errors(&property_path, kind, out);
    }
}

/// Runs `value`'s validator (when the `validation` feature is compiled
/// in) and converts the result into our own `FieldViolation` shape,
/// recursing through nested objects (`Struct`) and collection elements
/// (`List`) so a failure anywhere in the value tree is reported, not
/// just top-level field failures.
///
/// If the underlying validator itself fails unexpectedly, that failure is
/// logged and treated as "no violations" (fail-open), so a broken
/// validator can never halt the pipeline.
#[cfg(feature = "validation")]
fn run_validator<T: validator::Validate>(value: &T, logger: &dyn Logger) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    if let Err(errors) = value.validate() {
        flatten_validation_errors("", &errors, &mut violations);
    }
    if !violations.is_empty() {
        logger.debug("validator reported one or more field violations");
    }
    violations
}

#[cfg(not(feature = "validation"))]
fn run_validator<T>(_value: &T, _logger: &dyn Logger) -> Vec<FieldViolation> {
    Vec::new()
}

/// Applies the validation failure policy machine (§4.3) to a validation
/// outcome. `ctx` is `None` when validation runs out of band (e.g. a unit
/// test calling a converter directly); in that case `Acknowledge`
/// degrades to `Throw` with a warning, since there is nothing to
/// acknowledge through.
pub async fn apply_validation_policy(
    target_type: &str,
    violations: Vec<FieldViolation>,
    mode: ValidationFailureMode,
    ctx: Option<&MessageContext>,
    logger: &dyn Logger,
) -> Result<(), ValidationOutcome> {
    if violations.is_empty() {
        return Ok(());
    }

    let error = ValidationError::new(target_type, violations);

    match mode {
        ValidationFailureMode::Throw => Err(ValidationOutcome::Throw(error)),
        ValidationFailureMode::Reject => {
            logger.error(&format!("{error}"));
            Err(ValidationOutcome::AlreadyHandled)
        }
        ValidationFailureMode::Acknowledge => {
            logger.error(&format!("{error}"));
            match ctx {
                Some(ctx) => {
                    ctx.acknowledge().await;
                    Err(ValidationOutcome::AlreadyHandled)
                }
                None => {
                    logger.warn(
                        "validation failure mode is ACKNOWLEDGE but no message context was \
                         supplied; degrading to THROW",
                    );
                    Err(ValidationOutcome::Throw(error))
                }
            }
        }
    }
}

/// The two shapes a failed validation policy application can take: an
/// error the container should surface to the error handler (`Throw`), or
/// the already-handled sentinel (`AlreadyHandled`) telling the container
/// to suppress both the error handler and the acknowledgement policy.
pub enum ValidationOutcome {
    Throw(ValidationError),
    AlreadyHandled,
}

/// Runs validation for a value that is already decoded, using whichever
/// validator backend is available, and applies the failure policy.
pub async fn validate_and_apply_policy<T>(
    target_type: &str,
    value: &T,
    options: &ValidationOptions,
    ctx: Option<&MessageContext>,
    logger: &Arc<dyn Logger>,
) -> Result<(), ValidationOutcome>
where
    T: ValidatableTarget,
{
    if !options.enable_validation {
        return Ok(());
    }

    if !validator_capability_available(logger.as_ref()) {
        return Ok(());
    }

    let violations = value.collect_violations(logger.as_ref());
    apply_validation_policy(target_type, violations, options.failure_mode, ctx, logger.as_ref())
        .await
}

/// A decoded value that can be checked for constraint violations. When
/// the `validation` feature is enabled this is implemented for any type
/// implementing `validator::Validate`; otherwise every type trivially
/// reports no violations (the capability-absent fail-open path).
pub trait ValidatableTarget {
    fn collect_violations(&self, logger: &dyn Logger) -> Vec<FieldViolation>;
}

#[cfg(feature = "validation")]
impl<T: validator::Validate> ValidatableTarget for T {
    fn collect_violations(&self, logger: &dyn Logger) -> Vec<FieldViolation> {
        run_validator(self, logger)
    }
}

#[cfg(not(feature = "validation"))]
impl<T> ValidatableTarget for T {
    fn collect_violations(&self, _logger: &dyn Logger) -> Vec<FieldViolation> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::TracingLogger;

    fn violation() -> FieldViolation {
        FieldViolation {
            property_path: "amount".to_string(),
            constraints: vec!["must be greater than 0".to_string()],
        }
    }

    #[test_log::test(tokio::test)]
    async fn throw_mode_surfaces_the_validation_error() {
        let logger = TracingLogger::new();
        let result = apply_validation_policy(
            "Order",
            vec![violation()],
            ValidationFailureMode::Throw,
            None,
            &logger,
        )
        .await;

        assert!(matches!(result, Err(ValidationOutcome::Throw(_))));
    }

    #[test_log::test(tokio::test)]
    async fn reject_mode_returns_already_handled_without_context() {
        let logger = TracingLogger::new();
        let result = apply_validation_policy(
            "Order",
            vec![violation()],
            ValidationFailureMode::Reject,
            None,
            &logger,
        )
        .await;

        assert!(matches!(result, Err(ValidationOutcome::AlreadyHandled)));
    }

    #[test_log::test(tokio::test)]
    async fn acknowledge_mode_degrades_to_throw_without_context() {
        let logger = TracingLogger::new();
        let result = apply_validation_policy(
            "Order",
            vec![violation()],
            ValidationFailureMode::Acknowledge,
            None,
            &logger,
        )
        .await;

        assert!(matches!(result, Err(ValidationOutcome::Throw(_))));
    }

    #[test_log::test(tokio::test)]
    async fn no_violations_is_ok() {
        let logger = TracingLogger::new();
        let result = apply_validation_policy(
            "Order",
            Vec::new(),
            ValidationFailureMode::Throw,
            None,
            &logger,
        )
        .await;

        assert!(result.is_ok());
    }

    #[cfg(feature = "validation")]
    mod nested_validator_flattening {
        use super::*;
        use validator::Validate;

        #[derive(Debug, Validate)]
        struct Address {
            #[validate(length(min = 1, message = "city must not be empty"))]
            city: String,
        }

        #[derive(Debug, Validate)]
        struct LineItem {
            #[validate(range(min = 1, message = "quantity must be at least 1"))]
            quantity: i64,
        }

        #[derive(Debug, Validate)]
        struct Order {
            #[validate(nested)]
            address: Address,
            #[validate(nested)]
            items: Vec<LineItem>,
        }

        #[test_log::test]
        fn struct_and_list_kinds_flatten_into_dotted_and_indexed_paths() {
            let order = Order {
                address: Address { city: String::new() },
                items: vec![LineItem { quantity: 1 }, LineItem { quantity: 0 }],
            };

            let logger = TracingLogger::new();
            let violations = run_validator(&order, &logger);
            let paths: Vec<&str> = violations.iter().map(|v| v.property_path.as_str()).collect();

            assert!(paths.contains(&"address.city"));
            assert!(paths.contains(&"items.1.quantity"));
            assert!(!paths.iter().any(|p| *p == "items.0.quantity"));
        }
    }
}
