// Validation hook point

use crate::error::{Error, Result, ValidationErrors};

/// Implemented by request types that can check themselves.
///
/// ```
/// use trellis_core::{Validate, ValidationErrors};
///
/// struct SignUp {
///     email: String,
///     age: u8,
/// }
///
/// impl Validate for SignUp {
///     fn validate(&self) -> Result<(), ValidationErrors> {
///         let mut errors = ValidationErrors::new();
///         if !self.email.contains('@') {
///             errors.add("email", "must be a valid email address");
///         }
///         if self.age < 18 {
///             errors.add("age", "must be at least 18");
///         }
///         if errors.is_empty() { Ok(()) } else { Err(errors) }
///     }
/// }
/// ```
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Pluggable validation strategy registered on the [`App`](crate::App).
///
/// The dispatcher never calls it; handlers do, through
/// [`Context::validate`](crate::Context::validate).
pub trait Validator: Send + Sync {
    fn validate(&self, target: &dyn Validate) -> Result<()>;
}

/// Delegates to the target's own [`Validate`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, target: &dyn Validate) -> Result<()> {
        target.validate().map_err(Error::Validation)
    }
}
