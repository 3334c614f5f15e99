//! Declarative input, resolved output and error types for the SAS topology
//! resolver.

pub mod config;
pub mod constants;
pub mod error;
pub mod pattern;
pub mod topology;

/// Fully-qualified expander name, `<enclosure>/<expander>`.
pub type ExpanderId = String;

/// Builds the fully-qualified name of `expander` in `enclosure`.
pub fn expander_id(enclosure: &str, expander: &str) -> ExpanderId {
    format!(
        "{enclosure}{}{expander}",
        constants::EXPANDER_ID_SEPARATOR
    )
}

/// Returns true if the value is equal to its default value.
pub(crate) fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    t == &T::default()
}
