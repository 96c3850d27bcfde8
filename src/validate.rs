//! Optional validation/reset capabilities a cached value type can implement.
//!
//! These are plain traits, not a blanket bound on every `Caching`/
//! `MCaching` value type: a value type that doesn't need validation never
//! has to implement either one, and an engine only dispatches to them when
//! constructed via [`Caching::with_validation`](crate::caching::Caching::with_validation)
//! or the `MCaching` equivalent.

/// Reports whether a value retrieved from Storage should still be trusted.
pub trait Validatable {
    /// `true` if the value is still semantically valid. When `false`, the
    /// engine discards it and runs the miss path as if Storage had missed.
    fn is_valid_cache(&self) -> bool;
}

/// Clears a value before it is discarded as invalid.
///
/// The engine calls this on a value that failed [`Validatable::is_valid_cache`]
/// right before dropping it, so a type holding resources that should be
/// released promptly (buffers, handles, anything `Drop` alone shouldn't be
/// trusted to unwind eagerly) gets a deterministic teardown hook instead of
/// waiting on the value's ordinary drop glue.
pub trait Resetable {
    /// Clear the value in place.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Flagged {
        valid: bool,
        resets: u32,
    }

    impl Validatable for Flagged {
        fn is_valid_cache(&self) -> bool {
            self.valid
        }
    }

    impl Resetable for Flagged {
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn reset_is_callable_through_the_trait() {
        let mut value = Flagged {
            valid: false,
            resets: 0,
        };
        assert!(!value.is_valid_cache());
        value.reset();
        assert_eq!(value.resets, 1);
    }
}
