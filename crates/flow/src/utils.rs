//! Utility macros shared by the flow stages.

/// Returns early with an error if a condition is not met.
///
/// Like `assert!`, but produces an `Err` instead of panicking. Used by the parsers
/// to reject input that breaks a limit or the grammar.
///
/// ```ignore
/// ensure!(self.consumed <= self.max_head_size, ParseError::too_large_head(self.max_head_size));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
