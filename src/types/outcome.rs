use super::KvError;

/// Successful result of an operation: either it did something, or it was a
/// logical no-op (key absent, conditional write skipped, empty key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation took effect and produced a value.
    Done(T),
    /// Nothing was found or changed.
    NoOp,
}

/// Result of a public operation: success, no-op, or a typed error.
pub type OpResult<T> = std::result::Result<Outcome<T>, KvError>;

impl<T> Outcome<T> {
    /// Returns `true` for [`Outcome::Done`].
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Returns `true` for [`Outcome::NoOp`].
    pub fn is_noop(&self) -> bool {
        matches!(self, Outcome::NoOp)
    }

    /// Converts into an `Option`, dropping the no-op distinction.
    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::NoOp => None,
        }
    }

    /// Maps the carried value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(v) => Outcome::Done(f(v)),
            Outcome::NoOp => Outcome::NoOp,
        }
    }

    /// Integer code used by the wire protocol: `1` done, `0` no-op.
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Done(_) => 1,
            Outcome::NoOp => 0,
        }
    }
}

impl<T> From<Option<T>> for Outcome<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Outcome::Done(v),
            None => Outcome::NoOp,
        }
    }
}

/// Maps an operation result to `1` (done), `0` (no-op) or `-1` (error).
pub fn status_code<T>(result: &OpResult<T>) -> i32 {
    match result {
        Ok(outcome) => outcome.code(),
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_tri_state() {
        let done: OpResult<u32> = Ok(Outcome::Done(7));
        let noop: OpResult<u32> = Ok(Outcome::NoOp);
        let err: OpResult<u32> = Err(KvError::EmptyKey);
        assert_eq!(status_code(&done), 1);
        assert_eq!(status_code(&noop), 0);
        assert_eq!(status_code(&err), -1);
    }

    #[test]
    fn option_conversion_roundtrips() {
        assert_eq!(Outcome::from(Some(3)).into_option(), Some(3));
        assert!(Outcome::<u8>::from(None).is_noop());
        assert_eq!(Outcome::Done(2).map(|v| v * 2), Outcome::Done(4));
    }
}
