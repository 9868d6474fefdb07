use castkit_common::CastkitError;

/// Errors raised by motion analysis calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MotionError {
    #[error("Frame dimensions differ: {a_width}x{a_height} vs {b_width}x{b_height}")]
    DimensionMismatch {
        a_width: u32,
        a_height: u32,
        b_width: u32,
        b_height: u32,
    },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),
}

pub type MotionResult<T> = Result<T, MotionError>;

impl MotionError {
    /// Check that two frames share dimensions.
    pub fn check_dimensions(a: (u32, u32), b: (u32, u32)) -> MotionResult<()> {
        if a != b {
            return Err(MotionError::DimensionMismatch {
                a_width: a.0,
                a_height: a.1,
                b_width: b.0,
                b_height: b.1,
            });
        }
        Ok(())
    }
}

impl From<MotionError> for CastkitError {
    fn from(err: MotionError) -> Self {
        CastkitError::motion(err.to_string())
    }
}
