//! Native status translation

use crate::error::{FaissError, Result};
use crate::ffi::{NativeResult, Status};

/// Converts a raw status into a host result. Any non-zero code is a
/// [`FaissError::Native`] tagged with the operation name.
#[inline]
pub fn check(status: Status, op: &'static str) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(FaissError::Native { code: status, op })
    }
}

/// Attaches the operation name to a native result.
pub trait StatusExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> StatusExt<T> for NativeResult<T> {
    #[inline]
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|code| FaissError::Native { code, op })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check() {
        assert!(check(0, "faiss_Index_add").is_ok());
        match check(7, "faiss_Index_add") {
            Err(FaissError::Native { code, op }) => {
                assert_eq!(code, 7);
                assert_eq!(op, "faiss_Index_add");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_status_ext() {
        let ok: NativeResult<u64> = Ok(3);
        assert_eq!(ok.op("faiss_Index_ntotal").unwrap(), 3);
        let err: NativeResult<u64> = Err(-1);
        assert!(matches!(err.op("faiss_Index_ntotal"), Err(FaissError::Native { code: -1, .. })));
    }
}
