use std::os::raw::{c_int, c_char};
use std::ffi::{CStr, CString};
use crate::ffi::error::{FFIError, ErrorCode, set_last_error, clear_last_error};
use serde::{Deserialize, Serialize};

pub mod core;
pub mod error;
pub mod sync;

pub use error::FFIResult;

/// Error handling helper for FFI boundaries (returns error code)
pub fn handle_status_result<F>(func: F) -> c_int
where
    F: FnOnce() -> FFIResult<()>,
{
    match func() {
        Ok(_) => {
            clear_last_error();
            ErrorCode::Success as c_int
        }
        Err(e) => {
            log::error!("FFI call failed: code {:?}, message: {}, details: {}",
                e.code, e.message, e.details.as_deref().unwrap_or("None"));
            set_last_error(&e);
            e.code as c_int
        }
    }
}

/// Serializes Ok(T) or Err(FFIError) to JSON.
/// Returns a pointer to a C string (must be freed by the caller).
pub fn handle_json_result<F, T>(func: F) -> *mut c_char
where
    F: FnOnce() -> FFIResult<T>,
    T: Serialize,
{
    let json_string = match func() {
        Ok(value) => {
            clear_last_error();
            serde_json::to_string(&value)
        },
        Err(ffi_error) => {
            log::error!("FFI call failed: {}", ffi_error);
            set_last_error(&ffi_error);
            serde_json::to_string(&ffi_error)
        },
    };

    let final_json = match json_string {
        Ok(s) => s,
        Err(e) => {
            // The caller must always be able to parse the response
            let error_msg = format!("Failed to serialize result: {}", e);
            log::error!("{}", error_msg);
            format!("{{\"code\":\"{:?}\",\"message\":{:?},\"details\":null}}", ErrorCode::InternalError, error_msg)
        }
    };

    match CString::new(final_json) {
        Ok(c_string) => c_string.into_raw(),
        Err(e) => {
            log::error!("Failed to create CString: {}", e);
            let error_json = format!(
                "{{\"code\":\"{:?}\",\"message\":\"Failed to create CString\",\"details\":null}}",
                ErrorCode::InternalError
            );
            CString::new(error_json).map_or(std::ptr::null_mut(), |cs| cs.into_raw())
        }
    }
}

/// Write a JSON result into an out-pointer and turn it into a status code
pub(crate) unsafe fn write_json_result<F, T>(result: *mut *mut c_char, func: F) -> c_int
where
    F: FnOnce() -> FFIResult<T>,
    T: Serialize,
{
    if result.is_null() {
        let err = FFIError::new(ErrorCode::NullPointer, "Null result pointer provided");
        set_last_error(&err);
        return err.code as c_int;
    }

    let mut code = ErrorCode::Success as c_int;
    let json = handle_json_result(|| {
        func().map_err(|e| {
            code = e.code as c_int;
            e
        })
    });
    if json.is_null() {
        return ErrorCode::InternalError as c_int;
    }
    unsafe { *result = json };
    code
}

/// Parse a JSON document handed over from the host
pub(crate) fn parse_json_input<T: for<'de> Deserialize<'de>>(input: *const c_char) -> FFIResult<T> {
    if input.is_null() {
        return Err(FFIError::new(ErrorCode::NullPointer, "Input JSON is null"));
    }

    let c_str = unsafe { CStr::from_ptr(input) };
    let json_str = c_str.to_str()
        .map_err(|_| FFIError::new(ErrorCode::InvalidUtf8, "Invalid UTF-8 in input JSON"))?;

    serde_json::from_str(json_str)
        .map_err(|e| FFIError::with_details(
            ErrorCode::InvalidArgument,
            "JSON parsing failed",
            &format!("Failed to parse JSON: {}", e)
        ))
}

/// Run a future to completion on the library's shared runtime
pub fn block_on_async<F, T, E>(future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: From<FFIError>,
{
    let runtime = crate::globals::runtime().map_err(E::from)?;
    runtime.block_on(future)
}

/// Convert any layered error into the FFI representation
pub fn to_ffi_error<E: Into<FFIError>>(error: E) -> FFIError {
    error.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_result_records_last_error() {
        let code = handle_status_result(|| Err(FFIError::invalid_argument("nope")));
        assert_eq!(code, ErrorCode::InvalidArgument as c_int);
        assert_eq!(error::last_error().unwrap().message, "nope");

        let code = handle_status_result(|| Ok(()));
        assert_eq!(code, 0);
        assert!(error::last_error().is_none());
    }

    #[test]
    fn test_json_result_round_trip() {
        let mut out: *mut c_char = std::ptr::null_mut();
        let code = unsafe { write_json_result(&mut out, || Ok(serde_json::json!({"cleared": 2}))) };
        assert_eq!(code, 0);
        let text = unsafe { CString::from_raw(out) }.into_string().unwrap();
        assert_eq!(text, "{\"cleared\":2}");

        let mut out: *mut c_char = std::ptr::null_mut();
        let code = unsafe {
            write_json_result::<_, ()>(&mut out, || Err(FFIError::new(ErrorCode::EntityNotFound, "gone")))
        };
        assert_eq!(code, ErrorCode::EntityNotFound as c_int);
        let value: serde_json::Value =
            serde_json::from_str(&unsafe { CString::from_raw(out) }.into_string().unwrap()).unwrap();
        assert_eq!(value["code"], "EntityNotFound");
    }

    #[test]
    fn test_parse_json_input_rejects_null_and_garbage() {
        let err = parse_json_input::<serde_json::Value>(std::ptr::null()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NullPointer);

        let garbage = CString::new("{not json").unwrap();
        let err = parse_json_input::<serde_json::Value>(garbage.as_ptr()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }
}
