#![forbid(unsafe_code)]

//! Environment variable names shared across the enclave-test crates (library,
//! tests, and helpers).

/// Environment variable override for the Ninja executable.
///
/// # Examples
///
/// ```
/// use runner_env::NINJA_ENV;
/// assert_eq!(NINJA_ENV, "ENCLAVE_TEST_NINJA");
/// ```
pub const NINJA_ENV: &str = "ENCLAVE_TEST_NINJA";

/// Environment variable override for the Python interpreter used to launch
/// `pytest`.
pub const PYTHON_ENV: &str = "ENCLAVE_TEST_PYTHON";

/// Environment variable read by the test suite to decide whether tests run
/// inside an SGX enclave. Set to `1` for SGX mode and to the empty string
/// otherwise.
pub const SGX_MODE_ENV: &str = "SGX";
