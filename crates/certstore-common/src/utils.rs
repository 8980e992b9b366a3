//! Utility functions for certstore

/// Get the local host name, or "localhost" when it cannot be determined
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Generate a lock holder identity for this process
///
/// The host name keeps lock documents readable for operators; the random
/// suffix keeps two processes on the same host from sharing an identity.
///
/// # Examples
///
/// ```
/// use certstore_common::generate_instance_id;
///
/// let a = generate_instance_id();
/// let b = generate_instance_id();
/// assert_ne!(a, b);
/// ```
pub fn generate_instance_id() -> String {
    format!("{}-{}", local_hostname(), uuid::Uuid::new_v4().simple())
}
