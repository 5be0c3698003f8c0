use crate::error::SyncError;

const FORBIDDEN_CHARS: [char; 7] = [' ', '\'', '"', ';', '&', '|', '\r'];

/// Validate and normalize an NVR `(host, port)` pair into a base URL,
/// rejecting anything that looks malformed before any I/O is attempted.
/// No DNS resolution happens here.
pub fn normalize(host: &str, port: i64) -> Result<String, SyncError> {
    let host = host.trim();

    if host.is_empty() {
        return Err(SyncError::InvalidTarget("host is empty".to_string()));
    }
    if host.contains(FORBIDDEN_CHARS) || host.contains('\n') {
        return Err(SyncError::InvalidTarget(format!(
            "host {:?} contains forbidden characters",
            host
        )));
    }
    if !(1..=65535).contains(&port) {
        return Err(SyncError::InvalidTarget(format!(
            "port {} is out of range [1, 65535]",
            port
        )));
    }
    if port == 37777 {
        return Err(SyncError::InvalidTarget(
            "port 37777 is the binary Dahua protocol, not HTTP".to_string(),
        ));
    }

    Ok(format!("http://{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_targets() {
        assert_eq!(normalize("10.1.1.200", 80).unwrap(), "http://10.1.1.200:80");
        assert_eq!(normalize("  10.1.1.200  ", 443).unwrap(), "http://10.1.1.200:443");
        assert_eq!(normalize("nvr.local", 65535).unwrap(), "http://nvr.local:65535");
        assert_eq!(normalize("10.1.1.200", 1).unwrap(), "http://10.1.1.200:1");
    }

    #[test]
    fn rejects_dahua_binary_port() {
        let err = normalize("10.1.1.200", 37777).unwrap_err();
        assert_eq!(err.code(), "INVALID_TARGET");
    }

    #[test]
    fn rejects_out_of_range_ports() {
        for port in [0, 65536, -1] {
            assert_eq!(normalize("10.1.1.200", port).unwrap_err().code(), "INVALID_TARGET");
        }
    }

    #[test]
    fn rejects_malformed_hosts() {
        for host in ["", "   ", "10.1.1.200;rm -rf", "10.1.1.200 && true", "a'b", "a\"b", "a|b", "a&b"] {
            assert_eq!(normalize(host, 80).unwrap_err().code(), "INVALID_TARGET");
        }
    }
}
